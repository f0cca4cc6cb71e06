use hl7_codec::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("message encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("service line {line} references diagnosis {code} not declared on the claim")]
    UnknownDiagnosis { line: usize, code: String },

    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    #[error("write error: {0}")]
    Write(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;
