use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("field value contains a segment terminator: {value:?}")]
    MalformedField { value: String },

    #[error("claim has no service lines")]
    EmptyClaim,

    #[error("claim has {count} service lines, DFT^P03 carries at most 99")]
    LineLimitExceeded { count: usize },

    #[error("service line {line} has no linked diagnosis")]
    MissingDiagnosis { line: usize },

    #[error("declared total {declared} disagrees with line total {computed}")]
    TotalMismatch { computed: Decimal, declared: Decimal },
}

pub type CodecResult<T> = Result<T, CodecError>;
