use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
