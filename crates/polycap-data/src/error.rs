use thiserror::Error;

pub type DataResult<T> = std::result::Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid source location: {0}")]
    InvalidSource(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("sampling error: {0}")]
    Sampling(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("hub error: {0}")]
    Hub(String),
}
