use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feature service error {code}: {message}")]
    Service { code: i64, message: String },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl AppError {
    /// Whether the fetcher should retry the request that produced this error.
    ///
    /// Every transport failure is retried: network errors, any non-2xx
    /// status, and bodies that do not decode. Query errors the service
    /// reports inside a 200 response and local setup errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(_) | AppError::Json(_) | AppError::Io(_) => true,
            AppError::Service { .. }
            | AppError::Config(_)
            | AppError::Url(_)
            | AppError::InvalidData(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
