use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppError {
    /// Session could not be established or renewed
    #[error("Session error: {0}")]
    Session(String),

    /// A single endpoint call failed after exhausting its retry budget
    #[error("Endpoint error: {endpoint} failed after {attempts} attempt(s){}", status_suffix(.status))]
    Endpoint {
        endpoint: String,
        status: Option<u16>,
        attempts: u32,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (last status {})", s)).unwrap_or_default()
}

impl AppError {
    /// Failures confined to one endpoint or one file; the cycle keeps going
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Endpoint { .. } | AppError::Storage(_) | AppError::Parse(_) | AppError::NotFound(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(format!("JSON error: {}", err))
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Storage(format!("CSV error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Alias for convenience
pub type Error = AppError;
