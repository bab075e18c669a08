use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibError {
    /// The parameter or series store could not be reached or rejected a statement.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid date '{value}' in store")]
    InvalidDate { value: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CalibResult<T> = Result<T, CalibError>;
