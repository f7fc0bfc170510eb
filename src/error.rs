use thiserror::Error;

#[derive(Error, Debug)]
pub enum PgMcpError {
    /// Error reported by the server; carries its message unchanged.
    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Driver(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio_postgres::Error> for PgMcpError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => PgMcpError::Database(db.message().to_string()),
            None => PgMcpError::Driver(err.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for PgMcpError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => e.into(),
            other => PgMcpError::Pool(other.to_string()),
        }
    }
}

impl From<deadpool_postgres::CreatePoolError> for PgMcpError {
    fn from(err: deadpool_postgres::CreatePoolError) -> Self {
        PgMcpError::Config(err.to_string())
    }
}
