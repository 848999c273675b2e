use thiserror::Error;

#[derive(Error, Debug)]
pub enum SQLError {
    #[error("query error: {0}")]
    Query(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    /// Raised by a transaction body to request a rollback without an
    /// underlying storage failure (e.g. a failed conditional update).
    #[error("{0}")]
    Aborted(String),
}
