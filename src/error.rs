use thiserror::Error;

/// Boxed error returned by processors and other injected collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue is closed")]
    QueueClosed,

    #[error("Average rate undefined: {0}")]
    DivisionUndefined(&'static str),

    /// Transport or service failure reported by a [`ReportApi`](crate::monitor::ReportApi).
    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Status cache error: {0}")]
    Cache(String),
}

pub type Result<T> = std::result::Result<T, IngestError>;
