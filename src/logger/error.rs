use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoggerError {
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInstalled(String),
}
