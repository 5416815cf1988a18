use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrafficError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
