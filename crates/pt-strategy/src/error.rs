use thiserror::Error;

/// The four error kinds shared by every crate in this workspace.
#[derive(Debug, Error)]
pub enum PtError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("no configuration satisfies the strategy's minimum-TPR floor")]
    NoClassifiable,
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),
}

impl From<pt_traffic::TrafficError> for PtError {
    fn from(e: pt_traffic::TrafficError) -> Self {
        match e {
            pt_traffic::TrafficError::InvalidArgument(msg) => PtError::InvalidArgument(msg),
        }
    }
}

impl From<pt_stats::StatsError> for PtError {
    fn from(e: pt_stats::StatsError) -> Self {
        PtError::InsufficientData(e.to_string())
    }
}
