use chat_gateway::GatewayError;
use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no active run")]
    NoActiveRun,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("unexpected step: {0}")]
    UnexpectedStep(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("failed to provision run resources: {0}")]
    ResourceProvisioning(#[source] GatewayError),
    #[error("panel delivery failed: {0}")]
    GatewayDelivery(#[source] GatewayError),
    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

impl TrackerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TrackerError::NoActiveRun => ErrorCode::NoActiveRun,
            TrackerError::InvalidTransition(_) => ErrorCode::InvalidTransition,
            TrackerError::UnexpectedStep(_) => ErrorCode::UnexpectedStep,
            TrackerError::Validation(_) => ErrorCode::Validation,
            TrackerError::ResourceProvisioning(_) => ErrorCode::ResourceProvisioning,
            TrackerError::GatewayDelivery(_) => ErrorCode::GatewayDelivery,
            TrackerError::Ledger(_) => ErrorCode::Internal,
        }
    }

    /// Caused by the acting player rather than by the tracker's own dependencies.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TrackerError::NoActiveRun
                | TrackerError::InvalidTransition(_)
                | TrackerError::UnexpectedStep(_)
                | TrackerError::Validation(_)
        )
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let code = err.code();
        let message = match err {
            TrackerError::NoActiveRun => {
                "No active run found! Start one with /start_new_run.".to_string()
            }
            TrackerError::InvalidTransition(reason) | TrackerError::Validation(reason) => reason,
            TrackerError::UnexpectedStep(_) => {
                "This prompt is no longer valid. Please start again from the panel.".to_string()
            }
            TrackerError::ResourceProvisioning(source) => {
                format!("Failed to start new run: {source}")
            }
            TrackerError::GatewayDelivery(_) | TrackerError::Ledger(_) => {
                "Something went wrong while updating the ledger. Please try again.".to_string()
            }
        };
        ApiError::new(code, message)
    }
}
