use crate::models::Direction;
use thiserror::Error;

/// Reasons a proposed entry cannot become a `Position`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("position size must be positive (got {0})")]
    NonPositiveSize(f64),
    #[error("position prices and size must be finite")]
    NonFinite,
    #[error(
        "{direction} levels out of order: entry {entry_price}, stop {stop_loss}, target {take_profit}"
    )]
    InvalidLevels {
        direction: Direction,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
    },
}

/// Failures owned by the collaborators around the live monitor.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("bar source failed: {0}")]
    DataSource(String),
    #[error("bar source returned {found} bar(s), at least {required} needed")]
    EmptyData { found: usize, required: usize },
    #[error("notification failed: {0}")]
    Notification(String),
    #[error("notification rejected with HTTP {status}: {body}")]
    NotificationRejected { status: u16, body: String },
    #[error("state store failed: {0}")]
    Persistence(String),
}

impl CollaboratorError {
    /// Whether repeating the same call could succeed: transport failures,
    /// rate limiting and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::NotificationRejected { status, .. } => {
                *status == 429 || *status >= 500
            }
            CollaboratorError::EmptyData { .. } => false,
            CollaboratorError::DataSource(_)
            | CollaboratorError::Notification(_)
            | CollaboratorError::Persistence(_) => true,
        }
    }
}
