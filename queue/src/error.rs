//! Error taxonomy for queue operations.
//!
//! Every public operation returns [`QueueError`]. The variants group failures
//! by what the caller can do about them:
//!
//! - [`QueueError::PolicyDenied`]: business refusal, shown to the customer verbatim
//! - [`QueueError::Conflict`]: the ticket or desk moved on; re-fetch and retry once
//! - [`QueueError::NotFound`] / [`QueueError::InvalidInput`] / [`QueueError::Forbidden`]
//! - [`QueueError::StorageUnavailable`]: the repository is down; reads are retried
//!   with backoff, writes never are

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkin_runtime::StoreError;

/// Reason a ticket could not be issued
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    /// The customer already holds a waiting or serving ticket
    ActiveTicketExists,
    /// The customer owes an evaluation for a completed ticket
    EvaluationPending,
    /// The customer does not meet the lane's eligibility rule
    IneligibleForLane,
    /// The office or the lane is in maintenance
    OfficeUnderMaintenance,
}

impl DenialReason {
    /// Stable reason code for clients and metric labels
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ActiveTicketExists => "ActiveTicketExists",
            Self::EvaluationPending => "EvaluationPending",
            Self::IneligibleForLane => "IneligibleForLane",
            Self::OfficeUnderMaintenance => "OfficeUnderMaintenance",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// State conflict: the entity is not in a state that allows the operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum Conflict {
    /// Another desk already claimed the ticket
    #[error("ticket already claimed by another desk")]
    AlreadyClaimed,
    /// The ticket is no longer waiting
    #[error("ticket is not waiting")]
    NotWaiting,
    /// The ticket is not being served
    #[error("ticket is not being served")]
    NotServing,
    /// The ticket already reached a terminal status
    #[error("ticket can no longer be cancelled")]
    NotCancellable,
    /// Evaluations are only accepted for completed tickets
    #[error("ticket is not completed")]
    NotCompleted,
    /// The ticket already has an evaluation
    #[error("evaluation already submitted")]
    EvaluationAlreadySubmitted,
    /// The desk is serving another ticket
    #[error("desk is busy with another ticket")]
    DeskBusy,
    /// The desk is on break, inactive or unstaffed
    #[error("desk is not available")]
    DeskUnavailable,
    /// The violation is already resolved
    #[error("violation is not active")]
    ViolationNotActive,
}

/// Kind of entity a lookup failed for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Entity {
    /// Ticket
    Ticket,
    /// Desk
    Desk,
    /// Lane
    Lane,
    /// Office
    Office,
    /// Violation
    Violation,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ticket => "ticket",
            Self::Desk => "desk",
            Self::Lane => "lane",
            Self::Office => "office",
            Self::Violation => "violation",
        })
    }
}

/// Errors returned by queue operations
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum QueueError {
    /// Issuance refused for a business reason
    #[error("policy denied: {reason}")]
    PolicyDenied {
        /// Why
        reason: DenialReason,
    },

    /// The entity is in the wrong state
    #[error("state conflict: {0}")]
    Conflict(#[from] Conflict),

    /// No such entity
    #[error("{0} not found")]
    NotFound(Entity),

    /// Malformed request
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The actor's role does not allow the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The repository could not be reached
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The service is shutting down and not accepting operations
    #[error("service is shutting down")]
    ShuttingDown,
}

impl QueueError {
    /// Policy denial constructor
    #[must_use]
    pub const fn denied(reason: DenialReason) -> Self {
        Self::PolicyDenied { reason }
    }

    /// Whether the caller can fix the problem themselves
    #[must_use]
    pub const fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::PolicyDenied { .. } | Self::InvalidInput(_) | Self::Forbidden(_)
        )
    }

    /// State conflict (409-equivalent)
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether an idempotent read may be retried
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// HTTP status equivalent
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::PolicyDenied { .. } | Self::Forbidden(_) => 403,
            Self::Conflict(_) => 409,
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::StorageUnavailable(_) | Self::ShuttingDown => 503,
        }
    }

    /// Metric label
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PolicyDenied { .. } => "policy_denied",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Forbidden(_) => "forbidden",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl From<DenialReason> for QueueError {
    fn from(reason: DenialReason) -> Self {
        Self::denied(reason)
    }
}

impl From<StoreError> for QueueError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ShutdownInProgress | StoreError::ShutdownTimeout(_) => Self::ShuttingDown,
            StoreError::Timeout => Self::StorageUnavailable(error.to_string()),
        }
    }
}

/// Repository-level errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store could not be reached or refused the operation
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// A stored document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the same call might succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StorageError> for QueueError {
    fn from(error: StorageError) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

/// Result alias for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(QueueError::denied(DenialReason::EvaluationPending).http_status(), 403);
        assert_eq!(QueueError::from(Conflict::AlreadyClaimed).http_status(), 409);
        assert_eq!(QueueError::NotFound(Entity::Ticket).http_status(), 404);
        assert_eq!(QueueError::InvalidInput("reason".into()).http_status(), 400);
        assert_eq!(QueueError::StorageUnavailable("down".into()).http_status(), 503);
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(QueueError::StorageUnavailable("down".into()).is_retryable());
        assert!(!QueueError::from(Conflict::NotWaiting).is_retryable());
        assert!(!QueueError::denied(DenialReason::ActiveTicketExists).is_retryable());
        assert!(QueueError::denied(DenialReason::ActiveTicketExists).is_user_actionable());
        assert!(QueueError::from(Conflict::NotServing).is_conflict());
    }

    #[test]
    fn denial_message_carries_reason_code() {
        let error = QueueError::denied(DenialReason::IneligibleForLane);
        assert_eq!(error.to_string(), "policy denied: IneligibleForLane");
    }

    #[test]
    fn shutdown_maps_to_shutting_down() {
        assert_eq!(
            QueueError::from(StoreError::ShutdownInProgress),
            QueueError::ShuttingDown
        );
        assert!(!StorageError::Serialization(
            serde_json::from_str::<u8>("x").unwrap_err()
        )
        .is_transient());
    }
}
