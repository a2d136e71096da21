use ulid::Ulid;

use crate::model::{Ms, Role};
use crate::repo::RepoError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidRange {
        start: Ms,
        end: Ms,
    },
    InvalidDuration {
        duration_ms: Ms,
    },
    DoubleBooking {
        spot_id: Ulid,
        conflicting: Ulid,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Forbidden {
        role: Role,
        action: &'static str,
    },
    AlreadyActiveOrCompleted(Ulid),
    AlreadyCompleted(Ulid),
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    /// A guarded write lost against a concurrent writer.
    Stale(Ulid),
    LimitExceeded(&'static str),
    RepositoryUnavailable(String),
}

impl EngineError {
    /// Only storage outages are worth retrying; everything else is a final answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::RepositoryUnavailable(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: end {end} is not after start {start}")
            }
            EngineError::InvalidDuration { duration_ms } => {
                write!(f, "invalid duration: {duration_ms}ms")
            }
            EngineError::DoubleBooking {
                spot_id,
                conflicting,
            } => write!(
                f,
                "spot {spot_id} is already booked for that time (booking {conflicting})"
            ),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden { role, action } => {
                write!(f, "role {} may not {action}", role.as_str())
            }
            EngineError::AlreadyActiveOrCompleted(id) => {
                write!(f, "booking {id} is already active or completed")
            }
            EngineError::AlreadyCompleted(id) => write!(f, "booking {id} is already completed"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} from status {from}")
            }
            EngineError::Stale(id) => write!(f, "record {id} was changed concurrently"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::RepositoryUnavailable(e) => write!(f, "repository unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<RepoError> for EngineError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Overlap { spot_id, existing } => EngineError::DoubleBooking {
                spot_id,
                conflicting: existing,
            },
            RepoError::NotFound(id) => EngineError::NotFound(id),
            RepoError::AlreadyExists(id) => EngineError::AlreadyExists(id),
            RepoError::Stale(id) => EngineError::Stale(id),
            RepoError::Unavailable(msg) => EngineError::RepositoryUnavailable(msg),
        }
    }
}
