mod memory;
mod timeline;

pub use memory::InMemoryRepository;
pub use timeline::SpotTimeline;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// A blocking booking already covers part of the requested interval.
    Overlap { spot_id: Ulid, existing: Ulid },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// A conditional write found the record already moved on.
    Stale(Ulid),
    Unavailable(String),
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::Overlap { spot_id, existing } => {
                write!(f, "overlaps booking {existing} on spot {spot_id}")
            }
            RepoError::NotFound(id) => write!(f, "not found: {id}"),
            RepoError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            RepoError::Stale(id) => write!(f, "conditional write lost on {id}"),
            RepoError::Unavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for RepoError {}

/// Persistent store behind the engine and the sweeps.
///
/// `commit` is the only write path and is atomic per event:
/// - `BookingCreated` (blocking status), `BookingConfirmed` and `ExtensionResolved` are rejected
///   with `Overlap` if the resulting interval would intersect another confirmed/active booking
///   on the same spot.
/// - Status transitions are conditional on the status they leave, and fail with `Stale` when a
///   concurrent commit moved the booking first: `BookingConfirmed` needs `pending`, `CheckedIn`
///   needs `confirmed`, `CheckedOut`, `ExtensionRequested` and `ExtensionResolved` need a
///   blocking status, `BookingCancelled` needs a non-terminal one.
/// - `ReminderMarked`, `SanctionLifted` and a completing `ProfileUpdated` are conditional too:
///   they fail with `Stale` when the flag or name was already set, so exactly one concurrent
///   caller wins.
/// - Events about a record that does not exist fail with `NotFound`.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn commit(&self, event: &Event) -> Result<(), RepoError>;

    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, RepoError>;

    /// Every booking on the spot (any status) whose interval overlaps `window`.
    async fn bookings_for_spot(&self, spot_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError>;

    async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, RepoError>;

    /// Bookings in `status` whose end time lies in `[from, to]` (both inclusive).
    async fn bookings_ending_between(
        &self,
        status: BookingStatus,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Booking>, RepoError>;

    async fn user(&self, id: Ulid) -> Result<Option<UserProfile>, RepoError>;

    /// Active users belonging to the unit.
    async fn unit_members(&self, unit_id: Ulid) -> Result<Vec<UserProfile>, RepoError>;

    async fn sanction(&self, id: Ulid) -> Result<Option<Sanction>, RepoError>;

    async fn sanctions_for_unit(&self, unit_id: Ulid) -> Result<Vec<Sanction>, RepoError>;

    /// Active sanctions whose `ends_at` is strictly before `now`.
    async fn sanctions_expired_by(&self, now: Ms) -> Result<Vec<Sanction>, RepoError>;

    async fn infraction(&self, id: Ulid) -> Result<Option<InfractionReport>, RepoError>;

    async fn infractions_for_condominium(
        &self,
        condominium_id: Ulid,
    ) -> Result<Vec<InfractionReport>, RepoError>;

    async fn xp_total(&self, user_id: Ulid) -> Result<u64, RepoError>;
}
