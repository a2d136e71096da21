mod conflict;
mod error;
mod lifecycle;
mod queries;
mod reports;
mod window;

pub use conflict::find_conflict;
pub use error::EngineError;
pub use lifecycle::{BookingRequest, CheckInOutcome, CheckOutOutcome};
pub use reports::ProfileUpdate;
pub use window::{validate_extension, validate_window};

use std::sync::Arc;

use tracing::warn;
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::BookingPolicy;
use crate::model::*;
use crate::notify::EventHub;
use crate::push::{Notification, Notifier};
use crate::repo::Repository;
use crate::rewards::{Award, RewardBridge, XpTable};

/// Booking workflow over an injected repository, notifier and clock.
pub struct Engine {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    rewards: RewardBridge,
    pub hub: Arc<EventHub>,
}

impl Engine {
    pub fn new(
        repo: Arc<dyn Repository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self::with_xp_table(repo, notifier, clock, policy, XpTable::default())
    }

    pub fn with_xp_table(
        repo: Arc<dyn Repository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        table: XpTable,
    ) -> Self {
        let rewards = RewardBridge::new(repo.clone(), notifier.clone(), table);
        Self {
            repo,
            notifier,
            clock,
            policy,
            rewards,
            hub: Arc::new(EventHub::new()),
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn rewards(&self) -> &RewardBridge {
        &self.rewards
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    /// Commit + broadcast in one call.
    pub(super) async fn persist(&self, event: Event) -> Result<(), EngineError> {
        self.repo.commit(&event).await?;
        self.hub.publish(&event);
        Ok(())
    }

    pub(super) async fn load_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.repo
            .booking(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Best effort; a failed delivery never fails the operation that triggered it.
    pub(super) async fn notify_user(&self, user_id: Ulid, note: &Notification) {
        if let Err(e) = self.notifier.send(user_id, note).await {
            warn!(%user_id, kind = note.kind.as_str(), "notification failed: {e}");
        }
    }

    /// XP is a side effect of a transition that has already committed, so a failure here is
    /// logged rather than returned.
    pub(super) async fn reward(
        &self,
        user_id: Ulid,
        action: XpAction,
        context_id: Option<Ulid>,
    ) -> Option<Award> {
        match self
            .rewards
            .award_xp(user_id, action, context_id, self.clock.now())
            .await
        {
            Ok(award) => Some(award),
            Err(e) => {
                warn!(%user_id, action = action.as_str(), "xp award failed: {e}");
                None
            }
        }
    }
}
