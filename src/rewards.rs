//! Experience points and levels.
//!
//! Points are append-only: the bridge records whatever it is asked to record. One-time actions
//! such as `ProfileCompleted` must be guarded by the caller before calling [`RewardBridge::award_xp`].

use std::sync::Arc;

use tracing::{info, warn};
use ulid::Ulid;

use crate::model::{Event, Ms, XpAction, XpEntry};
use crate::push::{Notification, NotificationKind, Notifier};
use crate::repo::{RepoError, Repository};

/// XP needed to reach level `i + 1`.
pub const LEVEL_THRESHOLDS: [u64; 10] = [0, 50, 150, 300, 500, 750, 1050, 1400, 1800, 2250];

pub const MAX_LEVEL: u32 = LEVEL_THRESHOLDS.len() as u32;

/// Highest level whose threshold is at or below `xp`.
pub fn calculate_level(xp: u64) -> u32 {
    LEVEL_THRESHOLDS.iter().take_while(|t| **t <= xp).count() as u32
}

/// Percent (0..=100) of the way from `level`'s floor to the next level's floor.
pub fn level_progress(xp: u64, level: u32) -> f64 {
    if level >= MAX_LEVEL {
        return 100.0;
    }
    let idx = level.max(1) as usize - 1;
    let floor = LEVEL_THRESHOLDS[idx] as f64;
    let next = LEVEL_THRESHOLDS[idx + 1] as f64;
    let ratio = (xp as f64 - floor) / (next - floor);
    ratio.clamp(0.0, 1.0) * 100.0
}

/// Points granted per action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpTable {
    pub booking_created: u64,
    pub check_in_on_time: u64,
    pub check_out_on_time: u64,
    pub booking_completed: u64,
    pub profile_completed: u64,
    pub infraction_reported: u64,
}

impl Default for XpTable {
    fn default() -> Self {
        Self {
            booking_created: 10,
            check_in_on_time: 50,
            check_out_on_time: 30,
            booking_completed: 20,
            profile_completed: 25,
            infraction_reported: 15,
        }
    }
}

impl XpTable {
    pub fn points(&self, action: XpAction) -> u64 {
        match action {
            XpAction::BookingCreated => self.booking_created,
            XpAction::CheckInOnTime => self.check_in_on_time,
            XpAction::CheckOutOnTime => self.check_out_on_time,
            XpAction::BookingCompleted => self.booking_completed,
            XpAction::ProfileCompleted => self.profile_completed,
            XpAction::InfractionReported => self.infraction_reported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Award {
    pub action: XpAction,
    pub points: u64,
    pub new_total: u64,
    pub leveled_up: bool,
    pub new_level: u32,
}

pub struct RewardBridge {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    table: XpTable,
}

impl RewardBridge {
    pub fn new(repo: Arc<dyn Repository>, notifier: Arc<dyn Notifier>, table: XpTable) -> Self {
        Self {
            repo,
            notifier,
            table,
        }
    }

    pub fn table(&self) -> &XpTable {
        &self.table
    }

    /// Append the action's points to the user's ledger. A level-up is announced to the user
    /// on a best-effort basis.
    pub async fn award_xp(
        &self,
        user_id: Ulid,
        action: XpAction,
        context_id: Option<Ulid>,
        at: Ms,
    ) -> Result<Award, RepoError> {
        let points = self.table.points(action);
        let entry = XpEntry {
            user_id,
            action,
            points,
            context_id,
            at,
        };
        self.repo.commit(&Event::XpAwarded { entry }).await?;
        metrics::counter!(crate::observability::XP_AWARDED_TOTAL, "action" => action.as_str())
            .increment(points);

        let new_total = self.repo.xp_total(user_id).await?;
        let previous_level = calculate_level(new_total.saturating_sub(points));
        let new_level = calculate_level(new_total);
        let leveled_up = new_level > previous_level;

        if leveled_up {
            info!(%user_id, new_level, new_total, "level up");
            let note = Notification {
                title: format!("Level {new_level} reached!"),
                body: format!("You now have {new_total} XP."),
                url: Some("/profile".into()),
                kind: NotificationKind::LevelUp,
            };
            if let Err(e) = self.notifier.send(user_id, &note).await {
                warn!(%user_id, "level-up notification failed: {e}");
            }
        }

        Ok(Award {
            action,
            points,
            new_total,
            leveled_up,
            new_level,
        })
    }
}
