use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::{check_role, ADMINS};
use crate::jobs::notify_unit;
use crate::limits::*;
use crate::model::*;
use crate::push::{Notification, NotificationKind};
use crate::rewards::Award;

use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub profile: UserProfile,
    pub award: Option<Award>,
}

fn report_status_transition(from: ReportStatus, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        from: from.as_str(),
        action,
    }
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(
        &self,
        actor: &Actor,
        profile: UserProfile,
    ) -> Result<UserProfile, EngineError> {
        check_role(actor, ADMINS, "register users")?;
        if let Some(name) = &profile.full_name
            && name.len() > MAX_FULL_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("full name too long"));
        }
        self.persist(Event::UserRegistered {
            profile: profile.clone(),
        })
        .await?;
        info!(user = %profile.id, role = profile.role.as_str(), "user registered");
        Ok(profile)
    }

    /// Set the caller's display name. Completing a previously empty profile earns
    /// `ProfileCompleted` once; later edits earn nothing.
    pub async fn update_profile(
        &self,
        actor: &Actor,
        full_name: Option<String>,
    ) -> Result<ProfileUpdate, EngineError> {
        let full_name = full_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if full_name.as_ref().is_some_and(|n| n.len() > MAX_FULL_NAME_LEN) {
            return Err(EngineError::LimitExceeded("full name too long"));
        }
        let before = self
            .repo
            .user(actor.user_id)
            .await?
            .ok_or(EngineError::NotFound(actor.user_id))?;

        // Only the update that actually fills the empty name earns the award.
        let completes = !before.has_full_name() && full_name.is_some();
        let update = |completes| Event::ProfileUpdated {
            user_id: actor.user_id,
            full_name: full_name.clone(),
            completes,
        };
        let completed = match self.persist(update(completes)).await {
            Ok(()) => completes,
            Err(EngineError::Stale(_)) => {
                debug!(user = %actor.user_id, "profile completed concurrently, applying as an edit");
                self.persist(update(false)).await?;
                false
            }
            Err(e) => return Err(e),
        };

        let award = if completed {
            self.reward(actor.user_id, XpAction::ProfileCompleted, None)
                .await
        } else {
            None
        };

        Ok(ProfileUpdate {
            profile: UserProfile {
                full_name,
                ..before
            },
            award,
        })
    }

    // ── Infractions ──────────────────────────────────────────

    pub async fn report_infraction(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        condominium_id: Ulid,
        report_type: ReportType,
        description: Option<String>,
    ) -> Result<InfractionReport, EngineError> {
        if description
            .as_ref()
            .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
        {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        let booking = self.load_booking(booking_id).await?;

        let report = InfractionReport {
            id: Ulid::new(),
            booking_id,
            reporter_id: actor.user_id,
            condominium_id,
            report_type,
            description,
            status: ReportStatus::Pending,
            created_at: self.clock.now(),
            resolved_at: None,
            resolved_by: None,
        };
        self.persist(Event::InfractionReported {
            report: report.clone(),
        })
        .await?;
        info!(report = %report.id, booking = %booking_id, kind = ?report_type, "infraction reported");

        if booking.user_id != actor.user_id {
            let note = Notification {
                title: "An infraction was reported on your booking".into(),
                body: "The administration will review it.".into(),
                url: Some(format!("/bookings/{booking_id}")),
                kind: NotificationKind::Infraction,
            };
            self.notify_user(booking.user_id, &note).await;
        }

        self.reward(actor.user_id, XpAction::InfractionReported, Some(report.id))
            .await;
        Ok(report)
    }

    /// `pending -> resolved | dismissed`. What resolution entails is up to the administrator.
    pub async fn resolve_infraction(
        &self,
        actor: &Actor,
        id: Ulid,
        outcome: ReportStatus,
    ) -> Result<InfractionReport, EngineError> {
        check_role(actor, ADMINS, "resolve infractions")?;
        let report = self
            .repo
            .infraction(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        if report.status != ReportStatus::Pending {
            return Err(report_status_transition(report.status, "resolve"));
        }
        if outcome == ReportStatus::Pending {
            return Err(report_status_transition(report.status, "reopen"));
        }

        let at = self.clock.now();
        match self
            .persist(Event::InfractionResolved {
                id,
                status: outcome,
                by: actor.user_id,
                at,
            })
            .await
        {
            Ok(()) => {}
            Err(EngineError::Stale(_)) => {
                // Another administrator got there first.
                let current = self.repo.infraction(id).await?.ok_or(EngineError::NotFound(id))?;
                return Err(report_status_transition(current.status, "resolve"));
            }
            Err(e) => return Err(e),
        }
        info!(report = %id, outcome = outcome.as_str(), "infraction resolved");
        Ok(InfractionReport {
            status: outcome,
            resolved_at: Some(at),
            resolved_by: Some(actor.user_id),
            ..report
        })
    }

    // ── Sanctions ────────────────────────────────────────────

    pub async fn impose_sanction(
        &self,
        actor: &Actor,
        unit_id: Ulid,
        kind: SanctionType,
        reason: Option<String>,
        ends_at: Option<Ms>,
    ) -> Result<Sanction, EngineError> {
        check_role(actor, ADMINS, "impose sanctions")?;
        if reason
            .as_ref()
            .is_some_and(|r| r.len() > MAX_SANCTION_REASON_LEN)
        {
            return Err(EngineError::LimitExceeded("sanction reason too long"));
        }
        let now = self.clock.now();
        if let Some(end) = ends_at
            && end <= now
        {
            return Err(EngineError::InvalidRange { start: now, end });
        }

        let sanction = Sanction {
            id: Ulid::new(),
            unit_id,
            kind,
            reason,
            is_active: true,
            created_at: now,
            ends_at,
            lifted_at: None,
            lifted_by: None,
        };
        self.persist(Event::SanctionImposed {
            sanction: sanction.clone(),
        })
        .await?;
        info!(sanction = %sanction.id, unit = %unit_id, kind = ?kind, "sanction imposed");

        let note = Notification {
            title: "A sanction was applied to your unit".into(),
            body: sanction
                .reason
                .clone()
                .unwrap_or_else(|| "Contact the administration for details.".into()),
            url: Some("/sanctions".into()),
            kind: NotificationKind::Sanction,
        };
        notify_unit(self.repo.as_ref(), self.notifier.as_ref(), unit_id, &note).await;
        Ok(sanction)
    }

    /// Administrator lifts a sanction early. Lifting an inactive sanction is a no-op.
    pub async fn lift_sanction(&self, actor: &Actor, id: Ulid) -> Result<Sanction, EngineError> {
        check_role(actor, ADMINS, "lift sanctions")?;
        let sanction = self
            .repo
            .sanction(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        if !sanction.is_active {
            debug!(sanction = %id, "already inactive");
            return Ok(sanction);
        }

        match self
            .persist(Event::SanctionLifted {
                id,
                at: self.clock.now(),
                by: Some(actor.user_id),
            })
            .await
        {
            Ok(()) => info!(sanction = %id, by = %actor.user_id, "sanction lifted"),
            Err(EngineError::Stale(_)) => debug!(sanction = %id, "lifted concurrently"),
            Err(e) => return Err(e),
        }
        self.repo
            .sanction(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }
}
