//! Periodic sweeps. Each is a plain async function over an injected repository and an
//! explicit `now`, so any scheduler (cron, queue trigger, the `watch` loop below) can drive it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::config::BookingPolicy;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::push::{Notification, NotificationKind, Notifier};
use crate::repo::{InMemoryRepository, RepoError, Repository};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderSweep {
    /// Bookings this run claimed and dispatched.
    pub processed: usize,
    /// Recipients that got the reminder on at least one device.
    pub notified: usize,
    /// The time budget ran out before every due booking was handled.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    pub expired_count: usize,
    pub expired_ids: Vec<Ulid>,
}

fn budget_exceeded(what: &str) -> EngineError {
    EngineError::RepositoryUnavailable(format!("{what} exceeded the sweep budget"))
}

/// Send `note` to every active member of the unit. Returns how many were reached.
pub async fn notify_unit(
    repo: &dyn Repository,
    notifier: &dyn Notifier,
    unit_id: Ulid,
    note: &Notification,
) -> usize {
    let members = match repo.unit_members(unit_id).await {
        Ok(members) => members,
        Err(e) => {
            warn!(unit = %unit_id, "could not resolve unit members: {e}");
            return 0;
        }
    };
    let sends = members.iter().map(|m| notifier.send(m.id, note));
    let results = futures::future::join_all(sends).await;

    let mut reached = 0;
    for (member, result) in members.iter().zip(results) {
        match result {
            Ok(report) if report.delivered > 0 => reached += 1,
            Ok(_) => debug!(user = %member.id, "no device accepted the notification"),
            Err(e) => warn!(user = %member.id, "notification failed: {e}"),
        }
    }
    reached
}

/// Remind the unit of every active booking ending in `[now + lead, now + lead + window]`.
///
/// The `reminder_sent` flag is claimed before dispatch with a conditional write, so overlapping
/// runs remind each booking at most once. Delivery failures are logged and not retried.
pub async fn run_reminder_sweep(
    repo: &dyn Repository,
    notifier: &dyn Notifier,
    policy: &BookingPolicy,
    now: Ms,
    budget: Duration,
) -> Result<ReminderSweep, EngineError> {
    let started = Instant::now();
    let deadline = started + budget;
    let from = now + policy.reminder_lead;
    let to = from + policy.reminder_window;

    let due = timeout_at(
        deadline,
        repo.bookings_ending_between(BookingStatus::Active, from, to),
    )
    .await
    .map_err(|_| budget_exceeded("reminder query"))??;

    let mut sweep = ReminderSweep::default();
    for (i, booking) in due.iter().enumerate() {
        if booking.reminder_sent {
            continue;
        }
        if Instant::now() >= deadline {
            warn!(remaining = due.len() - i, "reminder sweep out of time");
            sweep.truncated = true;
            break;
        }

        match repo
            .commit(&Event::ReminderMarked {
                id: booking.id,
                spot_id: booking.spot_id,
            })
            .await
        {
            Ok(()) => {}
            Err(RepoError::Stale(_)) | Err(RepoError::NotFound(_)) => {
                debug!(booking = %booking.id, "reminder already claimed");
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let minutes_left = (booking.end() - now).max(0) / MINUTE;
        let note = Notification {
            title: "Visitor parking ends soon".into(),
            body: format!(
                "The booking ends in {minutes_left} minutes. Please free the spot or ask for an extension."
            ),
            url: Some(format!("/bookings/{}", booking.id)),
            kind: NotificationKind::Reminder,
        };
        sweep.notified += notify_unit(repo, notifier, booking.unit_id, &note).await;
        sweep.processed += 1;
        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(1);
    }

    metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS, "sweep" => "reminders")
        .record(started.elapsed().as_secs_f64());
    info!(
        processed = sweep.processed,
        notified = sweep.notified,
        truncated = sweep.truncated,
        "reminder sweep done"
    );
    Ok(sweep)
}

/// Deactivate every active sanction whose `ends_at` is before `now`. `lifted_by` stays unset.
pub async fn run_expiry_sweep(
    repo: &dyn Repository,
    now: Ms,
    budget: Duration,
) -> Result<ExpirySweep, EngineError> {
    let started = Instant::now();
    let deadline = started + budget;

    let due = timeout_at(deadline, repo.sanctions_expired_by(now))
        .await
        .map_err(|_| budget_exceeded("sanction query"))??;

    let mut sweep = ExpirySweep::default();
    for sanction in &due {
        if Instant::now() >= deadline {
            warn!(remaining = due.len() - sweep.expired_count, "expiry sweep out of time");
            break;
        }
        match repo
            .commit(&Event::SanctionLifted {
                id: sanction.id,
                at: now,
                by: None,
            })
            .await
        {
            Ok(()) => {
                sweep.expired_ids.push(sanction.id);
                sweep.expired_count += 1;
            }
            Err(RepoError::Stale(_)) => debug!(sanction = %sanction.id, "already lifted"),
            Err(e) => return Err(e.into()),
        }
    }

    metrics::counter!(crate::observability::SANCTIONS_EXPIRED_TOTAL)
        .increment(sweep.expired_count as u64);
    metrics::histogram!(crate::observability::SWEEP_DURATION_SECONDS, "sweep" => "sanctions")
        .record(started.elapsed().as_secs_f64());
    info!(expired = sweep.expired_count, "sanction expiry sweep done");
    Ok(sweep)
}

impl Engine {
    pub async fn run_reminder_sweep(&self, budget: Duration) -> Result<ReminderSweep, EngineError> {
        run_reminder_sweep(
            self.repo().as_ref(),
            self.notifier().as_ref(),
            self.policy(),
            self.now(),
            budget,
        )
        .await
    }

    pub async fn run_expiry_sweep(&self, budget: Duration) -> Result<ExpirySweep, EngineError> {
        run_expiry_sweep(self.repo().as_ref(), self.now(), budget).await
    }
}

/// Run both sweeps every `interval` until the task is dropped.
pub async fn run_sweeper(engine: Arc<Engine>, interval: Duration, budget: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = engine.run_reminder_sweep(budget).await {
            metrics::counter!(crate::observability::SWEEP_FAILURES_TOTAL, "sweep" => "reminders")
                .increment(1);
            error!("reminder sweep failed, retrying next tick: {e}");
        }
        if let Err(e) = engine.run_expiry_sweep(budget).await {
            metrics::counter!(crate::observability::SWEEP_FAILURES_TOTAL, "sweep" => "sanctions")
                .increment(1);
            error!("expiry sweep failed, retrying next tick: {e}");
        }
    }
}

/// Compact the journal whenever more than `threshold` events were appended since the last time.
pub async fn run_compactor(repo: Arc<InMemoryRepository>, threshold: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let appended = repo.appends_since_compact().await;
        if appended < threshold {
            continue;
        }
        match repo.compact().await {
            Ok(kept) => info!(appended, kept, "compacted journal"),
            Err(e) => error!("compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::push::InboxNotifier;

    const M: Ms = MINUTE;
    const T0: Ms = 1_700_000_000_000;
    const BUDGET: Duration = Duration::from_secs(5);

    /// Delegates to an in-memory repository until switched off.
    #[derive(Default)]
    struct SwitchableRepository {
        inner: InMemoryRepository,
        down: AtomicBool,
    }

    impl SwitchableRepository {
        fn check(&self) -> Result<(), RepoError> {
            if self.down.load(Ordering::SeqCst) {
                Err(RepoError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Repository for SwitchableRepository {
        async fn commit(&self, event: &Event) -> Result<(), RepoError> {
            self.check()?;
            self.inner.commit(event).await
        }
        async fn booking(&self, id: Ulid) -> Result<Option<Booking>, RepoError> {
            self.check()?;
            self.inner.booking(id).await
        }
        async fn bookings_for_spot(&self, spot_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError> {
            self.check()?;
            self.inner.bookings_for_spot(spot_id, window).await
        }
        async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, RepoError> {
            self.check()?;
            self.inner.bookings_for_user(user_id).await
        }
        async fn bookings_ending_between(
            &self,
            status: BookingStatus,
            from: Ms,
            to: Ms,
        ) -> Result<Vec<Booking>, RepoError> {
            self.check()?;
            self.inner.bookings_ending_between(status, from, to).await
        }
        async fn user(&self, id: Ulid) -> Result<Option<UserProfile>, RepoError> {
            self.check()?;
            self.inner.user(id).await
        }
        async fn unit_members(&self, unit_id: Ulid) -> Result<Vec<UserProfile>, RepoError> {
            self.check()?;
            self.inner.unit_members(unit_id).await
        }
        async fn sanction(&self, id: Ulid) -> Result<Option<Sanction>, RepoError> {
            self.check()?;
            self.inner.sanction(id).await
        }
        async fn sanctions_for_unit(&self, unit_id: Ulid) -> Result<Vec<Sanction>, RepoError> {
            self.check()?;
            self.inner.sanctions_for_unit(unit_id).await
        }
        async fn sanctions_expired_by(&self, now: Ms) -> Result<Vec<Sanction>, RepoError> {
            self.check()?;
            self.inner.sanctions_expired_by(now).await
        }
        async fn infraction(&self, id: Ulid) -> Result<Option<InfractionReport>, RepoError> {
            self.check()?;
            self.inner.infraction(id).await
        }
        async fn infractions_for_condominium(
            &self,
            condominium_id: Ulid,
        ) -> Result<Vec<InfractionReport>, RepoError> {
            self.check()?;
            self.inner.infractions_for_condominium(condominium_id).await
        }
        async fn xp_total(&self, user_id: Ulid) -> Result<u64, RepoError> {
            self.check()?;
            self.inner.xp_total(user_id).await
        }
    }

    async fn member(repo: &dyn Repository, unit_id: Ulid, active: bool) -> Ulid {
        let id = Ulid::new();
        repo.commit(&Event::UserRegistered {
            profile: UserProfile {
                id,
                unit_id: Some(unit_id),
                role: Role::Resident,
                full_name: None,
                active,
            },
        })
        .await
        .unwrap();
        id
    }

    async fn active_booking(repo: &dyn Repository, unit_id: Ulid, start: Ms, end: Ms) -> Ulid {
        let id = Ulid::new();
        repo.commit(&Event::BookingCreated {
            booking: Booking {
                id,
                spot_id: Ulid::new(),
                unit_id,
                user_id: Ulid::new(),
                span: Span::new(start, end),
                status: BookingStatus::Active,
                reminder_sent: false,
                is_extended: false,
                original_end: None,
                extension_reason: None,
                created_at: start,
                checked_in_at: Some(start),
                checked_out_at: None,
                cancelled_at: None,
            },
        })
        .await
        .unwrap();
        id
    }

    async fn sanction(repo: &dyn Repository, ends_at: Option<Ms>) -> Ulid {
        let id = Ulid::new();
        repo.commit(&Event::SanctionImposed {
            sanction: Sanction {
                id,
                unit_id: Ulid::new(),
                kind: SanctionType::Fee,
                reason: None,
                is_active: true,
                created_at: 0,
                ends_at,
                lifted_at: None,
                lifted_by: None,
            },
        })
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn reminds_only_inside_window() {
        let repo = InMemoryRepository::volatile();
        let inbox = InboxNotifier::new();
        let unit = Ulid::new();
        let alice = member(&repo, unit, true).await;
        let bob = member(&repo, unit, true).await;
        let gone = member(&repo, unit, false).await;

        let due = active_booking(&repo, unit, T0 - 30 * M, T0 + 15 * M).await;
        active_booking(&repo, Ulid::new(), T0 - 30 * M, T0 + 14 * M).await; // too soon
        active_booking(&repo, Ulid::new(), T0 - 30 * M, T0 + 21 * M).await; // too far
        let edge = active_booking(&repo, Ulid::new(), T0, T0 + 20 * M).await; // upper edge

        let sweep = run_reminder_sweep(&repo, &inbox, &BookingPolicy::default(), T0, BUDGET)
            .await
            .unwrap();
        assert_eq!(sweep.processed, 2);
        assert_eq!(sweep.notified, 2); // edge booking's unit has no members
        assert!(!sweep.truncated);

        assert_eq!(inbox.inbox(alice).len(), 1);
        assert_eq!(inbox.inbox(bob).len(), 1);
        assert!(inbox.inbox(gone).is_empty());
        assert_eq!(inbox.inbox(alice)[0].url, Some(format!("/bookings/{due}")));
        assert!(repo.booking(edge).await.unwrap().unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn second_run_skips_reminded_bookings() {
        let repo = InMemoryRepository::volatile();
        let inbox = InboxNotifier::new();
        let unit = Ulid::new();
        let alice = member(&repo, unit, true).await;
        active_booking(&repo, unit, T0, T0 + 17 * M).await;
        let policy = BookingPolicy::default();

        let first = run_reminder_sweep(&repo, &inbox, &policy, T0, BUDGET).await.unwrap();
        let second = run_reminder_sweep(&repo, &inbox, &policy, T0, BUDGET).await.unwrap();
        assert_eq!(first.processed, 1);
        assert_eq!(second.processed, 0);
        assert_eq!(inbox.inbox(alice).len(), 1);
    }

    #[tokio::test]
    async fn overlapping_runs_remind_once() {
        let repo = InMemoryRepository::volatile();
        let inbox = InboxNotifier::new();
        let unit = Ulid::new();
        let alice = member(&repo, unit, true).await;
        for _ in 0..5 {
            active_booking(&repo, unit, T0, T0 + 16 * M).await;
        }
        let policy = BookingPolicy::default();

        let (a, b) = tokio::join!(
            run_reminder_sweep(&repo, &inbox, &policy, T0, BUDGET),
            run_reminder_sweep(&repo, &inbox, &policy, T0, BUDGET),
        );
        assert_eq!(a.unwrap().processed + b.unwrap().processed, 5);
        assert_eq!(inbox.inbox(alice).len(), 5);
    }

    #[tokio::test]
    async fn reminder_sweep_fails_whole_when_store_down() {
        let repo = SwitchableRepository::default();
        repo.down.store(true, Ordering::SeqCst);
        let err = run_reminder_sweep(&repo, &InboxNotifier::new(), &BookingPolicy::default(), T0, BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RepositoryUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn expiry_lifts_past_due_only() {
        let repo = InMemoryRepository::volatile();
        let past = sanction(&repo, Some(T0 - 1)).await;
        let exact = sanction(&repo, Some(T0)).await;
        let open_ended = sanction(&repo, None).await;

        let sweep = run_expiry_sweep(&repo, T0, BUDGET).await.unwrap();
        assert_eq!(sweep.expired_ids, vec![past]);
        assert_eq!(sweep.expired_count, 1);

        let lifted = repo.sanction(past).await.unwrap().unwrap();
        assert!(!lifted.is_active);
        assert_eq!(lifted.lifted_at, Some(T0));
        assert_eq!(lifted.lifted_by, None);
        assert!(repo.sanction(exact).await.unwrap().unwrap().is_active);
        assert!(repo.sanction(open_ended).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn expiry_rerun_is_empty() {
        let repo = InMemoryRepository::volatile();
        sanction(&repo, Some(T0 - 10)).await;
        sanction(&repo, Some(T0 - 20)).await;
        assert_eq!(run_expiry_sweep(&repo, T0, BUDGET).await.unwrap().expired_count, 2);
        assert_eq!(run_expiry_sweep(&repo, T0, BUDGET).await.unwrap(), ExpirySweep::default());
    }

    #[tokio::test]
    async fn expiry_sweep_reports_outage() {
        let repo = SwitchableRepository::default();
        sanction(&repo, Some(T0 - 10)).await;
        repo.down.store(true, Ordering::SeqCst);
        assert!(matches!(
            run_expiry_sweep(&repo, T0, BUDGET).await,
            Err(EngineError::RepositoryUnavailable(_))
        ));
    }
}
