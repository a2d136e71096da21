use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::engine::find_conflict;
use crate::model::*;
use crate::wal::Wal;

use super::{RepoError, Repository, SpotTimeline};

pub type SharedTimeline = Arc<RwLock<SpotTimeline>>;

/// Everything that is not pinned to a spot.
#[derive(Debug, Default)]
struct Ledger {
    users: HashMap<Ulid, UserProfile>,
    sanctions: HashMap<Ulid, Sanction>,
    infractions: HashMap<Ulid, InfractionReport>,
    xp: Vec<XpEntry>,
    xp_totals: HashMap<Ulid, u64>,
}

impl Ledger {
    fn check(&self, event: &Event) -> Result<(), RepoError> {
        match event {
            Event::ProfileUpdated {
                user_id, completes, ..
            } => {
                let user = self.users.get(user_id).ok_or(RepoError::NotFound(*user_id))?;
                if *completes && user.has_full_name() {
                    return Err(RepoError::Stale(*user_id));
                }
            }
            Event::InfractionReported { report } => {
                if self.infractions.contains_key(&report.id) {
                    return Err(RepoError::AlreadyExists(report.id));
                }
            }
            Event::InfractionResolved { id, .. } => {
                let report = self.infractions.get(id).ok_or(RepoError::NotFound(*id))?;
                if report.status != ReportStatus::Pending {
                    return Err(RepoError::Stale(*id));
                }
            }
            Event::SanctionImposed { sanction } => {
                if self.sanctions.contains_key(&sanction.id) {
                    return Err(RepoError::AlreadyExists(sanction.id));
                }
            }
            Event::SanctionLifted { id, .. } => {
                let sanction = self.sanctions.get(id).ok_or(RepoError::NotFound(*id))?;
                if !sanction.is_active {
                    return Err(RepoError::Stale(*id));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::UserRegistered { profile } => {
                self.users.insert(profile.id, profile.clone());
            }
            Event::ProfileUpdated {
                user_id, full_name, ..
            } => {
                if let Some(p) = self.users.get_mut(user_id) {
                    p.full_name = full_name.clone();
                }
            }
            Event::InfractionReported { report } => {
                self.infractions.insert(report.id, report.clone());
            }
            Event::InfractionResolved { id, status, by, at } => {
                if let Some(r) = self.infractions.get_mut(id) {
                    r.status = *status;
                    r.resolved_by = Some(*by);
                    r.resolved_at = Some(*at);
                }
            }
            Event::SanctionImposed { sanction } => {
                self.sanctions.insert(sanction.id, sanction.clone());
            }
            Event::SanctionLifted { id, at, by } => {
                if let Some(s) = self.sanctions.get_mut(id) {
                    s.is_active = false;
                    s.lifted_at = Some(*at);
                    s.lifted_by = *by;
                }
            }
            Event::XpAwarded { entry } => {
                *self.xp_totals.entry(entry.user_id).or_default() += entry.points;
                self.xp.push(entry.clone());
            }
            // Spot events live in the timelines.
            _ => {}
        }
    }

    fn snapshot(&self, events: &mut Vec<Event>) {
        for profile in self.users.values() {
            events.push(Event::UserRegistered {
                profile: profile.clone(),
            });
        }
        for sanction in self.sanctions.values() {
            events.push(Event::SanctionImposed {
                sanction: sanction.clone(),
            });
        }
        for report in self.infractions.values() {
            events.push(Event::InfractionReported {
                report: report.clone(),
            });
        }
        for entry in &self.xp {
            events.push(Event::XpAwarded {
                entry: entry.clone(),
            });
        }
    }
}

/// Guard checks for an event on one spot, evaluated under that spot's write lock.
fn check_spot_event(
    tl: &SpotTimeline,
    event: &Event,
    index: &DashMap<Ulid, Ulid>,
) -> Result<(), RepoError> {
    let overlap = |existing: Ulid| RepoError::Overlap {
        spot_id: tl.spot_id,
        existing,
    };
    match event {
        Event::BookingCreated { booking } => {
            if index.contains_key(&booking.id) {
                return Err(RepoError::AlreadyExists(booking.id));
            }
            if booking.status.blocks()
                && let Some(existing) =
                    find_conflict(tl.overlapping(&booking.span), &booking.span, None)
            {
                return Err(overlap(existing));
            }
        }
        Event::BookingConfirmed { id, .. } => {
            let b = tl.get(id).ok_or(RepoError::NotFound(*id))?;
            if b.status != BookingStatus::Pending {
                return Err(RepoError::Stale(*id));
            }
            if let Some(existing) = find_conflict(tl.overlapping(&b.span), &b.span, Some(*id)) {
                return Err(overlap(existing));
            }
        }
        Event::ExtensionResolved { id, new_end, .. } => {
            let b = tl.get(id).ok_or(RepoError::NotFound(*id))?;
            if !b.status.blocks() {
                return Err(RepoError::Stale(*id));
            }
            if let Some(span) = Span::try_new(b.span.start, *new_end)
                && let Some(existing) = find_conflict(tl.overlapping(&span), &span, Some(*id))
            {
                return Err(overlap(existing));
            }
        }
        Event::ReminderMarked { id, .. } => {
            let b = tl.get(id).ok_or(RepoError::NotFound(*id))?;
            if b.reminder_sent {
                return Err(RepoError::Stale(*id));
            }
        }
        Event::CheckedIn { id, .. } => {
            let b = tl.get(id).ok_or(RepoError::NotFound(*id))?;
            if b.status != BookingStatus::Confirmed {
                return Err(RepoError::Stale(*id));
            }
        }
        Event::CheckedOut { id, .. } | Event::ExtensionRequested { id, .. } => {
            let b = tl.get(id).ok_or(RepoError::NotFound(*id))?;
            if !b.status.blocks() {
                return Err(RepoError::Stale(*id));
            }
        }
        Event::BookingCancelled { id, .. } => {
            let b = tl.get(id).ok_or(RepoError::NotFound(*id))?;
            if b.status.is_terminal() {
                return Err(RepoError::Stale(*id));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Repository held in memory, optionally journaled to a write-ahead log.
///
/// Writes to one spot serialize on that spot's lock, so the overlap check and the insert are
/// a single step. Compaction takes the commit gate exclusively; every commit holds it shared.
pub struct InMemoryRepository {
    spots: DashMap<Ulid, SharedTimeline>,
    /// Reverse lookup: booking id → spot id
    booking_to_spot: DashMap<Ulid, Ulid>,
    ledger: RwLock<Ledger>,
    wal: Option<Mutex<Wal>>,
    commit_gate: RwLock<()>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::volatile()
    }
}

impl InMemoryRepository {
    /// Nothing is written to disk.
    pub fn volatile() -> Self {
        Self::from_parts(HashMap::new(), Ledger::default(), None)
    }

    /// Replay the journal at `path` and keep appending to it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;

        let mut timelines: HashMap<Ulid, SpotTimeline> = HashMap::new();
        let mut ledger = Ledger::default();
        for event in &events {
            match event.spot_id() {
                Some(spot_id) => timelines
                    .entry(spot_id)
                    .or_insert_with(|| SpotTimeline::new(spot_id))
                    .apply(event),
                None => ledger.apply(event),
            }
        }

        info!(events = events.len(), path = %path.display(), "journal replayed");
        Ok(Self::from_parts(timelines, ledger, Some(wal)))
    }

    fn from_parts(
        timelines: HashMap<Ulid, SpotTimeline>,
        ledger: Ledger,
        wal: Option<Wal>,
    ) -> Self {
        let spots = DashMap::new();
        let booking_to_spot = DashMap::new();
        for (spot_id, tl) in timelines {
            for b in &tl.bookings {
                booking_to_spot.insert(b.id, spot_id);
            }
            spots.insert(spot_id, Arc::new(RwLock::new(tl)));
        }
        Self {
            spots,
            booking_to_spot,
            ledger: RwLock::new(ledger),
            wal: wal.map(Mutex::new),
            commit_gate: RwLock::new(()),
        }
    }

    fn timeline(&self, spot_id: Ulid) -> SharedTimeline {
        self.spots
            .entry(spot_id)
            .or_insert_with(|| Arc::new(RwLock::new(SpotTimeline::new(spot_id))))
            .value()
            .clone()
    }

    fn existing_timeline(&self, spot_id: &Ulid) -> Option<SharedTimeline> {
        self.spots.get(spot_id).map(|e| e.value().clone())
    }

    fn all_timelines(&self) -> Vec<SharedTimeline> {
        self.spots.iter().map(|e| e.value().clone()).collect()
    }

    async fn journal(&self, event: &Event) -> Result<(), RepoError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let started = std::time::Instant::now();
        wal.lock()
            .await
            .append(event)
            .map_err(|e| RepoError::Unavailable(e.to_string()))?;
        metrics::histogram!(crate::observability::WAL_APPEND_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.lock().await.appends_since_compact(),
            None => 0,
        }
    }

    /// Rewrite the journal with the minimal events that recreate the current state.
    pub async fn compact(&self) -> Result<usize, RepoError> {
        let Some(wal) = &self.wal else {
            return Ok(0);
        };
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        self.ledger.read().await.snapshot(&mut events);
        for tl in self.all_timelines() {
            let guard = tl.read().await;
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        wal.lock()
            .await
            .compact(&events)
            .map_err(|e| RepoError::Unavailable(e.to_string()))?;
        info!(events = events.len(), "journal compacted");
        Ok(events.len())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn commit(&self, event: &Event) -> Result<(), RepoError> {
        let _gate = self.commit_gate.read().await;
        match event.spot_id() {
            Some(spot_id) => {
                let tl = match event {
                    Event::BookingCreated { .. } => self.timeline(spot_id),
                    _ => self.existing_timeline(&spot_id).ok_or(RepoError::NotFound(spot_id))?,
                };
                let mut guard = tl.write().await;
                check_spot_event(&guard, event, &self.booking_to_spot)?;
                self.journal(event).await?;
                guard.apply(event);
                if let Event::BookingCreated { booking } = event {
                    self.booking_to_spot.insert(booking.id, spot_id);
                }
            }
            None => {
                let mut ledger = self.ledger.write().await;
                ledger.check(event)?;
                self.journal(event).await?;
                ledger.apply(event);
            }
        }
        Ok(())
    }

    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, RepoError> {
        let Some(spot_id) = self.booking_to_spot.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(tl) = self.existing_timeline(&spot_id) else {
            return Ok(None);
        };
        let guard = tl.read().await;
        Ok(guard.get(&id).cloned())
    }

    async fn bookings_for_spot(&self, spot_id: Ulid, window: Span) -> Result<Vec<Booking>, RepoError> {
        let Some(tl) = self.existing_timeline(&spot_id) else {
            return Ok(Vec::new());
        };
        let guard = tl.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, RepoError> {
        let mut out = Vec::new();
        for tl in self.all_timelines() {
            let guard = tl.read().await;
            out.extend(guard.bookings.iter().filter(|b| b.user_id == user_id).cloned());
        }
        out.sort_by_key(|b| b.span.start);
        Ok(out)
    }

    async fn bookings_ending_between(
        &self,
        status: BookingStatus,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Booking>, RepoError> {
        let mut out = Vec::new();
        for tl in self.all_timelines() {
            let guard = tl.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.status == status && b.span.end >= from && b.span.end <= to)
                    .cloned(),
            );
        }
        out.sort_by_key(|b| b.span.end);
        Ok(out)
    }

    async fn user(&self, id: Ulid) -> Result<Option<UserProfile>, RepoError> {
        Ok(self.ledger.read().await.users.get(&id).cloned())
    }

    async fn unit_members(&self, unit_id: Ulid) -> Result<Vec<UserProfile>, RepoError> {
        let ledger = self.ledger.read().await;
        let mut members: Vec<UserProfile> = ledger
            .users
            .values()
            .filter(|u| u.active && u.unit_id == Some(unit_id))
            .cloned()
            .collect();
        members.sort_by_key(|u| u.id);
        Ok(members)
    }

    async fn sanction(&self, id: Ulid) -> Result<Option<Sanction>, RepoError> {
        Ok(self.ledger.read().await.sanctions.get(&id).cloned())
    }

    async fn sanctions_for_unit(&self, unit_id: Ulid) -> Result<Vec<Sanction>, RepoError> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<Sanction> = ledger
            .sanctions
            .values()
            .filter(|s| s.unit_id == unit_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    async fn sanctions_expired_by(&self, now: Ms) -> Result<Vec<Sanction>, RepoError> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<Sanction> = ledger
            .sanctions
            .values()
            .filter(|s| s.is_expired_at(now))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    async fn infraction(&self, id: Ulid) -> Result<Option<InfractionReport>, RepoError> {
        Ok(self.ledger.read().await.infractions.get(&id).cloned())
    }

    async fn infractions_for_condominium(
        &self,
        condominium_id: Ulid,
    ) -> Result<Vec<InfractionReport>, RepoError> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<InfractionReport> = ledger
            .infractions
            .values()
            .filter(|r| r.condominium_id == condominium_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn xp_total(&self, user_id: Ulid) -> Result<u64, RepoError> {
        Ok(self
            .ledger
            .read()
            .await
            .xp_totals
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const M: Ms = MINUTE;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("condopark_test_repo");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking(spot_id: Ulid, start: Ms, end: Ms, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            spot_id,
            unit_id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            reminder_sent: false,
            is_extended: false,
            original_end: None,
            extension_reason: None,
            created_at: 0,
            checked_in_at: None,
            checked_out_at: None,
            cancelled_at: None,
        }
    }

    fn sanction(ends_at: Option<Ms>) -> Sanction {
        Sanction {
            id: Ulid::new(),
            unit_id: Ulid::new(),
            kind: SanctionType::Fine,
            reason: None,
            is_active: true,
            created_at: 0,
            ends_at,
            lifted_at: None,
            lifted_by: None,
        }
    }

    #[tokio::test]
    async fn overlapping_insert_rejected() {
        let repo = InMemoryRepository::volatile();
        let spot = Ulid::new();
        let a = booking(spot, 0, 60 * M, BookingStatus::Confirmed);
        let a_id = a.id;
        repo.commit(&Event::BookingCreated { booking: a }).await.unwrap();

        let b = booking(spot, 30 * M, 45 * M, BookingStatus::Confirmed);
        let err = repo.commit(&Event::BookingCreated { booking: b }).await.unwrap_err();
        assert_eq!(
            err,
            RepoError::Overlap {
                spot_id: spot,
                existing: a_id
            }
        );
    }

    #[tokio::test]
    async fn pending_does_not_block_until_confirmed() {
        let repo = InMemoryRepository::volatile();
        let spot = Ulid::new();
        let pending = booking(spot, 0, 60 * M, BookingStatus::Pending);
        let pending_id = pending.id;
        repo.commit(&Event::BookingCreated { booking: pending }).await.unwrap();

        let other = booking(spot, 0, 30 * M, BookingStatus::Confirmed);
        repo.commit(&Event::BookingCreated { booking: other }).await.unwrap();

        let err = repo
            .commit(&Event::BookingConfirmed {
                id: pending_id,
                spot_id: spot,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Overlap { .. }));
    }

    #[tokio::test]
    async fn duplicate_booking_id_rejected() {
        let repo = InMemoryRepository::volatile();
        let b = booking(Ulid::new(), 0, 15 * M, BookingStatus::Confirmed);
        repo.commit(&Event::BookingCreated { booking: b.clone() }).await.unwrap();
        let err = repo.commit(&Event::BookingCreated { booking: b.clone() }).await.unwrap_err();
        assert_eq!(err, RepoError::AlreadyExists(b.id));
    }

    #[tokio::test]
    async fn reminder_mark_wins_once() {
        let repo = InMemoryRepository::volatile();
        let b = booking(Ulid::new(), 0, 15 * M, BookingStatus::Active);
        let event = Event::ReminderMarked {
            id: b.id,
            spot_id: b.spot_id,
        };
        repo.commit(&Event::BookingCreated { booking: b.clone() }).await.unwrap();
        repo.commit(&event).await.unwrap();
        assert_eq!(repo.commit(&event).await.unwrap_err(), RepoError::Stale(b.id));
        assert!(repo.booking(b.id).await.unwrap().unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn unknown_booking_event_not_found() {
        let repo = InMemoryRepository::volatile();
        let spot = Ulid::new();
        repo.commit(&Event::BookingCreated {
            booking: booking(spot, 0, 15 * M, BookingStatus::Confirmed),
        })
        .await
        .unwrap();
        let ghost = Ulid::new();
        let err = repo
            .commit(&Event::CheckedIn {
                id: ghost,
                spot_id: spot,
                at: 0,
            })
            .await
            .unwrap_err();
        assert_eq!(err, RepoError::NotFound(ghost));
    }

    #[tokio::test]
    async fn transitions_are_conditional_on_status() {
        let repo = InMemoryRepository::volatile();
        let spot = Ulid::new();
        let b = booking(spot, 0, 60 * M, BookingStatus::Confirmed);
        let id = b.id;
        repo.commit(&Event::BookingCreated { booking: b }).await.unwrap();

        let check_in = Event::CheckedIn { id, spot_id: spot, at: 1 };
        let cancel = Event::BookingCancelled { id, spot_id: spot, at: 2 };
        repo.commit(&cancel).await.unwrap();

        for event in [
            check_in,
            cancel,
            Event::CheckedOut { id, spot_id: spot, at: 3 },
            Event::BookingConfirmed { id, spot_id: spot },
            Event::ExtensionRequested {
                id,
                spot_id: spot,
                reason: "late".into(),
                at: 4,
            },
            Event::ExtensionResolved {
                id,
                spot_id: spot,
                new_end: 90 * M,
            },
        ] {
            assert_eq!(repo.commit(&event).await.unwrap_err(), RepoError::Stale(id));
        }
        let after = repo.booking(id).await.unwrap().unwrap();
        assert_eq!(after.status, BookingStatus::Cancelled);
        assert_eq!(after.cancelled_at, Some(2));
        assert_eq!(after.end(), 60 * M);

        // The slot is free again and a rebooking is not disturbed.
        let c = booking(spot, 0, 60 * M, BookingStatus::Confirmed);
        repo.commit(&Event::BookingCreated { booking: c.clone() }).await.unwrap();
        assert_eq!(repo.booking(c.id).await.unwrap().unwrap().status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn second_check_in_is_stale() {
        let repo = InMemoryRepository::volatile();
        let b = booking(Ulid::new(), 0, 15 * M, BookingStatus::Confirmed);
        let check_in = Event::CheckedIn {
            id: b.id,
            spot_id: b.spot_id,
            at: 1,
        };
        repo.commit(&Event::BookingCreated { booking: b.clone() }).await.unwrap();
        repo.commit(&check_in).await.unwrap();
        assert_eq!(repo.commit(&check_in).await.unwrap_err(), RepoError::Stale(b.id));
        assert_eq!(repo.booking(b.id).await.unwrap().unwrap().checked_in_at, Some(1));
    }

    #[tokio::test]
    async fn profile_completion_wins_once() {
        let repo = InMemoryRepository::volatile();
        let user = UserProfile {
            id: Ulid::new(),
            unit_id: None,
            role: Role::Resident,
            full_name: None,
            active: true,
        };
        repo.commit(&Event::UserRegistered { profile: user.clone() }).await.unwrap();
        let complete = |name: &str| Event::ProfileUpdated {
            user_id: user.id,
            full_name: Some(name.into()),
            completes: true,
        };

        repo.commit(&complete("Ana")).await.unwrap();
        assert_eq!(repo.commit(&complete("Bia")).await.unwrap_err(), RepoError::Stale(user.id));
        repo.commit(&Event::ProfileUpdated {
            user_id: user.id,
            full_name: Some("Bia".into()),
            completes: false,
        })
        .await
        .unwrap();
        assert_eq!(repo.user(user.id).await.unwrap().unwrap().full_name.as_deref(), Some("Bia"));
    }

    #[tokio::test]
    async fn sanction_lift_is_conditional() {
        let repo = InMemoryRepository::volatile();
        let s = sanction(Some(100));
        repo.commit(&Event::SanctionImposed { sanction: s.clone() }).await.unwrap();
        assert_eq!(repo.sanctions_expired_by(101).await.unwrap().len(), 1);

        let lift = Event::SanctionLifted {
            id: s.id,
            at: 101,
            by: None,
        };
        repo.commit(&lift).await.unwrap();
        assert_eq!(repo.commit(&lift).await.unwrap_err(), RepoError::Stale(s.id));
        assert!(repo.sanctions_expired_by(101).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ending_between_is_inclusive() {
        let repo = InMemoryRepository::volatile();
        let spot = Ulid::new();
        for (start, end) in [(0, 15 * M), (15 * M, 30 * M), (30 * M, 45 * M)] {
            repo.commit(&Event::BookingCreated {
                booking: booking(spot, start, end, BookingStatus::Active),
            })
            .await
            .unwrap();
        }
        let hits = repo
            .bookings_ending_between(BookingStatus::Active, 15 * M, 30 * M)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        let none = repo
            .bookings_ending_between(BookingStatus::Confirmed, 0, 60 * M)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn xp_totals_accumulate() {
        let repo = InMemoryRepository::volatile();
        let user = Ulid::new();
        for points in [10, 50] {
            repo.commit(&Event::XpAwarded {
                entry: XpEntry {
                    user_id: user,
                    action: XpAction::BookingCreated,
                    points,
                    context_id: None,
                    at: 0,
                },
            })
            .await
            .unwrap();
        }
        assert_eq!(repo.xp_total(user).await.unwrap(), 60);
        assert_eq!(repo.xp_total(Ulid::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn journal_replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let spot = Ulid::new();
        let b = booking(spot, 0, 60 * M, BookingStatus::Confirmed);
        let s = sanction(None);
        {
            let repo = InMemoryRepository::open(&path).unwrap();
            repo.commit(&Event::BookingCreated { booking: b.clone() }).await.unwrap();
            repo.commit(&Event::CheckedIn {
                id: b.id,
                spot_id: spot,
                at: 5,
            })
            .await
            .unwrap();
            repo.commit(&Event::SanctionImposed { sanction: s.clone() }).await.unwrap();
            assert_eq!(repo.appends_since_compact().await, 3);
        }

        let repo = InMemoryRepository::open(&path).unwrap();
        let restored = repo.booking(b.id).await.unwrap().unwrap();
        assert_eq!(restored.status, BookingStatus::Active);
        assert_eq!(restored.checked_in_at, Some(5));
        assert_eq!(repo.sanction(s.id).await.unwrap(), Some(s));

        // Overlap index survives the restart.
        let clash = booking(spot, 30 * M, 45 * M, BookingStatus::Confirmed);
        assert!(matches!(
            repo.commit(&Event::BookingCreated { booking: clash }).await,
            Err(RepoError::Overlap { .. })
        ));
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let spot = Ulid::new();
        let b = booking(spot, 0, 60 * M, BookingStatus::Active);
        {
            let repo = InMemoryRepository::open(&path).unwrap();
            repo.commit(&Event::BookingCreated { booking: b.clone() }).await.unwrap();
            for i in 0..5 {
                repo.commit(&Event::ExtensionRequested {
                    id: b.id,
                    spot_id: spot,
                    reason: format!("attempt {i}"),
                    at: i,
                })
                .await
                .unwrap();
            }
            repo.commit(&Event::ExtensionResolved {
                id: b.id,
                spot_id: spot,
                new_end: 90 * M,
            })
            .await
            .unwrap();
            assert_eq!(repo.compact().await.unwrap(), 1);
            assert_eq!(repo.appends_since_compact().await, 0);
        }

        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
        let repo = InMemoryRepository::open(&path).unwrap();
        let restored = repo.booking(b.id).await.unwrap().unwrap();
        assert_eq!(restored.end(), 90 * M);
        assert_eq!(restored.original_end, Some(60 * M));
        assert!(restored.is_extended);
    }
}
