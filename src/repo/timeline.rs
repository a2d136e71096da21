use ulid::Ulid;

use crate::model::*;

/// All bookings ever made on one spot, sorted by start.
#[derive(Debug, Clone)]
pub struct SpotTimeline {
    pub spot_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl SpotTimeline {
    pub fn new(spot_id: Ulid) -> Self {
        Self {
            spot_id,
            bookings: Vec::new(),
        }
    }

    /// Insert keeping sort order by start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings whose interval overlaps `query`, regardless of status.
    /// Everything at or past the partition point starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Apply an already-validated event. Events for other spots are ignored.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                if booking.spot_id == self.spot_id {
                    self.insert(booking.clone());
                }
            }
            Event::BookingConfirmed { id, .. } => {
                if let Some(b) = self.get_mut(id) {
                    b.status = BookingStatus::Confirmed;
                }
            }
            Event::CheckedIn { id, at, .. } => {
                if let Some(b) = self.get_mut(id) {
                    b.status = BookingStatus::Active;
                    b.checked_in_at = Some(*at);
                }
            }
            Event::CheckedOut { id, at, .. } => {
                if let Some(b) = self.get_mut(id) {
                    b.status = BookingStatus::Completed;
                    b.checked_out_at = Some(*at);
                }
            }
            Event::ExtensionRequested { id, reason, .. } => {
                if let Some(b) = self.get_mut(id) {
                    b.extension_reason = Some(reason.clone());
                }
            }
            Event::ExtensionResolved { id, new_end, .. } => {
                if let Some(b) = self.get_mut(id) {
                    if !b.is_extended {
                        b.original_end = Some(b.span.end);
                    }
                    b.span.end = *new_end;
                    b.is_extended = true;
                    b.extension_reason = None;
                }
            }
            Event::BookingCancelled { id, at, .. } => {
                if let Some(b) = self.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                    b.cancelled_at = Some(*at);
                }
            }
            Event::ReminderMarked { id, .. } => {
                if let Some(b) = self.get_mut(id) {
                    b.reminder_sent = true;
                }
            }
            Event::UserRegistered { .. }
            | Event::ProfileUpdated { .. }
            | Event::InfractionReported { .. }
            | Event::InfractionResolved { .. }
            | Event::SanctionImposed { .. }
            | Event::SanctionLifted { .. }
            | Event::XpAwarded { .. } => {}
        }
    }
}
