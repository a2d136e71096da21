use tracing::{debug, info};
use ulid::Ulid;

use crate::auth::{check_owner_or_role, check_role, ADMINS, STAFF};
use crate::limits::*;
use crate::model::*;
use crate::push::{Notification, NotificationKind};
use crate::rewards::Award;

use super::window::{validate_extension, validate_window};
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub spot_id: Ulid,
    pub unit_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInOutcome {
    pub booking: Booking,
    pub on_time: bool,
    pub award: Option<Award>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutOutcome {
    pub booking: Booking,
    pub on_time: bool,
    pub awards: Vec<Award>,
}

/// Owner-facing wording for a moved end time. Admins may also shorten a booking.
fn end_change_text(old_end: Ms, new_end: Ms) -> String {
    let minutes = (new_end - old_end).abs() / MINUTE;
    match new_end.cmp(&old_end) {
        std::cmp::Ordering::Greater => {
            format!("Your visitor booking now ends {minutes} minutes later.")
        }
        std::cmp::Ordering::Less => {
            format!("Your visitor booking now ends {minutes} minutes earlier.")
        }
        std::cmp::Ordering::Equal => "Your visitor booking end time is unchanged.".into(),
    }
}

fn transition_counter(action: &'static str, result: &Result<impl Sized, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(EngineError::DoubleBooking { .. }) => "double_booking",
        Err(EngineError::Forbidden { .. }) => "forbidden",
        Err(_) => "error",
    };
    metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => action, "status" => status)
        .increment(1);
    if matches!(result, Err(EngineError::DoubleBooking { .. })) {
        metrics::counter!(crate::observability::DOUBLE_BOOKINGS_TOTAL, "action" => action).increment(1);
    }
}

fn invalid(from: BookingStatus, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        from: from.as_str(),
        action,
    }
}

// Status gates, checked before committing and again after losing a guarded commit.

fn can_confirm(b: &Booking) -> Result<(), EngineError> {
    match b.status {
        BookingStatus::Pending => Ok(()),
        other => Err(invalid(other, "confirm")),
    }
}

fn can_check_in(b: &Booking) -> Result<(), EngineError> {
    match b.status {
        BookingStatus::Confirmed => Ok(()),
        BookingStatus::Active | BookingStatus::Completed => {
            Err(EngineError::AlreadyActiveOrCompleted(b.id))
        }
        other => Err(invalid(other, "check in")),
    }
}

fn can_check_out(b: &Booking) -> Result<(), EngineError> {
    match b.status {
        BookingStatus::Active | BookingStatus::Confirmed => Ok(()),
        BookingStatus::Completed => Err(EngineError::AlreadyCompleted(b.id)),
        other => Err(invalid(other, "check out")),
    }
}

fn can_request_extension(b: &Booking) -> Result<(), EngineError> {
    if b.status.blocks() {
        Ok(())
    } else {
        Err(invalid(b.status, "request extension"))
    }
}

fn can_extend(b: &Booking) -> Result<(), EngineError> {
    if b.status.blocks() {
        Ok(())
    } else {
        Err(invalid(b.status, "extend"))
    }
}

impl Engine {
    /// Commit a status-guarded event. If a concurrent commit moved the booking first, the
    /// refusal is reported against the status it holds now.
    async fn commit_transition(
        &self,
        event: Event,
        id: Ulid,
        gate: fn(&Booking) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        match self.persist(event).await {
            Err(EngineError::Stale(_)) => {
                let current = self.load_booking(id).await?;
                debug!(booking = %id, status = %current.status, "lost a concurrent transition");
                gate(&current)?;
                Err(EngineError::Stale(id))
            }
            other => other,
        }
    }

    /// Validate, then insert atomically against the spot's timeline. Nothing is written on failure.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        request: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let result = self.create_booking_inner(actor, request).await;
        transition_counter("create", &result);
        result
    }

    async fn create_booking_inner(
        &self,
        actor: &Actor,
        request: BookingRequest,
    ) -> Result<Booking, EngineError> {
        let span = validate_window(request.start, request.end, &self.policy)?;
        if actor.unit_id != Some(request.unit_id) {
            check_role(actor, STAFF, "book for another unit")?;
        }

        let status = if self.policy.require_approval {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        let booking = Booking {
            id: Ulid::new(),
            spot_id: request.spot_id,
            unit_id: request.unit_id,
            user_id: actor.user_id,
            span,
            status,
            reminder_sent: false,
            is_extended: false,
            original_end: None,
            extension_reason: None,
            created_at: self.clock.now(),
            checked_in_at: None,
            checked_out_at: None,
            cancelled_at: None,
        };

        self.persist(Event::BookingCreated {
            booking: booking.clone(),
        })
        .await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking = %booking.id,
            spot = %booking.spot_id,
            start = booking.start(),
            end = booking.end(),
            status = %booking.status,
            "booking created"
        );

        self.reward(booking.user_id, XpAction::BookingCreated, Some(booking.id))
            .await;
        Ok(booking)
    }

    /// `pending -> confirmed`. Re-checks the slot, since pending bookings do not hold it.
    pub async fn confirm_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let result = async {
            check_role(actor, STAFF, "confirm bookings")?;
            let booking = self.load_booking(id).await?;
            can_confirm(&booking)?;
            self.commit_transition(
                Event::BookingConfirmed {
                    id,
                    spot_id: booking.spot_id,
                },
                id,
                can_confirm,
            )
            .await?;
            info!(booking = %id, "booking confirmed");
            self.load_booking(id).await
        }
        .await;
        transition_counter("confirm", &result);
        result
    }

    /// `confirmed -> active`. On time if no later than the grace period after the start.
    pub async fn check_in(&self, actor: &Actor, id: Ulid) -> Result<CheckInOutcome, EngineError> {
        let result = self.check_in_inner(actor, id).await;
        transition_counter("check_in", &result);
        result
    }

    async fn check_in_inner(&self, actor: &Actor, id: Ulid) -> Result<CheckInOutcome, EngineError> {
        check_role(actor, STAFF, "check in")?;
        let booking = self.load_booking(id).await?;
        can_check_in(&booking)?;

        let now = self.clock.now();
        let on_time = now - booking.start() <= self.policy.check_in_grace;
        self.commit_transition(
            Event::CheckedIn {
                id,
                spot_id: booking.spot_id,
                at: now,
            },
            id,
            can_check_in,
        )
        .await?;
        info!(booking = %id, on_time, "checked in");

        // Staff checking in their own booking earns nothing.
        let award = if on_time && actor.user_id != booking.user_id {
            self.reward(booking.user_id, XpAction::CheckInOnTime, Some(id))
                .await
        } else {
            None
        };

        Ok(CheckInOutcome {
            booking: self.load_booking(id).await?,
            on_time,
            award,
        })
    }

    /// `active -> completed`. A booking never checked in (`confirmed`) is completed directly.
    pub async fn check_out(&self, actor: &Actor, id: Ulid) -> Result<CheckOutOutcome, EngineError> {
        let result = self.check_out_inner(actor, id).await;
        transition_counter("check_out", &result);
        result
    }

    async fn check_out_inner(&self, actor: &Actor, id: Ulid) -> Result<CheckOutOutcome, EngineError> {
        check_role(actor, STAFF, "check out")?;
        let booking = self.load_booking(id).await?;
        can_check_out(&booking)?;

        let now = self.clock.now();
        let on_time = now <= booking.end() + self.policy.check_out_grace;
        self.commit_transition(
            Event::CheckedOut {
                id,
                spot_id: booking.spot_id,
                at: now,
            },
            id,
            can_check_out,
        )
        .await?;
        info!(booking = %id, on_time, "checked out");

        let mut awards = Vec::new();
        if let Some(a) = self
            .reward(booking.user_id, XpAction::BookingCompleted, Some(id))
            .await
        {
            awards.push(a);
        }
        if on_time
            && let Some(a) = self
                .reward(booking.user_id, XpAction::CheckOutOnTime, Some(id))
                .await
        {
            awards.push(a);
        }

        Ok(CheckOutOutcome {
            booking: self.load_booking(id).await?,
            on_time,
            awards,
        })
    }

    /// Owner asks for more time. Status and end time are untouched; the request is broadcast
    /// for administrators. Repeating it replaces the reason.
    pub async fn request_extension(
        &self,
        actor: &Actor,
        id: Ulid,
        reason: impl Into<String>,
    ) -> Result<Booking, EngineError> {
        let reason = reason.into();
        let result = async {
            if reason.len() > MAX_EXTENSION_REASON_LEN {
                return Err(EngineError::LimitExceeded("extension reason too long"));
            }
            let booking = self.load_booking(id).await?;
            if actor.user_id != booking.user_id {
                return Err(EngineError::Forbidden {
                    role: actor.role,
                    action: "request extension for another user's booking",
                });
            }
            can_request_extension(&booking)?;
            self.commit_transition(
                Event::ExtensionRequested {
                    id,
                    spot_id: booking.spot_id,
                    reason: reason.clone(),
                    at: self.clock.now(),
                },
                id,
                can_request_extension,
            )
            .await?;
            info!(booking = %id, user = %actor.user_id, reason = %reason, "extension requested");
            self.load_booking(id).await
        }
        .await;
        transition_counter("request_extension", &result);
        result
    }

    /// Admin grants an extension to `new_end`. Conflict-checked against the rest of the spot,
    /// excluding this booking. The first extension preserves the original end time.
    pub async fn resolve_extension(
        &self,
        actor: &Actor,
        id: Ulid,
        new_end: Ms,
    ) -> Result<Booking, EngineError> {
        let result = async {
            check_role(actor, ADMINS, "resolve extensions")?;
            let booking = self.load_booking(id).await?;
            can_extend(&booking)?;
            validate_extension(booking.start(), new_end, &self.policy)?;
            self.commit_transition(
                Event::ExtensionResolved {
                    id,
                    spot_id: booking.spot_id,
                    new_end,
                },
                id,
                can_extend,
            )
            .await?;
            info!(booking = %id, old_end = booking.end(), new_end, "extension granted");

            let note = Notification {
                title: "Extension approved".into(),
                body: end_change_text(booking.end(), new_end),
                url: Some(format!("/bookings/{id}")),
                kind: NotificationKind::Extension,
            };
            self.notify_user(booking.user_id, &note).await;
            self.load_booking(id).await
        }
        .await;
        transition_counter("resolve_extension", &result);
        result
    }

    /// Owner or staff cancels. Cancelling a cancelled booking is a no-op.
    pub async fn cancel_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let result = async {
            let booking = self.load_booking(id).await?;
            check_owner_or_role(actor, booking.user_id, STAFF, "cancel another user's booking")?;
            match booking.status {
                BookingStatus::Cancelled => {
                    debug!(booking = %id, "already cancelled");
                    return Ok(booking);
                }
                BookingStatus::Completed => return Err(invalid(booking.status, "cancel")),
                BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Active => {}
            }
            let committed = self
                .persist(Event::BookingCancelled {
                    id,
                    spot_id: booking.spot_id,
                    at: self.clock.now(),
                })
                .await;
            match committed {
                Ok(()) => info!(booking = %id, by = %actor.user_id, "booking cancelled"),
                // Lost to a concurrent cancel or check-out.
                Err(EngineError::Stale(_)) => {
                    let current = self.load_booking(id).await?;
                    return match current.status {
                        BookingStatus::Cancelled => Ok(current),
                        other => Err(invalid(other, "cancel")),
                    };
                }
                Err(e) => return Err(e),
            }
            self.load_booking(id).await
        }
        .await;
        transition_counter("cancel", &result);
        result
    }
}
