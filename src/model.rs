use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 60 * MINUTE;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` when `end <= start`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that occupy the spot's timeline.
    pub fn blocks(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub unit_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub reminder_sent: bool,
    pub is_extended: bool,
    /// End time before the first extension; never overwritten afterwards.
    pub original_end: Option<Ms>,
    pub extension_reason: Option<String>,
    pub created_at: Ms,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
}

impl Booking {
    pub fn start(&self) -> Ms {
        self.span.start
    }

    pub fn end(&self) -> Ms {
        self.span.end
    }
}

// ── People and roles ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Resident,
    Concierge,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Concierge => "concierge",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Ulid,
    pub unit_id: Option<Ulid>,
    pub role: Role,
    pub full_name: Option<String>,
    pub active: bool,
}

impl UserProfile {
    pub fn has_full_name(&self) -> bool {
        self.full_name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub unit_id: Option<Ulid>,
    pub role: Role,
}

impl From<&UserProfile> for Actor {
    fn from(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.id,
            unit_id: profile.unit_id,
            role: profile.role,
        }
    }
}

// ── Infractions and sanctions ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    ExceededTime,
    GhostBooking,
    UnauthorizedVehicle,
    WrongSpot,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfractionReport {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub reporter_id: Ulid,
    pub condominium_id: Ulid,
    pub report_type: ReportType,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub created_at: Ms,
    pub resolved_at: Option<Ms>,
    pub resolved_by: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SanctionType {
    Fine,
    Debt,
    Fee,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanction {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub kind: SanctionType,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: Ms,
    /// `None` = indefinite; only an administrator can lift it.
    pub ends_at: Option<Ms>,
    pub lifted_at: Option<Ms>,
    /// Unset when the sanction expired on its own.
    pub lifted_by: Option<Ulid>,
}

impl Sanction {
    pub fn is_expired_at(&self, now: Ms) -> bool {
        self.is_active && self.ends_at.is_some_and(|e| e < now)
    }
}

// ── Experience points ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XpAction {
    BookingCreated,
    CheckInOnTime,
    CheckOutOnTime,
    BookingCompleted,
    ProfileCompleted,
    InfractionReported,
}

impl XpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            XpAction::BookingCreated => "BOOKING_CREATED",
            XpAction::CheckInOnTime => "CHECK_IN_ON_TIME",
            XpAction::CheckOutOnTime => "CHECK_OUT_ON_TIME",
            XpAction::BookingCompleted => "BOOKING_COMPLETED",
            XpAction::ProfileCompleted => "PROFILE_COMPLETED",
            XpAction::InfractionReported => "INFRACTION_REPORTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpEntry {
    pub user_id: Ulid,
    pub action: XpAction,
    pub points: u64,
    pub context_id: Option<Ulid>,
    pub at: Ms,
}

/// The event types. Flat, no nesting beyond entity snapshots. This is the WAL record format
/// and what the event hub broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        profile: UserProfile,
    },
    ProfileUpdated {
        user_id: Ulid,
        full_name: Option<String>,
        /// Fills a previously empty name. Rejected once a name is already set.
        completes: bool,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        spot_id: Ulid,
    },
    CheckedIn {
        id: Ulid,
        spot_id: Ulid,
        at: Ms,
    },
    CheckedOut {
        id: Ulid,
        spot_id: Ulid,
        at: Ms,
    },
    ExtensionRequested {
        id: Ulid,
        spot_id: Ulid,
        reason: String,
        at: Ms,
    },
    ExtensionResolved {
        id: Ulid,
        spot_id: Ulid,
        new_end: Ms,
    },
    BookingCancelled {
        id: Ulid,
        spot_id: Ulid,
        at: Ms,
    },
    ReminderMarked {
        id: Ulid,
        spot_id: Ulid,
    },
    InfractionReported {
        report: InfractionReport,
    },
    InfractionResolved {
        id: Ulid,
        status: ReportStatus,
        by: Ulid,
        at: Ms,
    },
    SanctionImposed {
        sanction: Sanction,
    },
    SanctionLifted {
        id: Ulid,
        at: Ms,
        by: Option<Ulid>,
    },
    XpAwarded {
        entry: XpEntry,
    },
}

impl Event {
    /// The spot whose timeline this event mutates, if any.
    pub fn spot_id(&self) -> Option<Ulid> {
        match self {
            Event::BookingCreated { booking } => Some(booking.spot_id),
            Event::BookingConfirmed { spot_id, .. }
            | Event::CheckedIn { spot_id, .. }
            | Event::CheckedOut { spot_id, .. }
            | Event::ExtensionRequested { spot_id, .. }
            | Event::ExtensionResolved { spot_id, .. }
            | Event::BookingCancelled { spot_id, .. }
            | Event::ReminderMarked { spot_id, .. } => Some(*spot_id),
            Event::UserRegistered { .. }
            | Event::ProfileUpdated { .. }
            | Event::InfractionReported { .. }
            | Event::InfractionResolved { .. }
            | Event::SanctionImposed { .. }
            | Event::SanctionLifted { .. }
            | Event::XpAwarded { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LevelSummary {
    pub user_id: Ulid,
    pub total_xp: u64,
    pub level: u32,
    pub progress: f64,
}
