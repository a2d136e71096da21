use std::path::PathBuf;
use std::time::Duration;

use crate::model::{Ms, MINUTE};

/// Every threshold the booking state machine and the sweeps compare against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    pub min_duration: Ms,
    pub max_duration: Ms,
    /// Booking lengths must be a whole multiple of this.
    pub slot_step: Ms,
    /// Check-in counts as on time up to this long after the scheduled start.
    pub check_in_grace: Ms,
    /// Check-out counts as on time up to this long after the scheduled end.
    pub check_out_grace: Ms,
    /// Reminders go out for bookings ending `reminder_lead` from now...
    pub reminder_lead: Ms,
    /// ...plus up to this much more. Sized to the sweep cadence.
    pub reminder_window: Ms,
    /// New bookings start `pending` and need staff confirmation.
    pub require_approval: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_duration: 15 * MINUTE,
            max_duration: 240 * MINUTE,
            slot_step: 15 * MINUTE,
            check_in_grace: 15 * MINUTE,
            check_out_grace: 0,
            reminder_lead: 15 * MINUTE,
            reminder_window: 5 * MINUTE,
            require_approval: false,
        }
    }
}

/// Process configuration, read from `CONDOPARK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub sweep_budget: Duration,
    pub compact_threshold: u64,
    pub policy: BookingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            sweep_interval: Duration::from_secs(300),
            sweep_budget: Duration::from_secs(30),
            compact_threshold: 1000,
            policy: BookingPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let parse = |key: &str| lookup(key).and_then(|s| s.trim().parse::<i64>().ok());
        let minutes = |key: &str, default: Ms| parse(key).map_or(default, |m| m * MINUTE);

        let policy = BookingPolicy {
            min_duration: minutes("CONDOPARK_MIN_DURATION_MINUTES", defaults.policy.min_duration),
            max_duration: minutes("CONDOPARK_MAX_DURATION_MINUTES", defaults.policy.max_duration),
            slot_step: minutes("CONDOPARK_SLOT_STEP_MINUTES", defaults.policy.slot_step),
            check_in_grace: minutes(
                "CONDOPARK_CHECK_IN_GRACE_MINUTES",
                defaults.policy.check_in_grace,
            ),
            check_out_grace: minutes(
                "CONDOPARK_CHECK_OUT_GRACE_MINUTES",
                defaults.policy.check_out_grace,
            ),
            reminder_lead: minutes("CONDOPARK_REMINDER_LEAD_MINUTES", defaults.policy.reminder_lead),
            reminder_window: minutes(
                "CONDOPARK_REMINDER_WINDOW_MINUTES",
                defaults.policy.reminder_window,
            ),
            require_approval: lookup("CONDOPARK_REQUIRE_APPROVAL")
                .map(|s| matches!(s.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.policy.require_approval),
        };

        Self {
            data_dir: lookup("CONDOPARK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("CONDOPARK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            sweep_interval: parse("CONDOPARK_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map_or(defaults.sweep_interval, |s| Duration::from_secs(s as u64)),
            sweep_budget: parse("CONDOPARK_SWEEP_BUDGET_SECS")
                .filter(|s| *s > 0)
                .map_or(defaults.sweep_budget, |s| Duration::from_secs(s as u64)),
            compact_threshold: parse("CONDOPARK_COMPACT_THRESHOLD")
                .filter(|n| *n > 0)
                .map_or(defaults.compact_threshold, |n| n as u64),
            policy,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("condopark.wal")
    }
}
