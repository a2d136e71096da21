use crate::config::BookingPolicy;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn check_timestamps(start: Ms, end: Ms) -> Result<(), EngineError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

fn on_step(duration: Ms, policy: &BookingPolicy) -> bool {
    policy.slot_step > 0 && duration % policy.slot_step == 0
}

/// Validate a proposed booking `[start, end)`. Pure; the engine runs it again on every
/// create no matter what the client already checked.
pub fn validate_window(start: Ms, end: Ms, policy: &BookingPolicy) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidRange { start, end })?;
    let duration_ms = span.duration_ms();
    if duration_ms < policy.min_duration
        || duration_ms > policy.max_duration
        || !on_step(duration_ms, policy)
    {
        return Err(EngineError::InvalidDuration { duration_ms });
    }
    check_timestamps(start, end)?;
    Ok(span)
}

/// Validate an extension to `new_end`. Same alignment rule, no upper bound.
pub fn validate_extension(start: Ms, new_end: Ms, policy: &BookingPolicy) -> Result<Span, EngineError> {
    let span = Span::try_new(start, new_end).ok_or(EngineError::InvalidRange {
        start,
        end: new_end,
    })?;
    let duration_ms = span.duration_ms();
    if duration_ms < policy.min_duration || !on_step(duration_ms, policy) {
        return Err(EngineError::InvalidDuration { duration_ms });
    }
    check_timestamps(start, new_end)?;
    Ok(span)
}
