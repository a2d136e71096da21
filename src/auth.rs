use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{Actor, Role};

/// Front-desk staff: may check vehicles in and out and confirm bookings.
pub const STAFF: &[Role] = &[Role::Concierge, Role::Admin, Role::SuperAdmin];

/// Condominium administrators.
pub const ADMINS: &[Role] = &[Role::Admin, Role::SuperAdmin];

/// Single authorization gate used by every transition.
pub fn check_role(actor: &Actor, required: &[Role], action: &'static str) -> Result<(), EngineError> {
    if required.contains(&actor.role) {
        Ok(())
    } else {
        Err(EngineError::Forbidden {
            role: actor.role,
            action,
        })
    }
}

/// Passes for the record's owner, otherwise falls back to `check_role`.
pub fn check_owner_or_role(
    actor: &Actor,
    owner: Ulid,
    required: &[Role],
    action: &'static str,
) -> Result<(), EngineError> {
    if actor.user_id == owner {
        return Ok(());
    }
    check_role(actor, required, action)
}
