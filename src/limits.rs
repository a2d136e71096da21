use crate::model::Ms;

// 2000-01-01T00:00:00Z .. 9999-12-31T23:59:59.999Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_EXTENSION_REASON_LEN: usize = 500;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_FULL_NAME_LEN: usize = 120;
pub const MAX_SANCTION_REASON_LEN: usize = 500;
pub const MAX_DEVICES_PER_USER: usize = 16;

/// Upper bound on one encoded journal record. Anything larger is treated as corruption.
pub const MAX_WAL_RECORD_LEN: usize = 1 << 20;
