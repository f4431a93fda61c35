//! Hard limits that protect a tenant from runaway input.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_EVENTS_PER_TENANT: usize = 1_000;
pub const MAX_ROOMS_PER_EVENT: usize = 2_000;
pub const MAX_PARTICIPANTS_PER_EVENT: usize = 20_000;
pub const MAX_WORKSHOPS_PER_EVENT: usize = 500;
pub const MAX_ROOM_CAPACITY: u32 = 1_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 4_000;

/// Upper bound for a single CSV import payload.
pub const MAX_IMPORT_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_IMPORT_ROWS: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MIN_EVENT_YEAR: i32 = 1900;
pub const MAX_EVENT_YEAR: i32 = 2200;

/// Money amounts are stored in cents.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000;
