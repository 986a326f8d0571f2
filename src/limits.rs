//! Hard bounds on inputs and in-memory state.

/// Daily quota policy bounds, inclusive.
pub const MIN_DAILY_LIMIT: u32 = 1;
pub const MAX_DAILY_LIMIT: u32 = 50;

pub const MAX_SLOT_CAPACITY: u32 = 1000;

pub const MAX_CAPACITY_RULES: usize = 10_000;
pub const MAX_BLACKOUT_RULES: usize = 10_000;

/// Quota policy changes kept for audit display; oldest dropped first.
pub const MAX_QUOTA_HISTORY: usize = 256;

pub const MAX_APPOINTMENTS_PER_DAY: usize = 100_000;

pub const MAX_REASON_LEN: usize = 1024;

/// How many days ahead to search for the next open slot.
pub const NEXT_AVAILABLE_LOOKAHEAD_DAYS: u64 = 60;

/// Bookable calendar years, inclusive.
pub const MIN_BOOKABLE_YEAR: i32 = 2000;
pub const MAX_BOOKABLE_YEAR: i32 = 2200;

pub const MAX_USERS: usize = 1_000_000;
