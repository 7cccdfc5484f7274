use crate::model::Ms;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_ACTIVE_PER_RESOURCE: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REQUESTER_LEN: usize = 256;

pub const MAX_POOL_CAPACITY: u32 = 1_000_000;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// One year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Widest window accepted by `free_windows`.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
