use std::time::Duration;

pub const MAX_COMPANIES: usize = 256;
pub const MAX_COMPANY_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_SERVICE_NAME_LEN: usize = 256;
pub const MAX_ANSWERS: usize = 64;
pub const MAX_ANSWER_KEY_LEN: usize = 64;
/// Serialized size of one answer value.
pub const MAX_ANSWER_VALUE_LEN: usize = 4096;
/// A one-minute grid over a whole day.
pub const MAX_SLOTS_PER_DAY: usize = 1440;
/// Longest accepted protocol line in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
/// Longest hold a customer can be given before it must be confirmed.
pub const MAX_HOLD_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
