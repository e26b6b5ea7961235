pub mod atomic;
pub mod events;
pub mod lease;
pub mod lock;
pub mod messaging;
pub mod presence;
pub mod requests;
pub mod scope_locks;
pub mod tasks;

use chrono::{DateTime, Duration, Utc};

use crate::error::{HiveError, Result};

/// `now + ttl` with negative TTLs clamped to zero. A TTL that runs past the
/// end of the calendar is rejected rather than wrapped.
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(ttl.max(Duration::zero())).ok_or_else(|| {
        HiveError::InvalidInput(format!("ttl of {}s is out of range", ttl.num_seconds()))
    })
}
