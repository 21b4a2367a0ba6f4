// Current-time helper. Production code calls `now_unix()`; anything whose
// behavior depends on elapsed time (registry quota cooldown, discovery cache
// freshness/grace) takes the timestamp to compare against as an explicit
// parameter rather than reading the clock internally, so tests can drive
// those paths by passing synthetic timestamps instead of sleeping real
// wall time.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
