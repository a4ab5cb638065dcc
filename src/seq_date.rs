use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Highest sub-second slot handed out within one wall-clock second.
pub const MAX_SEQ: u32 = 999;

/// Timestamp source that keeps records from the same second in call order.
///
/// Each call returns the current second plus a millisecond offset taken from
/// a per-second counter. The counter resets when the second changes and
/// stops at [`MAX_SEQ`], so more than 1000 calls in one second share the
/// last instant instead of spilling into the next second.
#[derive(Debug, Default)]
pub struct SeqDate {
    state: Mutex<SeqState>,
}

#[derive(Debug, Default)]
struct SeqState {
    second: Option<i64>,
    seq: u32,
}

impl SeqDate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide generator used by writers unless one is injected.
    pub fn shared() -> Arc<SeqDate> {
        static SHARED: OnceLock<Arc<SeqDate>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(SeqDate::new())).clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now_at(Utc::now())
    }

    /// Sequence a caller-supplied wall-clock reading.
    pub fn now_at(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let second = wall.timestamp();

        let offset = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.second != Some(second) {
                state.second = Some(second);
                state.seq = 0;
            }
            let offset = state.seq.min(MAX_SEQ);
            state.seq = state.seq.saturating_add(1);
            offset
        };

        DateTime::from_timestamp(second, offset * 1_000_000).unwrap_or(wall)
    }
}
