use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

// 2024-01-01T00:00:00Z, keeps the 41-bit timestamp space ahead of us.
const EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: i64 = 10;
const SEQ_BITS: i64 = 12;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

struct SnowflakeState {
    last_ts: i64,
    sequence: i64,
}

/// Snowflake-style id generator: 41 bits of millisecond timestamp,
/// 10 bits of node id, 12 bits of per-millisecond sequence.
pub struct Snowflake {
    node_id: i64,
    state: Mutex<SnowflakeState>,
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as i64
}

impl Snowflake {
    pub fn new(node_id: i64) -> Self {
        Snowflake {
            node_id: node_id & ((1 << NODE_BITS) - 1),
            state: Mutex::new(SnowflakeState {
                last_ts: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        let mut now = current_millis();
        if now == state.last_ts {
            state.sequence = (state.sequence + 1) & SEQ_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond, spin to the next one.
                while now <= state.last_ts {
                    now = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ts = now;
        ((now - EPOCH_MS) << (NODE_BITS + SEQ_BITS)) | (self.node_id << SEQ_BITS) | state.sequence
    }
}
