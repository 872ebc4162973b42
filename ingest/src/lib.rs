//! Job producers: live subscriptions at the chain head and on the log
//! firehose, plus the on-demand historical backfill planner.

pub use {
    backfill::{
        BackfillError, BackfillPlanner, BackfillReport, BackfillRequest, DEFAULT_LOG_BATCH_SIZE,
        MAX_BACKFILL_RANGE, MAX_QUEUE_BLOCKS_RANGE,
    },
    head::HeadPoller,
    logs::LogPoller,
};

use std::time::Duration;

mod backfill;
mod head;
mod logs;

/// Fixed pause before re-dialing a dropped subscription socket.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// A subscription that stays silent this long is treated as disconnected.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(60);
