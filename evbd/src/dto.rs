//! Serializable mirrors of `evb_core`'s statistics types. Kept separate
//! so `evb-core` itself never needs a `serde` dependency — only the
//! daemon's HTTP boundary does.

use evb_core::{InputStatistics, OutOfOrderRecord, OutOfOrderStatistics, QueueStatistics};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct QueueStatisticsDto {
    pub queue_id: u32,
    pub depth: usize,
    pub bytes_in_queue: u64,
    pub bytes_dequeued: u64,
    pub total_bytes_queued: u64,
    pub oldest_timestamp: u64,
    pub newest_timestamp: u64,
}

impl From<&QueueStatistics> for QueueStatisticsDto {
    fn from(q: &QueueStatistics) -> Self {
        QueueStatisticsDto {
            queue_id: q.queue_id,
            depth: q.depth,
            bytes_in_queue: q.bytes_in_queue,
            bytes_dequeued: q.bytes_dequeued,
            total_bytes_queued: q.total_bytes_queued,
            oldest_timestamp: q.oldest_timestamp,
            newest_timestamp: q.newest_timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InputStatisticsDto {
    pub total_fragments_queued: usize,
    pub oldest_timestamp: u64,
    pub newest_timestamp: u64,
    pub queues: Vec<QueueStatisticsDto>,
}

impl From<&InputStatistics> for InputStatisticsDto {
    fn from(s: &InputStatistics) -> Self {
        InputStatisticsDto {
            total_fragments_queued: s.total_fragments_queued,
            oldest_timestamp: s.oldest_timestamp,
            newest_timestamp: s.newest_timestamp,
            queues: s.queues.iter().map(QueueStatisticsDto::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct OutOfOrderRecordDto {
    pub count: u64,
    pub prior_timestamp: u64,
    pub timestamp: u64,
}

impl From<&OutOfOrderRecord> for OutOfOrderRecordDto {
    fn from(r: &OutOfOrderRecord) -> Self {
        OutOfOrderRecordDto {
            count: r.count,
            prior_timestamp: r.prior_timestamp,
            timestamp: r.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct OutOfOrderStatisticsDto {
    pub totals: OutOfOrderRecordDto,
    pub by_source: std::collections::BTreeMap<u32, OutOfOrderRecordDto>,
}

impl From<&OutOfOrderStatistics> for OutOfOrderStatisticsDto {
    fn from(s: &OutOfOrderStatistics) -> Self {
        OutOfOrderStatisticsDto {
            totals: (&s.totals).into(),
            by_source: s.by_source.iter().map(|(k, v)| (*k, v.into())).collect(),
        }
    }
}
