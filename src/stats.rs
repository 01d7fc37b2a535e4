//! Consumer statistics.
//!
//! Every counter is a plain atomic, there is no lock spanning several counters. A reader
//! may observe `messages_total` already bumped for a message whose outcome has not been
//! reported yet (or, with relaxed ordering across threads, the other way round), so the
//! three message counters are only meaningful individually.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::warn;

use crate::message::Message;

const LATENCY_EPOCHS: usize = 6;
const DEFAULT_EPOCH_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct Stats {
    /// Resolve, transport, authentication and all-brokers-down errors.
    pub connections_error: AtomicU64,
    /// Assign and revoke events handled by the rebalance callback.
    pub rebalances: AtomicU64,
    pub commits_succeeded: AtomicU64,
    pub commits_failed: AtomicU64,
    topics_stats: DashMap<String, Arc<TopicStats>>,
}

#[derive(Debug, Default)]
pub struct TopicStats {
    pub messages_counts: MessagesCounters,
    pub avg_ms_spent_time: RecentPeriodLatency,
}

#[derive(Debug, Default)]
pub struct MessagesCounters {
    pub messages_total: AtomicU64,
    pub messages_success: AtomicU64,
    pub messages_error: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-topic stats, created on first use and kept for the lifetime of `Stats`.
    pub fn topic_stats(&self, topic: &str) -> Arc<TopicStats> {
        if let Some(topic_stats) = self.topics_stats.get(topic) {
            return topic_stats.value().clone();
        }
        self.topics_stats
            .entry(topic.to_string())
            .or_default()
            .value()
            .clone()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics_stats
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn account_polled_message(&self, message: &Message) {
        let now = Duration::from_millis(chrono::Utc::now().timestamp_millis().max(0) as u64);
        self.account_polled_message_at(message, now);
    }

    /// `received_at` is the wall clock receipt time, as time since epoch.
    pub(crate) fn account_polled_message_at(&self, message: &Message, received_at: Duration) {
        let topic_stats = self.topic_stats(message.topic());
        topic_stats
            .messages_counts
            .messages_total
            .fetch_add(1, Ordering::Relaxed);

        match message.timestamp() {
            Some(timestamp) => {
                let spent = received_at.saturating_sub(timestamp);
                topic_stats
                    .avg_ms_spent_time
                    .account(spent.as_millis() as u64);
            }
            None => {
                warn!(
                    "No timestamp in messages to topic '{}' by key '{}'",
                    message.topic(),
                    message.key_str()
                );
            }
        }
    }

    pub fn account_message_processing_succeeded(&self, message: &Message) {
        self.topic_stats(message.topic())
            .messages_counts
            .messages_success
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_message_batch_processing_succeeded(&self, batch: &[Message]) {
        for message in batch {
            self.account_message_processing_succeeded(message);
        }
    }

    pub fn account_message_processing_failed(&self, message: &Message) {
        self.topic_stats(message.topic())
            .messages_counts
            .messages_error
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_message_batch_processing_failed(&self, batch: &[Message]) {
        for message in batch {
            self.account_message_processing_failed(message);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let topics = self
            .topics_stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();

        StatsSnapshot {
            connections_error: self.connections_error.load(Ordering::Relaxed),
            rebalances: self.rebalances.load(Ordering::Relaxed),
            commits_succeeded: self.commits_succeeded.load(Ordering::Relaxed),
            commits_failed: self.commits_failed.load(Ordering::Relaxed),
            topics,
        }
    }
}

impl TopicStats {
    pub fn snapshot(&self) -> TopicStatsSnapshot {
        let latency = self.avg_ms_spent_time.aggregate();
        TopicStatsSnapshot {
            messages_total: self.messages_counts.messages_total.load(Ordering::Relaxed),
            messages_success: self.messages_counts.messages_success.load(Ordering::Relaxed),
            messages_error: self.messages_counts.messages_error.load(Ordering::Relaxed),
            avg_ms_spent_time: latency.average_ms(),
            max_ms_spent_time: latency.max_ms,
            latency_samples: latency.count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_error: u64,
    pub rebalances: u64,
    pub commits_succeeded: u64,
    pub commits_failed: u64,
    pub topics: BTreeMap<String, TopicStatsSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStatsSnapshot {
    pub messages_total: u64,
    pub messages_success: u64,
    pub messages_error: u64,
    /// Over the recent window, `None` without samples.
    pub avg_ms_spent_time: Option<u64>,
    pub max_ms_spent_time: u64,
    pub latency_samples: u64,
}

/// Latency samples over a sliding window of epochs.
///
/// Buckets are reused round-robin and reset lazily by the first writer of a new epoch.
/// A sample racing such a reset may be lost, lifetime totals are never reset.
#[derive(Debug)]
pub struct RecentPeriodLatency {
    started: Instant,
    epoch_duration: Duration,
    buckets: [LatencyBucket; LATENCY_EPOCHS],
    total_count: AtomicU64,
    total_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct LatencyBucket {
    epoch: AtomicU64,
    count: AtomicU64,
    sum_ms: AtomicU64,
    max_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyAggregate {
    pub count: u64,
    pub sum_ms: u64,
    pub max_ms: u64,
}

impl LatencyAggregate {
    pub fn average_ms(&self) -> Option<u64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum_ms / self.count)
        }
    }
}

impl Default for RecentPeriodLatency {
    fn default() -> Self {
        Self::with_epoch_duration(DEFAULT_EPOCH_DURATION)
    }
}

impl RecentPeriodLatency {
    pub fn with_epoch_duration(epoch_duration: Duration) -> Self {
        Self {
            started: Instant::now(),
            epoch_duration: epoch_duration.max(Duration::from_millis(1)),
            buckets: Default::default(),
            total_count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
        }
    }

    pub fn account(&self, ms: u64) {
        self.account_at(ms, Instant::now());
    }

    fn account_at(&self, ms: u64, now: Instant) {
        let epoch = self.epoch_at(now);
        let bucket = &self.buckets[epoch as usize % LATENCY_EPOCHS];

        let seen = bucket.epoch.load(Ordering::Acquire);
        if seen < epoch
            && bucket
                .epoch
                .compare_exchange(seen, epoch, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            bucket.count.store(0, Ordering::Release);
            bucket.sum_ms.store(0, Ordering::Release);
            bucket.max_ms.store(0, Ordering::Release);
        }

        bucket.count.fetch_add(1, Ordering::Relaxed);
        bucket.sum_ms.fetch_add(ms, Ordering::Relaxed);
        bucket.max_ms.fetch_max(ms, Ordering::Relaxed);

        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn aggregate(&self) -> LatencyAggregate {
        self.aggregate_at(Instant::now())
    }

    fn aggregate_at(&self, now: Instant) -> LatencyAggregate {
        let current = self.epoch_at(now);
        let oldest = current.saturating_sub(LATENCY_EPOCHS as u64 - 1);

        let mut aggregate = LatencyAggregate::default();
        for bucket in self.buckets.iter() {
            let epoch = bucket.epoch.load(Ordering::Acquire);
            if epoch == 0 || epoch < oldest || epoch > current {
                continue;
            }
            aggregate.count += bucket.count.load(Ordering::Relaxed);
            aggregate.sum_ms += bucket.sum_ms.load(Ordering::Relaxed);
            aggregate.max_ms = aggregate.max_ms.max(bucket.max_ms.load(Ordering::Relaxed));
        }
        aggregate
    }

    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ms.load(Ordering::Relaxed)
    }

    // epochs start at 1, 0 marks a bucket that never saw a sample
    fn epoch_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_millis() / self.epoch_duration.as_millis()) as u64 + 1
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use bytes::Bytes;

    use super::*;
    use crate::{
        message::{RawMessage, Timestamp},
        testing::capture_warnings_and_errors,
    };

    fn message(topic: &str, timestamp: Timestamp) -> Message {
        Message::decode(
            RawMessage::new(topic, 0, 1)
                .with_key(Bytes::from_static(b"key"))
                .with_timestamp(timestamp),
        )
        .unwrap()
    }

    #[test]
    fn topic_stats_are_shared() {
        let stats = Stats::new();
        let first = stats.topic_stats("orders");
        let second = stats.topic_stats("orders");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(stats.topics(), vec!["orders".to_string()]);
    }

    #[test]
    fn polled_message_latency() {
        let stats = Stats::new();
        let message = message("orders", Timestamp::CreateTime(10_000));

        stats.account_polled_message_at(&message, Duration::from_millis(10_250));

        let snapshot = stats.topic_stats("orders").snapshot();
        assert_eq!(snapshot.messages_total, 1);
        assert_eq!(snapshot.latency_samples, 1);
        assert_eq!(snapshot.avg_ms_spent_time, Some(250));
        assert_eq!(snapshot.max_ms_spent_time, 250);
    }

    #[test]
    fn timestamp_from_the_future_counts_as_zero() {
        let stats = Stats::new();
        let message = message("orders", Timestamp::CreateTime(20_000));

        stats.account_polled_message_at(&message, Duration::from_millis(10_000));

        let snapshot = stats.topic_stats("orders").snapshot();
        assert_eq!(snapshot.avg_ms_spent_time, Some(0));
    }

    #[test]
    fn no_timestamp_no_latency_sample() {
        let stats = Stats::new();
        let message = message("orders", Timestamp::NotAvailable);

        let (warnings, errors) = capture_warnings_and_errors(|| {
            stats.account_polled_message_at(&message, Duration::from_millis(10_000));
        });
        assert_eq!((warnings, errors), (1, 0));

        let snapshot = stats.topic_stats("orders").snapshot();
        assert_eq!(snapshot.messages_total, 1);
        assert_eq!(snapshot.latency_samples, 0);
        assert_eq!(snapshot.avg_ms_spent_time, None);
    }

    #[test]
    fn batch_outcomes() {
        let stats = Stats::new();
        let batch = vec![
            message("orders", Timestamp::NotAvailable),
            message("payments", Timestamp::NotAvailable),
            message("orders", Timestamp::NotAvailable),
        ];

        stats.account_message_batch_processing_succeeded(&batch);
        stats.account_message_batch_processing_failed(&batch[1..]);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.topics["orders"].messages_success, 2);
        assert_eq!(snapshot.topics["orders"].messages_error, 1);
        assert_eq!(snapshot.topics["payments"].messages_success, 1);
        assert_eq!(snapshot.topics["payments"].messages_error, 1);
        // outcomes are reported independently from polling
        assert_eq!(snapshot.topics["orders"].messages_total, 0);
    }

    #[test]
    fn concurrent_accounting() {
        let stats = Arc::new(Stats::new());
        let message = message("orders", Timestamp::CreateTime(0));

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let stats = stats.clone();
                let message = message.clone();
                scope.spawn(move || {
                    let mut last = 0;
                    for _ in 0..1000 {
                        if worker % 2 == 0 {
                            stats.account_message_processing_succeeded(&message);
                        } else {
                            stats.account_message_processing_failed(&message);
                        }
                        stats.account_polled_message_at(&message, Duration::from_millis(5));

                        let total = stats
                            .topic_stats("orders")
                            .messages_counts
                            .messages_total
                            .load(Ordering::Relaxed);
                        assert!(total >= last);
                        last = total;
                    }
                });
            }
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.topics["orders"].messages_total, 8000);
        assert_eq!(snapshot.topics["orders"].messages_success, 4000);
        assert_eq!(snapshot.topics["orders"].messages_error, 4000);
        assert_eq!(
            stats.topic_stats("orders").avg_ms_spent_time.total_count(),
            8000
        );
    }

    #[test]
    fn latency_window_rolls_over() {
        let latency = RecentPeriodLatency::with_epoch_duration(Duration::from_secs(1));
        let start = latency.started;

        latency.account_at(100, start);
        latency.account_at(300, start + Duration::from_millis(500));
        let aggregate = latency.aggregate_at(start + Duration::from_millis(900));
        assert_eq!(aggregate.count, 2);
        assert_eq!(aggregate.average_ms(), Some(200));
        assert_eq!(aggregate.max_ms, 300);

        // six epochs later the first bucket is out of the window and gets reused
        latency.account_at(50, start + Duration::from_secs(6));
        let aggregate = latency.aggregate_at(start + Duration::from_secs(6));
        assert_eq!(aggregate.count, 1);
        assert_eq!(aggregate.average_ms(), Some(50));

        assert_eq!(latency.total_count(), 3);
        assert_eq!(latency.total_ms(), 450);
    }

    #[test]
    fn latency_window_expires_without_writes() {
        let latency = RecentPeriodLatency::with_epoch_duration(Duration::from_secs(1));
        let start = latency.started;

        latency.account_at(100, start);
        assert_eq!(
            latency.aggregate_at(start + Duration::from_secs(5)).count,
            1
        );
        assert_eq!(
            latency.aggregate_at(start + Duration::from_secs(6)).count,
            0
        );
    }
}
