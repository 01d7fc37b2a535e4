//! Callback routing between the broker client and one consumer instance.
//!
//! The broker client receives an `Arc<ConsumerContext>` when it is created and calls back
//! into it from inside its own poll, commit and close calls. There is no process-wide
//! registry, every consumer owns its context.

use std::sync::{atomic::Ordering, Arc};

use tracing::{error, info, info_span};

use crate::{
    broker::PartitionAssignment,
    error::ErrorCode,
    metadata::{TopicPartitionList, TopicPartitionOffset},
    rebalance::{AssignmentSnapshot, Rebalance, RebalanceCoordinator},
    stats::Stats,
    testpoint::Testpoints,
};

pub struct ConsumerContext {
    stats: Arc<Stats>,
    coordinator: RebalanceCoordinator,
}

impl ConsumerContext {
    pub fn new<S: Into<String>>(
        component_name: S,
        stats: Arc<Stats>,
        testpoints: Option<Arc<dyn Testpoints>>,
    ) -> Self {
        Self {
            stats,
            coordinator: RebalanceCoordinator::new(component_name, testpoints),
        }
    }

    pub fn component_name(&self) -> &str {
        self.coordinator.component_name()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn assignment(&self) -> AssignmentSnapshot {
        self.coordinator.assignment()
    }

    pub(crate) fn coordinator(&self) -> &RebalanceCoordinator {
        &self.coordinator
    }

    /// Every error is logged, connectivity errors are counted as well.
    pub fn on_error(&self, code: ErrorCode, reason: &str) {
        let span = info_span!("error_callback", kafka_callback = "error_callback");
        let _enter = span.enter();

        error!("Error {} occurred because of '{reason}': {code}", code.code());

        if code.is_connectivity() {
            self.stats.connections_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_rebalance(&self, client: &dyn PartitionAssignment, rebalance: &Rebalance) {
        let span = info_span!("rebalance_callback", kafka_callback = "rebalance_callback");
        let _enter = span.enter();

        if self.coordinator.handle(client, rebalance) {
            self.stats.rebalances.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn on_offset_commit(
        &self,
        result: Result<(), ErrorCode>,
        committed_offsets: &TopicPartitionList,
    ) {
        let span = info_span!(
            "offset_commit_callback",
            kafka_callback = "offset_commit_callback"
        );
        let _enter = span.enter();

        if let Err(err) = result {
            self.stats.commits_failed.fetch_add(1, Ordering::Relaxed);
            error!("Failed to commit offsets: {err}");
            return;
        }

        self.stats.commits_succeeded.fetch_add(1, Ordering::Relaxed);
        info!("Successfully committed offsets");
        for offset in committed(committed_offsets) {
            info!(
                "Offset {} committed for topic '{}' within partition {}",
                offset.offset, offset.topic, offset.partition
            );
        }
    }
}

/// Entries of a commit confirmation that were actually committed.
///
/// The broker client reports every assigned partition, the ones that took no part in this
/// commit carry the invalid offset and are skipped.
pub fn committed(offsets: &TopicPartitionList) -> impl Iterator<Item = &TopicPartitionOffset> {
    offsets.iter().filter(|offset| {
        if offset.is_invalid_offset() {
            info!("Skipping partition {}", offset.partition);
            false
        } else {
            true
        }
    })
}
