//! The surface this crate needs from a broker client.
//!
//! The broker client owns the connections and the group membership protocol. It routes
//! its error, rebalance and offset-commit callbacks to the [`ConsumerContext`] handed over
//! at construction, synchronously, from inside [`BrokerClient::poll_once`],
//! [`BrokerClient::commit_sync`] or [`BrokerClient::close`].

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    consumer::ConsumerOptions, context::ConsumerContext, error::ErrorCode, message::RawMessage,
    metadata::TopicPartitionList, Result,
};

/// Assignment calls, the only part of the client the rebalance callback may call back into.
pub trait PartitionAssignment {
    fn assign(&self, partitions: &TopicPartitionList) -> std::result::Result<(), ErrorCode>;

    /// Assigns the empty set, the broker's way of saying "stop consuming".
    fn unassign(&self) -> std::result::Result<(), ErrorCode>;

    /// Name of the rebalance protocol in use, logged on every rebalance.
    fn rebalance_protocol(&self) -> &str {
        "NONE"
    }
}

/// Not safe for concurrent polling, callers drive at most one poll at a time.
pub trait BrokerClient: PartitionAssignment + Send + Sync {
    fn subscribe(&self, topics: &TopicPartitionList) -> std::result::Result<(), ErrorCode>;

    /// Waits up to `timeout` for the next message. Pending callbacks are dispatched before
    /// this returns.
    fn poll_once(&self, timeout: Duration) -> impl Future<Output = Option<RawMessage>> + Send;

    /// Commits all consumed offsets, waiting for the broker to acknowledge. The outcome is
    /// delivered through the offset-commit callback before this returns. `Err` means the
    /// commit was refused locally (a negative, client-side code) and never reached the
    /// broker. Broker codes returned here are reported as failed commits, not propagated.
    fn commit_sync(&self) -> impl Future<Output = std::result::Result<(), ErrorCode>> + Send;

    /// Schedules a commit of all consumed offsets, the outcome arrives through the
    /// offset-commit callback. `Err` has the same meaning as for `commit_sync`.
    fn commit_async(&self) -> std::result::Result<(), ErrorCode>;

    /// Leaves the group. Revoke callbacks may fire while closing.
    fn close(&self) -> impl Future<Output = std::result::Result<(), ErrorCode>> + Send;
}

pub trait BrokerClientFactory: Send + Sync {
    type Client: BrokerClient;

    /// Creates a client that routes its callbacks to `context`.
    fn create(
        &self,
        options: &ConsumerOptions,
        context: Arc<ConsumerContext>,
    ) -> Result<Self::Client>;
}
