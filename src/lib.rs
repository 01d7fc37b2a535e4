//! Consumer group orchestration on top of a callback-driven kafka client.
//!
//! The broker client itself (connections, group protocol, offset storage) lives behind the
//! [`broker::BrokerClient`] trait. This crate drives its poll loop against deadlines, routes
//! its error, rebalance and offset-commit callbacks, and keeps per-topic statistics.

pub mod broker;
pub mod consumer;
pub mod context;
pub mod deadline;
mod error;
pub use error::{Error, ErrorCode, Result, UnknownCode};
pub mod message;
pub mod metadata;
pub mod rebalance;
pub mod stats;
pub mod testpoint;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use consumer::{Consumer, ConsumerOptions};
pub use deadline::Deadline;
pub use message::{Message, MessageBatch};

pub type PartitionId = i32;
pub type Offset = i64;
