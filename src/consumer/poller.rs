use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    broker::BrokerClient,
    deadline::Deadline,
    message::{Message, MessageBatch},
    stats::Stats,
};

enum Polled {
    Message(Message),
    /// The broker delivered an error instead of a message.
    Dropped,
    /// Timed out, or the deadline was already reached.
    Nothing,
}

/// Drives the broker client poll loop against a deadline.
///
/// Borrows the client for one logical poll, the borrow checker keeps a second poll on the
/// same consumer out while this one is in flight.
pub(crate) struct Poller<'a, C: BrokerClient> {
    client: &'a C,
    stats: &'a Stats,
}

impl<'a, C: BrokerClient> Poller<'a, C> {
    pub(crate) fn new(client: &'a C, stats: &'a Stats) -> Self {
        Self { client, stats }
    }

    pub(crate) async fn poll_message(&self, deadline: Deadline) -> Option<Message> {
        match self.poll(deadline).await {
            Polled::Message(message) => Some(message),
            Polled::Nothing | Polled::Dropped => None,
        }
    }

    async fn poll(&self, deadline: Deadline) -> Polled {
        if deadline.is_reached() {
            return Polled::Nothing;
        }

        let millis = u64::try_from(deadline.time_left().as_millis()).unwrap_or(u64::MAX);
        let poll_timeout = Duration::from_millis(millis);
        debug!("Polling message for {}ms", poll_timeout.as_millis());

        let Some(raw) = self.client.poll_once(poll_timeout).await else {
            return Polled::Nothing;
        };

        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("Consumed message with error: {err}");
                return Polled::Dropped;
            }
        };

        self.stats.account_polled_message(&message);

        info!(
            "Message from kafka topic '{}' received by key '{}' with partition {} by offset {}",
            message.topic(),
            message.key_str(),
            message.partition(),
            message.offset()
        );

        Polled::Message(message)
    }

    /// Stops at `max_batch_size` messages or at the first poll that yields nothing. Dropped
    /// error messages do not end the batch, polling goes on against the same deadline.
    pub(crate) async fn poll_batch(&self, max_batch_size: usize, deadline: Deadline) -> MessageBatch {
        let mut batch = MessageBatch::with_capacity(max_batch_size.min(1024));

        while batch.len() < max_batch_size {
            match self.poll(deadline).await {
                Polled::Message(message) => batch.push(message),
                Polled::Dropped => continue,
                Polled::Nothing => break,
            }
        }

        if !batch.is_empty() {
            info!("Polled batch of {} messages", batch.len());
        }

        batch
    }
}
