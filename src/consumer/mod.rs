mod poller;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::Stream;
use tracing::{error, info, warn};

use crate::{
    broker::{BrokerClient, BrokerClientFactory},
    context::ConsumerContext,
    deadline::Deadline,
    error::ErrorCode,
    message::{Message, MessageBatch},
    metadata::TopicPartitionList,
    rebalance::AssignmentSnapshot,
    stats::{Stats, TopicStats},
    testpoint::Testpoints,
    Error, Result,
};

use self::poller::Poller;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum OffsetResetStrategy {
    #[default]
    Earliest,
    Latest,
}

impl OffsetResetStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetResetStrategy::Earliest => "earliest",
            OffsetResetStrategy::Latest => "latest",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum CommitMode {
    /// The application calls [`Consumer::commit`].
    #[default]
    ManualSync,
    /// The application calls [`Consumer::async_commit`].
    ManualAsync,
    /// The broker client commits on its own every `interval`.
    PeriodicAuto { interval: Duration },
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebalanceOptions {
    pub session_timeout_ms: i32,
    // max.poll.interval.ms
    pub rebalance_timeout_ms: i32,
    pub heartbeat_interval_ms: i32,
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            session_timeout_ms: 45_000,
            rebalance_timeout_ms: 300_000,
            heartbeat_interval_ms: 3000,
        }
    }
}

/// Consumer configuration, validated upstream and immutable once the consumer is built.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Tags callback spans and testpoints.
    pub component_name: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_offset_reset: OffsetResetStrategy,
    pub max_batch_size: usize,
    /// Time budget of each batch produced by [`Consumer::stream`].
    pub max_poll_time: Duration,
    pub commit_mode: CommitMode,
    pub security_protocol: SecurityProtocol,
    pub rebalance_options: RebalanceOptions,
}

impl ConsumerOptions {
    pub fn new<S: Into<String>>(group_id: S) -> Self {
        let group_id = group_id.into();
        Self {
            component_name: group_id.clone(),
            group_id,
            topics: Vec::new(),
            auto_offset_reset: OffsetResetStrategy::default(),
            max_batch_size: 1,
            max_poll_time: Duration::from_secs(1),
            commit_mode: CommitMode::default(),
            security_protocol: SecurityProtocol::default(),
            rebalance_options: RebalanceOptions::default(),
        }
    }

    pub fn component_name<S: Into<String>>(&mut self, component_name: S) -> &mut Self {
        self.component_name = component_name.into();
        self
    }

    pub fn topics<S: Into<String>>(&mut self, topics: impl IntoIterator<Item = S>) -> &mut Self {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn auto_offset_reset(&mut self, strategy: OffsetResetStrategy) -> &mut Self {
        self.auto_offset_reset = strategy;
        self
    }

    pub fn max_batch_size(&mut self, max_batch_size: usize) -> &mut Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn max_poll_time(&mut self, max_poll_time: Duration) -> &mut Self {
        self.max_poll_time = max_poll_time;
        self
    }

    pub fn commit_mode(&mut self, commit_mode: CommitMode) -> &mut Self {
        self.commit_mode = commit_mode;
        self
    }

    pub fn security_protocol(&mut self, security_protocol: SecurityProtocol) -> &mut Self {
        self.security_protocol = security_protocol;
        self
    }

    /// Structural checks only, everything else is the broker client's business.
    pub fn validate(&self) -> Result<()> {
        if self.group_id.is_empty() {
            return Err(Error::Config("group id is empty".into()));
        }
        if self.component_name.is_empty() {
            return Err(Error::Config("component name is empty".into()));
        }
        if self.topics.is_empty() {
            return Err(Error::Config("no topics to subscribe to".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config("max batch size must be at least 1".into()));
        }
        // oversized budgets are clamped by `Deadline::after`
        if self.max_poll_time.is_zero() {
            return Err(Error::Config("max poll time must not be zero".into()));
        }
        Ok(())
    }

    /// Options in the broker client's own configuration vocabulary.
    pub fn client_properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            properties.insert(key.to_string(), value);
        };

        set("group.id", self.group_id.clone());
        set("auto.offset.reset", self.auto_offset_reset.as_str().into());
        set("security.protocol", self.security_protocol.as_str().into());
        match self.commit_mode {
            CommitMode::PeriodicAuto { interval } => {
                set("enable.auto.commit", "true".into());
                set("auto.commit.interval.ms", interval.as_millis().to_string());
            }
            CommitMode::ManualSync | CommitMode::ManualAsync => {
                set("enable.auto.commit", "false".into());
            }
        }
        set(
            "session.timeout.ms",
            self.rebalance_options.session_timeout_ms.to_string(),
        );
        set(
            "max.poll.interval.ms",
            self.rebalance_options.rebalance_timeout_ms.to_string(),
        );
        set(
            "heartbeat.interval.ms",
            self.rebalance_options.heartbeat_interval_ms.to_string(),
        );
        properties
    }
}

/// Consumer group member turning a callback-driven broker client into a message stream.
///
/// Polling takes `&mut self`, so one consumer never has two polls in flight. Outcome
/// accounting only needs `&self`, or the [`Stats`] handle from [`Consumer::stats`] when
/// processing happens on other tasks.
pub struct Consumer<F: BrokerClientFactory> {
    factory: F,
    options: Arc<ConsumerOptions>,
    context: Arc<ConsumerContext>,
    client: Option<F::Client>,
}

impl<F: BrokerClientFactory> Consumer<F> {
    pub fn new(factory: F, options: ConsumerOptions) -> Result<Self> {
        Self::with_testpoints(factory, options, None)
    }

    pub fn with_testpoints(
        factory: F,
        options: ConsumerOptions,
        testpoints: Option<Arc<dyn Testpoints>>,
    ) -> Result<Self> {
        options.validate()?;
        let context = ConsumerContext::new(
            options.component_name.clone(),
            Arc::new(Stats::new()),
            testpoints,
        );

        Ok(Self {
            factory,
            options: Arc::new(options),
            context: Arc::new(context),
            client: None,
        })
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn is_subscribed(&self) -> bool {
        self.client.is_some()
    }

    /// Subscribes to the configured topics.
    pub async fn start(&mut self) -> Result<()> {
        let topics = self.options.topics.clone();
        self.subscribe(&topics).await
    }

    /// Creates a broker client and subscribes it. On failure the client is closed again and
    /// the consumer stays as it was.
    pub async fn subscribe<S: AsRef<str>>(&mut self, topics: &[S]) -> Result<()> {
        if self.client.is_some() {
            return Err(Error::AlreadySubscribed);
        }

        let client = self.factory.create(&self.options, self.context.clone())?;
        let subscription = TopicPartitionList::from_topics(topics);

        info!(
            "Consumer is subscribing to topics: [{}]",
            topics
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Err(err) = client.subscribe(&subscription) {
            error!("Failed to subscribe: {err}");
            if let Err(close_err) = client.close().await {
                error!("Failed to properly close consumer: {close_err}");
            }
            return Err(err.into());
        }

        self.context.coordinator().on_subscribed();
        self.client = Some(client);
        Ok(())
    }

    /// Leaves the consumer group and releases the broker client. Calling it again, or
    /// without a subscription, does nothing.
    pub async fn leave_group(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if let Err(err) = client.close().await {
            error!("Failed to properly close consumer: {err}");
        }
        drop(client);
        self.context.coordinator().on_closed();
    }

    pub async fn resubscribe<S: AsRef<str>>(&mut self, topics: &[S]) -> Result<()> {
        self.leave_group().await;
        info!("Left group");
        self.subscribe(topics).await?;
        info!("Joined group");
        Ok(())
    }

    /// Commits all consumed offsets and waits for the broker. Only a commit the client
    /// refused locally is returned as an error. The broker's verdict is reported through
    /// logs and stats.
    pub async fn commit(&self) -> Result<()> {
        let client = self.client.as_ref().ok_or(Error::NotSubscribed)?;
        let result = client.commit_sync().await;
        self.commit_scheduled(result)
    }

    /// Schedules a commit of all consumed offsets. A returned `Ok` only means the commit
    /// was scheduled.
    pub fn async_commit(&self) -> Result<()> {
        let client = self.client.as_ref().ok_or(Error::NotSubscribed)?;
        let result = client.commit_async();
        self.commit_scheduled(result)
    }

    fn commit_scheduled(&self, result: std::result::Result<(), ErrorCode>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(code) if code.is_local() => Err(code.into()),
            // a broker verdict that bypassed the offset-commit callback
            Err(code) => {
                self.context
                    .on_offset_commit(Err(code), &TopicPartitionList::new());
                Ok(())
            }
        }
    }

    /// Next message, or `None` once `deadline` is reached without one.
    pub async fn poll_message(&mut self, deadline: Deadline) -> Option<Message> {
        let Some(client) = self.client.as_ref() else {
            warn!("Polling a consumer that is not subscribed");
            return None;
        };
        Poller::new(client, self.context.stats())
            .poll_message(deadline)
            .await
    }

    pub async fn poll_batch(&mut self, max_batch_size: usize, deadline: Deadline) -> MessageBatch {
        let Some(client) = self.client.as_ref() else {
            warn!("Polling a consumer that is not subscribed");
            return MessageBatch::new();
        };
        Poller::new(client, self.context.stats())
            .poll_batch(max_batch_size, deadline)
            .await
    }

    /// Non-empty batches of up to `max_batch_size` messages, each polled within
    /// `max_poll_time`. Only ends when the consumer is not subscribed.
    pub fn stream(&mut self, max_batch_size: usize) -> impl Stream<Item = MessageBatch> + '_ {
        let max_batch_size = max_batch_size.max(1);
        let max_poll_time = self.options.max_poll_time;

        futures::stream::unfold(self, move |consumer| async move {
            loop {
                if !consumer.is_subscribed() {
                    return None;
                }
                let batch = consumer
                    .poll_batch(max_batch_size, Deadline::after(max_poll_time))
                    .await;
                if !batch.is_empty() {
                    return Some((batch, consumer));
                }
            }
        })
    }

    pub fn account_message_processing_succeeded(&self, message: &Message) {
        self.context
            .stats()
            .account_message_processing_succeeded(message);
    }

    pub fn account_message_batch_processing_succeeded(&self, batch: &[Message]) {
        self.context
            .stats()
            .account_message_batch_processing_succeeded(batch);
    }

    pub fn account_message_processing_failed(&self, message: &Message) {
        self.context.stats().account_message_processing_failed(message);
    }

    pub fn account_message_batch_processing_failed(&self, batch: &[Message]) {
        self.context
            .stats()
            .account_message_batch_processing_failed(batch);
    }

    pub fn get_stats(&self) -> &Stats {
        self.context.stats()
    }

    /// Shared handle for workers reporting processing outcomes.
    pub fn stats(&self) -> Arc<Stats> {
        self.context.stats().clone()
    }

    pub fn get_topic_stats(&self, topic: &str) -> Arc<TopicStats> {
        self.context.stats().topic_stats(topic)
    }

    pub fn assignment(&self) -> AssignmentSnapshot {
        self.context.assignment()
    }
}
