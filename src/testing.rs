//! Scripted in-memory broker for tests and demos.
//!
//! [`MockBroker`] hands out [`MockClient`]s that serve a shared script of [`BrokerEvent`]s
//! and dispatch callbacks the way librdkafka does: synchronously, from inside the poll,
//! commit or close call that picked them up.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    broker::{BrokerClient, BrokerClientFactory, PartitionAssignment},
    consumer::ConsumerOptions,
    context::ConsumerContext,
    error::ErrorCode,
    message::RawMessage,
    metadata::{TopicPartitionList, OFFSET_INVALID},
    rebalance::Rebalance,
    testpoint::Testpoints,
    Offset, PartitionId, Result,
};

#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Returned from the poll that reaches it.
    Message(RawMessage),
    /// Routed to the error callback, the poll goes on.
    Error(ErrorCode, String),
    /// Routed to the rebalance callback, the poll goes on.
    Rebalance(Rebalance),
    /// The poll that reaches it times out.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentCall {
    Assign(TopicPartitionList),
    Unassign,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<BrokerEvent>,
    rebalance_protocol: Option<String>,
    polls: Vec<Duration>,
    subscriptions: Vec<TopicPartitionList>,
    assignment_calls: Vec<AssignmentCall>,
    assigned: TopicPartitionList,
    consumed: BTreeMap<(String, PartitionId), Offset>,
    pending_commits: usize,
    committed: Vec<TopicPartitionList>,
    closes: usize,
    clients_created: usize,
    client_properties: BTreeMap<String, String>,
    fail_subscribe: Option<ErrorCode>,
    fail_assign: Option<ErrorCode>,
    fail_unassign: Option<ErrorCode>,
    fail_commits: Option<ErrorCode>,
    reject_commits: Option<ErrorCode>,
    fail_close: Option<ErrorCode>,
}

/// Factory side of the mock. Clones share the same script and records.
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: BrokerEvent) -> &Self {
        self.lock().script.push_back(event);
        self
    }

    pub fn push_message(&self, message: RawMessage) -> &Self {
        self.push(BrokerEvent::Message(message))
    }

    pub fn push_messages(&self, messages: impl IntoIterator<Item = RawMessage>) -> &Self {
        self.lock()
            .script
            .extend(messages.into_iter().map(BrokerEvent::Message));
        self
    }

    pub fn push_error<S: Into<String>>(&self, code: ErrorCode, reason: S) -> &Self {
        self.push(BrokerEvent::Error(code, reason.into()))
    }

    pub fn push_rebalance(&self, rebalance: Rebalance) -> &Self {
        self.push(BrokerEvent::Rebalance(rebalance))
    }

    pub fn push_idle(&self) -> &Self {
        self.push(BrokerEvent::Idle)
    }

    /// Protocol reported by clients created from now on.
    pub fn set_rebalance_protocol<S: Into<String>>(&self, protocol: S) {
        self.lock().rebalance_protocol = Some(protocol.into());
    }

    pub fn fail_subscribe(&self, code: Option<ErrorCode>) {
        self.lock().fail_subscribe = code;
    }

    pub fn fail_assign(&self, code: Option<ErrorCode>) {
        self.lock().fail_assign = code;
    }

    pub fn fail_unassign(&self, code: Option<ErrorCode>) {
        self.lock().fail_unassign = code;
    }

    /// Commits are carried out but the commit callback reports `code`.
    pub fn fail_commits(&self, code: Option<ErrorCode>) {
        self.lock().fail_commits = code;
    }

    /// `commit_sync`/`commit_async` return `code` and no callback fires.
    pub fn reject_commits(&self, code: Option<ErrorCode>) {
        self.lock().reject_commits = code;
    }

    pub fn fail_close(&self, code: Option<ErrorCode>) {
        self.lock().fail_close = code;
    }

    /// Timeout of every `poll_once` call, in call order.
    pub fn polls(&self) -> Vec<Duration> {
        self.lock().polls.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock().polls.len()
    }

    pub fn subscriptions(&self) -> Vec<TopicPartitionList> {
        self.lock().subscriptions.clone()
    }

    pub fn assignment_calls(&self) -> Vec<AssignmentCall> {
        self.lock().assignment_calls.clone()
    }

    pub fn assigned(&self) -> TopicPartitionList {
        self.lock().assigned.clone()
    }

    /// Commits that reached the broker, failed ones included.
    pub fn commits(&self) -> usize {
        self.lock().committed.len()
    }

    /// Offsets reported by each commit callback, in commit order.
    pub fn committed_offsets(&self) -> Vec<TopicPartitionList> {
        self.lock().committed.clone()
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn clients_created(&self) -> usize {
        self.lock().clients_created
    }

    /// Properties the last client was created with.
    pub fn client_properties(&self) -> BTreeMap<String, String> {
        self.lock().client_properties.clone()
    }

    pub fn remaining_events(&self) -> usize {
        self.lock().script.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

impl MockState {
    /// Next offset of every consumed partition, the invalid offset for assigned partitions
    /// that saw no message.
    fn commit_offsets(&self) -> TopicPartitionList {
        let mut offsets = TopicPartitionList::with_capacity(self.assigned.count());
        for tp in self.assigned.iter() {
            let offset = self
                .consumed
                .get(&(tp.topic.clone(), tp.partition))
                .map_or(OFFSET_INVALID, |last| last + 1);
            offsets.add_partition_offset(tp.topic.clone(), tp.partition, offset);
        }
        for ((topic, partition), last) in &self.consumed {
            if !self.assigned.contains(topic, *partition) {
                offsets.add_partition_offset(topic.clone(), *partition, last + 1);
            }
        }
        offsets
    }
}

impl BrokerClientFactory for MockBroker {
    type Client = MockClient;

    fn create(
        &self,
        options: &ConsumerOptions,
        context: Arc<ConsumerContext>,
    ) -> Result<Self::Client> {
        let mut state = self.lock();
        state.clients_created += 1;
        state.client_properties = options.client_properties();
        state.assigned = TopicPartitionList::new();
        state.consumed.clear();

        Ok(MockClient {
            state: self.state.clone(),
            context,
            rebalance_protocol: state
                .rebalance_protocol
                .clone()
                .unwrap_or_else(|| "EAGER".to_string()),
        })
    }
}

/// Client side of the mock. The state lock is never held while a callback runs, callbacks
/// call back into `assign`/`unassign`.
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
    context: Arc<ConsumerContext>,
    rebalance_protocol: String,
}

impl MockClient {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn deliver_pending_commits(&self) {
        let pending = std::mem::take(&mut self.lock().pending_commits);
        for _ in 0..pending {
            self.deliver_commit();
        }
    }

    fn deliver_commit(&self) {
        let (result, offsets) = {
            let mut state = self.lock();
            let offsets = state.commit_offsets();
            state.committed.push(offsets.clone());
            (state.fail_commits.map_or(Ok(()), Err), offsets)
        };
        self.context.on_offset_commit(result, &offsets);
    }
}

impl PartitionAssignment for MockClient {
    fn assign(&self, partitions: &TopicPartitionList) -> std::result::Result<(), ErrorCode> {
        let mut state = self.lock();
        state
            .assignment_calls
            .push(AssignmentCall::Assign(partitions.clone()));
        if let Some(code) = state.fail_assign {
            return Err(code);
        }
        state.assigned = partitions.clone();
        Ok(())
    }

    fn unassign(&self) -> std::result::Result<(), ErrorCode> {
        let mut state = self.lock();
        state.assignment_calls.push(AssignmentCall::Unassign);
        if let Some(code) = state.fail_unassign {
            return Err(code);
        }
        state.assigned = TopicPartitionList::new();
        Ok(())
    }

    fn rebalance_protocol(&self) -> &str {
        &self.rebalance_protocol
    }
}

impl BrokerClient for MockClient {
    fn subscribe(&self, topics: &TopicPartitionList) -> std::result::Result<(), ErrorCode> {
        let mut state = self.lock();
        if let Some(code) = state.fail_subscribe {
            return Err(code);
        }
        state.subscriptions.push(topics.clone());
        Ok(())
    }

    async fn poll_once(&self, timeout: Duration) -> Option<RawMessage> {
        self.lock().polls.push(timeout);
        self.deliver_pending_commits();

        loop {
            let event = self.lock().script.pop_front();
            match event {
                Some(BrokerEvent::Message(message)) => {
                    if message.error.is_none() {
                        self.lock()
                            .consumed
                            .insert((message.topic.clone(), message.partition), message.offset);
                    }
                    return Some(message);
                }
                Some(BrokerEvent::Error(code, reason)) => self.context.on_error(code, &reason),
                Some(BrokerEvent::Rebalance(rebalance)) => {
                    self.context.on_rebalance(self, &rebalance)
                }
                Some(BrokerEvent::Idle) | None => {
                    tokio::time::sleep(timeout).await;
                    return None;
                }
            }
        }
    }

    async fn commit_sync(&self) -> std::result::Result<(), ErrorCode> {
        if let Some(code) = self.lock().reject_commits {
            return Err(code);
        }
        self.deliver_commit();
        Ok(())
    }

    fn commit_async(&self) -> std::result::Result<(), ErrorCode> {
        let mut state = self.lock();
        if let Some(code) = state.reject_commits {
            return Err(code);
        }
        state.pending_commits += 1;
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), ErrorCode> {
        self.deliver_pending_commits();

        let assigned = self.lock().assigned.clone();
        if !assigned.is_empty() {
            self.context
                .on_rebalance(self, &Rebalance::Revoke(assigned));
        }

        let mut state = self.lock();
        state.closes += 1;
        state.fail_close.map_or(Ok(()), Err)
    }
}

/// Records the name of every testpoint fired.
#[derive(Debug, Default)]
pub struct RecordingTestpoints {
    fired: Mutex<Vec<String>>,
}

impl RecordingTestpoints {
    pub fn fired(&self) -> Vec<String> {
        lock(&self.fired).clone()
    }
}

impl Testpoints for RecordingTestpoints {
    fn fire(&self, name: &str) {
        lock(&self.fired).push(name.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) use self::log_capture::{capture_warnings_and_errors, LevelCounter};
