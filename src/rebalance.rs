use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::{
    broker::PartitionAssignment,
    error::ErrorCode,
    metadata::{TopicPartition, TopicPartitionList},
    testpoint::{fire_per_element, Testpoints},
};

/// Rebalance event delivered by the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rebalance {
    Assign(TopicPartitionList),
    Revoke(TopicPartitionList),
    Error(ErrorCode),
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum AssignmentPhase {
    #[default]
    Unassigned,
    Assigning,
    Assigned,
    Revoking,
    /// Left the group, only a new subscription leaves this phase.
    Closed,
}

impl AssignmentPhase {
    fn transition_to(self, new_phase: AssignmentPhase) -> Self {
        if self.valid_transitions().contains(&new_phase) {
            new_phase
        } else {
            self
        }
    }

    #[inline]
    fn valid_transitions(&self) -> &'static [AssignmentPhase] {
        match self {
            AssignmentPhase::Unassigned => &[
                AssignmentPhase::Unassigned,
                AssignmentPhase::Assigning,
                AssignmentPhase::Revoking,
                AssignmentPhase::Closed,
            ],
            AssignmentPhase::Assigning => {
                &[AssignmentPhase::Assigned, AssignmentPhase::Unassigned]
            }
            AssignmentPhase::Assigned => &[
                AssignmentPhase::Assigning,
                AssignmentPhase::Revoking,
                AssignmentPhase::Closed,
            ],
            AssignmentPhase::Revoking => {
                &[AssignmentPhase::Unassigned, AssignmentPhase::Assigned]
            }
            AssignmentPhase::Closed => &[AssignmentPhase::Unassigned, AssignmentPhase::Closed],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentSnapshot {
    pub phase: AssignmentPhase,
    pub partitions: Vec<TopicPartition>,
}

#[derive(Debug, Default)]
struct AssignmentState {
    phase: AssignmentPhase,
    partitions: TopicPartitionList,
}

impl AssignmentState {
    fn transition(&mut self, new_phase: AssignmentPhase) {
        let next_phase = self.phase.transition_to(new_phase);
        if next_phase != new_phase {
            warn!(
                "Ignoring assignment transition from {:?} to {:?}",
                self.phase, new_phase
            );
            return;
        }
        debug!("Assignment phase {:?} -> {:?}", self.phase, next_phase);
        self.phase = next_phase;
    }
}

/// Applies rebalance decisions to the broker client.
///
/// Runs on the polling path, from inside the broker call that received the event. The
/// assignment it tracks is informational, the broker client enforces the real one.
pub struct RebalanceCoordinator {
    component_name: String,
    state: Mutex<AssignmentState>,
    testpoints: Option<Arc<dyn Testpoints>>,
}

impl RebalanceCoordinator {
    pub fn new<S: Into<String>>(
        component_name: S,
        testpoints: Option<Arc<dyn Testpoints>>,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            state: Mutex::new(AssignmentState::default()),
            testpoints,
        }
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn assignment(&self) -> AssignmentSnapshot {
        let state = self.lock();
        AssignmentSnapshot {
            phase: state.phase,
            partitions: state.partitions.topic_partitions(),
        }
    }

    pub fn phase(&self) -> AssignmentPhase {
        self.lock().phase
    }

    pub(crate) fn on_subscribed(&self) {
        let mut state = self.lock();
        state.partitions = TopicPartitionList::new();
        state.transition(AssignmentPhase::Unassigned);
    }

    pub(crate) fn on_closed(&self) {
        let mut state = self.lock();
        if !state.partitions.is_empty() {
            debug!("Dropping local assignment {} on close", state.partitions);
        }
        state.partitions = TopicPartitionList::new();
        // closing is valid from any phase
        state.phase = AssignmentPhase::Closed;
    }

    /// Returns `true` for assign and revoke events, `false` for rebalance errors.
    pub fn handle(&self, client: &dyn PartitionAssignment, rebalance: &Rebalance) -> bool {
        info!(
            "Consumer group rebalanced ('{}' protocol)",
            client.rebalance_protocol()
        );

        match rebalance {
            Rebalance::Assign(partitions) => {
                self.assign_partitions(client, partitions);
                fire_per_element(self.testpoints.as_ref(), partitions.elements(), || {
                    format!("tp_{}_subscribed", self.component_name)
                });
                true
            }
            Rebalance::Revoke(partitions) => {
                self.revoke_partitions(client, partitions);
                fire_per_element(self.testpoints.as_ref(), partitions.elements(), || {
                    format!("tp_{}_revoked", self.component_name)
                });
                true
            }
            Rebalance::Error(err) => {
                error!("Failed when rebalancing: {err}");
                false
            }
        }
    }

    fn assign_partitions(&self, client: &dyn PartitionAssignment, partitions: &TopicPartitionList) {
        info!("Assigning new partitions to consumer");
        for tp in partitions {
            info!(
                "Partition {} for topic '{}' assigning",
                tp.partition, tp.topic
            );
        }
        self.lock().transition(AssignmentPhase::Assigning);

        match client.assign(partitions) {
            Ok(()) => {
                let mut state = self.lock();
                state.partitions = partitions.clone();
                state.transition(AssignmentPhase::Assigned);
                info!("Successfully assigned partitions");
            }
            Err(err) => {
                let mut state = self.lock();
                state.partitions = TopicPartitionList::new();
                state.transition(AssignmentPhase::Unassigned);
                error!("Failed to assign partitions: {err}");
            }
        }
    }

    fn revoke_partitions(&self, client: &dyn PartitionAssignment, partitions: &TopicPartitionList) {
        info!("Revoking existing partitions from consumer");
        for tp in partitions {
            info!(
                "Partition {} of '{}' topic revoking",
                tp.partition, tp.topic
            );
        }
        self.lock().transition(AssignmentPhase::Revoking);

        match client.unassign() {
            Ok(()) => {
                let mut state = self.lock();
                state.partitions = TopicPartitionList::new();
                state.transition(AssignmentPhase::Unassigned);
                info!("Successfully revoked partitions");
            }
            Err(err) => {
                // the broker client still holds whatever it held before
                let mut state = self.lock();
                let restored = if state.partitions.is_empty() {
                    AssignmentPhase::Unassigned
                } else {
                    AssignmentPhase::Assigned
                };
                if state.phase == AssignmentPhase::Revoking {
                    state.transition(restored);
                }
                error!("Failed to revoke partitions: {err}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, AssignmentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::testing::RecordingTestpoints;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Assign(TopicPartitionList),
        Unassign,
    }

    #[derive(Default)]
    struct FakeAssignment {
        calls: Mutex<Vec<Call>>,
        fail_with: Option<ErrorCode>,
    }

    impl PartitionAssignment for FakeAssignment {
        fn assign(&self, partitions: &TopicPartitionList) -> Result<(), ErrorCode> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Assign(partitions.clone()));
            self.fail_with.map_or(Ok(()), Err)
        }

        fn unassign(&self) -> Result<(), ErrorCode> {
            self.calls.lock().unwrap().push(Call::Unassign);
            self.fail_with.map_or(Ok(()), Err)
        }

        fn rebalance_protocol(&self) -> &str {
            "EAGER"
        }
    }

    fn partitions(topic: &str, partitions: &[i32]) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        for partition in partitions {
            list.add_partition(topic, *partition);
        }
        list
    }

    #[test]
    fn assign_then_revoke_unassigns_everything() {
        let client = FakeAssignment::default();
        let coordinator = RebalanceCoordinator::new("orders-consumer", None);

        assert!(coordinator.handle(&client, &Rebalance::Assign(partitions("orders", &[0, 1]))));
        let snapshot = coordinator.assignment();
        assert_eq!(snapshot.phase, AssignmentPhase::Assigned);
        assert_eq!(
            snapshot.partitions,
            vec![TopicPartition::new("orders", 0), TopicPartition::new("orders", 1)]
        );

        assert!(coordinator.handle(&client, &Rebalance::Revoke(partitions("orders", &[0]))));
        assert_eq!(coordinator.assignment(), AssignmentSnapshot::default());

        assert_eq!(
            *client.calls.lock().unwrap(),
            vec![Call::Assign(partitions("orders", &[0, 1])), Call::Unassign]
        );
    }

    #[test]
    fn failed_assign_leaves_consumer_unassigned() {
        let client = FakeAssignment {
            fail_with: Some(ErrorCode::State),
            ..Default::default()
        };
        let coordinator = RebalanceCoordinator::new("orders-consumer", None);

        coordinator.handle(&client, &Rebalance::Assign(partitions("orders", &[0])));
        assert_eq!(coordinator.phase(), AssignmentPhase::Unassigned);
        assert!(coordinator.assignment().partitions.is_empty());
    }

    #[test]
    fn failed_revoke_keeps_assignment() {
        let coordinator = RebalanceCoordinator::new("orders-consumer", None);
        coordinator.handle(
            &FakeAssignment::default(),
            &Rebalance::Assign(partitions("orders", &[0])),
        );

        let failing = FakeAssignment {
            fail_with: Some(ErrorCode::State),
            ..Default::default()
        };
        coordinator.handle(&failing, &Rebalance::Revoke(partitions("orders", &[0])));
        assert_eq!(coordinator.phase(), AssignmentPhase::Assigned);
        assert_eq!(
            coordinator.assignment().partitions,
            vec![TopicPartition::new("orders", 0)]
        );
    }

    #[test]
    fn rebalance_error_does_not_touch_assignment() {
        let client = FakeAssignment::default();
        let coordinator = RebalanceCoordinator::new("orders-consumer", None);
        coordinator.handle(&client, &Rebalance::Assign(partitions("orders", &[0])));

        assert!(!coordinator.handle(&client, &Rebalance::Error(ErrorCode::IllegalGeneration)));
        assert_eq!(coordinator.phase(), AssignmentPhase::Assigned);
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn testpoints_fire_per_partition() {
        let testpoints = Arc::new(RecordingTestpoints::default());
        let client = FakeAssignment::default();
        let coordinator = RebalanceCoordinator::new("orders-consumer", Some(testpoints.clone()));

        coordinator.handle(&client, &Rebalance::Assign(partitions("orders", &[0, 1])));
        coordinator.handle(&client, &Rebalance::Revoke(partitions("orders", &[0])));

        assert_eq!(
            testpoints.fired(),
            vec![
                "tp_orders-consumer_subscribed".to_string(),
                "tp_orders-consumer_subscribed".to_string(),
                "tp_orders-consumer_revoked".to_string(),
            ]
        );
    }

    #[test]
    fn close_and_resubscribe() {
        let client = FakeAssignment::default();
        let coordinator = RebalanceCoordinator::new("orders-consumer", None);
        coordinator.handle(&client, &Rebalance::Assign(partitions("orders", &[0])));

        coordinator.on_closed();
        assert_eq!(coordinator.phase(), AssignmentPhase::Closed);
        assert!(coordinator.assignment().partitions.is_empty());

        coordinator.on_subscribed();
        assert_eq!(coordinator.phase(), AssignmentPhase::Unassigned);
    }
}
