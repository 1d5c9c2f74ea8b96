//! Group rebalance handling.
//!
//! A [`RebalanceCoordinator`] receives the raw notifications a [`Handle`]
//! produces while polling, classifies them, runs the matching user callback
//! and applies the outcome back to the handle before polling resumes.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::{ErrorCode, KafkaError, RebalanceAction};
use crate::handle::Handle;
use crate::topic_partition::TopicPartitionList;
use crate::Result;

/// Called with the partitions about to be assigned. Offsets may be rewritten;
/// the set of partitions and their order must stay as given.
pub type AssignmentCallback = Box<dyn FnMut(&mut TopicPartitionList) + Send + Sync>;
/// Called with the partitions being revoked, before they are unassigned.
pub type RevocationCallback = Box<dyn FnMut(&TopicPartitionList) + Send + Sync>;
/// Called when the group reports a rebalance failure.
pub type RebalanceErrorCallback = Box<dyn FnMut(ErrorCode) + Send + Sync>;

/// A rebalance notification after classification.
#[derive(Clone, Debug, PartialEq)]
pub enum RebalanceEvent {
    Assign(TopicPartitionList),
    Revoke(TopicPartitionList),
    Error(ErrorCode),
}

impl RebalanceEvent {
    pub fn classify(code: ErrorCode, partitions: TopicPartitionList) -> Self {
        match code {
            ErrorCode::ASSIGN_PARTITIONS => RebalanceEvent::Assign(partitions),
            ErrorCode::REVOKE_PARTITIONS => RebalanceEvent::Revoke(partitions),
            other => RebalanceEvent::Error(other),
        }
    }
}

/// Holds the rebalance callbacks and applies rebalance events to a handle.
#[derive(Default)]
pub struct RebalanceCoordinator {
    assignment_callback: Option<AssignmentCallback>,
    revocation_callback: Option<RevocationCallback>,
    rebalance_error_callback: Option<RebalanceErrorCallback>,
}

impl RebalanceCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_assignment_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut TopicPartitionList) + Send + Sync + 'static,
    {
        self.assignment_callback = Some(Box::new(callback));
    }

    pub fn set_revocation_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&TopicPartitionList) + Send + Sync + 'static,
    {
        self.revocation_callback = Some(Box::new(callback));
    }

    pub fn set_rebalance_error_callback<F>(&mut self, callback: F)
    where
        F: FnMut(ErrorCode) + Send + Sync + 'static,
    {
        self.rebalance_error_callback = Some(Box::new(callback));
    }

    pub fn has_assignment_callback(&self) -> bool {
        self.assignment_callback.is_some()
    }

    pub fn has_revocation_callback(&self) -> bool {
        self.revocation_callback.is_some()
    }

    pub fn has_rebalance_error_callback(&self) -> bool {
        self.rebalance_error_callback.is_some()
    }

    /// Handles one rebalance notification from `handle`.
    ///
    /// Assignments go through the assignment callback and are then applied
    /// with [`Handle::assign`]. Revocations go through the revocation callback
    /// and always end with [`Handle::unassign`], even if the callback panics.
    /// Any other code is passed to the rebalance error callback and leaves the
    /// assignment untouched.
    ///
    /// # Errors
    ///
    /// * [`KafkaError::InvalidAssignment`] if the assignment callback added,
    ///   removed or reordered partitions. Nothing is assigned in that case.
    /// * [`KafkaError::RebalanceApplyError`] if the handle refused the
    ///   assign or unassign.
    pub fn handle_rebalance<H>(
        &mut self,
        handle: &mut H,
        code: ErrorCode,
        partitions: TopicPartitionList,
    ) -> Result<()>
    where
        H: Handle + ?Sized,
    {
        match RebalanceEvent::classify(code, partitions) {
            RebalanceEvent::Assign(partitions) => self.assign(handle, partitions),
            RebalanceEvent::Revoke(partitions) => self.revoke(handle, &partitions),
            RebalanceEvent::Error(code) => {
                self.rebalance_error(code);
                Ok(())
            }
        }
    }

    fn assign<H>(&mut self, handle: &mut H, mut partitions: TopicPartitionList) -> Result<()>
    where
        H: Handle + ?Sized,
    {
        info!(
            member_id = %handle.get_member_id(),
            partitions = partitions.len(),
            "Partitions assigned: {}",
            partitions
        );
        if let Some(callback) = self.assignment_callback.as_mut() {
            let delivered = partitions.clone();
            debug!("Invoking assignment callback");
            callback(&mut partitions);
            if !partitions.same_partitions(&delivered) {
                error!(
                    "Assignment callback changed the partition set, refusing to assign {}",
                    partitions
                );
                return Err(KafkaError::InvalidAssignment {
                    expected: delivered,
                    actual: partitions,
                });
            }
        }
        handle
            .assign(&partitions)
            .map_err(|source| KafkaError::RebalanceApplyError {
                action: RebalanceAction::Assign,
                source: Box::new(source),
            })
    }

    fn revoke<H>(&mut self, handle: &mut H, partitions: &TopicPartitionList) -> Result<()>
    where
        H: Handle + ?Sized,
    {
        info!(
            member_id = %handle.get_member_id(),
            partitions = partitions.len(),
            "Partitions revoked: {}",
            partitions
        );
        let guard = UnassignGuard {
            handle: Some(handle),
        };
        if let Some(callback) = self.revocation_callback.as_mut() {
            debug!("Invoking revocation callback");
            callback(partitions);
        }
        guard.finish()
    }

    fn rebalance_error(&mut self, code: ErrorCode) {
        warn!(code = %code, "Rebalance error");
        if let Some(callback) = self.rebalance_error_callback.as_mut() {
            debug!("Invoking rebalance error callback");
            callback(code);
        }
    }
}

impl fmt::Debug for RebalanceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebalanceCoordinator")
            .field("assignment_callback", &self.has_assignment_callback())
            .field("revocation_callback", &self.has_revocation_callback())
            .field("rebalance_error_callback", &self.has_rebalance_error_callback())
            .finish()
    }
}

/// Unassigns the handle when finished or when dropped during unwinding.
struct UnassignGuard<'a, H: Handle + ?Sized> {
    handle: Option<&'a mut H>,
}

impl<H: Handle + ?Sized> UnassignGuard<'_, H> {
    fn finish(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => unassign(handle),
            None => Ok(()),
        }
    }
}

impl<H: Handle + ?Sized> Drop for UnassignGuard<'_, H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = unassign(handle) {
                error!("Failed to unassign revoked partitions: {}", e);
            }
        }
    }
}

fn unassign<H: Handle + ?Sized>(handle: &mut H) -> Result<()> {
    handle
        .unassign()
        .map_err(|source| KafkaError::RebalanceApplyError {
            action: RebalanceAction::Unassign,
            source: Box::new(source),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;

    use crate::handle::MockHandle;
    use crate::topic_partition::{Offset, TopicPartition};

    fn partitions() -> TopicPartitionList {
        vec![TopicPartition::new("t", 0), TopicPartition::new("t", 1)].into()
    }

    fn mock_handle() -> MockHandle {
        let mut handle = MockHandle::new();
        handle
            .expect_get_member_id()
            .returning(|| "member-1".to_string());
        handle
    }

    #[test]
    fn classifies_codes() {
        assert_matches!(
            RebalanceEvent::classify(ErrorCode::ASSIGN_PARTITIONS, partitions()),
            RebalanceEvent::Assign(list) if list.len() == 2
        );
        assert_matches!(
            RebalanceEvent::classify(ErrorCode::REVOKE_PARTITIONS, partitions()),
            RebalanceEvent::Revoke(_)
        );
        assert_eq!(
            RebalanceEvent::classify(ErrorCode::ILLEGAL_GENERATION, partitions()),
            RebalanceEvent::Error(ErrorCode::ILLEGAL_GENERATION)
        );
    }

    #[test]
    fn assign_without_callback_applies_list_unchanged() {
        let mut handle = mock_handle();
        handle
            .expect_assign()
            .withf(|list| list.same_partitions(&partitions()))
            .times(1)
            .returning(|_| Ok(()));

        let mut coordinator = RebalanceCoordinator::new();
        coordinator
            .handle_rebalance(&mut handle, ErrorCode::ASSIGN_PARTITIONS, partitions())
            .unwrap();
    }

    #[test]
    fn assign_applies_offsets_rewritten_by_callback() {
        let mut handle = mock_handle();
        handle
            .expect_assign()
            .withf(|list| {
                list.find("t", 0).map(|tp| tp.offset()) == Some(Offset::Offset(40))
                    && list.find("t", 1).map(|tp| tp.offset()) == Some(Offset::Beginning)
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut coordinator = RebalanceCoordinator::new();
        coordinator.set_assignment_callback(|list: &mut TopicPartitionList| {
            list.set_offset("t", 0, 40);
            list.set_offset("t", 1, Offset::Beginning);
        });
        coordinator
            .handle_rebalance(&mut handle, ErrorCode::ASSIGN_PARTITIONS, partitions())
            .unwrap();
    }

    #[test]
    fn assign_rejects_callback_that_changes_partition_set() {
        let mut handle = mock_handle();
        handle.expect_assign().never();

        let mut coordinator = RebalanceCoordinator::new();
        coordinator.set_assignment_callback(|list: &mut TopicPartitionList| {
            list.add_partition("t", 2);
        });
        let result =
            coordinator.handle_rebalance(&mut handle, ErrorCode::ASSIGN_PARTITIONS, partitions());
        assert_matches!(
            result,
            Err(KafkaError::InvalidAssignment { expected, actual })
                if expected.len() == 2 && actual.len() == 3
        );

        coordinator.set_assignment_callback(|list: &mut TopicPartitionList| {
            list.remove("t", 0);
        });
        let result =
            coordinator.handle_rebalance(&mut handle, ErrorCode::ASSIGN_PARTITIONS, partitions());
        assert_matches!(result, Err(KafkaError::InvalidAssignment { .. }));
    }

    #[test]
    fn assign_failure_is_reported_as_apply_error() {
        let mut handle = mock_handle();
        handle
            .expect_assign()
            .returning(|_| Err(KafkaError::broker(ErrorCode::ILLEGAL_GENERATION)));

        let mut coordinator = RebalanceCoordinator::new();
        let result =
            coordinator.handle_rebalance(&mut handle, ErrorCode::ASSIGN_PARTITIONS, partitions());
        assert_matches!(
            result,
            Err(KafkaError::RebalanceApplyError {
                action: RebalanceAction::Assign,
                ..
            })
        );
    }

    #[test]
    fn revoke_without_callback_unassigns() {
        let mut handle = mock_handle();
        handle.expect_unassign().times(1).returning(|| Ok(()));

        let mut coordinator = RebalanceCoordinator::new();
        coordinator
            .handle_rebalance(&mut handle, ErrorCode::REVOKE_PARTITIONS, partitions())
            .unwrap();
    }

    #[test]
    fn revoke_callback_sees_list_before_unassign() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut handle = mock_handle();
        let order = seen.clone();
        handle.expect_unassign().times(1).returning(move || {
            order.lock().unwrap().push("unassign".to_string());
            Ok(())
        });

        let mut coordinator = RebalanceCoordinator::new();
        let order = seen.clone();
        coordinator.set_revocation_callback(move |list: &TopicPartitionList| {
            order.lock().unwrap().push(list.to_string());
        });
        coordinator
            .handle_rebalance(&mut handle, ErrorCode::REVOKE_PARTITIONS, partitions())
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["[t[0:INVALID], t[1:INVALID]]".to_string(), "unassign".to_string()]
        );
    }

    #[test]
    fn revoke_unassigns_even_when_callback_panics() {
        let mut handle = mock_handle();
        handle.expect_unassign().times(1).returning(|| Ok(()));

        let mut coordinator = RebalanceCoordinator::new();
        coordinator.set_revocation_callback(|_: &TopicPartitionList| panic!("flush failed"));

        let result = catch_unwind(AssertUnwindSafe(|| {
            coordinator.handle_rebalance(&mut handle, ErrorCode::REVOKE_PARTITIONS, partitions())
        }));
        assert!(result.is_err());
        handle.checkpoint();
    }

    #[test]
    fn revoke_unassign_failure_is_reported_as_apply_error() {
        let mut handle = mock_handle();
        handle
            .expect_unassign()
            .times(1)
            .returning(|| Err(KafkaError::broker(ErrorCode::DESTROY)));

        let mut coordinator = RebalanceCoordinator::new();
        let result =
            coordinator.handle_rebalance(&mut handle, ErrorCode::REVOKE_PARTITIONS, partitions());
        assert_matches!(
            result,
            Err(KafkaError::RebalanceApplyError {
                action: RebalanceAction::Unassign,
                ..
            })
        );
    }

    #[test]
    fn error_event_only_notifies() {
        let mut handle = mock_handle();
        handle.expect_assign().never();
        handle.expect_unassign().never();

        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = codes.clone();
        let mut coordinator = RebalanceCoordinator::new();
        coordinator.set_rebalance_error_callback(move |code| sink.lock().unwrap().push(code));

        coordinator
            .handle_rebalance(&mut handle, ErrorCode::UNKNOWN_MEMBER_ID, partitions())
            .unwrap();
        coordinator
            .handle_rebalance(&mut handle, ErrorCode::STATE, TopicPartitionList::new())
            .unwrap();
        assert_eq!(
            *codes.lock().unwrap(),
            vec![ErrorCode::UNKNOWN_MEMBER_ID, ErrorCode::STATE]
        );
    }

    #[test]
    fn debug_shows_registered_callbacks() {
        let mut coordinator = RebalanceCoordinator::new();
        coordinator.set_revocation_callback(|_: &TopicPartitionList| {});
        assert_eq!(
            format!("{:?}", coordinator),
            "RebalanceCoordinator { assignment_callback: false, revocation_callback: true, rebalance_error_callback: false }"
        );
    }
}
