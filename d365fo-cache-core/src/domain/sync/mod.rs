// d365fo-cache-core/src/domain/sync/mod.rs

use crate::domain::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Full,
    EntitiesOnly,
    LabelsOnly,
    FullWithoutLabels,
    SharingMode,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed | SyncState::Cancelled)
    }

    /// §4.3 state machine: `pending -> running -> (completed | failed |
    /// cancelled)`, with `running -> cancelling -> cancelled` as the
    /// cancellation path. Terminal states are final.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
                | (Cancelling, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub session_id: String,
    pub environment_id: i64,
    pub target_global_version_id: Option<i64>,
    pub strategy: SyncStrategy,
    pub state: SyncState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: String,
    pub items_total: i64,
    pub items_done: i64,
    pub errors_count: i64,
    pub error_messages: Vec<String>,
}

impl SyncSession {
    pub fn new(environment_id: i64, strategy: SyncStrategy, now: DateTime<Utc>) -> Self {
        SyncSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            environment_id,
            target_global_version_id: None,
            strategy,
            state: SyncState::Pending,
            started_at: now,
            finished_at: None,
            phase: "pending".to_string(),
            items_total: 0,
            items_done: 0,
            errors_count: 0,
            error_messages: Vec::new(),
        }
    }

    pub fn transition(&mut self, next: SyncState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidSyncTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_cancellable(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Strategy selection:
/// - `full_without_labels` if there is no active version for the environment;
/// - `sharing_mode` if a *completed* matching version already exists for
///   another environment;
/// - `incremental` if an older completed version exists for the same
///   environment AND module-id overlap with the new version is >= 95%;
/// - otherwise `full`.
pub fn select_strategy(
    has_active_version: bool,
    matching_version_has_completed_sync: bool,
    previous_module_ids: Option<&HashSet<String>>,
    new_module_ids: &HashSet<String>,
) -> SyncStrategy {
    if !has_active_version {
        return SyncStrategy::FullWithoutLabels;
    }
    if matching_version_has_completed_sync {
        return SyncStrategy::SharingMode;
    }
    if let Some(previous) = previous_module_ids {
        if module_overlap_ratio(previous, new_module_ids) >= 0.95 {
            return SyncStrategy::Incremental;
        }
    }
    SyncStrategy::Full
}

/// Jaccard-style overlap ratio `|old ∩ new| / |old ∪ new|`.
pub fn module_overlap_ratio(old: &HashSet<String>, new: &HashSet<String>) -> f64 {
    if old.is_empty() && new.is_empty() {
        return 1.0;
    }
    let intersection = old.intersection(new).count();
    let union = old.union(new).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_active_version_forces_full_without_labels() {
        let s = select_strategy(false, false, None, &set(&["A"]));
        assert_eq!(s, SyncStrategy::FullWithoutLabels);
    }

    #[test]
    fn matching_completed_version_shares() {
        let s = select_strategy(true, true, None, &set(&["A"]));
        assert_eq!(s, SyncStrategy::SharingMode);
    }

    #[test]
    fn high_overlap_is_incremental() {
        let old = set(&["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"]);
        // 10/10 in common, 0 new, 0 removed => overlap 1.0
        let s = select_strategy(true, false, Some(&old), &old);
        assert_eq!(s, SyncStrategy::Incremental);
    }

    #[test]
    fn low_overlap_falls_back_to_full() {
        let old = set(&["A", "B"]);
        let new = set(&["C", "D"]);
        let s = select_strategy(true, false, Some(&old), &new);
        assert_eq!(s, SyncStrategy::Full);
    }

    #[test]
    fn state_machine_rejects_completed_to_running() {
        let mut session = SyncSession::new(1, SyncStrategy::Full, Utc::now());
        session.transition(SyncState::Running).expect("pending -> running");
        session.transition(SyncState::Completed).expect("running -> completed");
        assert!(session.transition(SyncState::Running).is_err());
    }

    #[test]
    fn cancellation_path_goes_through_cancelling() {
        let mut session = SyncSession::new(1, SyncStrategy::Full, Utc::now());
        session.transition(SyncState::Running).expect("pending -> running");
        session.transition(SyncState::Cancelling).expect("running -> cancelling");
        session.transition(SyncState::Cancelled).expect("cancelling -> cancelled");
        assert!(!session.is_cancellable());
    }
}
