use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};

use crate::filter::{ConditionEvaluator, PauseFilter};
use crate::types::{ActorRef, Breakpoint, BusySnapshot, PauseRecord};

pub(crate) type PauseTable = HashMap<ActorRef, PauseRecord>;
pub(crate) type BreakpointTable = HashMap<String, Breakpoint>;

/// Paused-actor and breakpoint tables locked together, always in that order.
pub(crate) struct PauseBook<'a> {
    pub pauses: MutexGuard<'a, PauseTable>,
    pub breakpoints: MutexGuard<'a, BreakpointTable>,
}

/// In-memory model of the cluster's debug state.
///
/// Four independently locked tables. Whenever more than one is needed the locks are
/// taken in the order pauses, breakpoints, busy, steps. Readers get clones; the only
/// code that mutates through the guards is the pause/breakpoint engine.
#[derive(Debug, Default)]
pub struct StateStore {
    pauses: Mutex<PauseTable>,
    breakpoints: Mutex<BreakpointTable>,
    busy: Mutex<BusySnapshot>,
    /// Ephemeral step breakpoint id -> command id waiting for it to fire.
    steps: Mutex<HashMap<String, String>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pause_of(&self, actor: &ActorRef) -> Option<PauseRecord> {
        self.pauses.lock().await.get(actor).cloned()
    }

    /// Records passing `filter`, ordered by actor.
    pub async fn paused_actors(
        &self,
        filter: &PauseFilter,
        evaluator: &dyn ConditionEvaluator,
    ) -> Vec<PauseRecord> {
        let mut records: Vec<PauseRecord> = self
            .pauses
            .lock()
            .await
            .values()
            .filter(|record| filter.accepts(record, evaluator))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.actor.cmp(&b.actor));
        records
    }

    pub async fn paused_count(&self) -> usize {
        self.pauses.lock().await.len()
    }

    pub async fn breakpoint(&self, breakpoint_id: &str) -> Option<Breakpoint> {
        self.breakpoints.lock().await.get(breakpoint_id).cloned()
    }

    /// All breakpoints ordered by id.
    pub async fn breakpoints(&self) -> Vec<Breakpoint> {
        let mut list: Vec<Breakpoint> = self.breakpoints.lock().await.values().cloned().collect();
        list.sort_by(|a, b| a.breakpoint_id.cmp(&b.breakpoint_id));
        list
    }

    pub async fn busy_snapshot(&self) -> BusySnapshot {
        self.busy.lock().await.clone()
    }

    pub async fn register_step(&self, breakpoint_id: &str, command_id: &str) {
        self.steps
            .lock()
            .await
            .insert(breakpoint_id.to_string(), command_id.to_string());
    }

    pub async fn step_command(&self, breakpoint_id: &str) -> Option<String> {
        self.steps.lock().await.get(breakpoint_id).cloned()
    }

    pub async fn clear_step(&self, breakpoint_id: &str) -> Option<String> {
        self.steps.lock().await.remove(breakpoint_id)
    }

    pub(crate) async fn lock_pause_book(&self) -> PauseBook<'_> {
        let pauses = self.pauses.lock().await;
        let breakpoints = self.breakpoints.lock().await;
        PauseBook {
            pauses,
            breakpoints,
        }
    }

    pub(crate) async fn lock_pauses_and_busy(
        &self,
    ) -> (MutexGuard<'_, PauseTable>, MutexGuard<'_, BusySnapshot>) {
        let pauses = self.pauses.lock().await;
        let busy = self.busy.lock().await;
        (pauses, busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAll;
    use serde_json::json;

    fn record(actor: &ActorRef, depth: u32) -> PauseRecord {
        serde_json::from_value(json!({
            "actorType": actor.actor_type,
            "actorId": actor.actor_id,
            "breakpointId": "bk-1",
            "pauseDepth": depth,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_paused_actors_are_sorted_and_filtered() {
        let store = StateStore::new();
        {
            let mut book = store.lock_pause_book().await;
            for (id, depth) in [("3", 0), ("1", 0), ("2", 1)] {
                let actor = ActorRef::new("Site", id);
                book.pauses.insert(actor.clone(), record(&actor, depth));
            }
        }

        let direct = store
            .paused_actors(&PauseFilter::default(), &AcceptAll)
            .await;
        let ids: Vec<&str> = direct.iter().map(|r| r.actor.actor_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let all = PauseFilter {
            include_indirect: true,
            ..PauseFilter::default()
        };
        assert_eq!(store.paused_actors(&all, &AcceptAll).await.len(), 3);
        assert_eq!(store.paused_count().await, 3);
    }

    #[tokio::test]
    async fn test_step_markers() {
        let store = StateStore::new();
        store.register_step("step-1", "cmd-9").await;
        assert_eq!(store.step_command("step-1").await.as_deref(), Some("cmd-9"));
        assert_eq!(store.clear_step("step-1").await.as_deref(), Some("cmd-9"));
        assert!(store.step_command("step-1").await.is_none());
    }

    #[tokio::test]
    async fn test_readers_get_copies() {
        let store = StateStore::new();
        let actor = ActorRef::new("Site", "1");
        store
            .lock_pause_book()
            .await
            .pauses
            .insert(actor.clone(), record(&actor, 0));

        let mut copy = store.pause_of(&actor).await.unwrap();
        copy.pause_depth = 9;
        assert_eq!(store.pause_of(&actor).await.unwrap().pause_depth, 0);
        assert!(store.busy_snapshot().await.is_empty());
    }
}
