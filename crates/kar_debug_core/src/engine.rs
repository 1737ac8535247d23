//! Rules for applying node events to the [`StateStore`].
//!
//! Every mutation of the pause and breakpoint tables goes through here, so hit counting,
//! `hit_actor` bookkeeping and indirect-pause propagation stay consistent no matter which
//! event triggered them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::registry::PendingRequestRegistry;
use crate::store::{PauseBook, PauseTable, StateStore};
use crate::types::{ActorRef, Breakpoint, BusySnapshot, PauseRecord, Phase};

#[derive(Debug, Clone)]
pub struct PauseBreakpointEngine {
    store: Arc<StateStore>,
    registry: Arc<PendingRequestRegistry>,
}

impl PauseBreakpointEngine {
    pub fn new(store: Arc<StateStore>, registry: Arc<PendingRequestRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Returns true if the actor was not paused before.
    pub async fn notify_pause(&self, record: PauseRecord) -> bool {
        let mut book = self.store.lock_pause_book().await;
        apply_pause(&mut book, record)
    }

    /// A breakpoint fired. Step breakpoints additionally wake the session waiting on them
    /// with the raw event.
    pub async fn notify_breakpoint(&self, record: PauseRecord, event: Value) {
        let breakpoint_id = record.breakpoint_id.clone();
        let is_step = {
            let mut book = self.store.lock_pause_book().await;
            let is_step = book
                .breakpoints
                .get(&breakpoint_id)
                .is_some_and(|bk| bk.delete_on_hit);
            info!(breakpoint_id = %breakpoint_id, actor = %record.actor, "Breakpoint hit");
            apply_pause(&mut book, record);
            is_step
        };

        // The marker is consulted even if the breakpoint entry is already gone.
        let Some(command_id) = self.store.step_command(&breakpoint_id).await else {
            if is_step {
                warn!(breakpoint_id = %breakpoint_id, "Step breakpoint hit with no waiting session");
            }
            return;
        };
        if let Err(e) = self.registry.deliver(&command_id, event).await {
            warn!(command_id = %command_id, "Dropping step completion: {}", e);
        }
    }

    /// Release `actor`, or every actor paused on `node_id` when `actor` is empty.
    /// An empty actor with an empty node id releases everything.
    pub async fn unpause(&self, actor: &ActorRef, node_id: &str) -> Vec<ActorRef> {
        let mut book = self.store.lock_pause_book().await;
        let targets: Vec<ActorRef> = if actor.is_empty() {
            book.pauses
                .values()
                .filter(|record| node_id.is_empty() || record.node_id == node_id)
                .map(|record| record.actor.clone())
                .collect()
        } else {
            vec![actor.clone()]
        };

        let released: Vec<ActorRef> = targets
            .into_iter()
            .filter(|target| release_pause(&mut book, target))
            .collect();
        if !released.is_empty() {
            info!(count = released.len(), node_id, "Unpaused actors");
        }
        released
    }

    /// Acknowledged install on one or more nodes.
    pub async fn set_breakpoint(&self, breakpoint: Breakpoint, command_id: Option<&str>) {
        let breakpoint_id = breakpoint.breakpoint_id.clone();
        let delete_on_hit = breakpoint.delete_on_hit;
        {
            let mut book = self.store.lock_pause_book().await;
            match book.breakpoints.get_mut(&breakpoint_id) {
                Some(existing) => existing
                    .installed_nodes
                    .extend(breakpoint.installed_nodes),
                None => {
                    book.breakpoints.insert(breakpoint_id.clone(), breakpoint);
                }
            }
        }
        if let (true, Some(command_id)) = (delete_on_hit, command_id) {
            self.store.register_step(&breakpoint_id, command_id).await;
        }
        debug!(breakpoint_id = %breakpoint_id, "Breakpoint installed");
    }

    /// Acknowledged removal from `nodes`; an empty list means every node.
    /// Returns true once the breakpoint is gone entirely.
    pub async fn unset_breakpoint(&self, breakpoint_id: &str, nodes: &[String]) -> bool {
        let mut book = self.store.lock_pause_book().await;
        let Some(bk) = book.breakpoints.get_mut(breakpoint_id) else {
            return false;
        };
        for node in nodes {
            bk.installed_nodes.remove(node);
        }
        if nodes.is_empty() || bk.installed_nodes.is_empty() {
            book.breakpoints.remove(breakpoint_id);
            debug!(breakpoint_id, "Breakpoint removed");
            return true;
        }
        false
    }

    pub async fn replace_breakpoints(&self, breakpoints: BTreeMap<String, Breakpoint>) {
        let mut book = self.store.lock_pause_book().await;
        *book.breakpoints = breakpoints
            .into_iter()
            .map(|(id, mut bk)| {
                if bk.breakpoint_id.is_empty() {
                    bk.breakpoint_id = id.clone();
                }
                (id, bk)
            })
            .collect();
        reconcile_hit_counts(&mut book);
    }

    pub async fn replace_paused_actors(&self, records: Vec<PauseRecord>) {
        let mut book = self.store.lock_pause_book().await;
        *book.pauses = records
            .into_iter()
            .map(|record| (record.actor.clone(), record))
            .collect();
        reconcile_hit_counts(&mut book);
    }

    /// Install a fresh busy snapshot and recompute every indirect pause from it.
    /// Returns how many indirect records were synthesized.
    pub async fn apply_busy_snapshot(&self, snapshot: BusySnapshot) -> usize {
        let (mut pauses, mut busy) = self.store.lock_pauses_and_busy().await;
        *busy = snapshot;
        pauses.retain(|_, record| record.is_direct());

        let planned = plan_indirect_pauses(&busy, &pauses);
        let count = planned.len();
        for record in planned {
            pauses.insert(record.actor.clone(), record);
        }
        debug!(indirect = count, "Busy snapshot applied");
        count
    }
}

fn apply_pause(book: &mut PauseBook<'_>, record: PauseRecord) -> bool {
    let previous = book.pauses.get(&record.actor);
    let fresh = previous.is_none();
    // An indirect record being upgraded to a direct pause counts as a new hit.
    let newly_direct = record.is_direct() && !previous.is_some_and(PauseRecord::is_direct);
    if newly_direct {
        if let Some(bk) = book.breakpoints.get_mut(&record.breakpoint_id) {
            if !bk.delete_on_hit {
                bk.record_direct_pause(&record.actor);
            }
        }
    }
    book.pauses.insert(record.actor.clone(), record);
    fresh
}

fn release_pause(book: &mut PauseBook<'_>, actor: &ActorRef) -> bool {
    let Some(record) = book.pauses.remove(actor) else {
        return false;
    };
    if record.is_direct() {
        if let Some(bk) = book.breakpoints.get_mut(&record.breakpoint_id) {
            if !bk.delete_on_hit {
                bk.release_direct_pause();
            }
        }
        // Everything waiting on this actor is no longer held by it.
        book.pauses
            .retain(|_, other| other.is_direct() || other.root_actor.as_ref() != Some(actor));
    }
    true
}

/// Recompute counters and `hit_actor` after either table was replaced wholesale.
fn reconcile_hit_counts(book: &mut PauseBook<'_>) {
    let mut direct: HashMap<&str, Vec<&ActorRef>> = HashMap::new();
    for record in book.pauses.values().filter(|r| r.is_direct()) {
        direct
            .entry(record.breakpoint_id.as_str())
            .or_default()
            .push(&record.actor);
    }

    for (id, bk) in book.breakpoints.iter_mut() {
        let mut holders = if bk.delete_on_hit {
            Vec::new()
        } else {
            direct.get(id.as_str()).cloned().unwrap_or_default()
        };
        holders.sort();
        bk.num_paused_actors = u32::try_from(holders.len()).unwrap_or(u32::MAX);
        let still_valid = bk
            .hit_actor
            .as_ref()
            .is_some_and(|hit| holders.contains(&hit));
        if !still_valid {
            bk.hit_actor = holders.first().map(|actor| (*actor).clone());
        }
    }
}

/// Indirect pauses implied by `snapshot` given the direct pauses in `pauses`.
///
/// For every leaf request whose target is directly paused, climbs the parent chain and
/// records each waiting ancestor once, with its hop distance from the paused actor.
pub fn plan_indirect_pauses(snapshot: &BusySnapshot, pauses: &PauseTable) -> Vec<PauseRecord> {
    let mut planned: BTreeMap<ActorRef, PauseRecord> = BTreeMap::new();

    for (leaf_id, leaf) in snapshot.leaf_requests() {
        let Some(root) = pauses.get(&leaf.actor).filter(|r| r.is_direct()) else {
            continue;
        };
        let flow_id = if leaf.flow_id.is_empty() {
            root.flow_id.clone()
        } else {
            leaf.flow_id.clone()
        };

        let mut child_request = leaf_id.as_str();
        let mut child_actor = &leaf.actor;
        let mut parent_id = leaf.parent_request_id.as_str();
        let mut depth = 1;

        while let Some(actor) = snapshot.actor_for(parent_id) {
            if pauses.contains_key(actor) || planned.contains_key(actor) {
                break;
            }
            planned.insert(
                actor.clone(),
                PauseRecord {
                    actor: actor.clone(),
                    request_id: child_request.to_string(),
                    request_value: snapshot
                        .actor_sent
                        .get(child_request)
                        .map(|sent| sent.request_value.clone())
                        .unwrap_or_default(),
                    response_value: None,
                    phase: Phase::Request,
                    breakpoint_id: root.breakpoint_id.clone(),
                    node_id: root.node_id.clone(),
                    flow_id: flow_id.clone(),
                    pause_depth: depth,
                    root_actor: Some(leaf.actor.clone()),
                    child_actor: Some(child_actor.clone()),
                    child_request_id: Some(child_request.to_string()),
                    can_step: true,
                },
            );

            let Some(sent) = snapshot.actor_sent.get(parent_id) else {
                break;
            };
            child_request = parent_id;
            child_actor = actor;
            parent_id = sent.parent_request_id.as_str();
            depth += 1;
        }
    }

    planned.into_values().collect()
}
