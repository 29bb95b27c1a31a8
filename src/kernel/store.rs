use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;
use tracing::debug;

use super::event::ConversationId;
use super::state::DialogueState;

#[derive(Debug, Default)]
struct Slot {
    state: Option<DialogueState>,
    /// Set by eviction under the slot lock; a writer that wakes up on a retired
    /// slot goes back to the map for a fresh one.
    retired: bool,
}

type Handle = Arc<Mutex<Slot>>;

/// Keyed dialogue memory.
///
/// **KERNEL LAW**: one lock per conversation. The map's shard lock is held only
/// long enough to fetch the per-key handle, never across a transition, so turns
/// for different conversations never wait on each other.
#[derive(Debug)]
pub struct ContextStore {
    entries: DashMap<ConversationId, Handle>,
    idle_timeout: Duration,
    history_len: usize,
}

impl ContextStore {
    pub fn new(idle_timeout: std::time::Duration, history_len: usize) -> Self {
        Self {
            entries: DashMap::new(),
            idle_timeout: Duration::from_std(idle_timeout).unwrap_or_else(|_| Duration::days(36_500)),
            history_len,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the stored state, if any. Blocks while a transition on the same
    /// conversation is running.
    ///
    /// Does not look at idleness: a state past the timeout is still returned
    /// until a sweep or `get_live` removes it.
    pub fn get(&self, id: &ConversationId) -> Option<DialogueState> {
        let handle = self.entries.get(id)?.value().clone();
        let slot = handle.lock();
        if slot.retired {
            return None;
        }
        slot.state.clone()
    }

    /// `get` as of `now`: a state idle past the timeout, with nothing in flight,
    /// is removed and reported absent without waiting for the sweeper.
    pub fn get_live(&self, id: &ConversationId, now: DateTime<Utc>) -> Option<DialogueState> {
        let handle = self.entries.get(id)?.value().clone();
        let mut slot = handle.lock();
        if slot.retired {
            return None;
        }
        let stale = slot
            .state
            .as_ref()
            .is_some_and(|s| s.in_flight() == 0 && s.is_stale(now, self.idle_timeout));
        if stale {
            debug!(conversation = %id, "stale dialogue state removed on lookup");
            slot.retired = true;
            self.entries.remove_if(id, |_, current| Arc::ptr_eq(current, &handle));
            return None;
        }
        slot.state.clone()
    }

    /// Atomic read-modify-write of one conversation's state.
    ///
    /// Creates the state on first contact. A state idle for longer than the
    /// timeout is discarded before `f` sees it, even if the sweeper has not
    /// reached it yet, unless a dispatch for it is still in flight.
    pub fn transact<R>(&self, id: &ConversationId, now: DateTime<Utc>, f: impl FnOnce(&mut DialogueState) -> R) -> R {
        let mut slot = self.lock_live(id);

        let stale = slot
            .state
            .as_ref()
            .is_some_and(|s| s.in_flight() == 0 && s.is_stale(now, self.idle_timeout));
        if stale {
            debug!(conversation = %id, "discarding stale dialogue state");
            slot.state = None;
        }

        let state = slot
            .state
            .get_or_insert_with(|| DialogueState::new(id.clone(), now, self.history_len));
        f(state)
    }

    /// `transact` returning the state as it stands afterwards.
    pub fn upsert(&self, id: &ConversationId, now: DateTime<Utc>, f: impl FnOnce(&mut DialogueState)) -> DialogueState {
        self.transact(id, now, |state| {
            f(state);
            state.clone()
        })
    }

    /// Like `transact`, but never creates or revives a state. Used to fold a
    /// dispatch result back after the lock was released; a conversation reset
    /// in the meantime stays reset.
    pub fn modify<R>(&self, id: &ConversationId, f: impl FnOnce(&mut DialogueState) -> R) -> Option<R> {
        let handle = self.entries.get(id)?.value().clone();
        let mut slot = handle.lock();
        if slot.retired {
            return None;
        }
        slot.state.as_mut().map(f)
    }

    /// Drops conversations idle for longer than `idle_timeout`. A conversation whose
    /// lock is held (mid-turn) or that has a dispatch in flight is left alone.
    pub fn evict_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> usize {
        // Collect first: no shard lock may be held while slot locks are taken
        let handles: Vec<(ConversationId, Handle)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut evicted = 0;
        for (id, handle) in handles {
            let Some(mut slot) = handle.try_lock() else {
                continue;
            };
            let idle = match &slot.state {
                Some(state) => state.in_flight() == 0 && state.is_stale(now, idle_timeout),
                None => true,
            };
            if !idle || slot.retired {
                continue;
            }
            slot.retired = true;
            self.entries.remove_if(&id, |_, current| Arc::ptr_eq(current, &handle));
            evicted += 1;
        }
        evicted
    }

    /// Explicit session reset: forget the conversation entirely.
    pub fn reset(&self, id: &ConversationId) -> bool {
        let Some(handle) = self.entries.get(id).map(|e| e.value().clone()) else {
            return false;
        };
        let mut slot = handle.lock();
        if slot.retired {
            return false;
        }
        slot.retired = true;
        self.entries.remove_if(id, |_, current| Arc::ptr_eq(current, &handle));
        true
    }

    fn lock_live(&self, id: &ConversationId) -> ArcMutexGuard<RawMutex, Slot> {
        loop {
            let handle = self.entries.entry(id.clone()).or_default().value().clone();
            let slot = handle.lock_arc();
            if !slot.retired {
                return slot;
            }
        }
    }
}
