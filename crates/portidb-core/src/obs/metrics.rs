use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// EventState
/// Ephemeral, in-memory counters for engine activity.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventState {
    // Remote traffic
    pub remote_calls: u64,
    pub methods: BTreeMap<String, u64>,

    // Merged reads
    pub merged_reads: u64,
    pub merged_local_records: u64,
    pub merged_remote_records: u64,
    pub masked_remote_records: u64,

    // Transactions
    pub transactions_committed: u64,
    pub transactions_aborted: u64,

    // Cursors
    pub cursor_steps_local: u64,
    pub cursor_steps_remote: u64,
}

///
/// EventReport
/// Point-in-time copy of the counters.
///

pub type EventReport = EventState;

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

pub(crate) fn report() -> EventReport {
    EVENT_STATE.with(|m| m.borrow().clone())
}

pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}
