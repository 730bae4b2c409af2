//! Metrics sink boundary.
//!
//! Engine logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
use crate::obs::metrics;
use std::{cell::RefCell, rc::Rc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent {
    RemoteCall {
        method: &'static str,
    },
    MergeRead {
        local: u64,
        remote: u64,
        masked: u64,
    },
    TransactionFinished {
        committed: bool,
    },
    CursorStep {
        from_remote: bool,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

/// GlobalMetricsSink
/// Default process-local sink that writes into the thread-local counters.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::RemoteCall { method } => {
                m.remote_calls = m.remote_calls.saturating_add(1);
                let entry = m.methods.entry(method.to_string()).or_default();
                *entry = entry.saturating_add(1);
            }
            MetricsEvent::MergeRead {
                local,
                remote,
                masked,
            } => {
                m.merged_reads = m.merged_reads.saturating_add(1);
                m.merged_local_records = m.merged_local_records.saturating_add(local);
                m.merged_remote_records = m.merged_remote_records.saturating_add(remote);
                m.masked_remote_records = m.masked_remote_records.saturating_add(masked);
            }
            MetricsEvent::TransactionFinished { committed: true } => {
                m.transactions_committed = m.transactions_committed.saturating_add(1);
            }
            MetricsEvent::TransactionFinished { committed: false } => {
                m.transactions_aborted = m.transactions_aborted.saturating_add(1);
            }
            MetricsEvent::CursorStep { from_remote: true } => {
                m.cursor_steps_remote = m.cursor_steps_remote.saturating_add(1);
            }
            MetricsEvent::CursorStep { from_remote: false } => {
                m.cursor_steps_local = m.cursor_steps_local.saturating_add(1);
            }
        });
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent) {
    let sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match sink {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current counters.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all counters.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
///
/// Events recorded by tasks that are still running after the closure
/// returns go back to the global sink.
pub fn with_metrics_sink<T>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Rc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0.take();
            });
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(prev);

    f()
}
