//! Observability: runtime counters and the sink abstraction.
//!
//! This module does not touch record stores or transactions; engine code
//! reports through `sink::record` only.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::EventReport;
pub use sink::{MetricsEvent, MetricsSink, metrics_report, metrics_reset_all, with_metrics_sink};

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Default)]
    struct Capture(RefCell<Vec<MetricsEvent>>);

    impl MetricsSink for Capture {
        fn record(&self, event: MetricsEvent) {
            self.0.borrow_mut().push(event);
        }
    }

    #[test]
    fn global_sink_accumulates_counters() {
        metrics_reset_all();

        sink::record(MetricsEvent::RemoteCall { method: "getDbInfo" });
        sink::record(MetricsEvent::RemoteCall { method: "getDbInfo" });
        sink::record(MetricsEvent::MergeRead {
            local: 2,
            remote: 3,
            masked: 1,
        });
        sink::record(MetricsEvent::TransactionFinished { committed: false });

        let report = metrics_report();
        assert_eq!(report.remote_calls, 2);
        assert_eq!(report.methods.get("getDbInfo"), Some(&2));
        assert_eq!(report.masked_remote_records, 1);
        assert_eq!(report.transactions_aborted, 1);

        metrics_reset_all();
        assert_eq!(metrics_report(), EventReport::default());
    }

    #[test]
    fn override_captures_and_restores() {
        metrics_reset_all();
        let capture = Rc::new(Capture::default());

        with_metrics_sink(capture.clone(), || {
            sink::record(MetricsEvent::CursorStep { from_remote: true });
        });
        sink::record(MetricsEvent::CursorStep { from_remote: false });

        assert_eq!(
            capture.0.borrow().as_slice(),
            &[MetricsEvent::CursorStep { from_remote: true }]
        );
        let report = metrics_report();
        assert_eq!(report.cursor_steps_remote, 0);
        assert_eq!(report.cursor_steps_local, 1);
    }
}
