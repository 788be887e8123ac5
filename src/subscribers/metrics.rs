//! # Prometheus metrics built from runtime events.
//!
//! [`MetricsCollector`] turns every event into a `metrics` counter and, for
//! timed events, a histogram sample. Each collector owns its own
//! [`PrometheusRecorder`] and records through [`metrics::with_local_recorder`],
//! so two collectors (or two supervisors in one test binary) never share series
//! and nothing is installed as the global recorder.
//!
//! ```text
//! Event ──► on_event ──► with_local_recorder(recorder)
//!                            ├─► counter!  conductor_worker_<kind>_total
//!                            └─► histogram! conductor_worker_<kind>_duration_ms
//!
//! render() ──► PrometheusHandle::render() ──► text exposition
//! ```
//!
//! Metric names follow [`EventKind::as_label`], every series carries a
//! `taskType` label. `PollFailed` adds `reason` (status code or `"error"`),
//! `TaskExecutionCompleted` adds the outcome `status`.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const PREFIX: &str = "conductor_worker";

/// Event-driven metrics sink.
///
/// Cheap to clone; clones share the same recorder, so one clone can be handed to
/// the supervisor as a subscriber while another renders.
#[derive(Clone)]
pub struct MetricsCollector {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            recorder: Arc::new(recorder),
            handle,
        }
    }

    fn record(&self, e: &Event) {
        let kind = e.kind.as_label();
        let task_type = e.task_type.clone().unwrap_or_default();

        let mut labels = vec![Label::new("taskType", task_type.clone())];
        match e.kind {
            EventKind::PollFailed => labels.push(Label::new(
                "reason",
                e.reason.clone().unwrap_or_else(|| "error".into()),
            )),
            EventKind::TaskExecutionCompleted => {
                if let Some(status) = e.status {
                    labels.push(Label::new("status", status.as_label()));
                }
            }
            _ => {}
        }

        metrics::with_local_recorder(&*self.recorder, || {
            metrics::counter!(format!("{PREFIX}_{kind}_total"), labels).increment(1);
            if let Some(ms) = e.duration_ms {
                metrics::histogram!(format!("{PREFIX}_{kind}_duration_ms"), "taskType" => task_type)
                    .record(ms as f64);
            }
        });
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Subscribe for MetricsCollector {
    async fn on_event(&self, event: &Event) {
        self.record(event);
    }

    fn name(&self) -> &'static str {
        "metrics"
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}

/// Value of the sample line for `series` whose label set contains every pair in
/// `labels`. Used by tests across the crate.
#[cfg(test)]
pub(crate) fn sample(text: &str, series: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(series)
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .find(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn counts_by_task_type_and_label() {
        let m = MetricsCollector::new();
        m.on_event(&Event::new(EventKind::Paused).with_task_type("orders")).await;
        m.on_event(&Event::new(EventKind::Paused).with_task_type("orders")).await;
        m.on_event(&Event::new(EventKind::Paused).with_task_type("billing")).await;
        m.on_event(
            &Event::new(EventKind::PollFailed)
                .with_task_type("orders")
                .with_reason("503"),
        )
        .await;

        let text = m.render();
        let paused = "conductor_worker_task_paused_total";
        assert_eq!(sample(&text, paused, &[("taskType", "orders")]), Some(2.0));
        assert_eq!(sample(&text, paused, &[("taskType", "billing")]), Some(1.0));

        let poll_error = "conductor_worker_task_poll_error_total";
        assert_eq!(
            sample(&text, poll_error, &[("taskType", "orders"), ("reason", "503")]),
            Some(1.0)
        );
        assert_eq!(
            sample(&text, poll_error, &[("taskType", "orders"), ("reason", "error")]),
            None
        );
    }

    #[tokio::test]
    async fn renders_prometheus_text() {
        let m = MetricsCollector::new();
        m.on_event(
            &Event::new(EventKind::TaskExecutionCompleted)
                .with_task_type("orders")
                .with_status(TaskStatus::Completed)
                .with_duration(Duration::from_millis(40)),
        )
        .await;
        m.on_event(
            &Event::new(EventKind::TaskExecutionCompleted)
                .with_task_type("orders")
                .with_status(TaskStatus::Failed)
                .with_duration(Duration::from_millis(60)),
        )
        .await;

        let text = m.render();
        assert!(text.contains("# TYPE conductor_worker_task_execution_completed_total counter"));
        let completed = "conductor_worker_task_execution_completed_total";
        assert_eq!(
            sample(&text, completed, &[("taskType", "orders"), ("status", "completed")]),
            Some(1.0)
        );
        assert_eq!(
            sample(&text, completed, &[("taskType", "orders"), ("status", "failed")]),
            Some(1.0)
        );

        let duration = "conductor_worker_task_execution_completed_duration_ms";
        assert_eq!(
            sample(&text, &format!("{duration}_sum"), &[("taskType", "orders")]),
            Some(100.0)
        );
        assert_eq!(
            sample(&text, &format!("{duration}_count"), &[("taskType", "orders")]),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn collectors_do_not_share_series() {
        let a = MetricsCollector::new();
        let b = MetricsCollector::new();
        a.on_event(&Event::new(EventKind::Paused).with_task_type("orders")).await;

        assert!(a.render().contains("conductor_worker_task_paused_total"));
        assert!(!b.render().contains("conductor_worker_task_paused_total"));
    }
}
