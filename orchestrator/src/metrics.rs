use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Process-wide counters, exported on `/metrics`.
pub struct Metrics {
    registry: Registry,
    pub tasks_submitted: IntCounter,
    pub tasks_finalized: IntCounterVec,
    pub steps_dispatched: IntCounter,
    pub replies_dropped: IntCounter,
    pub dead_letters: IntCounter,
    pub worker_messages: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("orchestrator".into()), None)
            .unwrap_or_else(|_| Registry::new());

        let tasks_submitted = IntCounter::new("tasks_submitted_total", "Tasks accepted for planning")
            .expect("valid metric");
        let tasks_finalized = IntCounterVec::new(
            Opts::new("tasks_finalized_total", "Tasks that reached a terminal state"),
            &["outcome"],
        )
        .expect("valid metric");
        let steps_dispatched =
            IntCounter::new("steps_dispatched_total", "Plan steps sent to worker channels")
                .expect("valid metric");
        let replies_dropped = IntCounter::new(
            "replies_dropped_total",
            "Replies for unknown, finished or out-of-step tasks",
        )
        .expect("valid metric");
        let dead_letters = IntCounter::new("dead_letters_total", "Messages parked as unparseable")
            .expect("valid metric");
        let worker_messages = IntCounterVec::new(
            Opts::new("worker_messages_total", "Messages handled by worker loops"),
            &["role", "status"],
        )
        .expect("valid metric");

        for collector in [
            Box::new(tasks_submitted.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(tasks_finalized.clone()),
            Box::new(steps_dispatched.clone()),
            Box::new(replies_dropped.clone()),
            Box::new(dead_letters.clone()),
            Box::new(worker_messages.clone()),
        ] {
            registry.register(collector).expect("metric registered once");
        }

        Self {
            registry,
            tasks_submitted,
            tasks_finalized,
            steps_dispatched,
            replies_dropped,
            dead_letters,
            worker_messages,
        }
    }

    pub fn record_finalized(&self, outcome: &str) {
        self.tasks_finalized.with_label_values(&[outcome]).inc();
    }

    pub fn record_worker_message(&self, role: &str, status: &str) {
        self.worker_messages.with_label_values(&[role, status]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_prefixed_counters() {
        let metrics = Metrics::new();
        metrics.tasks_submitted.inc();
        metrics.record_finalized("completed");
        metrics.record_worker_message("writer", "completed");

        let text = String::from_utf8(metrics.render()).unwrap();
        assert!(text.contains("orchestrator_tasks_submitted_total 1"));
        assert!(text.contains(r#"orchestrator_tasks_finalized_total{outcome="completed"} 1"#));
        assert!(text.contains(r#"role="writer""#));
    }

    #[test]
    fn instances_are_independent() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.steps_dispatched.inc();
        assert_eq!(b.steps_dispatched.get(), 0);
    }
}
