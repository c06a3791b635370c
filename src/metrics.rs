use tracing::trace;

// Trace-level counters; enable with `RUST_LOG=audit.metrics=trace`.

pub fn inc_requests(route: &'static str) {
    trace!(target: "audit.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target: "audit.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn chunk_fetched(chunk: usize, elapsed_ms: u128) {
    trace!(
        target: "audit.metrics",
        chunk = chunk,
        elapsed_ms = elapsed_ms as u64,
        "chunk_fetch_elapsed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    #[derive(Clone, Default)]
    struct Targets(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for Targets {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0
                .lock()
                .unwrap()
                .push(event.metadata().target().to_string());
        }
    }

    #[test]
    fn events_use_metrics_target() {
        let targets = Targets::default();
        let subscriber = tracing_subscriber::registry().with(targets.clone());
        tracing::subscriber::with_default(subscriber, || {
            inc_requests("/reports");
            stage_elapsed("classify", 3);
            chunk_fetched(0, 12);
        });
        let seen = targets.0.lock().unwrap().clone();
        assert_eq!(seen, vec!["audit.metrics"; 3]);
    }
}
