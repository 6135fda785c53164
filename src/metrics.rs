use crate::resources::workspaces::ProbeResult;
use crate::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub culling_probes: IntCounterVec,
    pub culled_workspaces: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "workspaces_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["controller"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "workspaces_controller_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["controller", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!(
                "workspaces_controller_reconciliations_total",
                "reconciliations"
            ),
            &["controller"],
        )
        .unwrap();
        let culling_probes = IntCounterVec::new(
            opts!(
                "workspaces_controller_culling_probes_total",
                "activity probes sent to workspaces, by result"
            ),
            &["result"],
        )
        .unwrap();
        let culled_workspaces = IntCounter::new(
            "workspaces_controller_culled_workspaces_total",
            "workspaces paused for inactivity",
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            culling_probes,
            culled_workspaces,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.culling_probes.clone()))?;
        registry.register(Box::new(self.culled_workspaces.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(
        &self,
        controller: &str,
        obj: &T,
        e: &Error,
    ) {
        self.failures
            .with_label_values(&[controller, obj.name_any().as_ref(), e.metric_label()])
            .inc()
    }

    pub fn count_and_measure(&self, controller: &'static str) -> ReconcileMeasurer {
        self.reconciliations.with_label_values(&[controller]).inc();
        ReconcileMeasurer {
            start: Instant::now(),
            controller,
            metric: self.reconcile_duration.clone(),
        }
    }

    pub fn probe_completed(&self, result: ProbeResult) {
        self.culling_probes
            .with_label_values(&[result.as_str()])
            .inc()
    }

    pub fn workspace_culled(&self) {
        self.culled_workspaces.inc()
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    controller: &'static str,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.controller])
            .observe(duration);
    }
}
