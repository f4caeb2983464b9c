//! Prometheus metrics for the reconcile loop.

use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "kubevirt_machine_reconcile_total",
                "Machine reconciles by actuator action and result",
            ),
            &["action", "result"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;
        Ok(Self {
            registry,
            reconcile_total,
        })
    }

    /// Count one reconcile. `result` is "success" or "error".
    pub fn record(&self, action: &str, result: &str) {
        self.reconcile_total.with_label_values(&[action, result]).inc();
    }

    pub fn count(&self, action: &str, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[action, result]).get()
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
