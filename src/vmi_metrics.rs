use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::{proto, GaugeVec, Opts, Registry};
use thiserror::Error;

use crate::volume_tracker::VolumeTracker;

pub const LAUNCHER_MEMORY_OVERHEAD_NAME: &str = "kubevirt_vmi_launcher_memory_overhead_bytes";
const LAUNCHER_MEMORY_OVERHEAD_HELP: &str = "Estimation of the memory amount required for virt-launcher's infrastructure components (e.g. libvirt, QEMU).";

pub const EPHEMERAL_HOTPLUG_VOLUME_NAME: &str = "kubevirt_vmi_ephemeral_hotplug_volume_total";
const EPHEMERAL_HOTPLUG_VOLUME_HELP: &str =
    "Total number of ephemeral hotplug volumes added to the VMI.";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("no memory overhead sample recorded for {namespace}/{name}")]
    NotRecorded { namespace: String, name: String },
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Handle over the VMI metric surface. Constructed once at process start
/// against the process registry; both the reconcile loop and the scrape
/// endpoint go through it, nothing global.
pub struct VmiMetrics {
    launcher_memory_overhead: GaugeVec,
    tracker: Arc<VolumeTracker>,
}

impl VmiMetrics {
    pub fn register(registry: &Registry) -> Result<Self, MetricsError> {
        let launcher_memory_overhead = GaugeVec::new(
            Opts::new(LAUNCHER_MEMORY_OVERHEAD_NAME, LAUNCHER_MEMORY_OVERHEAD_HELP),
            &["namespace", "name"],
        )?;
        registry.register(Box::new(launcher_memory_overhead.clone()))?;

        let tracker = Arc::new(VolumeTracker::new());
        registry.register(Box::new(EphemeralVolumeCollector::new(tracker.clone())?))?;

        Ok(Self {
            launcher_memory_overhead,
            tracker,
        })
    }

    /// The ledger behind the ephemeral hotplug volume metric, to be fed by
    /// the reconcile loop.
    pub fn tracker(&self) -> Arc<VolumeTracker> {
        self.tracker.clone()
    }

    /// Unconditional overwrite; value validation is the caller's job.
    pub fn set_launcher_memory_overhead(&self, namespace: &str, name: &str, bytes: f64) {
        self.launcher_memory_overhead
            .with_label_values(&[namespace, name])
            .set(bytes);
    }

    /// Reads back the last recorded overhead for a VMI. Scans the collected
    /// family instead of going through `with_label_values`, which would
    /// silently create a zero-valued child and make "never measured"
    /// indistinguishable from zero.
    pub fn launcher_memory_overhead(&self, namespace: &str, name: &str) -> Result<f64, MetricsError> {
        for family in self.launcher_memory_overhead.collect() {
            for metric in family.get_metric() {
                let labels = metric.get_label();
                let matches = labels
                    .iter()
                    .any(|l| l.get_name() == "namespace" && l.get_value() == namespace)
                    && labels
                        .iter()
                        .any(|l| l.get_name() == "name" && l.get_value() == name);
                if matches {
                    return Ok(metric.get_gauge().get_value());
                }
            }
        }
        Err(MetricsError::NotRecorded {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// Pull-based collector projecting the tracker's confirmed entries into
/// gauge samples of value 1 at scrape time. Never mutates the tracker.
pub struct EphemeralVolumeCollector {
    desc: Desc,
    tracker: Arc<VolumeTracker>,
}

impl EphemeralVolumeCollector {
    pub fn new(tracker: Arc<VolumeTracker>) -> Result<Self, prometheus::Error> {
        let desc = Desc::new(
            EPHEMERAL_HOTPLUG_VOLUME_NAME.to_string(),
            EPHEMERAL_HOTPLUG_VOLUME_HELP.to_string(),
            vec![
                "namespace".to_string(),
                "vmi_name".to_string(),
                "volume_name".to_string(),
            ],
            std::collections::HashMap::new(),
        )?;
        Ok(Self { desc, tracker })
    }
}

impl Collector for EphemeralVolumeCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        // A fresh vec per scrape keeps the output an exact projection of the
        // current confirmed set; a persistent vec would accumulate stale
        // children for entries the sweep has since dropped.
        let gauge = match GaugeVec::new(
            Opts::new(EPHEMERAL_HOTPLUG_VOLUME_NAME, EPHEMERAL_HOTPLUG_VOLUME_HELP),
            &["namespace", "vmi_name", "volume_name"],
        ) {
            Ok(gauge) => gauge,
            Err(_) => return Vec::new(),
        };
        for key in self.tracker.collect_confirmed() {
            gauge
                .with_label_values(&[&key.namespace, &key.vmi_name, &key.volume_name])
                .set(1.0);
        }
        gauge.collect()
    }
}
