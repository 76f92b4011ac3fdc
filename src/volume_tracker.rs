use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;

use crate::vmi_types::{VirtualMachine, VirtualMachineInstance, Volume};

/// Seconds after first detection during which a late declaration in the VM
/// template reclassifies the volume as a persistent hotplug.
pub const GRACE_WINDOW_SECS: i64 = 60;

/// Seconds a volume must stay hotplug-only before it is reported as
/// ephemeral. Filters out the flapping caused by the VMI and VM specs being
/// observed independently.
pub const CONFIRMATION_THRESHOLD_SECS: i64 = 2;

/// Whether a volume source is a claim-backed or data-volume-backed disk
/// explicitly marked hotpluggable.
pub fn is_hotplug_volume(volume: &Volume) -> bool {
    volume
        .persistent_volume_claim
        .as_ref()
        .map_or(false, |pvc| pvc.hotpluggable)
        || volume.data_volume.as_ref().map_or(false, |dv| dv.hotpluggable)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeKey {
    pub namespace: String,
    pub vmi_name: String,
    pub volume_name: String,
}

impl fmt::Display for VolumeKey {
    // Renders the namespace/vmi_name/volume_name form used in logs and at
    // the metric label boundary. Volume names must not contain '/' for this
    // form to stay unambiguous.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.vmi_name, self.volume_name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackedVolume {
    first_observed_at: i64,
    confirmed: bool,
}

/// Tracks hotplug volumes that are present in a live VMI spec but missing
/// from the owning VirtualMachine's template, i.e. candidates for being
/// ephemeral. State lives for the process lifetime only; the reconcile loop
/// rebuilds it from scratch after a restart.
#[derive(Debug, Default)]
pub struct VolumeTracker {
    volumes: RwLock<HashMap<VolumeKey, TrackedVolume>>,
}

impl VolumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one reconciliation observation of a (VMI, VM) pair. Either
    /// object being absent is a quiet skip: reconcile passes legitimately
    /// run before both objects are resolvable.
    pub fn observe(&self, vmi: Option<&VirtualMachineInstance>, vm: Option<&VirtualMachine>) {
        self.observe_at(unix_now(), vmi, vm)
    }

    pub fn observe_at(
        &self,
        now: i64,
        vmi: Option<&VirtualMachineInstance>,
        vm: Option<&VirtualMachine>,
    ) {
        let (Some(vmi), Some(vm)) = (vmi, vm) else {
            return;
        };
        let (Some(namespace), Some(vmi_name)) =
            (vmi.metadata.namespace.as_ref(), vmi.metadata.name.as_ref())
        else {
            return;
        };
        let Some(template_spec) = vm.spec.template.as_ref().and_then(|t| t.spec.as_ref()) else {
            return;
        };

        let vm_volumes: HashMap<&str, &Volume> = template_spec
            .volumes
            .iter()
            .map(|v| (v.name.as_str(), v))
            .collect();

        // Live hotplug-eligible volumes, kept around for the unplug sweep.
        let mut vmi_volumes: HashMap<&str, &Volume> = HashMap::new();

        // The whole pass runs under one write lock so a concurrent scrape
        // never sees a half-applied sweep.
        let mut tracked = self.volumes.write();

        for volume in &vmi.spec.volumes {
            if !is_hotplug_volume(volume) {
                continue;
            }
            vmi_volumes.insert(volume.name.as_str(), volume);

            let key = VolumeKey {
                namespace: namespace.clone(),
                vmi_name: vmi_name.clone(),
                volume_name: volume.name.clone(),
            };
            if !vm_volumes.contains_key(volume.name.as_str()) {
                // Hotplug-only volume: anchor the timer on first detection
                // only. Re-observation must not reset it.
                tracked.entry(key).or_insert(TrackedVolume {
                    first_observed_at: now,
                    confirmed: false,
                });
            } else if let Some(status) = tracked.get(&key).copied() {
                // The volume has since been declared in the template. Inside
                // the grace window that means it was a persistent hotplug
                // all along and must not be reported as ephemeral. Past the
                // grace window the record is deliberately left untouched,
                // matching the metric's established behavior.
                if now - status.first_observed_at <= GRACE_WINDOW_SECS {
                    debug!(volume = %key, "hotplug volume declared in template, dropping");
                    tracked.remove(&key);
                }
            }
        }

        // Unplug sweep. Matches on the volume name alone across every
        // record, as the exported metric has always done.
        tracked.retain(|key, _| vmi_volumes.contains_key(key.volume_name.as_str()));

        for status in tracked.values_mut() {
            if now - status.first_observed_at > CONFIRMATION_THRESHOLD_SECS {
                status.confirmed = true;
            }
        }
    }

    /// Snapshot of the confirmed entries, in arbitrary order. Read-only;
    /// holds the shared lock only while copying keys out.
    pub fn collect_confirmed(&self) -> Vec<VolumeKey> {
        self.volumes
            .read()
            .iter()
            .filter(|(_, status)| status.confirmed)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}
