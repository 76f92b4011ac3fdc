use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// The subset of the kubevirt.io/v1 API consumed by this controller:
// volumes (for hotplug tracking) and the domain cpu/memory settings
// (for the launcher overhead estimation).

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "kubevirt.io", version = "v1", kind = "VirtualMachineInstance")]
#[kube(shortname = "vmi", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainSpec>,
}

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "kubevirt.io", version = "v1", kind = "VirtualMachine")]
#[kube(shortname = "vm", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<VirtualMachineInstanceTemplateSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<VirtualMachineInstanceSpec>,
}

// Volume sources are embedded inline in the volume, matching the kubevirt
// wire format. Only claim-backed and data-volume-backed sources can be
// hotpluggable; containerDisk is carried as a representative cold-plug
// source.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimVolumeSource {
    pub claim_name: String,
    #[serde(default)]
    pub hotpluggable: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSource {
    pub name: String,
    #[serde(default)]
    pub hotpluggable: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<Quantity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_deserializes_kubevirt_wire_form() {
        let volume: Volume = serde_json::from_value(serde_json::json!({
            "name": "disk1",
            "persistentVolumeClaim": {
                "claimName": "disk1-claim",
                "hotpluggable": true
            }
        }))
        .unwrap();
        assert_eq!(volume.name, "disk1");
        let pvc = volume.persistent_volume_claim.unwrap();
        assert_eq!(pvc.claim_name, "disk1-claim");
        assert!(pvc.hotpluggable);
    }

    #[test]
    fn hotpluggable_defaults_to_false() {
        let volume: Volume = serde_json::from_value(serde_json::json!({
            "name": "dv",
            "dataVolume": { "name": "dv" }
        }))
        .unwrap();
        assert!(!volume.data_volume.unwrap().hotpluggable);
    }

    #[test]
    fn vm_template_carries_instance_spec() {
        let vm: VirtualMachineSpec = serde_json::from_value(serde_json::json!({
            "running": true,
            "template": {
                "spec": {
                    "volumes": [
                        { "name": "rootdisk", "containerDisk": { "image": "quay.io/demo/rootdisk" } }
                    ]
                }
            }
        }))
        .unwrap();
        let spec = vm.template.unwrap().spec.unwrap();
        assert_eq!(spec.volumes.len(), 1);
        assert_eq!(spec.volumes[0].name, "rootdisk");
    }
}
