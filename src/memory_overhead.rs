//! Rough estimate of the memory virt-launcher's infrastructure components
//! (libvirt, QEMU, monitoring helpers) consume on top of the guest memory.
//! Feeds the launcher memory overhead gauge; the estimate is best-effort
//! and deliberately total: missing or unparseable spec fields contribute
//! their defaults instead of failing the reconcile.

use crate::vmi_types::VirtualMachineInstance;

const MIB: f64 = 1024.0 * 1024.0;

/// Fixed cost of the launcher pod infrastructure.
const BASE_OVERHEAD_BYTES: f64 = 225.0 * MIB;

/// QEMU bookkeeping per vCPU.
const PER_VCPU_OVERHEAD_BYTES: f64 = 8.0 * MIB;

/// Pagetable cost, one byte per 512 bytes of guest memory.
const PAGETABLE_FRACTION: f64 = 1.0 / 512.0;

pub fn launcher_memory_overhead_bytes(vmi: &VirtualMachineInstance) -> f64 {
    let domain = vmi.spec.domain.as_ref();
    let cores = domain
        .and_then(|d| d.cpu.as_ref())
        .and_then(|c| c.cores)
        .unwrap_or(1) as f64;
    let guest_bytes = domain
        .and_then(|d| d.memory.as_ref())
        .and_then(|m| m.guest.as_ref())
        .and_then(|q| parse_quantity_bytes(&q.0))
        .unwrap_or(0.0);

    BASE_OVERHEAD_BYTES + cores * PER_VCPU_OVERHEAD_BYTES + guest_bytes * PAGETABLE_FRACTION
}

/// Parses the decimal and binary suffixes a memory quantity can carry
/// ("2Gi", "512Mi", "1500M", plain bytes). Exponent forms are not used for
/// memory in practice and are not supported.
fn parse_quantity_bytes(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(quantity.len());
    let (digits, suffix) = quantity.split_at(split);
    let value: f64 = digits.parse().ok()?;
    let scale = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        _ => return None,
    };
    Some(value * scale)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    use super::*;
    use crate::vmi_types::{
        CpuSpec, DomainSpec, MemorySpec, VirtualMachineInstance, VirtualMachineInstanceSpec,
    };

    fn vmi_with(cores: Option<u32>, guest: Option<&str>) -> VirtualMachineInstance {
        VirtualMachineInstance::new(
            "vmi-a",
            VirtualMachineInstanceSpec {
                volumes: Vec::new(),
                domain: Some(DomainSpec {
                    cpu: cores.map(|c| CpuSpec { cores: Some(c) }),
                    memory: guest.map(|g| MemorySpec {
                        guest: Some(Quantity(g.to_string())),
                    }),
                }),
            },
        )
    }

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(parse_quantity_bytes("1024"), Some(1024.0));
        assert_eq!(parse_quantity_bytes("2Ki"), Some(2048.0));
        assert_eq!(parse_quantity_bytes("512Mi"), Some(512.0 * 1024.0 * 1024.0));
        assert_eq!(parse_quantity_bytes("2Gi"), Some(2.0 * 1024.0 * 1024.0 * 1024.0));
        assert_eq!(parse_quantity_bytes("1500M"), Some(1.5e9));
        assert_eq!(parse_quantity_bytes("1.5Gi"), Some(1.5 * 1024.0 * 1024.0 * 1024.0));
    }

    #[test]
    fn rejects_unknown_suffixes() {
        assert_eq!(parse_quantity_bytes("2Zi"), None);
        assert_eq!(parse_quantity_bytes("abc"), None);
        assert_eq!(parse_quantity_bytes(""), None);
    }

    #[test]
    fn overhead_defaults_to_single_vcpu_base() {
        let vmi = VirtualMachineInstance::new(
            "vmi-a",
            VirtualMachineInstanceSpec::default(),
        );
        assert_eq!(
            launcher_memory_overhead_bytes(&vmi),
            BASE_OVERHEAD_BYTES + PER_VCPU_OVERHEAD_BYTES
        );
    }

    #[test]
    fn overhead_scales_with_cores_and_guest_memory() {
        let vmi = vmi_with(Some(4), Some("2Gi"));
        let guest = 2.0 * 1024.0 * 1024.0 * 1024.0;
        assert_eq!(
            launcher_memory_overhead_bytes(&vmi),
            BASE_OVERHEAD_BYTES + 4.0 * PER_VCPU_OVERHEAD_BYTES + guest / 512.0
        );
    }

    #[test]
    fn unparseable_guest_memory_contributes_nothing() {
        let vmi = vmi_with(Some(2), Some("lots"));
        assert_eq!(
            launcher_memory_overhead_bytes(&vmi),
            BASE_OVERHEAD_BYTES + 2.0 * PER_VCPU_OVERHEAD_BYTES
        );
    }
}
