//! Shared test utilities and arbitrary generators for property-based testing.

use crate::types::{Quantity, QuotaSnapshot};
use proptest::prelude::*;

/// Lowercase DNS-label-like names, as quotas and namespaces carry.
pub fn arb_resource_name() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,20}"
}

/// Non-empty suffix tags.
pub fn arb_tag() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,5}"
}

pub fn arb_quantity() -> impl Strategy<Value = Quantity> {
    let suffix = prop_oneof![
        Just(""),
        Just("m"),
        Just("k"),
        Just("M"),
        Just("G"),
        Just("Ki"),
        Just("Mi"),
        Just("Gi"),
    ];
    (0u32..100_000, suffix).prop_map(|(n, s)| Quantity::parse(&format!("{n}{s}")).unwrap())
}

/// Quotas with any subset of the cpu, memory and gpu limits set.
pub fn arb_quota() -> impl Strategy<Value = QuotaSnapshot> {
    (
        arb_resource_name(),
        arb_resource_name(),
        proptest::option::of(arb_quantity()),
        proptest::option::of(arb_quantity()),
        proptest::option::of(arb_quantity()),
    )
        .prop_map(|(name, namespace, cpu, memory, gpu)| {
            let mut quota = QuotaSnapshot::new(name, namespace);
            let limits = [
                ("limits.cpu", cpu),
                ("limits.memory", memory),
                ("requests.nvidia.com/gpu", gpu),
            ];
            for (resource, value) in limits {
                if let Some(value) = value {
                    quota = quota.with_hard(resource, value);
                }
            }
            quota
        })
}
