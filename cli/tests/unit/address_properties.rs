//! Property-based tests for static address derivation.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;

use proptest::prelude::*;

use spotdeploy_cli::domain::identity::WorkspaceIdentity;
use spotdeploy_cli::domain::network::{StaticIp, assign_static_ip, static_ip};

proptest! {
    /// Addresses stay inside the subnet, past the network address and the
    /// reserved block, and short of the broadcast address.
    #[test]
    fn prop_static_ip_is_a_usable_host(
        tenant in "[a-z]{1,12}",
        workspace in "[a-z0-9-]{1,20}",
        reserved in 0u32..100,
    ) {
        let vm = WorkspaceIdentity::new(tenant, workspace).vm_name();
        let ip = static_ip(&vm, "10.0.0.0/24", reserved).unwrap();
        let [a, b, c, last] = ip.octets();
        prop_assert_eq!([a, b, c], [10, 0, 0]);
        prop_assert!(u32::from(last) > reserved, "{} within reserved block", ip);
        prop_assert!(last < 255, "{} is the broadcast address", ip);
    }

    #[test]
    fn prop_static_ip_is_deterministic(vm in "vm-[a-z0-9-]{1,30}") {
        prop_assert_eq!(
            static_ip(&vm, "172.16.0.0/20", 10).unwrap(),
            static_ip(&vm, "172.16.0.0/20", 10).unwrap()
        );
    }
}

#[test]
fn alice_blog_gets_a_fixed_address() {
    let vm = WorkspaceIdentity::new("alice", "blog").vm_name();
    assert_eq!(vm, "vm-alice-blog");
    let first = static_ip(&vm, "10.0.0.0/24", 10).unwrap();
    let second = static_ip("vm-alice-blog", "10.0.0.0/24", 10).unwrap();
    assert_eq!(first, second);
}

#[test]
fn distinct_workspaces_rarely_share_an_address() {
    let ips: HashSet<_> = (0..100)
        .map(|i| {
            let vm = WorkspaceIdentity::new("tenant", format!("ws{i}")).vm_name();
            static_ip(&vm, "10.1.0.0/16", 10).unwrap()
        })
        .collect();
    assert!(ips.len() >= 98, "only {} distinct addresses", ips.len());
}

#[test]
fn exhausted_subnet_falls_back_with_a_reason() {
    assert!(static_ip("vm-a-b", "10.0.0.0/30", 2).is_err());
    match assign_static_ip("vm-a-b", "10.0.0.0/30", 2) {
        StaticIp::Fallback { ip, reason } => {
            let [a, b, c, last] = ip.octets();
            assert_eq!([a, b, c], [10, 0, 0]);
            assert!((50..250).contains(&last));
            assert!(reason.contains("no usable hosts"), "{reason}");
        }
        StaticIp::Derived(ip) => panic!("expected fallback, got {ip}"),
    }
}

#[test]
fn unparseable_subnet_falls_back() {
    assert!(matches!(
        assign_static_ip("vm-a-b", "not-a-cidr", 10),
        StaticIp::Fallback { .. }
    ));
}
