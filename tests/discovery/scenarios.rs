//! BDD scenarios for environment discovery.

use rstest_bdd_macros::scenario;

use super::test_helpers::{DiscoveryContext, discovery_context};

#[scenario(
    path = "tests/features/discovery.feature",
    name = "Web root is the first writable candidate"
)]
fn scenario_writable_web_root(discovery_context: DiscoveryContext) {
    let _ = discovery_context;
}

#[scenario(
    path = "tests/features/discovery.feature",
    name = "A host without a writable web root fails detection"
)]
fn scenario_missing_web_root(discovery_context: DiscoveryContext) {
    let _ = discovery_context;
}

#[scenario(
    path = "tests/features/discovery.feature",
    name = "Several PHP versions are offered to the operator"
)]
fn scenario_php_choice(discovery_context: DiscoveryContext) {
    let _ = discovery_context;
}

#[scenario(
    path = "tests/features/discovery.feature",
    name = "The distribution is probed only once"
)]
fn scenario_distro_cached(discovery_context: DiscoveryContext) {
    let _ = discovery_context;
}
