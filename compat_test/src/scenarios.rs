mod bridge;
mod gate;
mod hooks;
mod prefs;

use crate::test_ctx::env_flag;

pub fn run_all() {
    run("managed-deny-resource-patching", gate::scenario_managed_denies_resource_patching);
    run("degraded-theme-caveat", gate::scenario_degraded_theme_caveat);
    run("embedded-bridge-down-still-active", bridge::scenario_bridge_down_still_active);
    run("bridge-socket-listing", bridge::scenario_bridge_socket_listing);
    run("native-prefs-round-trip", prefs::scenario_native_round_trip);
    run("shadowed-prefs-read-only", prefs::scenario_shadowed_read_only);
    run("defaults-fallback-chain", prefs::scenario_defaults_fallback_chain);
    run("permissive-callback-failure", hooks::scenario_permissive_callback_failure);
    run("strict-callback-failure", hooks::scenario_strict_callback_failure);
    run("loader-isolation", hooks::scenario_loader_isolation);
    if env_flag("COMPAT_TEST_SLOW") {
        run("loader-timeout", hooks::scenario_loader_timeout);
    }
}

fn run(name: &str, scenario: fn()) {
    println!("scenario: {name}");
    scenario();
}
