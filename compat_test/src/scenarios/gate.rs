use std::sync::Arc;

use wae_compat::runtime::gate::{OP_RESOURCE_PATCHING, OP_THEME_INJECTION};
use wae_compat::{
    Decision, Feature, FeatureContext, HookError, ScriptedHost, Variant, caveats, clear, evaluate,
    failure_count, load_features,
};

use crate::test_ctx::{forced, reset_with};

struct GatedFeature {
    name: &'static str,
    operation: &'static str,
}

impl Feature for GatedFeature {
    fn plugin_name(&self) -> &str {
        self.name
    }

    fn operation(&self) -> Option<&str> {
        Some(self.operation)
    }

    fn do_hook(&self, _ctx: &FeatureContext) -> Result<(), HookError> {
        Ok(())
    }
}

pub fn scenario_managed_denies_resource_patching() {
    reset_with(ScriptedHost::new(), forced(Variant::RootlessManaged));
    assert_eq!(evaluate(OP_RESOURCE_PATCHING), Decision::Deny);

    let report = load_features(vec![Arc::new(GatedFeature {
        name: "custom_theme",
        operation: OP_RESOURCE_PATCHING,
    })])
    .expect("load_features");
    assert_eq!(report.skipped, vec!["custom_theme"], "denied feature not filtered");
    assert!(report.loaded.is_empty());
    assert_eq!(failure_count(), 0, "deny must not be recorded as failure");
    clear();
}

pub fn scenario_degraded_theme_caveat() {
    reset_with(ScriptedHost::new(), forced(Variant::RootlessManaged));
    let decision = evaluate(OP_THEME_INJECTION);
    assert!(decision.caveat().is_some_and(|reason| !reason.is_empty()));

    let report = load_features(vec![Arc::new(GatedFeature {
        name: "theme_colors",
        operation: OP_THEME_INJECTION,
    })])
    .expect("load_features");
    assert_eq!(report.loaded, vec!["theme_colors"]);
    assert_eq!(report.degraded.len(), 1);
    assert_eq!(caveats().len(), 1);

    reset_with(ScriptedHost::new(), forced(Variant::RootedClassic));
    assert_eq!(evaluate(OP_THEME_INJECTION), Decision::Allow);
    clear();
}
