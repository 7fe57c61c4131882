use std::sync::Arc;
use std::thread;
use std::time::Duration;

use wae_compat::{
    CompatConfig, Errno, Feature, FeatureContext, HookError, HookValue, Interceptor, MethodCall,
    MethodTable, ScriptedHost, TargetDescriptor, Variant, clear, failure_count, install_hook,
    load_features, set_interception_primitive, take_failures,
};

use crate::test_ctx::{ensure_ok, forced, reset_with};

fn send_target() -> TargetDescriptor {
    TargetDescriptor::new("com.whatsapp.Conversation", "send", &["java.lang.String"])
}

fn install_table() -> Arc<MethodTable> {
    let table = Arc::new(MethodTable::new());
    table.define(&send_target(), |args| match args.first() {
        Some(HookValue::Str(text)) => Ok(HookValue::Str(format!("sent:{text}"))),
        _ => Ok(HookValue::Null),
    });
    ensure_ok(set_interception_primitive(table.clone()), "set_interception_primitive");
    table
}

struct TamperThenFail;

impl Interceptor for TamperThenFail {
    fn before(&self, call: &mut MethodCall) -> Result<(), HookError> {
        call.args[0] = HookValue::Str("tampered".to_string());
        Err(HookError::callback("field lookup failed"))
    }
}

fn hello() -> Vec<HookValue> {
    vec![HookValue::Str("hello".to_string())]
}

pub fn scenario_permissive_callback_failure() {
    reset_with(ScriptedHost::new(), forced(Variant::RootlessEmbedded));
    let table = install_table();
    let outcome = install_hook("antirevoke", send_target(), Arc::new(TamperThenFail));
    assert!(outcome.installed, "install failed: {:?}", outcome.error);

    let result = table.invoke(&send_target(), hello());
    assert_eq!(result, Ok(HookValue::Str("sent:hello".to_string())));
    assert_eq!(failure_count(), 1);
    clear();
}

pub fn scenario_strict_callback_failure() {
    reset_with(ScriptedHost::new(), forced(Variant::RootlessManaged));
    let table = install_table();
    assert!(install_hook("antirevoke", send_target(), Arc::new(TamperThenFail)).installed);

    let result = table.invoke(&send_target(), hello());
    assert_eq!(result.map_err(|err| err.code), Err(Errno::Callback));
    let failures = take_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].source, "antirevoke");
    clear();
}

enum Behavior {
    Hook,
    Fail,
    Panic,
    Sleep(Duration),
}

struct ScriptedFeature {
    name: &'static str,
    behavior: Behavior,
}

impl Feature for ScriptedFeature {
    fn plugin_name(&self) -> &str {
        self.name
    }

    fn do_hook(&self, ctx: &FeatureContext) -> Result<(), HookError> {
        match self.behavior {
            Behavior::Hook => {
                let outcome = ctx.hooks.install_for(self.name, send_target(), Arc::new(Noop));
                match outcome.error {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
            Behavior::Fail => Err(HookError::new(Errno::NotFound, "class not found")),
            Behavior::Panic => panic!("feature crashed"),
            Behavior::Sleep(duration) => {
                thread::sleep(duration);
                Ok(())
            }
        }
    }
}

struct Noop;

impl Interceptor for Noop {}

fn scripted(name: &'static str, behavior: Behavior) -> Arc<dyn Feature> {
    Arc::new(ScriptedFeature { name, behavior })
}

pub fn scenario_loader_isolation() {
    reset_with(ScriptedHost::new(), forced(Variant::RootedClassic));
    let table = install_table();
    let report = load_features(vec![
        scripted("hideread", Behavior::Hook),
        scripted("broken", Behavior::Fail),
        scripted("crashy", Behavior::Panic),
        scripted("antirevoke", Behavior::Hook),
    ])
    .expect("load_features");

    let mut loaded = report.loaded.clone();
    loaded.sort();
    assert_eq!(loaded, vec!["antirevoke", "hideread"]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(table.hook_count(&send_target()), 2);
    assert_eq!(failure_count(), 2);
    clear();
}

pub fn scenario_loader_timeout() {
    let config = CompatConfig {
        loader_timeout: Duration::from_millis(100),
        workers: 1,
        ..forced(Variant::RootedClassic)
    };
    reset_with(ScriptedHost::new(), config);
    let report = load_features(vec![
        scripted("slow", Behavior::Sleep(Duration::from_secs(1))),
        scripted("queued", Behavior::Hook),
    ])
    .expect("load_features");
    assert!(report.timed_out);
    assert_eq!(report.abandoned, vec!["slow", "queued"]);
    clear();
}
