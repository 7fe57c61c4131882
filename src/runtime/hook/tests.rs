use super::*;
use crate::runtime::gate::{OP_RESOURCE_PATCHING, OP_THEME_INJECTION};
use crate::runtime::probe::Variant;
use std::sync::Mutex;

fn send_target() -> TargetDescriptor {
    TargetDescriptor::new("com.whatsapp.Conversation", "send", &["java.lang.String"])
}

fn setup(variant: Variant) -> (Arc<MethodTable>, HookAdapter) {
    let table = Arc::new(MethodTable::new());
    table.define(&send_target(), |args| match args.first() {
        Some(HookValue::Str(text)) => Ok(HookValue::Str(format!("sent:{text}"))),
        _ => Ok(HookValue::Null),
    });
    let adapter = HookAdapter::new(
        table.clone(),
        Arc::new(EnvironmentClassification::fixed(variant)),
        Arc::new(CompatibilityGate::new()),
        Arc::new(Diagnostics::new()),
    );
    (table, adapter)
}

fn hello() -> Vec<HookValue> {
    vec![HookValue::Str("hello".to_string())]
}

// 先改写参数再失败，用于验证参数被还原
struct FailingBefore;

impl Interceptor for FailingBefore {
    fn before(&self, call: &mut MethodCall) -> Result<(), HookError> {
        call.args[0] = HookValue::Str("tampered".to_string());
        Err(HookError::callback("field lookup failed"))
    }
}

struct PanickingAfter;

impl Interceptor for PanickingAfter {
    fn after(&self, call: &mut MethodCall) -> Result<(), HookError> {
        call.set_result(HookValue::Int(-1));
        panic!("after exploded");
    }
}

struct Upper;

impl Interceptor for Upper {
    fn after(&self, call: &mut MethodCall) -> Result<(), HookError> {
        if let Some(Ok(HookValue::Str(text))) = call.result() {
            let upper = text.to_uppercase();
            call.set_result(HookValue::Str(upper));
        }
        Ok(())
    }
}

#[test]
fn permissive_before_failure_runs_original_with_original_args() {
    let (table, adapter) = setup(Variant::RootlessEmbedded);
    let outcome = adapter.install(send_target(), Arc::new(FailingBefore));
    assert!(outcome.installed);
    assert_eq!(
        table.invoke(&send_target(), hello()),
        Ok(HookValue::Str("sent:hello".to_string()))
    );
    let failures = adapter.diagnostics().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code, Errno::Callback);
}

#[test]
fn hot_failing_callback_keeps_one_failure_entry() {
    let (table, adapter) = setup(Variant::RootlessEmbedded);
    assert!(adapter.install(send_target(), Arc::new(FailingBefore)).installed);
    for _ in 0..10_000 {
        assert!(table.invoke(&send_target(), hello()).is_ok());
    }
    assert_eq!(adapter.diagnostics().failure_count(), 1);
    assert_eq!(adapter.diagnostics().failure_occurrences(), 10_000);
}

#[test]
fn strict_before_failure_propagates_to_caller() {
    for variant in [Variant::RootedClassic, Variant::RootlessManaged] {
        let (table, adapter) = setup(variant);
        assert!(adapter.install(send_target(), Arc::new(FailingBefore)).installed);
        let result = table.invoke(&send_target(), hello());
        assert_eq!(result.map_err(|e| e.code), Err(Errno::Callback), "{variant}");
        assert_eq!(adapter.diagnostics().failure_count(), 1);
    }
}

#[test]
fn permissive_after_panic_keeps_original_result() {
    let (table, adapter) = setup(Variant::RootlessEmbedded);
    assert!(adapter.install(send_target(), Arc::new(PanickingAfter)).installed);
    assert_eq!(
        table.invoke(&send_target(), hello()),
        Ok(HookValue::Str("sent:hello".to_string()))
    );
    assert!(adapter.diagnostics().failures()[0].message.contains("after exploded"));
}

#[test]
fn working_interceptor_changes_result() {
    let (table, adapter) = setup(Variant::RootlessManaged);
    let outcome = adapter.install(send_target(), Arc::new(Upper));
    assert!(outcome.installed);
    assert!(outcome.handle.is_some());
    assert_eq!(
        table.invoke(&send_target(), hello()),
        Ok(HookValue::Str("SENT:HELLO".to_string()))
    );
    assert!(adapter.uninstall(outcome.handle.expect("handle")));
    assert_eq!(
        table.invoke(&send_target(), hello()),
        Ok(HookValue::Str("sent:hello".to_string()))
    );
}

#[test]
fn denied_operation_is_skipped_without_error() {
    let (table, adapter) = setup(Variant::RootlessManaged);
    let target = send_target().with_operation(OP_RESOURCE_PATCHING);
    let outcome = adapter.install(target.clone(), Arc::new(Upper));
    assert!(!outcome.installed);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.decision, Decision::Deny);
    assert_eq!(table.hook_count(&target), 0);
    assert_eq!(adapter.diagnostics().failure_count(), 0);
}

#[test]
fn degraded_operation_is_installed_and_flagged() {
    let (_, adapter) = setup(Variant::RootlessManaged);
    let target = send_target().with_operation(OP_THEME_INJECTION);
    let outcome = adapter.install(target, Arc::new(Upper));
    assert!(outcome.installed);
    assert!(outcome.degradation_applied);

    let (_, rooted) = setup(Variant::RootedClassic);
    let outcome = rooted.install(send_target().with_operation(OP_THEME_INJECTION), Arc::new(Upper));
    assert!(outcome.installed);
    assert!(!outcome.degradation_applied);
}

#[test]
fn missing_method_is_aggregated_not_raised() {
    let (_, adapter) = setup(Variant::RootedClassic);
    let missing = TargetDescriptor::new("com.whatsapp.Gone", "nope", &[]);
    let outcome = adapter.install_for("antirevoke", missing, Arc::new(Upper));
    assert!(!outcome.installed);
    assert_eq!(outcome.error.map(|e| e.code), Some(Errno::HookInstallFailure));
    let rendered = adapter.diagnostics().render_failures().unwrap_or_default();
    assert!(rendered.starts_with("[antirevoke] com.whatsapp.Gone#nope()"));
}

struct Reinstaller {
    adapter: Mutex<Option<Arc<HookAdapter>>>,
    outcome: Mutex<Option<HookInstallationOutcome>>,
}

impl Interceptor for Reinstaller {
    fn before(&self, _call: &mut MethodCall) -> Result<(), HookError> {
        let adapter = self.adapter.lock().expect("adapter lock").clone();
        if let Some(adapter) = adapter {
            let outcome = adapter.install(send_target(), Arc::new(Upper));
            *self.outcome.lock().expect("outcome lock") = Some(outcome);
        }
        Ok(())
    }
}

#[test]
fn install_from_inside_callback_is_refused() {
    let (table, adapter) = setup(Variant::RootlessManaged);
    let adapter = Arc::new(adapter);
    let reinstaller = Arc::new(Reinstaller {
        adapter: Mutex::new(Some(adapter.clone())),
        outcome: Mutex::new(None),
    });
    assert!(adapter.install(send_target(), reinstaller.clone()).installed);
    assert!(table.invoke(&send_target(), hello()).is_ok());

    let nested = reinstaller.outcome.lock().expect("outcome lock").take().expect("nested outcome");
    assert!(!nested.installed);
    let error = nested.error.expect("reentrant error");
    assert_eq!(error.code, Errno::Reentrant);
    assert!(error.message.contains(&send_target().key()));
    assert_eq!(table.hook_count(&send_target()), 1);
    // 打破 adapter 与拦截器之间的循环引用
    reinstaller.adapter.lock().expect("adapter lock").take();
}

#[test]
fn descriptor_display_and_key() {
    let target = send_target().with_operation(OP_THEME_INJECTION);
    assert_eq!(target.to_string(), "com.whatsapp.Conversation#send(java.lang.String)");
    assert_eq!(target.key(), send_target().key());
}
