// hook 适配层：包装宿主拦截原语，隔离安装失败与回调异常
// 宽松子模式下回调异常降级为原始行为，其余模式向调用方抛出
use crate::errno::Errno;
use crate::log;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::callback_ctx::{active_target, is_in_interceptor_callback, run_in_interceptor_callback};
use super::gate::{CompatibilityGate, Decision};
use super::probe::EnvironmentClassification;
use super::record::{self, RecordOp};
use super::state::{Diagnostics, FailureReport};

mod table;

pub use table::MethodTable;

pub type HookId = u64;

#[derive(Clone, Debug, PartialEq)]
pub enum HookValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TargetDescriptor {
    pub class_name: String,
    pub method_name: String,
    pub param_types: Vec<String>,
    // 需经闸门判定的操作名，None 表示无能力要求
    pub operation: Option<String>,
}

impl TargetDescriptor {
    pub fn new(class_name: &str, method_name: &str, param_types: &[&str]) -> Self {
        Self {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            param_types: param_types.iter().map(|param| param.to_string()).collect(),
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    // 不含操作名的方法签名，作为拦截表的键
    pub fn key(&self) -> String {
        format!(
            "{}#{}({})",
            self.class_name,
            self.method_name,
            self.param_types.join(",")
        )
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HookError {
    pub code: Errno,
    pub message: String,
}

impl HookError {
    pub fn new(code: Errno, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn callback(message: impl Into<String>) -> Self {
        Self::new(Errno::Callback, message)
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.name(), self.message)
    }
}

impl std::error::Error for HookError {}

// 单次被拦截调用的参数与结果；before 中设置结果会跳过原方法
pub struct MethodCall {
    target: TargetDescriptor,
    pub args: Vec<HookValue>,
    result: Option<Result<HookValue, HookError>>,
}

impl MethodCall {
    pub fn new(target: TargetDescriptor, args: Vec<HookValue>) -> Self {
        Self {
            target,
            args,
            result: None,
        }
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn set_result(&mut self, value: HookValue) {
        self.result = Some(Ok(value));
    }

    pub fn set_error(&mut self, error: HookError) {
        self.result = Some(Err(error));
    }

    pub fn result(&self) -> Option<&Result<HookValue, HookError>> {
        self.result.as_ref()
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn clear_result(&mut self) {
        self.result = None;
    }

    pub(crate) fn take_result(&mut self) -> Option<Result<HookValue, HookError>> {
        self.result.take()
    }

    fn restore_result(&mut self, result: Option<Result<HookValue, HookError>>) {
        self.result = result;
    }
}

pub trait Interceptor: Send + Sync {
    fn before(&self, _call: &mut MethodCall) -> Result<(), HookError> {
        Ok(())
    }

    fn after(&self, _call: &mut MethodCall) -> Result<(), HookError> {
        Ok(())
    }
}

// 宿主的方法级拦截原语；回调返回的错误会传给调用方，除非被包装层吸收
pub trait InterceptionPrimitive: Send + Sync {
    fn register(
        &self,
        target: &TargetDescriptor,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<HookId, HookError>;
    fn unregister(&self, id: HookId) -> bool;
    // 原语本身是否可用，用于存活检测
    fn is_operational(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct HookHandle(pub HookId);

#[derive(Clone, Debug, PartialEq)]
pub struct HookInstallationOutcome {
    pub target: TargetDescriptor,
    pub installed: bool,
    pub degradation_applied: bool,
    pub decision: Decision,
    pub error: Option<HookError>,
    pub handle: Option<HookHandle>,
}

pub struct HookAdapter {
    primitive: Arc<dyn InterceptionPrimitive>,
    classification: Arc<EnvironmentClassification>,
    gate: Arc<CompatibilityGate>,
    diagnostics: Arc<Diagnostics>,
}

impl HookAdapter {
    pub fn new(
        primitive: Arc<dyn InterceptionPrimitive>,
        classification: Arc<EnvironmentClassification>,
        gate: Arc<CompatibilityGate>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            primitive,
            classification,
            gate,
            diagnostics,
        }
    }

    pub fn classification(&self) -> &Arc<EnvironmentClassification> {
        &self.classification
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn primitive(&self) -> &Arc<dyn InterceptionPrimitive> {
        &self.primitive
    }

    pub fn is_permissive(&self) -> bool {
        self.classification.variant().is_permissive()
    }

    pub fn install(
        &self,
        target: TargetDescriptor,
        interceptor: Arc<dyn Interceptor>,
    ) -> HookInstallationOutcome {
        self.install_for("module", target, interceptor)
    }

    // source 为发起安装的功能名，用于失败汇总
    pub fn install_for(
        &self,
        source: &str,
        target: TargetDescriptor,
        interceptor: Arc<dyn Interceptor>,
    ) -> HookInstallationOutcome {
        if is_in_interceptor_callback() {
            let error = HookError::new(
                Errno::Reentrant,
                format!(
                    "install called from interceptor callback of {}",
                    active_target().unwrap_or_default()
                ),
            );
            return self.failed(source, target, Decision::Allow, error);
        }

        let decision = match target.operation.as_deref() {
            Some(operation) => self.gate.evaluate(operation, &self.classification),
            None => Decision::Allow,
        };
        if decision == Decision::Deny {
            log::info(format_args!("hook {} skipped: capability denied", target));
            record::add_record(RecordOp::Hook, Errno::CapabilityDenied, &target.key(), source);
            return HookInstallationOutcome {
                target,
                installed: false,
                degradation_applied: false,
                decision,
                error: None,
                handle: None,
            };
        }

        let guarded: Arc<dyn Interceptor> = Arc::new(GuardedInterceptor {
            inner: interceptor,
            permissive: self.is_permissive(),
            source: source.to_string(),
            diagnostics: self.diagnostics.clone(),
        });
        let registered = panic::catch_unwind(AssertUnwindSafe(|| {
            self.primitive.register(&target, guarded)
        }))
        .unwrap_or_else(|payload| {
            Err(HookError::new(
                Errno::HookInstallFailure,
                format!("primitive panicked: {}", panic_message(payload.as_ref())),
            ))
        });

        match registered {
            Ok(id) => {
                let degradation_applied = matches!(decision, Decision::Degrade(_));
                log::debug(format_args!(
                    "hook {} installed id={} degraded={}",
                    target, id, degradation_applied
                ));
                record::add_record(RecordOp::Hook, Errno::Ok, &target.key(), source);
                HookInstallationOutcome {
                    target,
                    installed: true,
                    degradation_applied,
                    decision,
                    error: None,
                    handle: Some(HookHandle(id)),
                }
            }
            Err(error) => self.failed(source, target, decision, error),
        }
    }

    pub fn uninstall(&self, handle: HookHandle) -> bool {
        panic::catch_unwind(AssertUnwindSafe(|| self.primitive.unregister(handle.0)))
            .unwrap_or(false)
    }

    // 失败进入汇总列表，不向安装方抛出
    fn failed(
        &self,
        source: &str,
        target: TargetDescriptor,
        decision: Decision,
        error: HookError,
    ) -> HookInstallationOutcome {
        log::warn(format_args!("hook {} install failed: {}", target, error));
        record::add_record(RecordOp::Hook, error.code, &target.key(), &error.message);
        self.diagnostics.push_failure(FailureReport {
            source: source.to_string(),
            target: target.key(),
            code: Errno::HookInstallFailure,
            message: error.to_string(),
        });
        HookInstallationOutcome {
            target,
            installed: false,
            degradation_applied: false,
            decision,
            error: Some(error),
            handle: None,
        }
    }
}

struct GuardedInterceptor {
    inner: Arc<dyn Interceptor>,
    permissive: bool,
    source: String,
    diagnostics: Arc<Diagnostics>,
}

impl GuardedInterceptor {
    fn run_guarded<F>(&self, phase: &str, call: &mut MethodCall, f: F) -> Result<(), HookError>
    where
        F: FnOnce(&dyn Interceptor, &mut MethodCall) -> Result<(), HookError>,
    {
        let saved_args = call.args.clone();
        let saved_result = call.result().cloned();
        let inner = self.inner.as_ref();
        let scope = call.target().key();
        let outcome = run_in_interceptor_callback(&scope, || {
            panic::catch_unwind(AssertUnwindSafe(|| f(inner, &mut *call)))
        });
        let error = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(error)) => error,
            Err(payload) => HookError::callback(format!(
                "{} callback panicked: {}",
                phase,
                panic_message(payload.as_ref())
            )),
        };

        let target = scope;
        self.diagnostics.push_failure(FailureReport {
            source: self.source.clone(),
            target: target.clone(),
            code: Errno::Callback,
            message: format!("{phase}: {error}"),
        });
        record::add_record(RecordOp::Hook, Errno::Callback, &target, phase);

        if self.permissive {
            log::warn(format_args!(
                "{} callback of {} failed, continue with original behavior: {}",
                phase, target, error
            ));
            call.args = saved_args;
            call.restore_result(saved_result);
            return Ok(());
        }
        log::error(format_args!("{} callback of {} failed: {}", phase, target, error));
        Err(error)
    }
}

impl Interceptor for GuardedInterceptor {
    fn before(&self, call: &mut MethodCall) -> Result<(), HookError> {
        self.run_guarded("before", call, |inner, call| inner.before(call))
    }

    fn after(&self, call: &mut MethodCall) -> Result<(), HookError> {
        self.run_guarded("after", call, |inner, call| inner.after(call))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests;
