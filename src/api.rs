use crate::config::CompatConfig;
use crate::errno::Errno;
use crate::runtime;
use crate::runtime::bridge::{BridgeTransport, ModuleDescriptor};
use crate::runtime::capability::{self, CapabilitySet};
use crate::runtime::gate::{Decision, OperationSpec};
use crate::runtime::hook::{
    HookAdapter, HookError, HookInstallationOutcome, InterceptionPrimitive, Interceptor,
    TargetDescriptor,
};
use crate::runtime::host::HostIntrospector;
use crate::runtime::loader::{Feature, LoadReport};
use crate::runtime::prefs::{NativeStore, PreferenceAdapter};
use crate::runtime::probe::EnvironmentClassification;
use crate::runtime::status::StatusValue;
use crate::runtime::{Caveat, FailureReport};
use std::sync::Arc;

// 在拦截回调中调用会修改全局状态的 API 可能导致死锁，此守卫统一拦截
#[inline]
fn in_interceptor_callback() -> bool {
    runtime::in_interceptor_callback()
}

pub fn get_version() -> String {
    runtime::get_version()
}

// 初始化兼容层；重复调用直接返回 Ok，需要重新配置时先 clear()
pub fn init(config: CompatConfig) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    runtime::init(config)
}

pub fn init_from_env() -> Errno {
    init(CompatConfig::from_env())
}

pub fn is_initialized() -> bool {
    runtime::is_initialized()
}

pub fn get_config() -> CompatConfig {
    runtime::config()
}

// 以下注入接口由宿主胶水层在首次探测前调用
pub fn set_host(host: Arc<dyn HostIntrospector>) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    runtime::set_host(host);
    Errno::Ok
}

pub fn set_native_store(store: Arc<dyn NativeStore>) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    runtime::set_native_store(store);
    Errno::Ok
}

pub fn set_interception_primitive(primitive: Arc<dyn InterceptionPrimitive>) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    runtime::set_interception_primitive(primitive);
    Errno::Ok
}

pub fn set_bridge_transport(transport: Arc<dyn BridgeTransport>) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    runtime::set_bridge_transport(transport);
    Errno::Ok
}

// 模块自身包名与核心类，用于状态存活检测
pub fn set_module_identity(package_name: &str, core_classes: &[&str]) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    if package_name.trim().is_empty() {
        return Errno::InvalidArg;
    }
    runtime::set_module_identity(package_name, core_classes);
    Errno::Ok
}

// 首次调用时探测并缓存，之后返回同一份结果
pub fn classify() -> Arc<EnvironmentClassification> {
    runtime::classify()
}

// 仅供测试：清除缓存的分类结果与依赖它的组件
pub fn clear_memo() {
    if in_interceptor_callback() {
        return;
    }
    runtime::clear_memo();
}

pub fn capabilities() -> &'static CapabilitySet {
    runtime::capabilities()
}

// 未知能力名视为可用
pub fn is_available(capability_name: &str) -> bool {
    capability::is_available(&classify(), capability_name)
}

pub fn preferences() -> Arc<PreferenceAdapter> {
    runtime::preferences()
}

pub fn evaluate(operation: &str) -> Decision {
    runtime::evaluate(operation)
}

pub fn register_operation(spec: OperationSpec) -> Errno {
    if in_interceptor_callback() {
        return Errno::Reentrant;
    }
    runtime::register_operation(spec);
    Errno::Ok
}

pub fn hook_adapter() -> Arc<HookAdapter> {
    runtime::hook_adapter()
}

// 回调内调用由 HookAdapter 自身拒绝并计入失败汇总
pub fn install_hook(
    source: &str,
    target: TargetDescriptor,
    interceptor: Arc<dyn Interceptor>,
) -> HookInstallationOutcome {
    runtime::install_hook(source, target, interceptor)
}

// 批量加载功能，返回时汇总列表已包含全部失败
pub fn load_features(features: Vec<Arc<dyn Feature>>) -> Result<LoadReport, HookError> {
    if in_interceptor_callback() {
        return Err(HookError::new(
            Errno::Reentrant,
            "load_features called from interceptor callback",
        ));
    }
    Ok(runtime::load_features(features))
}

pub fn connect_bridge() -> bool {
    if in_interceptor_callback() {
        return false;
    }
    runtime::connect_bridge()
}

pub fn is_bridge_connected() -> bool {
    runtime::is_bridge_connected()
}

// None 表示服务不可达
pub fn query_loaded_modules() -> Option<Vec<ModuleDescriptor>> {
    if in_interceptor_callback() {
        return None;
    }
    runtime::query_loaded_modules()
}

pub fn disconnect_bridge() {
    runtime::disconnect_bridge();
}

pub fn current_status() -> StatusValue {
    runtime::current_status()
}

pub fn force_refresh_status() -> StatusValue {
    runtime::force_refresh_status()
}

// 取走汇总的失败列表，供加载完成后一次性展示
pub fn take_failures() -> Vec<FailureReport> {
    runtime::diagnostics().take_failures()
}

pub fn failure_count() -> usize {
    runtime::diagnostics().failure_count()
}

pub fn render_failures() -> Option<String> {
    runtime::diagnostics().render_failures()
}

pub fn caveats() -> Vec<Caveat> {
    runtime::diagnostics().caveats()
}

pub fn get_debug() -> bool {
    runtime::get_debug()
}

pub fn set_debug(debug: bool) {
    runtime::set_debug(debug);
}

pub fn get_recordable() -> bool {
    runtime::get_recordable()
}

pub fn set_recordable(recordable: bool) {
    runtime::set_recordable(recordable);
}

// 按字段掩码导出决策记录文本
pub fn get_records(item_flags: u32) -> Option<String> {
    runtime::get_records(item_flags)
}

pub fn clear_records() {
    runtime::clear_records();
}

pub fn dump_records<W: std::io::Write>(writer: &mut W, item_flags: u32) -> Errno {
    runtime::dump_records(writer, item_flags)
}

// 断开桥接并重置全部进程级状态
pub fn clear() {
    if in_interceptor_callback() {
        return;
    }
    runtime::clear();
}
