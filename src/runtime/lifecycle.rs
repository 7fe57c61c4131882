// 进程级生命周期：持有配置与各组件单例，api 层的所有调用都分发到这里
use crate::config::CompatConfig;
use crate::errno::Errno;
use crate::log;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

use super::bridge::{BridgeContext, BridgeTransport, ModuleDescriptor, ServiceBridge};
use super::capability::{CapabilitySet, capabilities_for};
use super::gate::{CompatibilityGate, Decision, OperationSpec};
use super::hook::{
    HookAdapter, HookError, HookId, HookInstallationOutcome, InterceptionPrimitive, Interceptor,
    TargetDescriptor,
};
use super::host::{HostIntrospector, ProcessHost};
use super::loader::{Feature, FeatureContext, FeatureLoader, LoadReport};
use super::prefs::{NativeStore, PreferenceAdapter, PreferenceSources};
use super::probe::{EnvironmentClassification, EnvironmentProbe};
use super::state::{Diagnostics, MutexPoisonRecover, process_diagnostics};
use super::status::{ModuleStatusReporter, StatusValue};

pub const DEFAULT_SELF_PACKAGE: &str = "com.wmods.wppenhacer";

// 未注入宿主拦截原语时使用，所有安装都报告失败
struct MissingPrimitive;

impl InterceptionPrimitive for MissingPrimitive {
    fn register(
        &self,
        target: &TargetDescriptor,
        _interceptor: Arc<dyn Interceptor>,
    ) -> Result<HookId, HookError> {
        Err(HookError::new(
            Errno::HookInstallFailure,
            format!("no interception primitive installed for {}", target),
        ))
    }

    fn unregister(&self, _id: HookId) -> bool {
        false
    }

    fn is_operational(&self) -> bool {
        false
    }
}

struct CompatState {
    initialized: bool,
    config: CompatConfig,
    host: Arc<dyn HostIntrospector>,
    probe: Option<Arc<EnvironmentProbe>>,
    native_store: Option<Arc<dyn NativeStore>>,
    // 按分类结果缓存，分类被清除后重建
    prefs: Option<(Arc<EnvironmentClassification>, Arc<PreferenceAdapter>)>,
    hooks: Option<(Arc<EnvironmentClassification>, Arc<HookAdapter>)>,
    gate: Arc<CompatibilityGate>,
    primitive: Option<Arc<dyn InterceptionPrimitive>>,
    transport: Option<Arc<dyn BridgeTransport>>,
    bridge: Option<Arc<ServiceBridge>>,
    status: Option<Arc<ModuleStatusReporter>>,
    self_package: String,
    core_classes: Vec<String>,
}

impl CompatState {
    fn new() -> Self {
        Self {
            initialized: false,
            config: CompatConfig::default(),
            host: Arc::new(ProcessHost::new()),
            probe: None,
            native_store: None,
            prefs: None,
            hooks: None,
            gate: Arc::new(CompatibilityGate::new()),
            primitive: None,
            transport: None,
            bridge: None,
            status: None,
            self_package: DEFAULT_SELF_PACKAGE.to_string(),
            core_classes: Vec::new(),
        }
    }

    fn probe(&mut self) -> Arc<EnvironmentProbe> {
        if let Some(probe) = &self.probe {
            return probe.clone();
        }
        let probe = Arc::new(EnvironmentProbe::new(
            self.host.clone(),
            self.config.forced_variant,
        ));
        self.probe = Some(probe.clone());
        probe
    }

    fn bridge(&mut self) -> Option<Arc<ServiceBridge>> {
        if let Some(bridge) = &self.bridge {
            return Some(bridge.clone());
        }
        let transport = self.transport.clone().or_else(|| default_transport(&self.config))?;
        let bridge = Arc::new(ServiceBridge::new(transport));
        self.bridge = Some(bridge.clone());
        Some(bridge)
    }

    // 依赖宿主或分类的派生组件全部失效
    fn invalidate_derived(&mut self) {
        self.prefs = None;
        self.hooks = None;
        self.status = None;
    }
}

#[cfg(unix)]
fn default_transport(config: &CompatConfig) -> Option<Arc<dyn BridgeTransport>> {
    let path = config.bridge_socket.as_ref()?;
    Some(Arc::new(super::bridge::UnixSocketTransport::new(path)))
}

#[cfg(not(unix))]
fn default_transport(_config: &CompatConfig) -> Option<Arc<dyn BridgeTransport>> {
    None
}

static GLOBAL: Lazy<Mutex<CompatState>> = Lazy::new(|| Mutex::new(CompatState::new()));

pub(crate) fn get_version() -> String {
    format!("wae_compat {}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn init(config: CompatConfig) -> Errno {
    let mut state = GLOBAL.lock_or_poison();
    if state.initialized {
        return Errno::Ok;
    }
    log::set_debug_enabled(config.debug);
    state.config = config;
    state.initialized = true;
    state.probe = None;
    state.bridge = None;
    state.invalidate_derived();
    log::info(format_args!("{} initialized", get_version()));
    Errno::Ok
}

pub(crate) fn is_initialized() -> bool {
    GLOBAL.lock_or_poison().initialized
}

pub(crate) fn config() -> CompatConfig {
    GLOBAL.lock_or_poison().config.clone()
}

pub(crate) fn set_host(host: Arc<dyn HostIntrospector>) {
    let mut state = GLOBAL.lock_or_poison();
    state.host = host;
    state.probe = None;
    state.invalidate_derived();
}

// 仅在首次读取配置前生效；之后注入会让下一次读取重建适配器
pub(crate) fn set_native_store(store: Arc<dyn NativeStore>) {
    let mut state = GLOBAL.lock_or_poison();
    state.native_store = Some(store);
    state.prefs = None;
}

pub(crate) fn set_interception_primitive(primitive: Arc<dyn InterceptionPrimitive>) {
    let mut state = GLOBAL.lock_or_poison();
    state.primitive = Some(primitive);
    state.hooks = None;
    state.status = None;
}

pub(crate) fn set_bridge_transport(transport: Arc<dyn BridgeTransport>) {
    let mut state = GLOBAL.lock_or_poison();
    if let Some(bridge) = state.bridge.take() {
        bridge.disconnect();
    }
    state.transport = Some(transport);
    state.status = None;
}

pub(crate) fn set_module_identity(package_name: &str, core_classes: &[&str]) {
    let mut state = GLOBAL.lock_or_poison();
    state.self_package = package_name.to_string();
    state.core_classes = core_classes.iter().map(|name| name.to_string()).collect();
    state.status = None;
}

pub(crate) fn classify() -> Arc<EnvironmentClassification> {
    let probe = GLOBAL.lock_or_poison().probe();
    probe.classify()
}

pub(crate) fn clear_memo() {
    let mut state = GLOBAL.lock_or_poison();
    if let Some(probe) = &state.probe {
        probe.clear_memo();
    }
    state.invalidate_derived();
}

pub(crate) fn capabilities() -> &'static CapabilitySet {
    capabilities_for(&classify())
}

pub(crate) fn preferences() -> Arc<PreferenceAdapter> {
    let classification = classify();
    let mut state = GLOBAL.lock_or_poison();
    if let Some((built_for, prefs)) = &state.prefs {
        if Arc::ptr_eq(built_for, &classification) {
            return prefs.clone();
        }
    }
    let sources = PreferenceSources {
        native: state.native_store.clone(),
        shadow_path: state.config.shadow_prefs_path.clone(),
        file_path: state.config.file_prefs_path.clone(),
    };
    let prefs = Arc::new(PreferenceAdapter::open(&classification, sources));
    state.prefs = Some((classification, prefs.clone()));
    prefs
}

pub(crate) fn evaluate(operation: &str) -> Decision {
    let classification = classify();
    let gate = GLOBAL.lock_or_poison().gate.clone();
    gate.evaluate(operation, &classification)
}

pub(crate) fn register_operation(spec: OperationSpec) {
    let mut state = GLOBAL.lock_or_poison();
    let mut gate = CompatibilityGate::clone(&state.gate);
    gate.register(spec);
    state.gate = Arc::new(gate);
    state.hooks = None;
}

pub(crate) fn hook_adapter() -> Arc<HookAdapter> {
    let classification = classify();
    let mut state = GLOBAL.lock_or_poison();
    if let Some((built_for, hooks)) = &state.hooks {
        if Arc::ptr_eq(built_for, &classification) {
            return hooks.clone();
        }
    }
    let primitive: Arc<dyn InterceptionPrimitive> = match state.primitive.clone() {
        Some(primitive) => primitive,
        None => Arc::new(MissingPrimitive),
    };
    let hooks = Arc::new(HookAdapter::new(
        primitive,
        classification.clone(),
        state.gate.clone(),
        process_diagnostics(),
    ));
    state.hooks = Some((classification, hooks.clone()));
    hooks
}

pub(crate) fn install_hook(
    source: &str,
    target: TargetDescriptor,
    interceptor: Arc<dyn Interceptor>,
) -> HookInstallationOutcome {
    hook_adapter().install_for(source, target, interceptor)
}

pub(crate) fn load_features(features: Vec<Arc<dyn Feature>>) -> LoadReport {
    let ctx = Arc::new(FeatureContext {
        prefs: preferences(),
        hooks: hook_adapter(),
    });
    let (gate, config) = {
        let state = GLOBAL.lock_or_poison();
        (state.gate.clone(), state.config.clone())
    };
    FeatureLoader::new(gate, process_diagnostics())
        .with_workers(config.workers)
        .with_timeout(config.loader_timeout)
        .load(features, ctx)
}

fn bridge_context() -> Option<(Arc<ServiceBridge>, BridgeContext)> {
    let classification = classify();
    let mut state = GLOBAL.lock_or_poison();
    let bridge = state.bridge()?;
    let ctx = BridgeContext {
        package_name: state.self_package.clone(),
        classification,
    };
    Some((bridge, ctx))
}

pub(crate) fn connect_bridge() -> bool {
    match bridge_context() {
        Some((bridge, ctx)) => bridge.connect(&ctx),
        None => {
            log::debug(format_args!("bridge: no transport configured"));
            false
        }
    }
}

pub(crate) fn is_bridge_connected() -> bool {
    let bridge = GLOBAL.lock_or_poison().bridge.clone();
    bridge.is_some_and(|bridge| bridge.is_connected())
}

pub(crate) fn query_loaded_modules() -> Option<Vec<ModuleDescriptor>> {
    let (bridge, ctx) = bridge_context()?;
    if !bridge.ensure_connected(&ctx) {
        return None;
    }
    bridge.query_loaded_modules()
}

pub(crate) fn disconnect_bridge() {
    let bridge = GLOBAL.lock_or_poison().bridge.clone();
    if let Some(bridge) = bridge {
        bridge.disconnect();
    }
}

fn status_reporter() -> Arc<ModuleStatusReporter> {
    let mut state = GLOBAL.lock_or_poison();
    if let Some(status) = &state.status {
        return status.clone();
    }
    let probe = state.probe();
    let mut reporter = ModuleStatusReporter::new(probe, &state.self_package)
        .with_cache_interval(state.config.status_cache);
    let core_classes: Vec<&str> = state.core_classes.iter().map(String::as_str).collect();
    reporter = reporter.with_core_classes(&core_classes);
    if let Some(primitive) = state.primitive.clone() {
        reporter = reporter.with_primitive(primitive);
    }
    if let Some(bridge) = state.bridge() {
        reporter = reporter.with_bridge(bridge);
    }
    let reporter = Arc::new(reporter);
    state.status = Some(reporter.clone());
    reporter
}

pub(crate) fn current_status() -> StatusValue {
    status_reporter().current_status()
}

pub(crate) fn force_refresh_status() -> StatusValue {
    status_reporter().force_refresh()
}

pub(crate) fn diagnostics() -> Arc<Diagnostics> {
    process_diagnostics()
}

pub(crate) fn set_debug(debug: bool) {
    GLOBAL.lock_or_poison().config.debug = debug;
    log::set_debug_enabled(debug);
}

pub(crate) fn get_debug() -> bool {
    GLOBAL.lock_or_poison().config.debug
}

// 断开连接并回到未初始化状态，注入的宿主组件一并清除
pub(crate) fn clear() {
    let mut state = GLOBAL.lock_or_poison();
    if let Some(bridge) = state.bridge.take() {
        bridge.disconnect();
    }
    *state = CompatState::new();
    drop(state);
    process_diagnostics().clear();
}
