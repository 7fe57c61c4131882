// 公共 API 层，提供环境探测、能力查询、配置读取、hook 安装与状态查询
mod api;
// 进程级配置，来源为环境变量
pub mod config;
// 错误码定义
mod errno;
// 日志输出，Android 上写 logcat，其余平台写 stderr
mod log;
// 运行时：环境探测、能力矩阵、配置后端、兼容闸门、hook 适配、服务桥、状态汇总
pub mod runtime;

pub use api::{
    capabilities, caveats, classify, clear, clear_memo, clear_records, connect_bridge,
    current_status, disconnect_bridge, dump_records, evaluate, failure_count,
    force_refresh_status, get_config, get_debug, get_records, get_recordable, get_version,
    hook_adapter, init, init_from_env, install_hook, is_available, is_bridge_connected,
    is_initialized, load_features, preferences, query_loaded_modules, register_operation,
    render_failures, set_bridge_transport, set_debug, set_host, set_interception_primitive,
    set_module_identity, set_native_store, set_recordable, take_failures,
};
pub use config::CompatConfig;
pub use errno::Errno;
pub use runtime::bridge::{
    BridgeConnection, BridgeContext, BridgeError, BridgeState, BridgeTransport, ModuleDescriptor,
    ServiceBridge,
};
pub use runtime::capability::{Capability, CapabilitySet, Support};
pub use runtime::gate::{CompatibilityGate, Decision, OperationSpec, Requirement};
pub use runtime::hook::{
    HookAdapter, HookError, HookHandle, HookInstallationOutcome, HookValue, InterceptionPrimitive,
    Interceptor, MethodCall, MethodTable, TargetDescriptor,
};
pub use runtime::host::{HostIntrospector, ProcessHost, ScriptedHost};
pub use runtime::loader::{Feature, FeatureContext, FeatureLoader, LoadReport};
pub use runtime::prefs::{
    BackingError, BackingKind, ChangeSet, Editor, MemoryStore, NativeStore, PrefValue,
    PreferenceAdapter, PreferenceSources, XmlFileStore,
};
pub use runtime::probe::{EnvironmentClassification, EnvironmentProbe, Variant};
pub use runtime::status::{ModuleStatusReporter, StatusValue};
pub use runtime::{
    Caveat, Diagnostics, FailureReport, RECORD_ITEM_ALL, RECORD_ITEM_DETAIL, RECORD_ITEM_ERRNO,
    RECORD_ITEM_OP, RECORD_ITEM_SUBJECT, RECORD_ITEM_TIMESTAMP,
};
