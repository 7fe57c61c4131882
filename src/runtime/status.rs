// 模块状态汇总，供 UI 展示，结果按间隔缓存
use crate::errno::Errno;
use crate::log;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::bridge::{BridgeContext, ServiceBridge};
use super::hook::InterceptionPrimitive;
use super::probe::{EnvironmentClassification, EnvironmentProbe};
use super::record::{self, RecordOp};
use super::state::MutexPoisonRecover;

pub const DEFAULT_CACHE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusValue {
    Active,
    Inactive,
    // 宿主无法回答存活检测
    Unknown,
}

impl StatusValue {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "Module active",
            Self::Inactive => "Module inactive",
            Self::Unknown => "Module status unknown",
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub struct ModuleStatusReporter {
    probe: Arc<EnvironmentProbe>,
    self_package: String,
    bridge: Option<Arc<ServiceBridge>>,
    primitive: Option<Arc<dyn InterceptionPrimitive>>,
    core_classes: Vec<String>,
    cache_interval: Duration,
    cache: Mutex<Option<(Instant, StatusValue)>>,
}

impl ModuleStatusReporter {
    pub fn new(probe: Arc<EnvironmentProbe>, self_package: &str) -> Self {
        Self {
            probe,
            self_package: self_package.to_string(),
            bridge: None,
            primitive: None,
            core_classes: Vec::new(),
            cache_interval: DEFAULT_CACHE_INTERVAL,
            cache: Mutex::new(None),
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<ServiceBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_primitive(mut self, primitive: Arc<dyn InterceptionPrimitive>) -> Self {
        self.primitive = Some(primitive);
        self
    }

    pub fn with_core_classes(mut self, classes: &[&str]) -> Self {
        self.core_classes = classes.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_cache_interval(mut self, interval: Duration) -> Self {
        self.cache_interval = interval;
        self
    }

    pub fn current_status(&self) -> StatusValue {
        if let Some((computed_at, status)) = *self.cache.lock_or_poison() {
            if computed_at.elapsed() < self.cache_interval {
                return status;
            }
        }
        self.force_refresh()
    }

    pub fn force_refresh(&self) -> StatusValue {
        let status = self.evaluate();
        *self.cache.lock_or_poison() = Some((Instant::now(), status));
        status
    }

    fn evaluate(&self) -> StatusValue {
        let classification = self.probe.classify();
        if classification.variant().is_rootless() && self.listed_by_bridge(&classification) {
            return self.finish(StatusValue::Active, "listed by bridge");
        }
        // 未配置核心类时没有类加载证据，不能仅凭拦截原语判定存活
        if self.core_classes.is_empty() {
            return self.finish(StatusValue::Unknown, "no core classes configured");
        }
        // 部分子模式即使正常工作也不会出现在列表中，故再做存活检测
        match self.heuristic_liveness() {
            Some(true) => self.finish(StatusValue::Active, "heuristic liveness"),
            Some(false) => self.finish(StatusValue::Inactive, "heuristic liveness"),
            None => self.finish(StatusValue::Unknown, "host introspection failed"),
        }
    }

    fn finish(&self, status: StatusValue, reason: &str) -> StatusValue {
        log::debug(format_args!("status: {} ({})", status.label(), reason));
        record::add_record(RecordOp::Status, Errno::Ok, status.label(), reason);
        status
    }

    fn listed_by_bridge(&self, classification: &Arc<EnvironmentClassification>) -> bool {
        let Some(bridge) = &self.bridge else {
            return false;
        };
        let ctx = BridgeContext {
            package_name: self.self_package.clone(),
            classification: classification.clone(),
        };
        if !bridge.ensure_connected(&ctx) {
            return false;
        }
        bridge.query_loaded_modules().is_some_and(|modules| {
            modules
                .iter()
                .any(|module| module.package_name == self.self_package)
        })
    }

    // 核心类可解析且拦截原语可用即视为存活；宿主查询出错返回 None
    fn heuristic_liveness(&self) -> Option<bool> {
        let host = self.probe.host().clone();
        let mut classes_loaded = true;
        for class_name in &self.core_classes {
            let reachable =
                panic::catch_unwind(AssertUnwindSafe(|| host.class_reachable(class_name)));
            match reachable {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => classes_loaded = false,
                Ok(Err(_)) | Err(_) => return None,
            }
        }
        let primitive_operational = match &self.primitive {
            Some(primitive) => {
                panic::catch_unwind(AssertUnwindSafe(|| primitive.is_operational()))
                    .unwrap_or(false)
            }
            None => false,
        };
        Some(classes_loaded && primitive_operational)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::bridge::{BridgeConnection, BridgeError, BridgeTransport};
    use crate::runtime::hook::MethodTable;
    use crate::runtime::host::{HostFault, HostIntrospector, ScriptedHost};
    use crate::runtime::probe::Variant;

    const CORE_CLASS: &str = "com.wmods.wppenhacer.xposed.core.FeatureLoader";

    struct Unreachable;

    impl BridgeTransport for Unreachable {
        fn open(&self, _ctx: &BridgeContext) -> Result<Box<dyn BridgeConnection>, BridgeError> {
            Err(BridgeError::unreachable("service not bound"))
        }
    }

    fn probe(host: ScriptedHost, variant: Variant) -> Arc<EnvironmentProbe> {
        let host: Arc<dyn HostIntrospector> = Arc::new(host);
        Arc::new(EnvironmentProbe::new(host, Some(variant)))
    }

    #[test]
    fn embedded_with_failed_bridge_uses_heuristic() {
        let reporter = ModuleStatusReporter::new(
            probe(ScriptedHost::new().with_class(CORE_CLASS), Variant::RootlessEmbedded),
            "com.wmods.wppenhacer",
        )
        .with_bridge(Arc::new(ServiceBridge::new(Arc::new(Unreachable))))
        .with_primitive(Arc::new(MethodTable::new()))
        .with_core_classes(&[CORE_CLASS]);
        assert_eq!(reporter.current_status(), StatusValue::Active);
    }

    #[test]
    fn missing_core_class_is_inactive() {
        let reporter = ModuleStatusReporter::new(
            probe(ScriptedHost::new(), Variant::RootedClassic),
            "com.wmods.wppenhacer",
        )
        .with_primitive(Arc::new(MethodTable::new()))
        .with_core_classes(&[CORE_CLASS]);
        assert_eq!(reporter.current_status(), StatusValue::Inactive);
    }

    #[test]
    fn missing_identity_is_unknown_even_with_primitive() {
        let reporter = ModuleStatusReporter::new(
            probe(ScriptedHost::new(), Variant::RootedClassic),
            "com.wmods.wppenhacer",
        )
        .with_primitive(Arc::new(MethodTable::new()));
        assert_eq!(reporter.current_status(), StatusValue::Unknown);
    }

    #[test]
    fn host_fault_is_unknown() {
        let reporter = ModuleStatusReporter::new(
            probe(ScriptedHost::new().with_fault(HostFault::Error), Variant::RootedClassic),
            "com.wmods.wppenhacer",
        )
        .with_primitive(Arc::new(MethodTable::new()))
        .with_core_classes(&[CORE_CLASS]);
        assert_eq!(reporter.current_status(), StatusValue::Unknown);
    }

    #[test]
    fn cached_value_survives_until_refresh() {
        let table = Arc::new(MethodTable::new());
        let reporter = ModuleStatusReporter::new(
            probe(ScriptedHost::new().with_class(CORE_CLASS), Variant::RootedClassic),
            "com.wmods.wppenhacer",
        )
        .with_primitive(table.clone())
        .with_core_classes(&[CORE_CLASS])
        .with_cache_interval(Duration::from_secs(60));
        assert_eq!(reporter.current_status(), StatusValue::Active);

        table.set_operational(false);
        assert_eq!(reporter.current_status(), StatusValue::Active);
        assert_eq!(reporter.force_refresh(), StatusValue::Inactive);
        assert_eq!(reporter.current_status(), StatusValue::Inactive);
    }

    #[test]
    fn labels_are_distinct() {
        assert_ne!(StatusValue::Active.label(), StatusValue::Inactive.label());
        assert_eq!(StatusValue::Unknown.to_string(), "Module status unknown");
    }
}
