// 宿主服务桥：按需建立连接，查询宿主已加载的模块列表
// 连接由本模块独占；失败后不自动重试，显式 connect 才会重新尝试
use crate::errno::Errno;
use crate::log;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::capability::{Capability, capabilities_for};
use super::hook::panic_message;
use super::probe::EnvironmentClassification;
use super::record::{self, RecordOp};
use super::state::MutexPoisonRecover;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::UnixSocketTransport;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ModuleDescriptor {
    pub package_name: String,
    pub apk_path: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BridgeError {
    pub code: Errno,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: Errno, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(Errno::ServiceUnreachable, message)
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.name(), self.message)
    }
}

impl std::error::Error for BridgeError {}

// 建立连接所需的调用方上下文
#[derive(Clone)]
pub struct BridgeContext {
    pub package_name: String,
    pub classification: Arc<EnvironmentClassification>,
}

pub trait BridgeConnection: Send {
    // 健康检查，返回 false 表示对端已失效
    fn is_alive(&mut self) -> bool;
    fn list_modules(&mut self) -> Result<Vec<ModuleDescriptor>, BridgeError>;
    fn close(&mut self) {}
}

pub trait BridgeTransport: Send + Sync {
    fn open(&self, ctx: &BridgeContext) -> Result<Box<dyn BridgeConnection>, BridgeError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BridgeState {
    Uninitialized,
    Connecting,
    Connected,
    Failed,
    // 显式断开后不再自动重建
    Disconnected,
}

// 连接句柄单独加锁，套接字 IO 期间不占用状态锁
type SharedConnection = Arc<Mutex<Box<dyn BridgeConnection>>>;

struct BridgeInner {
    state: BridgeState,
    connection: Option<SharedConnection>,
    last_error: Option<BridgeError>,
}

pub struct ServiceBridge {
    transport: Arc<dyn BridgeTransport>,
    // 串行化连接尝试，同一时刻最多一个底层连接在建立
    connect_lock: Mutex<()>,
    inner: Mutex<BridgeInner>,
}

impl ServiceBridge {
    pub fn new(transport: Arc<dyn BridgeTransport>) -> Self {
        Self {
            transport,
            connect_lock: Mutex::new(()),
            inner: Mutex::new(BridgeInner {
                state: BridgeState::Uninitialized,
                connection: None,
                last_error: None,
            }),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lock_or_poison().state
    }

    pub fn last_error(&self) -> Option<BridgeError> {
        self.inner.lock_or_poison().last_error.clone()
    }

    pub fn connect(&self, ctx: &BridgeContext) -> bool {
        let _attempt = self.connect_lock.lock_or_poison();
        {
            let mut inner = self.inner.lock_or_poison();
            if inner.state == BridgeState::Connected && inner.connection.is_some() {
                return true;
            }
            inner.state = BridgeState::Connecting;
        }

        let result = if capabilities_for(&ctx.classification).has(Capability::BridgeService) {
            panic::catch_unwind(AssertUnwindSafe(|| self.transport.open(ctx))).unwrap_or_else(
                |payload| {
                    Err(BridgeError::unreachable(format!(
                        "transport panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                },
            )
        } else {
            Err(BridgeError::new(
                Errno::CapabilityDenied,
                format!("bridge service not available on {}", ctx.classification.variant()),
            ))
        };

        let mut inner = self.inner.lock_or_poison();
        match result {
            Ok(connection) => {
                log::info(format_args!("bridge connected for {}", ctx.package_name));
                record::add_record(RecordOp::Bridge, Errno::Ok, &ctx.package_name, "connected");
                inner.state = BridgeState::Connected;
                inner.connection = Some(Arc::new(Mutex::new(connection)));
                inner.last_error = None;
                true
            }
            Err(error) => {
                log::warn(format_args!("bridge connect failed: {}", error));
                record::add_record(RecordOp::Bridge, error.code, &ctx.package_name, &error.message);
                inner.state = BridgeState::Failed;
                inner.connection = None;
                inner.last_error = Some(error);
                false
            }
        }
    }

    // 仅在从未尝试过时才惰性连接
    pub fn ensure_connected(&self, ctx: &BridgeContext) -> bool {
        if self.state() == BridgeState::Uninitialized {
            return self.connect(ctx);
        }
        self.is_connected()
    }

    // 状态锁内只取句柄，IO 在锁外进行
    fn current_connection(&self) -> Option<SharedConnection> {
        let inner = self.inner.lock_or_poison();
        if inner.state != BridgeState::Connected {
            return None;
        }
        inner.connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        let Some(connection) = self.current_connection() else {
            return false;
        };
        let check = || connection.lock_or_poison().is_alive();
        let alive = panic::catch_unwind(AssertUnwindSafe(check)).unwrap_or(false);
        if !alive {
            log::warn(format_args!("bridge health check failed, connection dropped"));
            self.mark_failed(&connection, BridgeError::unreachable("health check failed"));
        }
        alive
    }

    // None 表示服务不可达，与空列表区分
    pub fn query_loaded_modules(&self) -> Option<Vec<ModuleDescriptor>> {
        let connection = self.current_connection()?;
        let list = || connection.lock_or_poison().list_modules();
        let result = panic::catch_unwind(AssertUnwindSafe(list)).unwrap_or_else(|payload| {
            Err(BridgeError::unreachable(format!(
                "query panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
        match result {
            Ok(modules) => {
                log::debug(format_args!("bridge listed {} modules", modules.len()));
                Some(modules)
            }
            Err(error) => {
                log::warn(format_args!("bridge query failed: {}", error));
                record::add_record(RecordOp::Bridge, error.code, "list_modules", &error.message);
                self.mark_failed(&connection, error);
                None
            }
        }
    }

    // 进行中的查询持有连接锁时不等待，句柄随最后一个引用释放
    pub fn disconnect(&self) {
        let _attempt = self.connect_lock.lock_or_poison();
        let connection = {
            let mut inner = self.inner.lock_or_poison();
            inner.state = BridgeState::Disconnected;
            inner.connection.take()
        };
        if let Some(connection) = connection {
            close_connection(&connection);
            log::info(format_args!("bridge disconnected"));
        }
    }

    // 期间若已重连或断开，则不覆盖新状态
    fn mark_failed(&self, connection: &SharedConnection, error: BridgeError) {
        let mut inner = self.inner.lock_or_poison();
        let current = inner
            .connection
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, connection));
        if !current {
            return;
        }
        inner.connection = None;
        inner.state = BridgeState::Failed;
        inner.last_error = Some(error);
        drop(inner);
        close_connection(connection);
    }
}

fn close_connection(connection: &SharedConnection) {
    let Ok(mut guard) = connection.try_lock() else {
        log::debug(format_args!("bridge connection busy, close deferred to drop"));
        return;
    };
    let _ = panic::catch_unwind(AssertUnwindSafe(|| guard.close()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::probe::Variant;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    struct ScriptedConnection {
        alive: Arc<AtomicBool>,
        modules: Vec<ModuleDescriptor>,
        list_delay: Duration,
        listing: Option<mpsc::Sender<()>>,
    }

    impl BridgeConnection for ScriptedConnection {
        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn list_modules(&mut self) -> Result<Vec<ModuleDescriptor>, BridgeError> {
            if let Some(listing) = &self.listing {
                let _ = listing.send(());
            }
            thread::sleep(self.list_delay);
            if !self.alive.load(Ordering::SeqCst) {
                return Err(BridgeError::unreachable("peer gone"));
            }
            Ok(self.modules.clone())
        }
    }

    struct ScriptedTransport {
        reachable: bool,
        alive: Arc<AtomicBool>,
        opens: AtomicUsize,
        delay: Duration,
        list_delay: Duration,
        listing: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl ScriptedTransport {
        fn new(reachable: bool) -> Self {
            Self {
                reachable,
                alive: Arc::new(AtomicBool::new(true)),
                opens: AtomicUsize::new(0),
                delay: Duration::ZERO,
                list_delay: Duration::ZERO,
                listing: Mutex::new(None),
            }
        }
    }

    impl BridgeTransport for ScriptedTransport {
        fn open(&self, _ctx: &BridgeContext) -> Result<Box<dyn BridgeConnection>, BridgeError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if !self.reachable {
                return Err(BridgeError::unreachable("service not bound"));
            }
            Ok(Box::new(ScriptedConnection {
                alive: self.alive.clone(),
                modules: vec![ModuleDescriptor {
                    package_name: "com.wmods.wppenhacer".to_string(),
                    apk_path: "/data/app/wpp/base.apk".to_string(),
                }],
                list_delay: self.list_delay,
                listing: self.listing.lock_or_poison().clone(),
            }))
        }
    }

    fn ctx(variant: Variant) -> BridgeContext {
        BridgeContext {
            package_name: "com.wmods.wppenhacer".to_string(),
            classification: Arc::new(EnvironmentClassification::fixed(variant)),
        }
    }

    #[test]
    fn connect_is_idempotent_and_lists_modules() {
        let transport = Arc::new(ScriptedTransport::new(true));
        let bridge = ServiceBridge::new(transport.clone());
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        assert!(bridge.query_loaded_modules().is_none());

        assert!(bridge.connect(&ctx(Variant::RootlessEmbedded)));
        assert!(bridge.connect(&ctx(Variant::RootlessEmbedded)));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert!(bridge.is_connected());
        let modules = bridge.query_loaded_modules().unwrap_or_default();
        assert_eq!(modules.len(), 1);
    }

    #[test]
    fn failed_connect_is_not_retried_automatically() {
        let transport = Arc::new(ScriptedTransport::new(false));
        let bridge = ServiceBridge::new(transport.clone());
        let context = ctx(Variant::RootlessEmbedded);
        assert!(!bridge.ensure_connected(&context));
        assert_eq!(bridge.state(), BridgeState::Failed);
        assert!(!bridge.ensure_connected(&context));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);

        assert!(!bridge.connect(&context));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.last_error().map(|e| e.code), Some(Errno::ServiceUnreachable));
    }

    #[test]
    fn missing_capability_fails_without_opening() {
        let transport = Arc::new(ScriptedTransport::new(true));
        let bridge = ServiceBridge::new(transport.clone());
        for variant in [Variant::RootedClassic, Variant::RootlessManaged] {
            assert!(!bridge.connect(&ctx(variant)));
            assert_eq!(bridge.last_error().map(|e| e.code), Some(Errno::CapabilityDenied));
        }
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dead_connection_moves_to_failed() {
        let transport = Arc::new(ScriptedTransport::new(true));
        let bridge = ServiceBridge::new(transport.clone());
        assert!(bridge.connect(&ctx(Variant::RootlessEmbedded)));
        transport.alive.store(false, Ordering::SeqCst);
        assert!(!bridge.is_connected());
        assert_eq!(bridge.state(), BridgeState::Failed);
        assert!(bridge.query_loaded_modules().is_none());
    }

    #[test]
    fn query_failure_drops_connection() {
        let transport = Arc::new(ScriptedTransport::new(true));
        let bridge = ServiceBridge::new(transport.clone());
        assert!(bridge.connect(&ctx(Variant::RootlessEmbedded)));
        transport.alive.store(false, Ordering::SeqCst);
        assert!(bridge.query_loaded_modules().is_none());
        assert_eq!(bridge.state(), BridgeState::Failed);
    }

    #[test]
    fn disconnect_prevents_lazy_reconnect() {
        let transport = Arc::new(ScriptedTransport::new(true));
        let bridge = ServiceBridge::new(transport.clone());
        let context = ctx(Variant::RootlessEmbedded);
        assert!(bridge.ensure_connected(&context));
        bridge.disconnect();
        assert_eq!(bridge.state(), BridgeState::Disconnected);
        assert!(!bridge.ensure_connected(&context));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_connects_open_once() {
        let mut transport = ScriptedTransport::new(true);
        transport.delay = Duration::from_millis(20);
        let transport = Arc::new(transport);
        let bridge = Arc::new(ServiceBridge::new(transport.clone()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bridge = bridge.clone();
                thread::spawn(move || bridge.connect(&ctx(Variant::RootlessEmbedded)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("join connect thread"));
        }
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_listing_does_not_block_state_queries() {
        let (started, listing) = mpsc::channel();
        let mut transport = ScriptedTransport::new(true);
        transport.list_delay = Duration::from_millis(500);
        transport.listing = Mutex::new(Some(started));
        let bridge = Arc::new(ServiceBridge::new(Arc::new(transport)));
        assert!(bridge.connect(&ctx(Variant::RootlessEmbedded)));

        let querying = bridge.clone();
        let query = thread::spawn(move || querying.query_loaded_modules());
        listing.recv_timeout(Duration::from_secs(5)).expect("listing started");

        let begin = Instant::now();
        assert_eq!(bridge.state(), BridgeState::Connected);
        assert!(bridge.last_error().is_none());
        bridge.disconnect();
        assert!(begin.elapsed() < Duration::from_millis(250));
        assert_eq!(bridge.state(), BridgeState::Disconnected);

        // 查询在断开前已取得句柄，仍能完成
        assert!(query.join().expect("join query thread").is_some());
        assert_eq!(bridge.state(), BridgeState::Disconnected);
    }
}
