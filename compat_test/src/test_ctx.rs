use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wae_compat::{
    CompatConfig, Errno, ScriptedHost, Variant, clear, init, set_host,
};

pub const SELF_PACKAGE: &str = "com.wmods.wppenhacer";
pub const CORE_CLASS: &str = "com.wmods.wppenhacer.xposed.core.FeatureLoader";
pub const LSPATCH_LOADER_CLASS: &str = "org.lsposed.lspatch.loader.LSPApplication";

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(0);

pub fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

pub fn ensure_ok(code: Errno, context: &str) {
    assert_eq!(code, Errno::Ok, "{context} failed: {}", code.name());
}

// 每个场景使用独立的临时目录
pub fn scratch_dir(name: &str) -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = env::temp_dir().join(format!("compat_test_{}_{}_{}", name, std::process::id(), seq));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

// 重置进程级状态并以指定宿主与配置重新初始化
pub fn reset_with(host: ScriptedHost, config: CompatConfig) {
    clear();
    ensure_ok(set_host(Arc::new(host)), "set_host");
    ensure_ok(init(config), "init");
}

pub fn forced(variant: Variant) -> CompatConfig {
    CompatConfig {
        forced_variant: Some(variant),
        debug: true,
        ..CompatConfig::default()
    }
}

// 不强制环境，依赖探测信号得出 rootless 嵌入式
pub fn embedded_host() -> ScriptedHost {
    ScriptedHost::new()
        .with_class(LSPATCH_LOADER_CLASS)
        .with_class(CORE_CLASS)
        .with_process("com.whatsapp")
}
