// 进程级配置，来源为环境变量，非法值一律回退到默认值
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::probe::Variant;

pub const ENV_FORCED_VARIANT: &str = "WAE_COMPAT_ENV";
pub const ENV_DEBUG: &str = "WAE_COMPAT_DEBUG";
pub const ENV_STATUS_CACHE_MS: &str = "WAE_COMPAT_STATUS_CACHE_MS";
pub const ENV_LOADER_TIMEOUT_MS: &str = "WAE_COMPAT_LOADER_TIMEOUT_MS";
pub const ENV_WORKERS: &str = "WAE_COMPAT_WORKERS";
pub const ENV_SHADOW_PREFS: &str = "WAE_COMPAT_SHADOW_PREFS";
pub const ENV_FILE_PREFS: &str = "WAE_COMPAT_FILE_PREFS";
pub const ENV_BRIDGE_SOCKET: &str = "WAE_COMPAT_BRIDGE_SOCKET";

pub const DEFAULT_STATUS_CACHE: Duration = Duration::from_secs(5);
pub const DEFAULT_LOADER_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_WORKERS: usize = 4;
const MAX_WORKERS: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct CompatConfig {
    // 显式指定的运行环境，优先于所有探测信号
    pub forced_variant: Option<Variant>,
    pub debug: bool,
    pub status_cache: Duration,
    pub loader_timeout: Duration,
    pub workers: usize,
    // 全局可读的模块配置文件（root 环境下由模块进程写出）
    pub shadow_prefs_path: Option<PathBuf>,
    // 兜底的平面配置文件
    pub file_prefs_path: Option<PathBuf>,
    pub bridge_socket: Option<PathBuf>,
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            forced_variant: None,
            debug: false,
            status_cache: DEFAULT_STATUS_CACHE,
            loader_timeout: DEFAULT_LOADER_TIMEOUT,
            workers: DEFAULT_WORKERS,
            shadow_prefs_path: None,
            file_prefs_path: None,
            bridge_socket: None,
        }
    }
}

impl CompatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    // 以任意键值查询函数构建配置，便于测试注入
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_FORCED_VARIANT) {
            config.forced_variant = Variant::from_marker(&value);
        }
        if let Some(enabled) = lookup(ENV_DEBUG).and_then(|value| parse_bool_value(&value)) {
            config.debug = enabled;
        }
        if let Some(ms) = lookup(ENV_STATUS_CACHE_MS).and_then(|value| parse_u64(&value)) {
            config.status_cache = Duration::from_millis(ms);
        }
        if let Some(ms) = lookup(ENV_LOADER_TIMEOUT_MS).and_then(|value| parse_u64(&value)) {
            if ms > 0 {
                config.loader_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(workers) = lookup(ENV_WORKERS).and_then(|value| parse_u64(&value)) {
            if workers > 0 {
                config.workers = (workers as usize).min(MAX_WORKERS);
            }
        }
        config.shadow_prefs_path = lookup(ENV_SHADOW_PREFS).and_then(non_empty_path);
        config.file_prefs_path = lookup(ENV_FILE_PREFS).and_then(non_empty_path);
        config.bridge_socket = lookup(ENV_BRIDGE_SOCKET).and_then(non_empty_path);
        config
    }
}

pub(crate) fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn non_empty_path(value: String) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}
