// 探测信号定义。两组信号均按优先级排列，第一个命中的信号决定结果
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::Path;

use super::{ProbeContext, Variant};
use crate::config::ENV_FORCED_VARIANT;

pub(crate) const MARKER_PROPERTY: &str = "persist.wae.compat.env";
pub(crate) const LSPATCH_LOADER_CLASS: &str = "org.lsposed.lspatch.loader.LSPApplication";
pub(crate) const LSPATCH_STUB_CLASS: &str =
    "org.lsposed.lspatch.metaloader.LSPAppComponentFactoryStub";
pub(crate) const LSPATCH_PROPERTY: &str = "debug.lspatch.enabled";
pub(crate) const LSPATCH_ENV: &str = "LSPATCH";
pub(crate) const XPOSED_BRIDGE_CLASS: &str = "de.robv.android.xposed.XposedBridge";
pub(crate) const LOCAL_SERVICE_CLASS: &str = "org.lsposed.lspatch.service.LocalApplicationService";
pub(crate) const REMOTE_SERVICE_CLASS: &str =
    "org.lsposed.lspatch.service.RemoteApplicationService";
pub(crate) const MANAGER_PACKAGE: &str = "org.lsposed.lspatch";

// 修补器在设备上留下的痕迹
pub(crate) const LSPATCH_ARTIFACTS: &[&str] = &[
    "/data/local/tmp/lspatch",
    "/data/data/com.whatsapp/cache/lspatch",
    "/data/data/com.whatsapp.w4b/cache/lspatch",
];
// 管理器模式：管理器应用的数据目录
pub(crate) const MANAGER_ARTIFACTS: &[&str] = &[
    "/data/data/org.lsposed.lspatch",
    "/data/user/0/org.lsposed.lspatch",
];
// 本地模式：内嵌模块被解压到目标应用缓存
pub(crate) const EMBEDDED_ARTIFACTS: &[&str] = &[
    "/data/data/com.whatsapp/cache/lspatch/origin",
    "/data/data/com.whatsapp.w4b/cache/lspatch/origin",
];

static LSPATCH_NAME_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)lspatch").ok());
static PATCHED_LOADER_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(/lspatch/|assets/lspatch|lspatch/origin)").ok());
static EMBEDDED_LOADER_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(assets/lspatch/modules|lspatch/origin/)").ok());
static MANAGER_LOADER_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"org\.lsposed\.lspatch(-[^/]*)?/base\.apk").ok());

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Verdict {
    Rooted,
    Rootless,
    Embedded,
    Managed,
}

pub(crate) struct Signal {
    pub(crate) name: &'static str,
    pub(crate) verdict: Verdict,
    pub(crate) check: fn(&ProbeContext<'_>) -> io::Result<bool>,
}

pub(crate) static COARSE_SIGNALS: &[Signal] = &[
    Signal {
        name: "config.forced_rooted",
        verdict: Verdict::Rooted,
        check: |ctx| Ok(configured_variant(ctx) == Some(Variant::RootedClassic)),
    },
    Signal {
        name: "config.forced_rootless",
        verdict: Verdict::Rootless,
        check: |ctx| Ok(configured_variant(ctx).is_some_and(Variant::is_rootless)),
    },
    Signal {
        name: "lspatch.loader_class",
        verdict: Verdict::Rootless,
        check: |ctx| {
            Ok(ctx.host.class_reachable(LSPATCH_LOADER_CLASS)?
                || ctx.host.class_reachable(LSPATCH_STUB_CLASS)?)
        },
    },
    Signal {
        name: "lspatch.property",
        verdict: Verdict::Rootless,
        check: |ctx| {
            Ok(ctx
                .host
                .system_property(LSPATCH_PROPERTY)?
                .is_some_and(|value| is_truthy(&value)))
        },
    },
    Signal {
        name: "lspatch.env",
        verdict: Verdict::Rootless,
        check: |ctx| Ok(ctx.host.env_var(LSPATCH_ENV).is_some_and(|value| is_truthy(&value))),
    },
    Signal {
        name: "lspatch.thread",
        verdict: Verdict::Rootless,
        check: |ctx| {
            let names = ctx.host.thread_names()?;
            Ok(names
                .iter()
                .any(|name| pattern_matches(&LSPATCH_NAME_PATTERN, name)))
        },
    },
    Signal {
        name: "lspatch.classloader",
        verdict: Verdict::Rootless,
        check: |ctx| {
            let description = ctx.host.class_loader_description()?;
            Ok(pattern_matches(&PATCHED_LOADER_PATTERN, &description))
        },
    },
    Signal {
        name: "lspatch.artifact",
        verdict: Verdict::Rootless,
        check: |ctx| any_path_exists(ctx, LSPATCH_ARTIFACTS),
    },
    Signal {
        name: "xposed.bridge_class",
        verdict: Verdict::Rooted,
        check: |ctx| ctx.host.class_reachable(XPOSED_BRIDGE_CLASS),
    },
];

pub(crate) static SUB_MODE_SIGNALS: &[Signal] = &[
    Signal {
        name: "config.mode_managed",
        verdict: Verdict::Managed,
        check: |ctx| Ok(configured_variant(ctx) == Some(Variant::RootlessManaged)),
    },
    Signal {
        name: "config.mode_embedded",
        verdict: Verdict::Embedded,
        check: |ctx| Ok(configured_variant(ctx) == Some(Variant::RootlessEmbedded)),
    },
    Signal {
        name: "service.remote",
        verdict: Verdict::Managed,
        check: |ctx| ctx.host.class_reachable(REMOTE_SERVICE_CLASS),
    },
    Signal {
        name: "service.local",
        verdict: Verdict::Embedded,
        check: |ctx| ctx.host.class_reachable(LOCAL_SERVICE_CLASS),
    },
    Signal {
        name: "process.manager",
        verdict: Verdict::Managed,
        check: |ctx| {
            let description = ctx.host.class_loader_description()?;
            if pattern_matches(&MANAGER_LOADER_PATTERN, &description) {
                return Ok(true);
            }
            Ok(ctx.host.process_name()?.starts_with(MANAGER_PACKAGE))
        },
    },
    Signal {
        name: "process.embedded",
        verdict: Verdict::Embedded,
        check: |ctx| {
            let description = ctx.host.class_loader_description()?;
            Ok(pattern_matches(&EMBEDDED_LOADER_PATTERN, &description))
        },
    },
    Signal {
        name: "artifact.manager",
        verdict: Verdict::Managed,
        check: |ctx| any_path_exists(ctx, MANAGER_ARTIFACTS),
    },
    Signal {
        name: "artifact.embedded",
        verdict: Verdict::Embedded,
        check: |ctx| any_path_exists(ctx, EMBEDDED_ARTIFACTS),
    },
];

// 显式配置标记：进程配置优先，其次环境变量，最后系统属性
fn configured_variant(ctx: &ProbeContext<'_>) -> Option<Variant> {
    if ctx.forced.is_some() {
        return ctx.forced;
    }
    if let Some(variant) = ctx
        .host
        .env_var(ENV_FORCED_VARIANT)
        .and_then(|value| Variant::from_marker(&value))
    {
        return Some(variant);
    }
    ctx.host
        .system_property(MARKER_PROPERTY)
        .ok()
        .flatten()
        .and_then(|value| Variant::from_marker(&value))
}

fn any_path_exists(ctx: &ProbeContext<'_>, paths: &[&str]) -> io::Result<bool> {
    for path in paths {
        if ctx.host.path_exists(Path::new(path))? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn pattern_matches(pattern: &Lazy<Option<Regex>>, text: &str) -> bool {
    let compiled: &Option<Regex> = pattern;
    compiled.as_ref().is_some_and(|regex| regex.is_match(text))
}

fn is_truthy(value: &str) -> bool {
    crate::config::parse_bool_value(value).unwrap_or(false)
}
