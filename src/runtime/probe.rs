// 运行环境探测：按优先级执行信号组，将当前进程归类为三种宿主环境之一
// 分类结果进程内只计算一次，除非显式清除缓存
use crate::errno::Errno;
use crate::log;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::host::HostIntrospector;
use super::record::{self, RecordOp};
use super::state::MutexPoisonRecover;

mod signals;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Variant {
    // root 环境下的 Xposed/LSPosed
    RootedClassic,
    // 免 root 修补，模块内嵌于目标 apk（本地模式）
    RootlessEmbedded,
    // 免 root 修补，模块由管理器应用提供（管理器模式）
    RootlessManaged,
}

impl Variant {
    pub const ALL: [Variant; 3] = [
        Variant::RootedClassic,
        Variant::RootlessEmbedded,
        Variant::RootlessManaged,
    ];

    pub const fn is_rootless(self) -> bool {
        !matches!(self, Self::RootedClassic)
    }

    // 宽松子模式：回调异常降级为原始行为而非向上抛出
    pub const fn is_permissive(self) -> bool {
        matches!(self, Self::RootlessEmbedded)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::RootedClassic => "rooted-classic",
            Self::RootlessEmbedded => "rootless-embedded",
            Self::RootlessManaged => "rootless-managed",
        }
    }

    // 解析配置标记，接受若干常见写法
    pub fn from_marker(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rooted" | "rooted-classic" | "xposed" | "lsposed" | "root" => {
                Some(Self::RootedClassic)
            }
            "embedded" | "rootless-embedded" | "local" | "lspatch-local" => {
                Some(Self::RootlessEmbedded)
            }
            "managed" | "rootless-managed" | "manager" | "remote" | "lspatch-manager" => {
                Some(Self::RootlessManaged)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignalMatch {
    pub name: &'static str,
    pub matched: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentClassification {
    variant: Variant,
    signals: Vec<SignalMatch>,
    sub_mode_defaulted: bool,
}

impl EnvironmentClassification {
    // 不经探测直接构造，供测试与强制配置使用
    pub fn fixed(variant: Variant) -> Self {
        Self {
            variant,
            signals: Vec::new(),
            sub_mode_defaulted: false,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    // 按执行顺序排列的 (信号名, 是否命中)
    pub fn confidence_signals(&self) -> &[SignalMatch] {
        &self.signals
    }

    pub fn sub_mode_defaulted(&self) -> bool {
        self.sub_mode_defaulted
    }

    pub fn first_match(&self) -> Option<&'static str> {
        self.signals
            .iter()
            .find(|signal| signal.matched)
            .map(|signal| signal.name)
    }
}

pub(crate) struct ProbeContext<'a> {
    pub(crate) host: &'a dyn HostIntrospector,
    pub(crate) forced: Option<Variant>,
}

pub struct EnvironmentProbe {
    host: Arc<dyn HostIntrospector>,
    forced: Option<Variant>,
    // 计算在锁内完成，并发的首次调用只会触发一次探测
    memo: Mutex<Option<Arc<EnvironmentClassification>>>,
}

impl EnvironmentProbe {
    pub fn new(host: Arc<dyn HostIntrospector>, forced: Option<Variant>) -> Self {
        Self {
            host,
            forced,
            memo: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Arc<dyn HostIntrospector> {
        &self.host
    }

    pub fn classify(&self) -> Arc<EnvironmentClassification> {
        let mut memo = self.memo.lock_or_poison();
        if let Some(classification) = memo.as_ref() {
            return classification.clone();
        }
        let classification = Arc::new(self.run_batteries());
        *memo = Some(classification.clone());
        classification
    }

    pub fn memoized(&self) -> Option<Arc<EnvironmentClassification>> {
        self.memo.lock_or_poison().clone()
    }

    pub fn clear_memo(&self) {
        *self.memo.lock_or_poison() = None;
    }

    fn run_batteries(&self) -> EnvironmentClassification {
        let ctx = ProbeContext {
            host: self.host.as_ref(),
            forced: self.forced,
        };
        let mut matches = Vec::new();

        let coarse = run_battery(signals::COARSE_SIGNALS, &ctx, &mut matches);
        let rootless = matches!(coarse, Some(signals::Verdict::Rootless));
        if coarse.is_none() {
            log::debug(format_args!(
                "no coarse signal matched ({}), default to {}",
                Errno::DetectionAmbiguous.name(),
                Variant::RootedClassic
            ));
        }

        let (variant, sub_mode_defaulted) = if rootless {
            match run_battery(signals::SUB_MODE_SIGNALS, &ctx, &mut matches) {
                Some(signals::Verdict::Managed) => (Variant::RootlessManaged, false),
                Some(_) => (Variant::RootlessEmbedded, false),
                None => {
                    // 判定不明时选择限制更少的本地模式：误判为更严格的模式会让更多功能失效
                    log::info(format_args!(
                        "rootless sub-mode inconclusive, default to permissive {}",
                        Variant::RootlessEmbedded
                    ));
                    (Variant::RootlessEmbedded, true)
                }
            }
        } else {
            (Variant::RootedClassic, false)
        };

        let decided_by = matches
            .iter()
            .find(|signal| signal.matched)
            .map(|signal| signal.name)
            .unwrap_or("default");
        log::info(format_args!(
            "environment classified as {} (signal={}, defaulted_sub_mode={})",
            variant, decided_by, sub_mode_defaulted
        ));
        let status = if coarse.is_none() || sub_mode_defaulted {
            Errno::DetectionAmbiguous
        } else {
            Errno::Ok
        };
        record::add_record(RecordOp::Probe, status, variant.name(), decided_by);

        EnvironmentClassification {
            variant,
            signals: matches,
            sub_mode_defaulted,
        }
    }
}

// 依次执行信号组并记录每个信号的结果，返回第一个命中信号的判定
fn run_battery(
    battery: &[signals::Signal],
    ctx: &ProbeContext<'_>,
    matches: &mut Vec<SignalMatch>,
) -> Option<signals::Verdict> {
    let mut verdict = None;
    for signal in battery {
        let matched = evaluate_signal(signal, ctx);
        matches.push(SignalMatch {
            name: signal.name,
            matched,
        });
        if matched && verdict.is_none() {
            verdict = Some(signal.verdict);
        }
    }
    verdict
}

// 单个信号的错误与 panic 均视为未命中，不会中断整组探测
fn evaluate_signal(signal: &signals::Signal, ctx: &ProbeContext<'_>) -> bool {
    let outcome: Result<io::Result<bool>, _> =
        panic::catch_unwind(AssertUnwindSafe(|| (signal.check)(ctx)));
    match outcome {
        Ok(Ok(matched)) => {
            log::debug(format_args!("signal {} matched={}", signal.name, matched));
            matched
        }
        Ok(Err(err)) => {
            log::debug(format_args!("signal {} failed: {}", signal.name, err));
            false
        }
        Err(_) => {
            log::warn(format_args!("signal {} panicked, treated as no match", signal.name));
            false
        }
    }
}
