// 共享状态：hook 失败汇总、降级提示，以及锁的 poison 恢复
use crate::errno::Errno;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Mutex/RwLock poison 恢复扩展，避免持锁线程 panic 后引发连锁 panic
pub(crate) trait MutexPoisonRecover<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T>;
}

pub(crate) trait RwLockPoisonRecover<T> {
    fn read_or_poison(&self) -> RwLockReadGuard<'_, T>;
    fn write_or_poison(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> MutexPoisonRecover<T> for Mutex<T> {
    fn lock_or_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> RwLockPoisonRecover<T> for RwLock<T> {
    fn read_or_poison(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_or_poison(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|e| e.into_inner())
    }
}

// 汇总列表中的单条失败，加载完成后批量展示给用户
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureReport {
    pub source: String,
    pub target: String,
    pub code: Errno,
    pub message: String,
}

// 功能以降级方式启用时留给用户的说明
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Caveat {
    pub feature: String,
    pub reason: String,
}

// 不同失败条目的上限；相同条目只累加次数
const MAX_FAILURES: usize = 256;

struct FailureEntry {
    report: FailureReport,
    occurrences: u64,
}

#[derive(Default)]
struct DiagnosticsInner {
    // 只追加，读取方为唯一的批量报告入口
    failures: Vec<FailureEntry>,
    // 达到上限后被丢弃的新条目次数
    overflow: u64,
    caveats: Vec<Caveat>,
}

// hook 失败与降级提示的汇总容器，进程内默认共享一份
#[derive(Default)]
pub struct Diagnostics {
    inner: Mutex<DiagnosticsInner>,
}

static PROCESS_DIAGNOSTICS: Lazy<Arc<Diagnostics>> = Lazy::new(|| Arc::new(Diagnostics::new()));

pub(crate) fn process_diagnostics() -> Arc<Diagnostics> {
    PROCESS_DIAGNOSTICS.clone()
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    // 热点方法上反复失败的回调只占一条
    pub fn push_failure(&self, report: FailureReport) {
        let mut inner = self.inner.lock_or_poison();
        if let Some(entry) = inner.failures.iter_mut().find(|entry| entry.report == report) {
            entry.occurrences = entry.occurrences.saturating_add(1);
            return;
        }
        if inner.failures.len() >= MAX_FAILURES {
            inner.overflow = inner.overflow.saturating_add(1);
            return;
        }
        inner.failures.push(FailureEntry {
            report,
            occurrences: 1,
        });
    }

    pub fn failures(&self) -> Vec<FailureReport> {
        let inner = self.inner.lock_or_poison();
        inner.failures.iter().map(|entry| entry.report.clone()).collect()
    }

    // 不同失败条目数
    pub fn failure_count(&self) -> usize {
        self.inner.lock_or_poison().failures.len()
    }

    // 含重复与溢出在内的失败总次数
    pub fn failure_occurrences(&self) -> u64 {
        let inner = self.inner.lock_or_poison();
        inner
            .failures
            .iter()
            .fold(inner.overflow, |total, entry| total.saturating_add(entry.occurrences))
    }

    // 取走并清空汇总列表，用于加载结束后的一次性展示
    pub fn take_failures(&self) -> Vec<FailureReport> {
        let mut inner = self.inner.lock_or_poison();
        inner.overflow = 0;
        std::mem::take(&mut inner.failures)
            .into_iter()
            .map(|entry| entry.report)
            .collect()
    }

    pub fn push_caveat(&self, feature: &str, reason: &str) {
        let mut inner = self.inner.lock_or_poison();
        if inner
            .caveats
            .iter()
            .any(|caveat| caveat.feature == feature && caveat.reason == reason)
        {
            return;
        }
        inner.caveats.push(Caveat {
            feature: feature.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn caveats(&self) -> Vec<Caveat> {
        self.inner.lock_or_poison().caveats.clone()
    }

    // 多行文本，每条失败一行，供 UI 一次性弹出
    pub fn render_failures(&self) -> Option<String> {
        let inner = self.inner.lock_or_poison();
        if inner.failures.is_empty() {
            return None;
        }
        let mut lines: Vec<String> = inner
            .failures
            .iter()
            .map(|entry| {
                let report = &entry.report;
                let mut line = format!(
                    "[{}] {} ({}): {}",
                    report.source,
                    report.target,
                    report.code.name(),
                    report.message
                );
                if entry.occurrences > 1 {
                    line.push_str(&format!(" x{}", entry.occurrences));
                }
                line
            })
            .collect();
        if inner.overflow > 0 {
            lines.push(format!("... {} more failures omitted", inner.overflow));
        }
        Some(lines.join("\n"))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock_or_poison();
        inner.failures.clear();
        inner.overflow = 0;
        inner.caveats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{Diagnostics, FailureReport, MAX_FAILURES};
    use crate::errno::Errno;

    fn report(target: &str) -> FailureReport {
        FailureReport {
            source: "antirevoke".to_string(),
            target: target.to_string(),
            code: Errno::HookInstallFailure,
            message: "method not found".to_string(),
        }
    }

    #[test]
    fn take_failures_drains_list() {
        let diagnostics = Diagnostics::new();
        diagnostics.push_failure(report("a#b()"));
        diagnostics.push_failure(report("c#d()"));
        assert_eq!(diagnostics.failure_count(), 2);
        assert_eq!(diagnostics.take_failures().len(), 2);
        assert_eq!(diagnostics.failure_count(), 0);
        assert!(diagnostics.render_failures().is_none());
    }

    #[test]
    fn render_lists_every_failure() {
        let diagnostics = Diagnostics::new();
        diagnostics.push_failure(report("a#b()"));
        let text = diagnostics.render_failures().unwrap_or_default();
        assert_eq!(
            text,
            "[antirevoke] a#b() (hook-install-failure): method not found"
        );
    }

    #[test]
    fn repeated_failure_is_counted_not_appended() {
        let diagnostics = Diagnostics::new();
        for _ in 0..10_000 {
            diagnostics.push_failure(report("a#b()"));
        }
        assert_eq!(diagnostics.failure_count(), 1);
        assert_eq!(diagnostics.failure_occurrences(), 10_000);
        let text = diagnostics.render_failures().unwrap_or_default();
        assert!(text.ends_with(" x10000"));
    }

    #[test]
    fn distinct_failures_are_capped() {
        let diagnostics = Diagnostics::new();
        for index in 0..MAX_FAILURES + 5 {
            diagnostics.push_failure(report(&format!("a#m{index}()")));
        }
        assert_eq!(diagnostics.failure_count(), MAX_FAILURES);
        assert_eq!(diagnostics.failure_occurrences(), (MAX_FAILURES + 5) as u64);
        let text = diagnostics.render_failures().unwrap_or_default();
        assert!(text.ends_with("... 5 more failures omitted"));
        assert_eq!(diagnostics.take_failures().len(), MAX_FAILURES);
        assert_eq!(diagnostics.failure_occurrences(), 0);
    }

    #[test]
    fn duplicate_caveats_are_collapsed() {
        let diagnostics = Diagnostics::new();
        diagnostics.push_caveat("theme", "resources are read-only");
        diagnostics.push_caveat("theme", "resources are read-only");
        diagnostics.push_caveat("theme", "other");
        assert_eq!(diagnostics.caveats().len(), 2);
    }
}
