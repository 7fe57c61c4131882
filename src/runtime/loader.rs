// 功能加载器：经闸门过滤后在有界工作线程上安装各功能的 hook
// 等待超时后置取消标志，排队中的功能不再启动；已在运行的只记录不强杀
use crate::errno::Errno;
use crate::log;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::gate::{CompatibilityGate, Decision};
use super::hook::{HookAdapter, HookError, panic_message};
use super::prefs::PreferenceAdapter;
use super::record::{self, RecordOp};
use super::state::{Diagnostics, FailureReport, MutexPoisonRecover};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub trait Feature: Send + Sync {
    fn plugin_name(&self) -> &str;

    // 需经闸门判定的操作名
    fn operation(&self) -> Option<&str> {
        None
    }

    fn do_hook(&self, ctx: &FeatureContext) -> Result<(), HookError>;
}

pub struct FeatureContext {
    pub prefs: Arc<PreferenceAdapter>,
    pub hooks: Arc<HookAdapter>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    // (功能名, 降级说明)
    pub degraded: Vec<(String, String)>,
    // 闸门拒绝，不计为错误
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    // 超时后未完成或未启动的功能
    pub abandoned: Vec<String>,
    pub timed_out: bool,
}

type Job = (usize, Arc<dyn Feature>);
type JobResult = (usize, Result<(), HookError>);

pub struct FeatureLoader {
    gate: Arc<CompatibilityGate>,
    diagnostics: Arc<Diagnostics>,
    workers: usize,
    timeout: Duration,
}

impl FeatureLoader {
    pub fn new(gate: Arc<CompatibilityGate>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            gate,
            diagnostics,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn load(&self, features: Vec<Arc<dyn Feature>>, ctx: Arc<FeatureContext>) -> LoadReport {
        let mut report = LoadReport::default();
        let classification = ctx.hooks.classification().clone();
        let filtered = self.gate.filter_features(
            features,
            |feature| {
                (
                    feature.plugin_name().to_string(),
                    feature.operation().map(str::to_string),
                )
            },
            &classification,
            &self.diagnostics,
        );
        for (_, name) in filtered.rejected {
            log::info(format_args!("feature {} skipped on {}", name, classification.variant()));
            report.skipped.push(name);
        }

        let mut names = Vec::with_capacity(filtered.admitted.len());
        let mut queue = VecDeque::with_capacity(filtered.admitted.len());
        for (index, (feature, decision)) in filtered.admitted.into_iter().enumerate() {
            if let Decision::Degrade(reason) = decision {
                report.degraded.push((feature.plugin_name().to_string(), reason));
            }
            names.push(feature.plugin_name().to_string());
            queue.push_back((index, feature));
        }
        if queue.is_empty() {
            return report;
        }

        let mut completed = vec![false; names.len()];
        let results = self.run_jobs(queue, ctx, &mut report);
        for (index, result) in results {
            completed[index] = true;
            match result {
                Ok(()) => report.loaded.push(names[index].clone()),
                Err(error) => {
                    log::error(format_args!("feature {} failed: {}", names[index], error));
                    self.diagnostics.push_failure(FailureReport {
                        source: names[index].clone(),
                        target: "do_hook".to_string(),
                        code: Errno::HookInstallFailure,
                        message: error.to_string(),
                    });
                    report.failed.push(names[index].clone());
                }
            }
        }
        for (index, done) in completed.iter().enumerate() {
            if !done {
                record::add_record(RecordOp::Hook, Errno::Timeout, &names[index], "abandoned");
                report.abandoned.push(names[index].clone());
            }
        }
        if !report.abandoned.is_empty() {
            log::warn(format_args!(
                "feature loading timed out, abandoned: {}",
                report.abandoned.join(",")
            ));
        }
        log::info(format_args!(
            "features loaded={} degraded={} skipped={} failed={} abandoned={}",
            report.loaded.len(),
            report.degraded.len(),
            report.skipped.len(),
            report.failed.len(),
            report.abandoned.len()
        ));
        report
    }

    fn run_jobs(
        &self,
        queue: VecDeque<Job>,
        ctx: Arc<FeatureContext>,
        report: &mut LoadReport,
    ) -> Vec<JobResult> {
        let total = queue.len();
        let queue = Arc::new(Mutex::new(queue));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel::<JobResult>();

        let mut handles = Vec::new();
        for worker in 0..self.workers.min(total) {
            let queue = queue.clone();
            let cancelled = cancelled.clone();
            let sender = sender.clone();
            let ctx = ctx.clone();
            let spawned = thread::Builder::new()
                .name(format!("wae_loader_{worker}"))
                .spawn(move || worker_loop(&queue, &cancelled, &sender, &ctx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => log::warn(format_args!("spawn loader worker failed: {}", err)),
            }
        }
        drop(sender);
        if handles.is_empty() {
            // 无法创建线程时在当前线程顺序执行
            let (sender, receiver) = mpsc::channel::<JobResult>();
            worker_loop(&queue, &cancelled, &sender, &ctx);
            drop(sender);
            return receiver.into_iter().collect();
        }

        let deadline = Instant::now() + self.timeout;
        let mut results = Vec::with_capacity(total);
        while results.len() < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(result) => results.push(result),
                Err(RecvTimeoutError::Timeout) => {
                    cancelled.store(true, Ordering::Release);
                    report.timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if !report.timed_out {
            for handle in handles {
                let _ = handle.join();
            }
        }
        results
    }
}

fn worker_loop(
    queue: &Mutex<VecDeque<Job>>,
    cancelled: &AtomicBool,
    sender: &mpsc::Sender<JobResult>,
    ctx: &FeatureContext,
) {
    loop {
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        let Some((index, feature)) = queue.lock_or_poison().pop_front() else {
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| feature.do_hook(ctx)))
            .unwrap_or_else(|payload| {
                Err(HookError::callback(format!(
                    "do_hook panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        if sender.send((index, result)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::gate::{OP_RESOURCE_PATCHING, OP_THEME_INJECTION};
    use crate::runtime::hook::MethodTable;
    use crate::runtime::prefs::PreferenceSources;
    use crate::runtime::probe::{EnvironmentClassification, Variant};

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct TestFeature {
        name: &'static str,
        operation: Option<&'static str>,
        behavior: Behavior,
    }

    impl Feature for TestFeature {
        fn plugin_name(&self) -> &str {
            self.name
        }

        fn operation(&self) -> Option<&str> {
            self.operation
        }

        fn do_hook(&self, ctx: &FeatureContext) -> Result<(), HookError> {
            let _ = ctx.prefs.get_bool(self.name, false);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(HookError::new(Errno::NotFound, "class not found")),
                Behavior::Panic => panic!("feature exploded"),
                Behavior::Sleep(duration) => {
                    thread::sleep(duration);
                    Ok(())
                }
            }
        }
    }

    fn feature(
        name: &'static str,
        operation: Option<&'static str>,
        behavior: Behavior,
    ) -> Arc<dyn Feature> {
        Arc::new(TestFeature {
            name,
            operation,
            behavior,
        })
    }

    fn context(variant: Variant, diagnostics: Arc<Diagnostics>) -> Arc<FeatureContext> {
        let classification = Arc::new(EnvironmentClassification::fixed(variant));
        Arc::new(FeatureContext {
            prefs: Arc::new(PreferenceAdapter::open(&classification, PreferenceSources::default())),
            hooks: Arc::new(HookAdapter::new(
                Arc::new(MethodTable::new()),
                classification,
                Arc::new(CompatibilityGate::new()),
                diagnostics,
            )),
        })
    }

    #[test]
    fn failures_are_isolated_and_aggregated() {
        let diagnostics = Arc::new(Diagnostics::new());
        let loader = FeatureLoader::new(Arc::new(CompatibilityGate::new()), diagnostics.clone())
            .with_workers(2);
        let report = loader.load(
            vec![
                feature("antirevoke", None, Behavior::Succeed),
                feature("broken", None, Behavior::Fail),
                feature("crashy", None, Behavior::Panic),
                feature("hideread", None, Behavior::Succeed),
            ],
            context(Variant::RootlessEmbedded, diagnostics.clone()),
        );
        let mut loaded = report.loaded.clone();
        loaded.sort();
        assert_eq!(loaded, vec!["antirevoke", "hideread"]);
        let mut failed = report.failed.clone();
        failed.sort();
        assert_eq!(failed, vec!["broken", "crashy"]);
        assert!(!report.timed_out);
        assert_eq!(diagnostics.failure_count(), 2);
    }

    #[test]
    fn gate_filters_before_install() {
        let diagnostics = Arc::new(Diagnostics::new());
        let loader = FeatureLoader::new(Arc::new(CompatibilityGate::new()), diagnostics.clone());
        let report = loader.load(
            vec![
                feature("custom_theme", Some(OP_RESOURCE_PATCHING), Behavior::Succeed),
                feature("theme_colors", Some(OP_THEME_INJECTION), Behavior::Succeed),
            ],
            context(Variant::RootlessManaged, diagnostics.clone()),
        );
        assert_eq!(report.skipped, vec!["custom_theme"]);
        assert_eq!(report.loaded, vec!["theme_colors"]);
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(diagnostics.failure_count(), 0);
        assert_eq!(diagnostics.caveats().len(), 1);
    }

    #[test]
    fn timeout_abandons_stragglers_and_queued_work() {
        let diagnostics = Arc::new(Diagnostics::new());
        let loader = FeatureLoader::new(Arc::new(CompatibilityGate::new()), diagnostics.clone())
            .with_workers(1)
            .with_timeout(Duration::from_millis(50));
        let report = loader.load(
            vec![
                feature("slow", None, Behavior::Sleep(Duration::from_millis(400))),
                feature("queued", None, Behavior::Succeed),
            ],
            context(Variant::RootedClassic, diagnostics),
        );
        assert!(report.timed_out);
        assert!(report.loaded.is_empty());
        assert_eq!(report.abandoned, vec!["slow", "queued"]);
    }

    #[test]
    fn empty_feature_list_is_noop() {
        let diagnostics = Arc::new(Diagnostics::new());
        let loader = FeatureLoader::new(Arc::new(CompatibilityGate::new()), diagnostics.clone());
        let report = loader.load(Vec::new(), context(Variant::RootedClassic, diagnostics));
        assert_eq!(report, LoadReport::default());
    }
}
