// 配置适配器：在四种后端之上提供统一的类型化读取与尽力写入
// 选择顺序 NATIVE_RW → SHADOWED_RO → FILE_RO → IN_MEMORY_DEFAULTS，构建失败即回退
use crate::errno::Errno;
use crate::log;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use super::capability::{Capability, capabilities_for};
use super::probe::EnvironmentClassification;
use super::record::{self, RecordOp};
use super::state::RwLockPoisonRecover;

mod defaults;
mod native;
mod xml;

pub use native::{ChangeSet, MemoryStore, NativeStore, XmlFileStore};

#[derive(Clone, Debug, PartialEq)]
pub enum PrefValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    StringSet(BTreeSet<String>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BackingKind {
    NativeRw,
    ShadowedRo,
    FileRo,
    InMemoryDefaults,
}

impl BackingKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::NativeRw => "NATIVE_RW",
            Self::ShadowedRo => "SHADOWED_RO",
            Self::FileRo => "FILE_RO",
            Self::InMemoryDefaults => "IN_MEMORY_DEFAULTS",
        }
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, Self::NativeRw)
    }
}

impl fmt::Display for BackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackingError {
    pub code: Errno,
    pub message: String,
}

impl BackingError {
    pub fn new(code: Errno, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.name(), self.message)
    }
}

impl std::error::Error for BackingError {}

// 构建适配器时可用的后端来源
#[derive(Clone, Default)]
pub struct PreferenceSources {
    pub native: Option<Arc<dyn NativeStore>>,
    pub shadow_path: Option<PathBuf>,
    pub file_path: Option<PathBuf>,
}

// 回退链中每一步的尝试结果，error 为 None 表示该后端被选中
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackingAttempt {
    pub kind: BackingKind,
    pub error: Option<BackingError>,
}

struct ShadowedFile {
    path: PathBuf,
    values: RwLock<BTreeMap<String, PrefValue>>,
    modified: RwLock<Option<SystemTime>>,
}

enum Backing {
    NativeRw(Arc<dyn NativeStore>),
    ShadowedRo(ShadowedFile),
    FileRo(BTreeMap<String, PrefValue>),
    InMemoryDefaults,
}

pub struct PreferenceAdapter {
    backing: Backing,
    attempts: Vec<BackingAttempt>,
}

impl PreferenceAdapter {
    pub fn open(classification: &EnvironmentClassification, sources: PreferenceSources) -> Self {
        let mut attempts = Vec::new();
        let native_allowed = capabilities_for(classification).has(Capability::NativePreferences);

        let candidates: [(BackingKind, Constructor<'_>); 3] = [
            (
                BackingKind::NativeRw,
                Box::new(|| open_native(native_allowed, sources.native)),
            ),
            (
                BackingKind::ShadowedRo,
                Box::new(|| open_shadowed(sources.shadow_path.as_deref())),
            ),
            (
                BackingKind::FileRo,
                Box::new(|| open_flat_file(sources.file_path.as_deref())),
            ),
        ];

        let mut selected = None;
        for (kind, construct) in candidates {
            match guarded_construct(construct) {
                Ok(backing) => {
                    attempts.push(BackingAttempt { kind, error: None });
                    selected = Some((kind, backing));
                    break;
                }
                Err(error) => {
                    log::debug(format_args!("backing {} unavailable: {}", kind, error));
                    attempts.push(BackingAttempt {
                        kind,
                        error: Some(error),
                    });
                }
            }
        }

        let (kind, backing) = selected.unwrap_or_else(|| {
            attempts.push(BackingAttempt {
                kind: BackingKind::InMemoryDefaults,
                error: None,
            });
            (BackingKind::InMemoryDefaults, Backing::InMemoryDefaults)
        });

        log::info(format_args!(
            "preference backing selected: {} (variant={})",
            kind,
            classification.variant()
        ));
        record::add_record(
            RecordOp::Backing,
            Errno::Ok,
            kind.name(),
            classification.variant().name(),
        );
        Self { backing, attempts }
    }

    pub fn backing_kind(&self) -> BackingKind {
        match self.backing {
            Backing::NativeRw(_) => BackingKind::NativeRw,
            Backing::ShadowedRo(_) => BackingKind::ShadowedRo,
            Backing::FileRo(_) => BackingKind::FileRo,
            Backing::InMemoryDefaults => BackingKind::InMemoryDefaults,
        }
    }

    pub fn attempts(&self) -> &[BackingAttempt] {
        &self.attempts
    }

    fn lookup(&self, key: &str) -> Option<PrefValue> {
        match &self.backing {
            Backing::NativeRw(store) => {
                panic::catch_unwind(AssertUnwindSafe(|| store.get(key))).unwrap_or_else(|_| {
                    log::warn(format_args!("native store panicked reading key={}", key));
                    None
                })
            }
            Backing::ShadowedRo(file) => file.values.read_or_poison().get(key).cloned(),
            Backing::FileRo(values) => values.get(key).cloned(),
            Backing::InMemoryDefaults => defaults::lookup(key),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            Some(PrefValue::Bool(value)) => value,
            other => mismatch(key, other, default),
        }
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.lookup(key) {
            Some(PrefValue::Int(value)) => value,
            other => mismatch(key, other, default),
        }
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.lookup(key) {
            Some(PrefValue::Long(value)) => value,
            other => mismatch(key, other, default),
        }
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        match self.lookup(key) {
            Some(PrefValue::Float(value)) => value,
            other => mismatch(key, other, default),
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            Some(PrefValue::String(value)) => value,
            other => mismatch(key, other, default.to_string()),
        }
    }

    pub fn get_string_set(&self, key: &str, default: BTreeSet<String>) -> BTreeSet<String> {
        match self.lookup(key) {
            Some(PrefValue::StringSet(value)) => value,
            other => mismatch(key, other, default),
        }
    }

    pub fn all(&self) -> BTreeMap<String, PrefValue> {
        match &self.backing {
            Backing::NativeRw(store) => {
                panic::catch_unwind(AssertUnwindSafe(|| store.snapshot())).unwrap_or_default()
            }
            Backing::ShadowedRo(file) => file.values.read_or_poison().clone(),
            Backing::FileRo(values) => values.clone(),
            Backing::InMemoryDefaults => defaults::DEFAULTS
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_pref()))
                .collect(),
        }
    }

    // 仅 SHADOWED_RO 会重新读取文件，读取失败时保留旧内容
    pub fn reload(&self) -> bool {
        let Backing::ShadowedRo(file) = &self.backing else {
            return false;
        };
        match read_prefs_file(&file.path) {
            Ok(values) => {
                *file.values.write_or_poison() = values;
                *file.modified.write_or_poison() = modified_time(&file.path);
                true
            }
            Err(err) => {
                log::warn(format_args!(
                    "reload {} failed, keep previous values: {}",
                    file.path.display(),
                    err
                ));
                false
            }
        }
    }

    pub fn has_file_changed(&self) -> bool {
        let Backing::ShadowedRo(file) = &self.backing else {
            return false;
        };
        *file.modified.read_or_poison() != modified_time(&file.path)
    }

    pub fn edit(&self) -> Editor<'_> {
        Editor {
            adapter: self,
            changes: ChangeSet::default(),
        }
    }

    fn commit_changes(&self, changes: &ChangeSet) -> bool {
        let Backing::NativeRw(store) = &self.backing else {
            log::warn(format_args!(
                "write of {} keys ignored on read-only backing {}",
                changes.entries.len(),
                self.backing_kind()
            ));
            record::add_record(
                RecordOp::Backing,
                Errno::ReadOnly,
                self.backing_kind().name(),
                "write ignored",
            );
            return false;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| store.commit(changes))) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                log::warn(format_args!("native commit failed: {}", err));
                false
            }
            Err(_) => {
                log::error(format_args!("native store panicked during commit"));
                false
            }
        }
    }
}

// 类型不匹配与缺失都返回调用方默认值
fn mismatch<T>(key: &str, found: Option<PrefValue>, default: T) -> T {
    if let Some(value) = found {
        log::debug(format_args!("key={} type mismatch found={:?}", key, value));
    }
    default
}

type Constructor<'a> = Box<dyn FnOnce() -> Result<Backing, BackingError> + 'a>;

fn guarded_construct(construct: Constructor<'_>) -> Result<Backing, BackingError> {
    panic::catch_unwind(AssertUnwindSafe(construct)).unwrap_or_else(|_| {
        Err(BackingError::new(
            Errno::BackingUnavailable,
            "backing construction panicked",
        ))
    })
}

fn open_native(
    allowed: bool,
    store: Option<Arc<dyn NativeStore>>,
) -> Result<Backing, BackingError> {
    if !allowed {
        return Err(BackingError::new(
            Errno::CapabilityDenied,
            "native preferences not available in this environment",
        ));
    }
    let Some(store) = store else {
        return Err(BackingError::new(
            Errno::BackingUnavailable,
            "no native store handle",
        ));
    };
    store.open()?;
    Ok(Backing::NativeRw(store))
}

fn open_shadowed(path: Option<&Path>) -> Result<Backing, BackingError> {
    let Some(path) = path else {
        return Err(BackingError::new(
            Errno::BackingUnavailable,
            "no shadowed preference path",
        ));
    };
    if !is_readable(path) {
        return Err(BackingError::new(
            Errno::BackingUnavailable,
            format!("{} is not readable", path.display()),
        ));
    }
    let values = read_prefs_file(path)?;
    Ok(Backing::ShadowedRo(ShadowedFile {
        path: path.to_path_buf(),
        values: RwLock::new(values),
        modified: RwLock::new(modified_time(path)),
    }))
}

// 只要配置了路径就能构建；文件缺失或损坏时得到空表
fn open_flat_file(path: Option<&Path>) -> Result<Backing, BackingError> {
    let Some(path) = path else {
        return Err(BackingError::new(
            Errno::BackingUnavailable,
            "no flat preference file",
        ));
    };
    let values = read_prefs_file(path).unwrap_or_else(|err| {
        log::warn(format_args!(
            "flat preference file {} unusable, using empty table: {}",
            path.display(),
            err
        ));
        BTreeMap::new()
    });
    Ok(Backing::FileRo(values))
}

fn read_prefs_file(path: &Path) -> Result<BTreeMap<String, PrefValue>, BackingError> {
    let text = fs::read_to_string(path).map_err(|err| {
        BackingError::new(Errno::Io, format!("read {}: {err}", path.display()))
    })?;
    let parsed = xml::parse_prefs(&text)?;
    if parsed.skipped > 0 {
        log::debug(format_args!(
            "{}: skipped {} malformed entries",
            path.display(),
            parsed.skipped
        ));
    }
    Ok(parsed.values)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(unix)]
fn is_readable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::R_OK) == 0 }
}

#[cfg(not(unix))]
fn is_readable(path: &Path) -> bool {
    fs::File::open(path).is_ok()
}

// 写入句柄；只读后端上 commit 返回 false，apply 为空操作
pub struct Editor<'a> {
    adapter: &'a PreferenceAdapter,
    changes: ChangeSet,
}

impl Editor<'_> {
    fn put(mut self, key: &str, value: PrefValue) -> Self {
        self.changes.entries.insert(key.to_string(), Some(value));
        self
    }

    pub fn put_bool(self, key: &str, value: bool) -> Self {
        self.put(key, PrefValue::Bool(value))
    }

    pub fn put_int(self, key: &str, value: i32) -> Self {
        self.put(key, PrefValue::Int(value))
    }

    pub fn put_long(self, key: &str, value: i64) -> Self {
        self.put(key, PrefValue::Long(value))
    }

    pub fn put_float(self, key: &str, value: f32) -> Self {
        self.put(key, PrefValue::Float(value))
    }

    pub fn put_string(self, key: &str, value: &str) -> Self {
        self.put(key, PrefValue::String(value.to_string()))
    }

    pub fn put_string_set(self, key: &str, value: BTreeSet<String>) -> Self {
        self.put(key, PrefValue::StringSet(value))
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.changes.entries.insert(key.to_string(), None);
        self
    }

    pub fn clear(mut self) -> Self {
        self.changes.clear = true;
        self
    }

    pub fn commit(self) -> bool {
        self.adapter.commit_changes(&self.changes)
    }

    // 不关心结果的提交
    pub fn apply(self) {
        if !self.adapter.backing_kind().is_writable() {
            log::debug(format_args!(
                "apply ignored on read-only backing {}",
                self.adapter.backing_kind()
            ));
            return;
        }
        let _ = self.adapter.commit_changes(&self.changes);
    }
}

#[cfg(test)]
mod tests;
