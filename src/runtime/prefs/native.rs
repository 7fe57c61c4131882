// 原生可读写配置存储：进程内共享表与 shared_prefs XML 文件两种实现
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::xml::{parse_prefs, serialize_prefs};
use super::{BackingError, PrefValue};
use crate::errno::Errno;
use crate::runtime::state::RwLockPoisonRecover;

// 一次提交的变更：先执行 clear，再按键写入或删除（None 表示删除）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub clear: bool,
    pub entries: BTreeMap<String, Option<PrefValue>>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !self.clear && self.entries.is_empty()
    }

    pub(crate) fn apply_to(&self, values: &mut BTreeMap<String, PrefValue>) {
        if self.clear {
            values.clear();
        }
        for (key, change) in &self.entries {
            match change {
                Some(value) => {
                    values.insert(key.clone(), value.clone());
                }
                None => {
                    values.remove(key);
                }
            }
        }
    }
}

pub trait NativeStore: Send + Sync {
    // 检查存储可达并加载最新内容，失败时适配器回退到下一种后端
    fn open(&self) -> Result<(), BackingError>;
    fn get(&self, key: &str) -> Option<PrefValue>;
    fn snapshot(&self) -> BTreeMap<String, PrefValue>;
    fn commit(&self, changes: &ChangeSet) -> Result<(), BackingError>;
}

// 进程内共享的原生存储，多个适配器实例可持有同一份
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, PrefValue>>,
    unreachable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // open 总是失败的存储，用于演练回退链
    pub fn unreachable() -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            unreachable: true,
        }
    }

    pub fn with_values(values: BTreeMap<String, PrefValue>) -> Self {
        Self {
            values: RwLock::new(values),
            unreachable: false,
        }
    }
}

impl NativeStore for MemoryStore {
    fn open(&self) -> Result<(), BackingError> {
        if self.unreachable {
            return Err(BackingError::new(
                Errno::BackingUnavailable,
                "native store unreachable",
            ));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.read_or_poison().get(key).cloned()
    }

    fn snapshot(&self) -> BTreeMap<String, PrefValue> {
        self.values.read_or_poison().clone()
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), BackingError> {
        if self.unreachable {
            return Err(BackingError::new(
                Errno::BackingUnavailable,
                "native store unreachable",
            ));
        }
        changes.apply_to(&mut self.values.write_or_poison());
        Ok(())
    }
}

// 应用私有目录下的 shared_prefs XML 文件，提交时写临时文件后原子替换
pub struct XmlFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl XmlFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, text: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)
    }
}

impl NativeStore for XmlFileStore {
    fn open(&self) -> Result<(), BackingError> {
        let values = match fs::read_to_string(&self.path) {
            Ok(text) => parse_prefs(&text)?.values,
            // 文件尚未创建，视为空表
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(BackingError::new(
                    Errno::BackingUnavailable,
                    format!("read {}: {err}", self.path.display()),
                ));
            }
        };
        *self.values.write_or_poison() = values;
        Ok(())
    }

    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.read_or_poison().get(key).cloned()
    }

    fn snapshot(&self) -> BTreeMap<String, PrefValue> {
        self.values.read_or_poison().clone()
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), BackingError> {
        let mut values = self.values.write_or_poison();
        let mut next = values.clone();
        changes.apply_to(&mut next);
        self.write_atomically(&serialize_prefs(&next)).map_err(|err| {
            BackingError::new(
                Errno::Io,
                format!("write {}: {err}", self.path.display()),
            )
        })?;
        *values = next;
        Ok(())
    }
}
