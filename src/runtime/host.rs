// 宿主进程内省接口：环境探测与存活检测的全部只读查询都经由此 trait
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(target_os = "android")]
use std::ffi::{CStr, CString, c_char};

#[cfg(target_os = "android")]
const SYSTEM_PROP_VALUE_MAX: usize = 92;

#[cfg(target_os = "android")]
unsafe extern "C" {
    fn __system_property_get(name: *const c_char, value: *mut c_char) -> libc::c_int;
}

pub trait HostIntrospector: Send + Sync {
    // 指定类（或代码单元）能否在当前类命名空间中解析
    fn class_reachable(&self, name: &str) -> io::Result<bool>;
    fn system_property(&self, name: &str) -> io::Result<Option<String>>;
    fn env_var(&self, name: &str) -> Option<String>;
    fn thread_names(&self) -> io::Result<Vec<String>>;
    // 模块类加载器的字符串形式，通常包含其加载路径
    fn class_loader_description(&self) -> io::Result<String>;
    fn process_name(&self) -> io::Result<String>;
    fn path_exists(&self, path: &Path) -> io::Result<bool>;
}

type ClassResolver = Box<dyn Fn(&str) -> bool + Send + Sync>;

// 当前进程的内省实现；类解析需由宿主胶水层注入，未注入时视为不支持
#[derive(Default)]
pub struct ProcessHost {
    class_resolver: Option<ClassResolver>,
}

impl ProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.class_resolver = Some(Box::new(resolver));
        self
    }
}

impl HostIntrospector for ProcessHost {
    fn class_reachable(&self, name: &str) -> io::Result<bool> {
        match &self.class_resolver {
            Some(resolver) => Ok(resolver(name)),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "no class resolver installed",
            )),
        }
    }

    #[cfg(target_os = "android")]
    fn system_property(&self, name: &str) -> io::Result<Option<String>> {
        let prop_name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul in property name"))?;
        let mut prop_value = [0 as c_char; SYSTEM_PROP_VALUE_MAX];
        let len = unsafe { __system_property_get(prop_name.as_ptr(), prop_value.as_mut_ptr()) };
        if len <= 0 {
            return Ok(None);
        }
        if len as usize >= SYSTEM_PROP_VALUE_MAX {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "property too long"));
        }
        let value = unsafe { CStr::from_ptr(prop_value.as_ptr()) };
        Ok(Some(value.to_string_lossy().into_owned()))
    }

    // 非 Android 宿主没有系统属性服务
    #[cfg(not(target_os = "android"))]
    fn system_property(&self, _name: &str) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn thread_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir("/proc/self/task")? {
            let comm = entry?.path().join("comm");
            // 线程可能在遍历期间退出
            if let Ok(name) = fs::read_to_string(comm) {
                names.push(name.trim_end().to_string());
            }
        }
        Ok(names)
    }

    // native 侧用已映射的 apk/dex 路径近似类加载器的 DexPathList 描述
    fn class_loader_description(&self) -> io::Result<String> {
        let content = fs::read_to_string("/proc/self/maps")?;
        let mut paths = BTreeSet::new();
        for line in content.lines() {
            if let Some(path) = mapped_code_path(line) {
                paths.insert(path.to_string());
            }
        }
        let joined: Vec<String> = paths.into_iter().collect();
        Ok(format!("dalvik.system.PathClassLoader[DexPathList[[{}]]]", joined.join(", ")))
    }

    fn process_name(&self) -> io::Result<String> {
        let raw = fs::read(format!("/proc/{}/cmdline", unsafe { libc::getpid() }))?;
        let name = raw.split(|byte| *byte == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(name).into_owned())
    }

    fn path_exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }
}

// 仅保留映射了 apk/dex/jar 的行的路径部分
fn mapped_code_path(line: &str) -> Option<&str> {
    let pathname = line.split_whitespace().nth(5)?;
    if !pathname.starts_with('/') {
        return None;
    }
    let is_code = pathname.ends_with(".apk")
        || pathname.ends_with(".dex")
        || pathname.ends_with(".jar")
        || pathname.ends_with(".odex");
    is_code.then_some(pathname)
}

// 脚本化宿主，用于测试与场景演练
#[derive(Clone, Debug)]
pub enum HostFault {
    // 每个查询都返回错误
    Error,
    // 每个查询都 panic
    Panic,
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedHost {
    pub classes: BTreeSet<String>,
    pub properties: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub threads: Vec<String>,
    pub class_loader: String,
    pub process: String,
    pub paths: BTreeSet<PathBuf>,
    pub fault: Option<HostFault>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, name: &str) -> Self {
        self.classes.insert(name.to_string());
        self
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_thread(mut self, name: &str) -> Self {
        self.threads.push(name.to_string());
        self
    }

    pub fn with_class_loader(mut self, description: &str) -> Self {
        self.class_loader = description.to_string();
        self
    }

    pub fn with_process(mut self, name: &str) -> Self {
        self.process = name.to_string();
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.paths.insert(PathBuf::from(path));
        self
    }

    pub fn with_fault(mut self, fault: HostFault) -> Self {
        self.fault = Some(fault);
        self
    }

    fn check_fault(&self) -> io::Result<()> {
        match self.fault {
            None => Ok(()),
            Some(HostFault::Error) => Err(io::Error::other("scripted host fault")),
            Some(HostFault::Panic) => panic!("scripted host panic"),
        }
    }
}

impl HostIntrospector for ScriptedHost {
    fn class_reachable(&self, name: &str) -> io::Result<bool> {
        self.check_fault()?;
        Ok(self.classes.contains(name))
    }

    fn system_property(&self, name: &str) -> io::Result<Option<String>> {
        self.check_fault()?;
        Ok(self.properties.get(name).cloned())
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.check_fault().ok()?;
        self.env.get(name).cloned()
    }

    fn thread_names(&self) -> io::Result<Vec<String>> {
        self.check_fault()?;
        Ok(self.threads.clone())
    }

    fn class_loader_description(&self) -> io::Result<String> {
        self.check_fault()?;
        Ok(self.class_loader.clone())
    }

    fn process_name(&self) -> io::Result<String> {
        self.check_fault()?;
        Ok(self.process.clone())
    }

    fn path_exists(&self, path: &Path) -> io::Result<bool> {
        self.check_fault()?;
        Ok(self.paths.contains(path))
    }
}
