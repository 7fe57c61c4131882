// 进程内方法表：以签名为键登记可被拦截的方法，调用时按登记顺序执行拦截器
use crate::errno::Errno;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{
    HookError, HookId, HookValue, InterceptionPrimitive, Interceptor, MethodCall, TargetDescriptor,
};
use crate::runtime::state::RwLockPoisonRecover;

type Original = Arc<dyn Fn(&[HookValue]) -> Result<HookValue, HookError> + Send + Sync>;

struct MethodEntry {
    target: TargetDescriptor,
    original: Original,
    hooks: Vec<(HookId, Arc<dyn Interceptor>)>,
}

pub struct MethodTable {
    methods: RwLock<BTreeMap<String, MethodEntry>>,
    next_id: AtomicU64,
    operational: AtomicBool,
}

impl Default for MethodTable {
    fn default() -> Self {
        Self {
            methods: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            operational: AtomicBool::new(true),
        }
    }
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    // 重复定义只替换原方法，已登记的拦截器保留
    pub fn define<F>(&self, target: &TargetDescriptor, original: F)
    where
        F: Fn(&[HookValue]) -> Result<HookValue, HookError> + Send + Sync + 'static,
    {
        let original: Original = Arc::new(original);
        self.methods
            .write_or_poison()
            .entry(target.key())
            .and_modify(|entry| entry.original = original.clone())
            .or_insert_with(|| MethodEntry {
                target: target.clone(),
                original: original.clone(),
                hooks: Vec::new(),
            });
    }

    pub fn is_defined(&self, target: &TargetDescriptor) -> bool {
        self.methods.read_or_poison().contains_key(&target.key())
    }

    pub fn hook_count(&self, target: &TargetDescriptor) -> usize {
        self.methods
            .read_or_poison()
            .get(&target.key())
            .map_or(0, |entry| entry.hooks.len())
    }

    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Release);
    }

    // before 按登记顺序执行，任一 before 设置结果即跳过原方法与后续 before；
    // after 对已执行 before 的拦截器逆序执行
    pub fn invoke(
        &self,
        target: &TargetDescriptor,
        args: Vec<HookValue>,
    ) -> Result<HookValue, HookError> {
        let (descriptor, original, hooks) = {
            let methods = self.methods.read_or_poison();
            let entry = methods.get(&target.key()).ok_or_else(|| {
                HookError::new(Errno::NotFound, format!("method {} not defined", target))
            })?;
            let hooks: Vec<Arc<dyn Interceptor>> =
                entry.hooks.iter().map(|(_, hook)| hook.clone()).collect();
            (entry.target.clone(), entry.original.clone(), hooks)
        };

        let mut call = MethodCall::new(descriptor, args);
        let mut entered = 0;
        for hook in &hooks {
            hook.before(&mut call)?;
            entered += 1;
            if call.has_result() {
                break;
            }
        }
        if !call.has_result() {
            let result = (*original)(call.args.as_slice());
            match result {
                Ok(value) => call.set_result(value),
                Err(error) => call.set_error(error),
            }
        }
        for hook in hooks[..entered].iter().rev() {
            hook.after(&mut call)?;
        }
        call.take_result().unwrap_or(Ok(HookValue::Null))
    }
}

impl InterceptionPrimitive for MethodTable {
    fn register(
        &self,
        target: &TargetDescriptor,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<HookId, HookError> {
        if !self.is_operational() {
            return Err(HookError::new(
                Errno::HookInstallFailure,
                "interception primitive is not operational",
            ));
        }
        let mut methods = self.methods.write_or_poison();
        let entry = methods.get_mut(&target.key()).ok_or_else(|| {
            HookError::new(Errno::HookInstallFailure, format!("method {} not found", target))
        })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.hooks.push((id, interceptor));
        Ok(id)
    }

    fn unregister(&self, id: HookId) -> bool {
        let mut methods = self.methods.write_or_poison();
        for entry in methods.values_mut() {
            if let Some(index) = entry.hooks.iter().position(|(hook_id, _)| *hook_id == id) {
                entry.hooks.remove(index);
                return true;
            }
        }
        false
    }

    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }
}
