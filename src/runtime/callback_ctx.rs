// 拦截回调作用域：线程局部栈保存正在执行回调的目标，栈非空即处于回调中
use std::cell::RefCell;

thread_local! {
    static ACTIVE_TARGETS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn is_in_interceptor_callback() -> bool {
    ACTIVE_TARGETS.with(|stack| !stack.borrow().is_empty())
}

// 最内层回调所属的目标
pub(crate) fn active_target() -> Option<String> {
    ACTIVE_TARGETS.with(|stack| stack.borrow().last().cloned())
}

struct Scope;

impl Drop for Scope {
    fn drop(&mut self) {
        ACTIVE_TARGETS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// panic 展开时 Scope 的 drop 负责出栈
pub(crate) fn run_in_interceptor_callback<R, F>(target: &str, f: F) -> R
where
    F: FnOnce() -> R,
{
    ACTIVE_TARGETS.with(|stack| stack.borrow_mut().push(target.to_string()));
    let _scope = Scope;
    f()
}
