use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

// 取值与 android/log.h 的优先级一致，可直接传给 logcat
#[repr(i32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum Level {
    Debug = 3,
    Info = 4,
    Warn = 5,
    Error = 6,
}

impl Level {
    #[cfg_attr(target_os = "android", allow(dead_code))]
    const fn letter(self) -> char {
        match self {
            Self::Debug => 'D',
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
        }
    }
}

const LOG_TAG: &str = "wae_compat";

// 默认只输出 WARN 及以上，调试开关打开后输出全部
static THRESHOLD: AtomicI32 = AtomicI32::new(Level::Warn as i32);

#[cfg(target_os = "android")]
#[link(name = "log")]
unsafe extern "C" {
    fn __android_log_write(prio: i32, tag: *const libc::c_char, text: *const libc::c_char) -> i32;
}

pub fn set_debug_enabled(enabled: bool) {
    let level = if enabled { Level::Debug } else { Level::Warn };
    THRESHOLD.store(level as i32, Ordering::SeqCst);
}

fn accepts(level: Level) -> bool {
    THRESHOLD.load(Ordering::Relaxed) <= level as i32
}

// 内嵌 NUL 会截断 C 字符串，替换为空格后再补结尾 NUL
fn c_line(args: fmt::Arguments) -> Vec<u8> {
    let mut text = fmt::format(args).into_bytes();
    for byte in text.iter_mut().filter(|byte| **byte == 0) {
        *byte = b' ';
    }
    text.push(0);
    text
}

#[cfg(target_os = "android")]
fn emit(level: Level, args: fmt::Arguments) {
    let tag = c_line(format_args!("{LOG_TAG}"));
    let text = c_line(args);
    unsafe {
        __android_log_write(
            level as i32,
            tag.as_ptr() as *const libc::c_char,
            text.as_ptr() as *const libc::c_char,
        );
    }
}

// 开发机与测试进程没有 logcat
#[cfg(not(target_os = "android"))]
fn emit(level: Level, args: fmt::Arguments) {
    eprintln!("{}/{}: {}", level.letter(), LOG_TAG, args);
}

fn write(level: Level, args: fmt::Arguments) {
    if accepts(level) {
        emit(level, args);
    }
}

pub(crate) fn debug(args: fmt::Arguments) {
    write(Level::Debug, args);
}

pub(crate) fn info(args: fmt::Arguments) {
    write(Level::Info, args);
}

pub(crate) fn warn(args: fmt::Arguments) {
    write(Level::Warn, args);
}

pub(crate) fn error(args: fmt::Arguments) {
    write(Level::Error, args);
}

#[cfg(test)]
mod tests {
    use super::{Level, c_line};

    #[test]
    fn c_line_replaces_interior_nul() {
        let line = c_line(format_args!("a{}b", '\0'));
        assert_eq!(line, b"a b\0");
    }

    #[test]
    fn levels_follow_logcat_order() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warn < Level::Error);
        assert_eq!(Level::Error as i32, 6);
        assert_eq!(Level::Info.letter(), 'I');
    }
}
