// 兼容层决策审计记录的写入、格式化与导出
use crate::errno::Errno;
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::state::MutexPoisonRecover;

// 记录字段掩码
pub const RECORD_ITEM_ALL: u32 = 0x1F;
pub const RECORD_ITEM_TIMESTAMP: u32 = 1 << 0;
pub const RECORD_ITEM_OP: u32 = 1 << 1;
pub const RECORD_ITEM_SUBJECT: u32 = 1 << 2;
pub const RECORD_ITEM_DETAIL: u32 = 1 << 3;
pub const RECORD_ITEM_ERRNO: u32 = 1 << 4;

// 环形缓冲区上限，超出后淘汰最早的记录
const MAX_RECORDS: usize = 4096;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum RecordOp {
    Probe,
    Backing,
    Gate,
    Hook,
    Bridge,
    Status,
}

#[derive(Clone, Debug)]
pub(crate) struct RecordEntry {
    pub(crate) op: RecordOp,
    pub(crate) ts_ms: u64,
    pub(crate) status_code: i32,
    pub(crate) subject: String,
    pub(crate) detail: String,
}

#[derive(Default)]
pub(crate) struct RecordRing {
    recordable: bool,
    entries: Vec<RecordEntry>,
}

static RECORDS: Lazy<Mutex<RecordRing>> = Lazy::new(|| Mutex::new(RecordRing::default()));

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

impl RecordRing {
    // recordable 关闭时静默丢弃，满时淘汰队首
    fn push(&mut self, entry: RecordEntry) {
        if !self.recordable {
            return;
        }
        if self.entries.len() >= MAX_RECORDS {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    fn render(&self, item_flags: u32) -> Option<String> {
        if !self.recordable || self.entries.is_empty() {
            return None;
        }
        let mut output = String::new();
        for entry in &self.entries {
            output.push_str(&format_entry(entry, item_flags));
        }
        Some(output)
    }
}

pub(crate) fn add_record(op: RecordOp, status: Errno, subject: &str, detail: &str) {
    RECORDS.lock_or_poison().push(RecordEntry {
        op,
        ts_ms: now_ms(),
        status_code: status.as_i32(),
        subject: subject.to_string(),
        detail: detail.to_string(),
    });
}

pub(crate) fn set_recordable(recordable: bool) {
    RECORDS.lock_or_poison().recordable = recordable;
}

pub(crate) fn get_recordable() -> bool {
    RECORDS.lock_or_poison().recordable
}

pub(crate) fn clear_records() {
    RECORDS.lock_or_poison().entries.clear();
}

pub(crate) fn get_records(item_flags: u32) -> Option<String> {
    RECORDS.lock_or_poison().render(item_flags)
}

// 整体写出，短写由 write_all 处理
pub(crate) fn dump_records<W: std::io::Write>(writer: &mut W, item_flags: u32) -> Errno {
    let Some(text) = get_records(item_flags) else {
        return Errno::NotFound;
    };
    match writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
        Ok(()) => Errno::Ok,
        Err(_) => Errno::Io,
    }
}

fn op_name(op: RecordOp) -> &'static str {
    match op {
        RecordOp::Probe => "PROBE",
        RecordOp::Backing => "BACKING",
        RecordOp::Gate => "GATE",
        RecordOp::Hook => "HOOK",
        RecordOp::Bridge => "BRIDGE",
        RecordOp::Status => "STATUS",
    }
}

// 含逗号、引号或换行的字段按 RFC 4180 加引号，内部引号加倍
fn csv_field(value: &str) -> Cow<'_, str> {
    if !value.contains([',', '"', '\n', '\r']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
}

// 按 item_flags 位掩码选择性输出字段，CSV 格式
fn format_entry(entry: &RecordEntry, item_flags: u32) -> String {
    let mut line = String::new();
    if item_flags & RECORD_ITEM_TIMESTAMP != 0 {
        let _ = write!(line, "{},", entry.ts_ms);
    }
    if item_flags & RECORD_ITEM_OP != 0 {
        let _ = write!(line, "{},", op_name(entry.op));
    }
    if item_flags & RECORD_ITEM_SUBJECT != 0 {
        let _ = write!(line, "{},", csv_field(&entry.subject));
    }
    if item_flags & RECORD_ITEM_DETAIL != 0 {
        let _ = write!(line, "{},", csv_field(&entry.detail));
    }
    if item_flags & RECORD_ITEM_ERRNO != 0 {
        let _ = write!(line, "{},", entry.status_code);
    }
    line.push('\n');
    line
}
