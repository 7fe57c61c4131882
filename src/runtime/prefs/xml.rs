// shared_prefs XML 文档的解析与序列化
// <map> 下为 <boolean|int|long|float name value/>、<string name>文本</string>、<set name><string/>..</set>
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use super::{BackingError, PrefValue};
use crate::errno::Errno;

#[derive(Debug, Default)]
pub(crate) struct ParsedPrefs {
    pub(crate) values: BTreeMap<String, PrefValue>,
    // 因缺少 name 或值无法解析而跳过的条目数
    pub(crate) skipped: usize,
}

enum Frame {
    Map,
    String { name: Option<String>, text: String },
    Set { name: Option<String>, items: BTreeSet<String> },
    SetItem { text: String },
    // <map> 下带结束标签的标量条目，值仍取自 value 属性
    Scalar { tag: String, name: Option<String>, value: Option<String> },
    // 未知元素，内部内容全部忽略
    Unknown,
}

pub(crate) fn parse_prefs(text: &str) -> Result<ParsedPrefs, BackingError> {
    let mut reader = Reader::from_str(text);
    let mut parsed = ParsedPrefs::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut saw_map = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| BackingError::new(Errno::Format, format!("xml: {err}")))?;
        match event {
            Event::Start(start) => {
                let frame = open_element(&start, &stack, &mut saw_map)?;
                stack.push(frame);
            }
            Event::Empty(start) => {
                let tag = tag_name(&start);
                match stack.last_mut() {
                    None if tag == "map" => saw_map = true,
                    Some(Frame::Map) => scalar_entry(
                        &tag,
                        attribute(&start, "name"),
                        attribute(&start, "value"),
                        &mut parsed,
                    ),
                    Some(Frame::Set { items, .. }) if tag == "string" => {
                        items.insert(String::new());
                    }
                    Some(_) => {}
                    None => return Err(not_a_map()),
                }
            }
            Event::Text(content) => {
                let piece = content
                    .unescape()
                    .map_err(|err| BackingError::new(Errno::Format, format!("xml text: {err}")))?;
                match stack.last_mut() {
                    Some(Frame::String { text, .. }) | Some(Frame::SetItem { text }) => {
                        text.push_str(&piece)
                    }
                    _ => {}
                }
            }
            Event::CData(content) => {
                let piece = String::from_utf8_lossy(&content).into_owned();
                if let Some(Frame::String { text, .. }) | Some(Frame::SetItem { text }) =
                    stack.last_mut()
                {
                    text.push_str(&piece);
                }
            }
            Event::End(_) => {
                let Some(frame) = stack.pop() else {
                    return Err(not_a_map());
                };
                close_element(frame, &mut stack, &mut parsed);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_map {
        return Err(not_a_map());
    }
    Ok(parsed)
}

fn open_element(
    start: &BytesStart<'_>,
    stack: &[Frame],
    saw_map: &mut bool,
) -> Result<Frame, BackingError> {
    let tag = tag_name(start);
    let frame = match (stack.last(), tag.as_str()) {
        (None, "map") => {
            *saw_map = true;
            Frame::Map
        }
        (None, _) => return Err(not_a_map()),
        (Some(Frame::Map), "string") => Frame::String {
            name: attribute(start, "name"),
            text: String::new(),
        },
        (Some(Frame::Map), "set") => Frame::Set {
            name: attribute(start, "name"),
            items: BTreeSet::new(),
        },
        (Some(Frame::Set { .. }), "string") => Frame::SetItem {
            text: String::new(),
        },
        (Some(Frame::Map), _) => Frame::Scalar {
            name: attribute(start, "name"),
            value: attribute(start, "value"),
            tag: tag.clone(),
        },
        _ => Frame::Unknown,
    };
    Ok(frame)
}

fn close_element(frame: Frame, stack: &mut [Frame], parsed: &mut ParsedPrefs) {
    match frame {
        Frame::String { name: Some(name), text } => {
            parsed.values.insert(name, PrefValue::String(text));
        }
        Frame::Set {
            name: Some(name),
            items,
        } => {
            parsed.values.insert(name, PrefValue::StringSet(items));
        }
        Frame::String { name: None, .. } | Frame::Set { name: None, .. } => parsed.skipped += 1,
        Frame::SetItem { text } => {
            if let Some(Frame::Set { items, .. }) = stack.last_mut() {
                items.insert(text);
            }
        }
        Frame::Scalar { tag, name, value } => scalar_entry(&tag, name, value, parsed),
        Frame::Map | Frame::Unknown => {}
    }
}

fn scalar_entry(tag: &str, name: Option<String>, raw: Option<String>, parsed: &mut ParsedPrefs) {
    let Some(name) = name else {
        parsed.skipped += 1;
        return;
    };
    let value = match tag {
        "boolean" => raw.and_then(|value| value.parse::<bool>().ok()).map(PrefValue::Bool),
        "int" => raw.and_then(|value| value.parse::<i32>().ok()).map(PrefValue::Int),
        "long" => raw.and_then(|value| value.parse::<i64>().ok()).map(PrefValue::Long),
        "float" => raw.and_then(|value| value.parse::<f32>().ok()).map(PrefValue::Float),
        "string" => Some(PrefValue::String(String::new())),
        "set" => Some(PrefValue::StringSet(BTreeSet::new())),
        // <null name=".."/> 表示显式空值，按缺失处理
        "null" => return,
        _ => None,
    };
    match value {
        Some(value) => {
            parsed.values.insert(name, value);
        }
        None => parsed.skipped += 1,
    }
}

fn tag_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn attribute(start: &BytesStart<'_>, key: &str) -> Option<String> {
    start
        .attributes()
        .filter_map(Result::ok)
        .find(|attr| attr.key.as_ref() == key.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

fn not_a_map() -> BackingError {
    BackingError::new(Errno::Format, "document root is not <map>")
}

pub(crate) fn serialize_prefs(values: &BTreeMap<String, PrefValue>) -> String {
    let mut out = String::from("<?xml version='1.0' encoding='utf-8' standalone='yes' ?>\n<map>\n");
    for (key, value) in values {
        let name = escape(key.as_str());
        let _ = match value {
            PrefValue::Bool(v) => writeln!(out, "    <boolean name=\"{name}\" value=\"{v}\" />"),
            PrefValue::Int(v) => writeln!(out, "    <int name=\"{name}\" value=\"{v}\" />"),
            PrefValue::Long(v) => writeln!(out, "    <long name=\"{name}\" value=\"{v}\" />"),
            PrefValue::Float(v) => writeln!(out, "    <float name=\"{name}\" value=\"{v}\" />"),
            PrefValue::String(v) => {
                writeln!(out, "    <string name=\"{name}\">{}</string>", escape(v.as_str()))
            }
            PrefValue::StringSet(items) => {
                let _ = writeln!(out, "    <set name=\"{name}\">");
                for item in items {
                    let _ = writeln!(out, "        <string>{}</string>", escape(item.as_str()));
                }
                writeln!(out, "    </set>")
            }
        };
    }
    out.push_str("</map>\n");
    out
}
