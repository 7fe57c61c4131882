// 已知功能开关的默认值表，所有后端均不可用时作为只读兜底
use super::PrefValue;

#[derive(Clone, Copy, Debug)]
pub(crate) enum DefaultValue {
    Bool(bool),
    Int(i32),
    Str(&'static str),
}

impl DefaultValue {
    pub(crate) fn to_pref(self) -> PrefValue {
        match self {
            Self::Bool(value) => PrefValue::Bool(value),
            Self::Int(value) => PrefValue::Int(value),
            Self::Str(value) => PrefValue::String(value.to_string()),
        }
    }
}

pub(crate) static DEFAULTS: &[(&str, DefaultValue)] = &[
    // 隐私
    ("hidereceipt", DefaultValue::Bool(false)),
    ("hideread", DefaultValue::Bool(false)),
    ("hidetyping", DefaultValue::Bool(false)),
    ("hiderecording", DefaultValue::Bool(false)),
    ("ghostmode", DefaultValue::Bool(false)),
    ("hideonline", DefaultValue::Bool(false)),
    // 0=关闭 1=仅消息 2=消息与状态
    ("antirevoke", DefaultValue::Int(0)),
    ("antirevokestatus", DefaultValue::Bool(false)),
    ("call_privacy", DefaultValue::Int(0)),
    // 媒体
    ("downloadstatus", DefaultValue::Bool(false)),
    ("downloadviewonce", DefaultValue::Bool(false)),
    ("viewonce", DefaultValue::Bool(false)),
    ("media_quality", DefaultValue::Bool(false)),
    // 外观，颜色为 "0" 表示沿用应用默认
    ("changecolor", DefaultValue::Bool(false)),
    ("primary_color", DefaultValue::Str("0")),
    ("background_color", DefaultValue::Str("0")),
    ("text_color", DefaultValue::Str("0")),
    ("thememode", DefaultValue::Int(0)),
    ("custom_css", DefaultValue::Str("")),
    // 通用
    ("bootloader_spoofer", DefaultValue::Bool(false)),
    ("disable_expiration", DefaultValue::Bool(false)),
    ("separategroups", DefaultValue::Bool(false)),
    ("show_edit_message", DefaultValue::Bool(false)),
    ("update_check", DefaultValue::Bool(true)),
];

pub(crate) fn lookup(key: &str) -> Option<PrefValue> {
    DEFAULTS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.to_pref())
}

#[cfg(test)]
mod tests {
    use super::{DEFAULTS, lookup};
    use std::collections::BTreeSet;

    #[test]
    fn keys_are_unique() {
        let unique: BTreeSet<_> = DEFAULTS.iter().map(|(name, _)| *name).collect();
        assert_eq!(unique.len(), DEFAULTS.len());
    }

    #[test]
    fn unknown_key_has_no_default() {
        assert!(lookup("not_a_flag").is_none());
        assert!(lookup("update_check").is_some());
    }
}
