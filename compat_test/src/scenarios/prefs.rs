use std::fs;
use std::sync::Arc;

use wae_compat::{
    BackingKind, CompatConfig, MemoryStore, NativeStore, ScriptedHost, Variant, clear, clear_memo,
    preferences, set_native_store,
};

use crate::test_ctx::{ensure_ok, forced, reset_with, scratch_dir};

const SHADOW_DOC: &str = r#"<?xml version='1.0' encoding='utf-8' standalone='yes' ?>
<map>
    <boolean name="flag_x" value="false" />
    <int name="antirevoke" value="1" />
</map>
"#;

pub fn scenario_native_round_trip() {
    reset_with(ScriptedHost::new(), forced(Variant::RootlessEmbedded));
    let store: Arc<dyn NativeStore> = Arc::new(MemoryStore::new());
    ensure_ok(set_native_store(store), "set_native_store");

    let prefs = preferences();
    assert_eq!(prefs.backing_kind(), BackingKind::NativeRw);
    assert!(prefs.edit().put_bool("flag_x", true).commit(), "native commit failed");

    // 清除分类后重建适配器，仍指向同一后端
    clear_memo();
    let fresh = preferences();
    assert!(!Arc::ptr_eq(&prefs, &fresh));
    assert!(fresh.get_bool("flag_x", false), "write not visible to fresh adapter");
    clear();
}

pub fn scenario_shadowed_read_only() {
    let shadow = scratch_dir("shadow").join("wae_prefs.xml");
    fs::write(&shadow, SHADOW_DOC).expect("write shadow prefs");
    let config = CompatConfig {
        shadow_prefs_path: Some(shadow),
        ..forced(Variant::RootedClassic)
    };
    reset_with(ScriptedHost::new(), config);

    let prefs = preferences();
    assert_eq!(prefs.backing_kind(), BackingKind::ShadowedRo);
    assert!(!prefs.edit().put_bool("flag_x", true).commit(), "read-only commit succeeded");
    prefs.edit().put_bool("flag_x", true).apply();
    assert!(!prefs.get_bool("flag_x", false), "read-only write leaked");
    assert_eq!(prefs.get_int("antirevoke", 0), 1);
    clear();
}

pub fn scenario_defaults_fallback_chain() {
    let config = CompatConfig {
        shadow_prefs_path: Some(scratch_dir("missing").join("absent.xml")),
        ..forced(Variant::RootlessManaged)
    };
    reset_with(ScriptedHost::new(), config);
    ensure_ok(set_native_store(Arc::new(MemoryStore::unreachable())), "set_native_store");

    let prefs = preferences();
    assert_eq!(prefs.backing_kind(), BackingKind::InMemoryDefaults);
    assert_eq!(prefs.attempts().len(), 4);
    assert!(prefs.get_bool("update_check", false));
    assert_eq!(prefs.get_string("no_such_key", "fallback"), "fallback");
    clear();
}
