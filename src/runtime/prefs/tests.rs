use super::*;
use crate::runtime::probe::Variant;
use std::sync::atomic::{AtomicUsize, Ordering};

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(0);

fn scratch_path(name: &str) -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "wae_compat_prefs_{}_{}",
        std::process::id(),
        seq
    ));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir.join(name)
}

fn classification(variant: Variant) -> EnvironmentClassification {
    EnvironmentClassification::fixed(variant)
}

const SHADOW_DOC: &str = r#"<?xml version='1.0' encoding='utf-8' standalone='yes' ?>
<map>
    <boolean name="flag_x" value="false" />
    <int name="antirevoke" value="2" />
    <string name="primary_color">#FF00A884</string>
</map>
"#;

#[test]
fn native_backing_round_trips_through_fresh_adapter() {
    let store: Arc<dyn NativeStore> = Arc::new(MemoryStore::new());
    let sources = PreferenceSources {
        native: Some(store.clone()),
        ..PreferenceSources::default()
    };
    let env = classification(Variant::RootlessEmbedded);
    let adapter = PreferenceAdapter::open(&env, sources.clone());
    assert_eq!(adapter.backing_kind(), BackingKind::NativeRw);
    assert!(adapter.edit().put_bool("flag_x", true).commit());

    let fresh = PreferenceAdapter::open(&env, sources);
    assert!(fresh.get_bool("flag_x", false));
}

#[test]
fn rooted_environment_skips_native_store() {
    let shadow = scratch_path("module_prefs.xml");
    fs::write(&shadow, SHADOW_DOC).expect("write shadow");
    let sources = PreferenceSources {
        native: Some(Arc::new(MemoryStore::new())),
        shadow_path: Some(shadow),
        file_path: None,
    };
    let adapter = PreferenceAdapter::open(&classification(Variant::RootedClassic), sources);
    assert_eq!(adapter.backing_kind(), BackingKind::ShadowedRo);
    assert_eq!(
        adapter.attempts()[0].error.as_ref().map(|err| err.code),
        Some(Errno::CapabilityDenied)
    );
}

#[test]
fn shadowed_backing_rejects_writes() {
    let shadow = scratch_path("module_prefs.xml");
    fs::write(&shadow, SHADOW_DOC).expect("write shadow");
    let adapter = PreferenceAdapter::open(
        &classification(Variant::RootedClassic),
        PreferenceSources {
            shadow_path: Some(shadow),
            ..PreferenceSources::default()
        },
    );
    assert_eq!(adapter.backing_kind(), BackingKind::ShadowedRo);
    assert!(!adapter.edit().put_bool("flag_x", true).commit());
    adapter.edit().put_bool("flag_x", true).apply();
    assert!(!adapter.get_bool("flag_x", false));
    assert_eq!(adapter.get_int("antirevoke", 0), 2);
    assert_eq!(adapter.get_string("primary_color", "0"), "#FF00A884");
}

#[test]
fn shadowed_reload_picks_up_external_changes() {
    let shadow = scratch_path("module_prefs.xml");
    fs::write(&shadow, SHADOW_DOC).expect("write shadow");
    let adapter = PreferenceAdapter::open(
        &classification(Variant::RootedClassic),
        PreferenceSources {
            shadow_path: Some(shadow.clone()),
            ..PreferenceSources::default()
        },
    );
    fs::write(&shadow, "<map><boolean name=\"flag_x\" value=\"true\" /></map>")
        .expect("rewrite shadow");
    assert!(!adapter.get_bool("flag_x", false));
    assert!(adapter.reload());
    assert!(adapter.get_bool("flag_x", false));

    fs::write(&shadow, "garbage").expect("corrupt shadow");
    assert!(!adapter.reload());
    assert!(adapter.get_bool("flag_x", false));
}

#[test]
fn failing_native_falls_through_whole_chain() {
    let sources = PreferenceSources {
        native: Some(Arc::new(MemoryStore::unreachable())),
        shadow_path: Some(scratch_path("missing_shadow.xml")),
        file_path: None,
    };
    let adapter = PreferenceAdapter::open(&classification(Variant::RootlessManaged), sources);
    let kinds: Vec<BackingKind> = adapter.attempts().iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            BackingKind::NativeRw,
            BackingKind::ShadowedRo,
            BackingKind::FileRo,
            BackingKind::InMemoryDefaults
        ]
    );
    assert_eq!(adapter.backing_kind(), BackingKind::InMemoryDefaults);
    assert!(adapter.get_bool("update_check", false));
    assert_eq!(adapter.get_int("antirevoke", 7), 0);
    assert_eq!(adapter.get_string("no_such_key", "fallback"), "fallback");
    assert_eq!(adapter.get_long("hidereceipt", 9), 9);
    assert!(!adapter.edit().put_bool("hidereceipt", true).commit());
}

#[test]
fn flat_file_missing_or_corrupt_yields_empty_table() {
    for content in [None, Some("not xml at all <")] {
        let path = scratch_path("flat.xml");
        if let Some(text) = content {
            fs::write(&path, text).expect("write flat file");
        }
        let adapter = PreferenceAdapter::open(
            &classification(Variant::RootedClassic),
            PreferenceSources {
                file_path: Some(path),
                ..PreferenceSources::default()
            },
        );
        assert_eq!(adapter.backing_kind(), BackingKind::FileRo);
        assert!(adapter.all().is_empty());
        assert!(!adapter.get_bool("update_check", false));
    }
}

#[test]
fn flat_file_reads_and_type_mismatch_returns_default() {
    let path = scratch_path("flat.xml");
    fs::write(
        &path,
        "<map><int name=\"n\" value=\"5\" /><float name=\"r\" value=\"0.5\" /></map>",
    )
    .expect("write flat file");
    let adapter = PreferenceAdapter::open(
        &classification(Variant::RootlessManaged),
        PreferenceSources {
            file_path: Some(path),
            ..PreferenceSources::default()
        },
    );
    assert_eq!(adapter.get_int("n", 0), 5);
    assert_eq!(adapter.get_float("r", 0.0), 0.5);
    assert!(!adapter.get_bool("n", false));
    assert_eq!(adapter.get_string("n", "d"), "d");
}

#[test]
fn xml_file_store_persists_across_instances() {
    let path = scratch_path("shared_prefs/com.whatsapp_preferences.xml");
    let env = classification(Variant::RootlessEmbedded);
    let first = PreferenceAdapter::open(
        &env,
        PreferenceSources {
            native: Some(Arc::new(XmlFileStore::new(&path))),
            ..PreferenceSources::default()
        },
    );
    assert_eq!(first.backing_kind(), BackingKind::NativeRw);
    let hidden: BTreeSet<String> = ["1@s.whatsapp.net".to_string()].into_iter().collect();
    assert!(first
        .edit()
        .put_string("primary_color", "#123456")
        .put_long("last_check", 42)
        .put_string_set("hidden_chats", hidden.clone())
        .commit());

    let second = PreferenceAdapter::open(
        &env,
        PreferenceSources {
            native: Some(Arc::new(XmlFileStore::new(&path))),
            ..PreferenceSources::default()
        },
    );
    assert_eq!(second.get_string("primary_color", ""), "#123456");
    assert_eq!(second.get_long("last_check", 0), 42);
    assert_eq!(second.get_string_set("hidden_chats", BTreeSet::new()), hidden);

    assert!(second.edit().remove("last_check").commit());
    assert!(!second.contains("last_check"));
    assert!(second.edit().clear().put_bool("only", true).commit());
    assert_eq!(second.all().len(), 1);
}
