// runtime 模块入口，将内部子模块的功能统一暴露为 crate 级接口
pub mod bridge;
pub mod capability;
pub mod gate;
pub mod hook;
pub mod host;
pub mod loader;
pub mod prefs;
pub mod probe;
pub mod status;

mod callback_ctx;
mod lifecycle;
mod record;
mod state;

pub use record::{
    RECORD_ITEM_ALL, RECORD_ITEM_DETAIL, RECORD_ITEM_ERRNO, RECORD_ITEM_OP, RECORD_ITEM_SUBJECT,
    RECORD_ITEM_TIMESTAMP,
};
pub use state::{Caveat, Diagnostics, FailureReport};

pub(crate) use lifecycle::{
    capabilities, classify, clear, clear_memo, config, connect_bridge, current_status, diagnostics,
    disconnect_bridge, evaluate, force_refresh_status, get_debug, get_version, hook_adapter, init,
    install_hook, is_bridge_connected, is_initialized, load_features, preferences,
    query_loaded_modules, register_operation, set_bridge_transport, set_debug, set_host,
    set_interception_primitive, set_module_identity, set_native_store,
};

pub(crate) fn in_interceptor_callback() -> bool {
    callback_ctx::is_in_interceptor_callback()
}

pub(crate) fn get_recordable() -> bool {
    record::get_recordable()
}

pub(crate) fn set_recordable(recordable: bool) {
    record::set_recordable(recordable)
}

pub(crate) fn get_records(item_flags: u32) -> Option<String> {
    record::get_records(item_flags)
}

pub(crate) fn clear_records() {
    record::clear_records()
}

pub(crate) fn dump_records<W: std::io::Write>(
    writer: &mut W,
    item_flags: u32,
) -> crate::errno::Errno {
    record::dump_records(writer, item_flags)
}
