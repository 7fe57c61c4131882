use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;

use wae_compat::{
    BridgeConnection, BridgeContext, BridgeError, BridgeTransport, CompatConfig, MethodTable,
    StatusValue, Variant, classify, clear, connect_bridge, current_status, disconnect_bridge,
    force_refresh_status, query_loaded_modules, set_bridge_transport, set_interception_primitive,
    set_module_identity,
};

use crate::test_ctx::{CORE_CLASS, SELF_PACKAGE, embedded_host, ensure_ok, reset_with, scratch_dir};

struct UnboundService;

impl BridgeTransport for UnboundService {
    fn open(&self, _ctx: &BridgeContext) -> Result<Box<dyn BridgeConnection>, BridgeError> {
        Err(BridgeError::unreachable("service not bound"))
    }
}

pub fn scenario_bridge_down_still_active() {
    reset_with(embedded_host(), CompatConfig::default());
    assert_eq!(classify().variant(), Variant::RootlessEmbedded);
    ensure_ok(set_bridge_transport(Arc::new(UnboundService)), "set_bridge_transport");
    ensure_ok(set_interception_primitive(Arc::new(MethodTable::new())), "set_primitive");
    ensure_ok(set_module_identity(SELF_PACKAGE, &[CORE_CLASS]), "set_module_identity");

    assert!(!connect_bridge(), "unbound service must not connect");
    assert_eq!(current_status(), StatusValue::Active, "heuristic liveness ignored");
    assert!(query_loaded_modules().is_none());
    clear();
}

pub fn scenario_bridge_socket_listing() {
    let socket = scratch_dir("bridge").join("bridge.sock");
    let listener = UnixListener::bind(&socket).expect("bind bridge socket");
    let server = thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut writer = stream.try_clone().expect("clone bridge stream");
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else {
                return;
            };
            let reply = match line.as_str() {
                "PING" => "PONG\n".to_string(),
                "LIST_MODULES" => format!("{SELF_PACKAGE}\t/data/app/wpp/base.apk\nEND\n"),
                _ => "ERR\n".to_string(),
            };
            if writer.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    });

    let config = CompatConfig {
        bridge_socket: Some(socket),
        ..CompatConfig::default()
    };
    reset_with(embedded_host(), config);
    ensure_ok(set_module_identity(SELF_PACKAGE, &[]), "set_module_identity");

    let modules = query_loaded_modules().expect("module list over socket");
    assert!(modules.iter().any(|module| module.package_name == SELF_PACKAGE));
    assert_eq!(force_refresh_status(), StatusValue::Active);

    disconnect_bridge();
    server.join().expect("join bridge server");
    clear();
}
