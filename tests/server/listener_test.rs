//! Tests for the listener in `src/server/mod.rs`.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether::acl::AclStore;
use tether::server::tls::build_server_config;
use tether::server::{HandlerSettings, Server, ACCEPT_BACKOFF};

use crate::pki::TestCa;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn empty_acl_is_reported_once() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let ca = TestCa::new("Tether Test CA");
    let server_cert = ca.server("localhost");
    let (ca_path, cert_path, key_path) = ca.write_server_files(tmp.path(), &server_cert);
    let tls = build_server_config(&cert_path, Some(&key_path), &ca_path)
        .expect("server TLS config should build");

    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let acl = AclStore::load(Some(&tmp.path().join("missing-acl.toml")))
        .expect("missing ACL should load empty");
    let _server = Server::bind(
        "127.0.0.1:0".parse().expect("addr should parse"),
        tls,
        acl,
        HandlerSettings::default(),
    )
    .await
    .expect("server should bind");

    let logs = captured.text();
    assert!(logs.contains("ACL file not found"), "got: {logs}");
    assert_eq!(logs.matches("will be refused").count(), 1, "got: {logs}");
}

#[test]
fn accept_failures_back_off() {
    assert!(ACCEPT_BACKOFF >= Duration::from_millis(10));
    assert!(ACCEPT_BACKOFF <= Duration::from_secs(1));
}
