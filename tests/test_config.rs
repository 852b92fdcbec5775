use std::collections::HashMap;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use prefork::config::{Config, ConfigError};
use tracing::Level;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_config_defaults() {
    let cfg = Config::from_lookup(lookup(&[])).unwrap();

    assert_eq!(cfg.listen_addr().to_string(), "127.0.0.1:8080");
    assert_eq!(cfg.server.workers, 3);
    assert_eq!(cfg.server.max_clients, 16);
    assert_eq!(cfg.http.document_root, PathBuf::from("./public"));
    assert_eq!(cfg.http.index, "index.html");
    assert_eq!(cfg.http.default_mime, "html");
    assert_eq!(cfg.max_level(), Level::INFO);
}

#[test]
fn test_config_env_overrides() {
    let cfg = Config::from_lookup(lookup(&[
        ("ADDRESS", "0.0.0.0"),
        ("PORT", "3000"),
        ("WORKERS", "5"),
        ("VERBOSE", "1"),
        ("MAX_CLIENTS", "64"),
        ("DOC_ROOT", "/srv/www"),
    ]))
    .unwrap();

    assert_eq!(cfg.server.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(cfg.server.port, 3000);
    assert_eq!(cfg.server.workers, 5);
    assert_eq!(cfg.server.max_clients, 64);
    assert_eq!(cfg.http.document_root, PathBuf::from("/srv/www"));
    assert_eq!(cfg.max_level(), Level::DEBUG);
}

#[test]
fn test_config_verbosity_levels() {
    let cfg = Config::from_lookup(lookup(&[("VERBOSE", "4")])).unwrap();
    assert_eq!(cfg.max_level(), Level::TRACE);
}

#[test]
fn test_config_rejects_bad_port() {
    let err = Config::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
}

#[test]
fn test_config_rejects_bad_address() {
    let err = Config::from_lookup(lookup(&[("ADDRESS", "localhost")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "ADDRESS", .. }));
}

#[test]
fn test_config_worker_bounds() {
    assert!(matches!(
        Config::from_lookup(lookup(&[("WORKERS", "0")])),
        Err(ConfigError::Workers(0))
    ));
    assert!(matches!(
        Config::from_lookup(lookup(&[("WORKERS", "11")])),
        Err(ConfigError::Workers(11))
    ));
    assert!(Config::from_lookup(lookup(&[("WORKERS", "10")])).is_ok());
}

#[test]
fn test_config_zero_clients_rejected() {
    assert!(matches!(
        Config::from_lookup(lookup(&[("MAX_CLIENTS", "0")])),
        Err(ConfigError::MaxClients)
    ));
}

#[test]
fn test_config_yaml_partial() {
    let cfg = Config::from_yaml_str(
        "server:\n  port: 9000\n  workers: 2\nhttp:\n  server_name: test\nverbose: 2\n",
    )
    .unwrap();

    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.workers, 2);
    assert_eq!(cfg.server.max_clients, 16);
    assert_eq!(cfg.http.server_name, "test");
    assert_eq!(cfg.http.index, "index.html");
    assert_eq!(cfg.verbose, 2);
}

#[test]
fn test_config_yaml_invalid_workers() {
    let err = Config::from_yaml_str("server:\n  workers: 20\n").unwrap_err();
    assert!(matches!(err, ConfigError::Workers(20)));
}

#[test]
fn test_config_file_then_env() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "server:\n  port: 9000\n  workers: 2").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let vars = [("PREFORK_CONFIG", path.as_str()), ("PORT", "9100")];
    let cfg = Config::from_lookup(lookup(&vars)).unwrap();

    assert_eq!(cfg.server.port, 9100);
    assert_eq!(cfg.server.workers, 2);
}

#[test]
fn test_config_missing_file() {
    let err = Config::from_lookup(lookup(&[("PREFORK_CONFIG", "/nonexistent/prefork.yaml")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::default();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1, cfg2);
}
