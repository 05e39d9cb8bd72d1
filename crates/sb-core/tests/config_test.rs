use sb_core::config::Config;
use std::collections::HashMap;

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.general.log_format, "pretty");
    assert_eq!(cfg.gateway.port, 8080);
    assert_eq!(cfg.gateway.host, "127.0.0.1");
    assert_eq!(cfg.sessions.max_sessions, 10);
    assert_eq!(cfg.sessions.idle_timeout_secs, 1800);
    assert_eq!(cfg.sessions.output_log_capacity, 1000);
    assert!(cfg.sessions.scan_handoffs);
    assert_eq!(cfg.agents.claude_binary, "claude");
    assert_eq!(cfg.agents.gordon_args, vec!["ai".to_string()]);
    cfg.validate().expect("defaults validate");
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("max_sessions"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.gateway.port, cfg.gateway.port);
    assert_eq!(parsed.sessions.max_sessions, cfg.sessions.max_sessions);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[gateway]
port = 9191

[sessions]
max_sessions = 3

[projects]
web = "/srv/web"
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.gateway.port, 9191);
    assert_eq!(cfg.sessions.max_sessions, 3);
    // defaults should fill in the rest
    assert_eq!(cfg.sessions.idle_timeout_secs, 1800);
    assert_eq!(cfg.projects.get("web").map(String::as_str), Some("/srv/web"));
    assert!(!cfg.projects.contains_key("missing"));
    cfg.validate().expect("config validates");
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sessions]\nmax_sessions = 2\n").unwrap();
    let cfg = Config::load_from(&path).expect("load");
    assert_eq!(cfg.sessions.max_sessions, 2);
}

#[test]
fn load_from_invalid_file_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sessions\nmax_sessions = ").unwrap();
    let err = Config::load_from(&path).expect_err("should fail");
    assert!(err.to_string().starts_with("parse"));
}

#[test]
fn zero_max_sessions_fails_validation() {
    let mut cfg = Config::default();
    cfg.sessions.max_sessions = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("max_sessions"));
}

#[test]
fn unknown_log_format_fails_validation() {
    let mut cfg = Config::default();
    cfg.general.log_format = "xml".into();
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("log_format"));
}

#[test]
fn env_overrides_apply() {
    let vars: HashMap<&str, &str> = [
        ("SWITCHBOARD_PORT", "7000"),
        ("SWITCHBOARD_MAX_SESSIONS", "4"),
        ("SWITCHBOARD_HOST", "0.0.0.0"),
    ]
    .into_iter()
    .collect();
    let mut cfg = Config::default();
    cfg.apply_vars(|k| vars.get(k).map(|v| v.to_string()))
        .expect("overrides apply");
    assert_eq!(cfg.gateway.port, 7000);
    assert_eq!(cfg.sessions.max_sessions, 4);
    assert_eq!(cfg.gateway.bind_addr(), "0.0.0.0:7000");
}

#[test]
fn bad_env_override_is_rejected() {
    let mut cfg = Config::default();
    let err = cfg
        .apply_vars(|k| (k == "SWITCHBOARD_MAX_SESSIONS").then(|| "many".to_string()))
        .expect_err("should reject");
    assert!(err.to_string().contains("SWITCHBOARD_MAX_SESSIONS"));
}

#[test]
fn zero_heartbeat_fails_validation() {
    let cfg: Config = toml::from_str("[gateway]\nheartbeat_secs = 0\n").expect("parse");
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("heartbeat_secs"));
}

#[test]
fn zero_idle_timeout_fails_validation() {
    let cfg: Config = toml::from_str("[sessions]\nidle_timeout_secs = 0\n").expect("parse");
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("idle_timeout_secs"));
}
