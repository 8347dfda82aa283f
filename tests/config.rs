// tests/config.rs
use listing_ingest::config::{load_config_default, load_config_from, ENV_CONFIG_PATH};
use std::{env, fs};

#[test]
fn toml_and_json_files_load() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("ingest.toml");
    fs::write(
        &p_toml,
        r#"
batch_size = 5
inter_batch_delay_ms = 0

[[adapters]]
name = "itunes-search"
priority = 1
base_url = "http://127.0.0.1:9"
rate_limit = { capacity = 2, refill_per_second = 0.5 }
"#,
    )
    .unwrap();
    let cfg = load_config_from(&p_toml).unwrap();
    assert_eq!(cfg.batch_size, 5);
    assert_eq!(cfg.adapters.len(), 1);
    assert_eq!(cfg.adapters[0].rate_limit.capacity, 2);
    assert_eq!(cfg.adapters[0].base_url.as_deref(), Some("http://127.0.0.1:9"));

    let p_json = dir.path().join("ingest.json");
    fs::write(
        &p_json,
        r#"{"drift_threshold": 0.25, "adapters": [{"name": "itunes-lookup", "priority": 3}]}"#,
    )
    .unwrap();
    let cfg = load_config_from(&p_json).unwrap();
    assert_eq!(cfg.drift_threshold, 0.25);
    assert_eq!(cfg.adapters[0].priority, 3);

    let p_bad = dir.path().join("bad.toml");
    fs::write(&p_bad, "batch_size = \"many\"").unwrap();
    assert!(load_config_from(&p_bad).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // isolate CWD so the repo's own config/ is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);

    // 1) nothing on disk -> built-in three sources
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.adapters.len(), 3);

    // 2) ./config/ingest.toml
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(
        cfg_dir.join("ingest.toml"),
        "batch_size = 3\n[[adapters]]\nname = \"itunes-lookup\"\npriority = 1\n",
    )
    .unwrap();
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.batch_size, 3);
    assert_eq!(cfg.adapters.len(), 1);

    // 3) env var wins
    let p_env = tmp.path().join("other.json");
    fs::write(&p_env, r#"{"batch_size": 7}"#).unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    assert_eq!(load_config_default().unwrap().batch_size, 7);

    // 4) env var pointing nowhere is an error, not a silent fallback
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(load_config_default().is_err());
    env::remove_var(ENV_CONFIG_PATH);

    env::set_current_dir(&old).unwrap();
}
