use remb_core::ExitCode;
use remb_fs::{Config, DEFAULT_SLOT_LIMIT, init_data_dir, load_config, save_config};

#[test]
fn init_creates_directory_and_seeds_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("data");

    let result = init_data_dir(Some(&root)).expect("init data dir");

    assert!(result.paths.root.is_dir());
    assert!(result.paths.config_path.is_file());
    assert_eq!(result.config, Config::default());
    assert_eq!(result.config.slot_limit, DEFAULT_SLOT_LIMIT);
    assert!(result.created.contains(&result.paths.root));
    assert!(result.created.contains(&result.paths.config_path));
}

#[test]
fn init_is_idempotent_and_keeps_edited_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("data");

    let first = init_data_dir(Some(&root)).expect("first init");
    let mut config = first.config.clone();
    config.slot_limit = 25;
    config.site_url = "https://rember.example".to_string();
    save_config(&first.paths, &config).expect("save config");

    let second = init_data_dir(Some(&root)).expect("second init");
    assert!(second.created.is_empty());
    assert_eq!(second.config.slot_limit, 25);
    assert_eq!(second.config.site_url, "https://rember.example");
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = init_data_dir(Some(temp.path())).expect("init data dir");

    std::fs::remove_file(&result.paths.config_path).expect("remove config");
    let config = load_config(&result.paths).expect("load config");
    assert_eq!(config, Config::default());
}

#[test]
fn partial_config_file_fills_unset_fields_with_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = init_data_dir(Some(temp.path())).expect("init data dir");

    std::fs::write(&result.paths.config_path, "slot_limit = 10\n").expect("write config");
    let config = load_config(&result.paths).expect("load config");
    assert_eq!(config.slot_limit, 10);
    assert_eq!(config.issuer_url, Config::default().issuer_url);
    assert_eq!(config.listen_timeout_secs, Config::default().listen_timeout_secs);
}

#[test]
fn out_of_range_slot_limit_is_a_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = init_data_dir(Some(temp.path())).expect("init data dir");

    for bad in ["slot_limit = 0\n", "slot_limit = 101\n"] {
        std::fs::write(&result.paths.config_path, bad).expect("write config");
        let error = load_config(&result.paths).expect_err("limit should be rejected");
        assert_eq!(error.exit_code(), ExitCode::Usage);
        assert!(error.message.contains("slot_limit"));
    }
}

#[test]
fn malformed_toml_is_an_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = init_data_dir(Some(temp.path())).expect("init data dir");

    std::fs::write(&result.paths.config_path, "slot_limit = [not toml").expect("write config");
    let error = load_config(&result.paths).expect_err("parse should fail");
    assert_eq!(error.exit_code(), ExitCode::Io);
    assert!(error.message.contains("failed to parse config"));
}
