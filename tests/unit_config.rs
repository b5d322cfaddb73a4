use taskq::config::{Config, ReentryPolicy, CONFIG_FILE};
use taskq::Error;

#[test]
fn config_defaults_when_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load_from_dir(dir.path());

    assert_eq!(config.titles.default, "Untitled Task");
    assert_eq!(config.titles.max_len, 255);
    assert_eq!(config.controller.reentry, ReentryPolicy::Queue);
    assert_eq!(config.remote.latency_ms, 0);
}

#[test]
fn partial_config_keeps_other_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join(CONFIG_FILE);
    std::fs::write(&config_path, "[remote]\nlatency_ms = 120\n")?;

    let config = Config::load(&config_path)?;
    assert_eq!(config.remote.latency_ms, 120);
    assert_eq!(config.titles, Config::default().titles);
    assert_eq!(config.controller.reentry, ReentryPolicy::Queue);
    Ok(())
}

#[test]
fn config_rejects_default_title_longer_than_limit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join(CONFIG_FILE);
    std::fs::write(&config_path, "[titles]\ndefault = \"Untitled\"\nmax_len = 3\n").expect("write");

    assert!(matches!(Config::load(&config_path), Err(Error::InvalidConfig(_))));
    // Directory loading falls back to defaults on a bad file.
    assert_eq!(Config::load_from_dir(dir.path()), Config::default());
}

#[test]
fn config_save_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(CONFIG_FILE);
    let mut config = Config::default();
    config.controller.reentry = ReentryPolicy::Ignore;
    config.save(&path)?;

    assert_eq!(Config::load(&path)?, config);
    Ok(())
}
