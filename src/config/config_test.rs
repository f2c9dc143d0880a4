use std::io::Write;

use tempfile::NamedTempFile;

use crate::WatchSettings;

/// # Case 1: No file and no environment yields the documented defaults
#[test]
fn test_load_defaults() {
    let settings = WatchSettings::load(None).expect("defaults should load");

    assert_eq!(settings.online.max_watch_stream_failures, 2);
    assert_eq!(settings.channel.command_buffer_size, 64);
    assert_eq!(settings.channel.signal_buffer_size, 256);
}

/// # Case 2: A TOML file overrides defaults, field by field
#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("should create temp file");
    writeln!(
        file,
        "[online]\nmax_watch_stream_failures = 5\n\n[channel]\ncommand_buffer_size = 8"
    )
    .expect("should write config");

    let settings =
        WatchSettings::load(file.path().to_str()).expect("file config should load");

    assert_eq!(settings.online.max_watch_stream_failures, 5);
    assert_eq!(settings.channel.command_buffer_size, 8);
    // Untouched fields keep their defaults
    assert_eq!(settings.channel.signal_buffer_size, 256);
}

/// # Case 3: Environment variables take priority over the file
#[test]
fn test_env_overrides_file() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("should create temp file");
    writeln!(file, "[online]\nmax_watch_stream_failures = 5").expect("should write config");

    temp_env::with_var(
        "WATCHSYNC__ONLINE__MAX_WATCH_STREAM_FAILURES",
        Some("7"),
        || {
            let settings =
                WatchSettings::load(file.path().to_str()).expect("env config should load");
            assert_eq!(settings.online.max_watch_stream_failures, 7);
        },
    );
}

/// # Case 4: Out-of-range values are rejected by validation
#[test]
fn test_validate_rejects_zero_thresholds() {
    let mut settings = WatchSettings::default();
    settings.online.max_watch_stream_failures = 0;
    assert!(settings.validate().is_err());

    let mut settings = WatchSettings::default();
    settings.channel.command_buffer_size = 0;
    assert!(settings.validate().is_err());

    let mut settings = WatchSettings::default();
    settings.channel.signal_buffer_size = 0;
    assert!(settings.validate().is_err());

    assert!(WatchSettings::default().validate().is_ok());
}

/// # Case 5: Validation runs as part of load
#[test]
fn test_load_rejects_invalid_file() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("should create temp file");
    writeln!(file, "[online]\nmax_watch_stream_failures = 0").expect("should write config");

    assert!(WatchSettings::load(file.path().to_str()).is_err());
}
