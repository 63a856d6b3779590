//! Configuration file tests.

use pisync::config::{
    load_config, load_config_file, save_config, ConfigError, ConfigFile, Overrides, RoleConfig,
    SessionConfig,
};
use pisync::roles::FollowerMode;
use pisync::sync_io::{Edge, Pull};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "pisync.toml",
        r#"
role = "secondary"

[playback]
media_file = "/srv/wall.mp4"
loop_forever = false
repeat_count = 4

[follower]
input_pin = 5
mode = "poll"
trigger_edge = "falling"
"#,
    );

    let file = load_config_file(&path).unwrap();
    let config = SessionConfig::from_file(&file).unwrap();

    assert_eq!(config.media_file, PathBuf::from("/srv/wall.mp4"));
    assert_eq!(config.repeat_count, 4);
    assert!(config.fullscreen);
    assert_eq!(config.settle, Duration::from_millis(2500));
    assert_eq!(config.poll_interval, Duration::from_millis(200));
    assert!(config.wants_another_cycle(3));
    assert!(!config.wants_another_cycle(4));

    let RoleConfig::Secondary(follower) = &config.role else {
        panic!("expected secondary, got {:?}", config.role);
    };
    assert_eq!(follower.input_pin, 5);
    assert_eq!(follower.mode, FollowerMode::Poll);
    assert_eq!(follower.trigger_edge, Edge::Falling);
    assert_eq!(follower.pull, Pull::Down);
    assert_eq!(follower.end_guard, Duration::from_millis(1000));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.toml", "role = \n[playback");

    assert!(matches!(load_config_file(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_wrong_value_type_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "typed.toml", "[emitter]\noutput_pins = \"17\"\n");

    assert!(matches!(load_config_file(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_save_then_load_in_new_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("config.toml");

    let mut file = ConfigFile::default();
    file.playback.media_file = Some(PathBuf::from("/srv/loop.mp4"));
    file.emitter.output_pins = vec![5, 6];
    file.emitter.hold_secs = 1.5;
    save_config(&file, &path).unwrap();

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.playback.media_file, file.playback.media_file);
    assert_eq!(loaded.emitter.output_pins, vec![5, 6]);
    assert_eq!(loaded.emitter.hold_secs, 1.5);
}

#[test]
fn test_overrides_beat_the_file() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "pisync.toml",
        r#"
role = "primary"

[playback]
media_file = "/srv/a.mp4"
loop_forever = true
fullscreen = true
"#,
    );

    let mut file = load_config(Some(&path)).unwrap();
    Overrides {
        role: Some("secondary".to_string()),
        media_file: Some(PathBuf::from("/srv/b.mp4")),
        repeat_count: Some(2),
        windowed: true,
        simulate: true,
        follower_mode: Some("poll".to_string()),
        ..Default::default()
    }
    .apply(&mut file);

    let config = SessionConfig::from_file(&file).unwrap();
    assert_eq!(config.media_file, PathBuf::from("/srv/b.mp4"));
    assert!(!config.loop_forever);
    assert_eq!(config.repeat_count, 2);
    assert!(!config.fullscreen);
    assert!(config.gpio.simulate);
    assert!(matches!(
        config.role,
        RoleConfig::Secondary(ref f) if f.mode == FollowerMode::Poll
    ));
}

#[test]
fn test_unknown_pull_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "pisync.toml",
        r#"
role = "secondary"

[playback]
media_file = "/srv/a.mp4"

[follower]
pull = "sideways"
"#,
    );

    let file = load_config_file(&path).unwrap();
    assert!(matches!(
        SessionConfig::from_file(&file),
        Err(ConfigError::InvalidValue { field: "follower.pull", .. })
    ));
}

#[test]
fn test_explicit_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");

    assert!(matches!(load_config(Some(&path)), Err(ConfigError::Io(_))));
}
