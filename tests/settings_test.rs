use std::fs;
use std::path::PathBuf;

use relay_kit::MIN_OUTPUT_BUFFER_FRAMES;
use relay_kit::settings::{DriverSettings, SettingsStore};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("relay_kit_{}_{}.toml", std::process::id(), name))
}

#[test]
fn defaults_are_sensible() {
    let settings = DriverSettings::default();
    assert_eq!(settings.output_device_uid, None);
    assert_eq!(settings.output_buffer_frames, 512);
    assert_eq!(settings.device_name, "Relay Audio Device");
    assert!(!settings.box_acquired);
    assert!(settings.expose_controls);
}

#[test]
fn buffer_size_is_floor_clamped() {
    let store = SettingsStore::in_memory(DriverSettings {
        output_buffer_frames: 1,
        ..Default::default()
    });
    assert_eq!(store.get().output_buffer_frames, MIN_OUTPUT_BUFFER_FRAMES);

    store.update(|s| s.output_buffer_frames = 0);
    assert_eq!(store.get().output_buffer_frames, MIN_OUTPUT_BUFFER_FRAMES);
}

#[test]
fn missing_file_loads_defaults() {
    let path = temp_path("missing");
    let _ = fs::remove_file(&path);

    let store = SettingsStore::load(&path);
    assert_eq!(store.get(), DriverSettings::default());
}

#[test]
fn update_round_trips_through_disk() {
    let path = temp_path("round_trip");
    let _ = fs::remove_file(&path);

    let store = SettingsStore::load(&path);
    store.update(|s| {
        s.output_device_uid = Some("speakers".to_string());
        s.output_buffer_frames = 1_024;
        s.box_acquired = true;
    });

    let reloaded = SettingsStore::load(&path);
    let settings = reloaded.get();
    assert_eq!(settings.output_device_uid.as_deref(), Some("speakers"));
    assert_eq!(settings.output_buffer_frames, 1_024);
    assert!(settings.box_acquired);

    let _ = fs::remove_file(&path);
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let path = temp_path("malformed");
    fs::write(&path, "not valid toml [[[").expect("write test file");

    let store = SettingsStore::load(&path);
    assert_eq!(store.get(), DriverSettings::default());

    let _ = fs::remove_file(&path);
}

#[test]
fn unknown_keys_are_tolerated() {
    let path = temp_path("unknown_keys");
    fs::write(
        &path,
        "device_name = \"Custom Relay\"\nfuture_option = true\n",
    )
    .expect("write test file");

    let store = SettingsStore::load(&path);
    assert_eq!(store.get().device_name, "Custom Relay");

    let _ = fs::remove_file(&path);
}
