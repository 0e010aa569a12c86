use crate::device::DeviceInfo;
use crate::{RelayStatus, active_driver, volume_db_to_scalar};

/// Fetch the current driver status snapshot if a driver is active.
pub fn get_status() -> Option<RelayStatus> {
    crate::driver_status()
}

/// Set one output channel's volume, expressed in decibels.
pub fn set_channel_volume_db(channel: usize, db: f32) -> bool {
    let Some(driver) = active_driver() else {
        return false;
    };
    driver.engine().set_volume(channel, volume_db_to_scalar(db))
}

/// Set the master mute state.
pub fn set_mute(muted: bool) -> bool {
    let Some(driver) = active_driver() else {
        return false;
    };
    driver.engine().set_mute(muted);
    true
}

/// Persist a new relay target and rebind. `None` selects the OS default.
pub fn set_output_device(uid: Option<String>) -> bool {
    let Some(driver) = active_driver() else {
        return false;
    };
    driver.manager().set_target_device(uid);
    true
}

/// Persist a new output buffer size (floor-clamped) and rebind.
pub fn set_output_buffer_frames(frames: u32) -> bool {
    let Some(driver) = active_driver() else {
        return false;
    };
    driver.manager().set_buffer_frame_size(frames);
    true
}

/// Force a fresh resolve-and-bind pass.
pub fn rebind() -> bool {
    let Some(driver) = active_driver() else {
        return false;
    };
    driver.manager().rebind();
    true
}

/// Devices the host currently reports, for selection UIs.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    active_driver()
        .map(|driver| driver.manager().known_devices())
        .unwrap_or_default()
}
