//! Scripted output host shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use relay_kit::RelayEngine;
use relay_kit::device::{BindingError, DeviceInfo, OutputHost};

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceInfo>,
    default_uid: Option<String>,
    attached: Vec<String>,
    running: Vec<String>,
    attach_count: u32,
    rate_requests: Vec<f64>,
    max_buffer_grant: Option<u32>,
}

/// In-memory stand-in for the platform audio host.
pub struct MockHost {
    state: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn add_device(&self, uid: &str, sample_rate: f64) {
        self.state.lock().unwrap().devices.push(DeviceInfo {
            uid: uid.to_string(),
            name: format!("Mock {uid}"),
            output_channels: 2,
            sample_rate,
            safety_offset: 64,
            alive: true,
        });
    }

    pub fn set_alive(&self, uid: &str, alive: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.devices.iter_mut().find(|d| d.uid == uid) {
            device.alive = alive;
        }
    }

    pub fn set_default(&self, uid: &str) {
        self.state.lock().unwrap().default_uid = Some(uid.to_string());
    }

    pub fn set_rate(&self, uid: &str, sample_rate: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.devices.iter_mut().find(|d| d.uid == uid) {
            device.sample_rate = sample_rate;
        }
    }

    pub fn limit_buffer_grant(&self, max: u32) {
        self.state.lock().unwrap().max_buffer_grant = Some(max);
    }

    pub fn attach_count(&self) -> u32 {
        self.state.lock().unwrap().attach_count
    }

    pub fn attached(&self) -> Vec<String> {
        self.state.lock().unwrap().attached.clone()
    }

    pub fn running(&self) -> Vec<String> {
        self.state.lock().unwrap().running.clone()
    }

    pub fn rate_requests(&self) -> Vec<f64> {
        self.state.lock().unwrap().rate_requests.clone()
    }
}

impl OutputHost for MockHost {
    fn devices(&self) -> Vec<DeviceInfo> {
        self.state.lock().unwrap().devices.clone()
    }

    fn default_output_uid(&self) -> Option<String> {
        self.state.lock().unwrap().default_uid.clone()
    }

    fn device(&self, uid: &str) -> Option<DeviceInfo> {
        self.state
            .lock()
            .unwrap()
            .devices
            .iter()
            .find(|d| d.uid == uid)
            .cloned()
    }

    fn set_buffer_frame_size(&self, uid: &str, frames: u32) -> Result<u32, BindingError> {
        let state = self.state.lock().unwrap();
        if !state.devices.iter().any(|d| d.uid == uid) {
            return Err(BindingError::DeviceNotFound(uid.to_string()));
        }
        Ok(state.max_buffer_grant.map_or(frames, |max| frames.min(max)))
    }

    fn attach_relay(&self, uid: &str, _engine: Arc<RelayEngine>) -> Result<(), BindingError> {
        let mut state = self.state.lock().unwrap();
        state.attached.push(uid.to_string());
        state.attach_count += 1;
        Ok(())
    }

    fn detach_relay(&self, uid: &str) {
        self.state
            .lock()
            .unwrap()
            .attached
            .retain(|attached| attached != uid);
    }

    fn start(&self, uid: &str) -> Result<(), BindingError> {
        self.state.lock().unwrap().running.push(uid.to_string());
        Ok(())
    }

    fn stop(&self, uid: &str) {
        self.state
            .lock()
            .unwrap()
            .running
            .retain(|running| running != uid);
    }

    fn request_configuration_change(&self, sample_rate: f64) {
        self.state.lock().unwrap().rate_requests.push(sample_rate);
    }
}
