//! Physical output device binding lifecycle.
//!
//! The binding manager owns the connection to the chosen physical output
//! device: target resolution, buffer-size negotiation, relay attachment,
//! sample-rate matching, and teardown/rebind when the device list changes
//! or the bound device dies. All mutations run on one dedicated serial
//! worker thread so a rebind can never race an in-flight relay cycle; the
//! relay callback itself reads binding attributes without taking this
//! path's locks, relying on the invariant that they only change while the
//! device is stopped.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::settings::SettingsStore;
use crate::{MIN_OUTPUT_BUFFER_FRAMES, RelayEngine, SUPPORTED_SAMPLE_RATES, VIRTUAL_DEVICE_UID, push_log};

/// Description of a physical output device as reported by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    /// Stable device identifier.
    pub uid: String,
    /// Human-readable device name.
    pub name: String,
    /// Number of output channels the device exposes.
    pub output_channels: u32,
    /// Nominal sample rate the device currently runs at.
    pub sample_rate: f64,
    /// Extra latency frames the device reserves between "now" and the
    /// earliest frame it can safely play.
    pub safety_offset: u32,
    /// Whether the device is still present and usable.
    pub alive: bool,
}

/// Errors surfaced while (re)binding the physical output device.
#[derive(thiserror::Error, Debug)]
pub enum BindingError {
    /// No device satisfied the resolution rules.
    #[error("no viable output device")]
    NoViableDevice,
    /// A device named by UID is not known to the host.
    #[error("output device not found: {0}")]
    DeviceNotFound(String),
    /// The host rejected an operation on the device.
    #[error("output host refused: {0}")]
    HostRefused(String),
}

/// Boundary to the platform audio host.
///
/// One implementation wraps the real device APIs; tests script a mock.
/// Attaching the relay hands the engine to the host so the device driver
/// can invoke [`RelayEngine::relay_pull`] each IO cycle.
pub trait OutputHost: Send + Sync {
    /// Every device currently known to the host.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// UID of the OS default output device, if any.
    fn default_output_uid(&self) -> Option<String>;

    /// Look up a device by UID.
    fn device(&self, uid: &str) -> Option<DeviceInfo>;

    /// Negotiate the IO buffer size on a device. Returns the granted size,
    /// which the device may have clamped.
    fn set_buffer_frame_size(&self, uid: &str, frames: u32) -> Result<u32, BindingError>;

    /// Register the relay as the device's IO callback target.
    fn attach_relay(&self, uid: &str, engine: Arc<RelayEngine>) -> Result<(), BindingError>;

    /// Remove a previously attached relay.
    fn detach_relay(&self, uid: &str);

    /// Start the device's IO cycles.
    fn start(&self, uid: &str) -> Result<(), BindingError>;

    /// Stop the device's IO cycles.
    fn stop(&self, uid: &str);

    /// Ask the plugin host for a coordinated sample-rate change of the
    /// virtual device. The host later confirms through
    /// [`crate::RelayDriver::perform_configuration_change`].
    fn request_configuration_change(&self, sample_rate: f64);
}

/// Externally visible state of the output binding.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingStatus {
    /// No physical device is bound; relay cycles produce silence.
    Unbound,
    /// A target is being resolved or constructed.
    Resolving,
    /// Fully bound to a physical device.
    Bound {
        /// UID of the bound device.
        uid: String,
        /// Name of the bound device.
        name: String,
        /// Negotiated IO buffer size in frames.
        buffer_frames: u32,
        /// Sample rate the bound device runs at.
        sample_rate: f64,
        /// Whether the device's IO cycles are running.
        started: bool,
    },
}

enum BindingEvent {
    SetupTarget,
    DevicesChanged,
    AliveChanged,
    SampleRateChanged,
    SetTargetDevice(Option<String>),
    SetBufferFrameSize(u32),
    Deinitialize,
    Flush(Sender<()>),
    Shutdown,
}

struct ActiveBinding {
    info: DeviceInfo,
    buffer_frames: u32,
    started: bool,
}

/// Supervises the physical-device side of the relay.
pub struct DeviceBindingManager {
    events: Sender<BindingEvent>,
    status: Arc<Mutex<BindingStatus>>,
    host: Arc<dyn OutputHost>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceBindingManager {
    /// Spawn the binding worker and schedule initial target resolution.
    pub fn new(
        engine: Arc<RelayEngine>,
        host: Arc<dyn OutputHost>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let (events, receiver) = unbounded();
        let status = Arc::new(Mutex::new(BindingStatus::Unbound));

        let worker = BindingWorker {
            engine,
            host: host.clone(),
            settings,
            binding: None,
            status: status.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("relay-binding".to_string())
            .spawn(move || worker.run(receiver))
            .expect("spawn binding worker");

        let _ = events.send(BindingEvent::SetupTarget);

        Self {
            events,
            status,
            host,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Current binding state snapshot.
    pub fn status(&self) -> BindingStatus {
        self.status.lock().clone()
    }

    /// Devices currently visible through the host, for control surfaces.
    pub fn known_devices(&self) -> Vec<DeviceInfo> {
        self.host.devices()
    }

    /// The global device list changed; re-resolve the target.
    pub fn notify_devices_changed(&self) {
        let _ = self.events.send(BindingEvent::DevicesChanged);
    }

    /// The bound device's liveness may have changed.
    pub fn notify_device_alive_changed(&self) {
        let _ = self.events.send(BindingEvent::AliveChanged);
    }

    /// The bound device's nominal sample rate changed externally.
    pub fn notify_sample_rate_changed(&self) {
        let _ = self.events.send(BindingEvent::SampleRateChanged);
    }

    /// Persist a new target device UID and rebind. `None` falls back to
    /// the OS default at resolution time.
    pub fn set_target_device(&self, uid: Option<String>) {
        let _ = self.events.send(BindingEvent::SetTargetDevice(uid));
    }

    /// Persist a new output buffer size (floor-clamped) and rebind.
    pub fn set_buffer_frame_size(&self, frames: u32) {
        let _ = self.events.send(BindingEvent::SetBufferFrameSize(frames));
    }

    /// Re-run sample-rate matching after a confirmed configuration change.
    pub fn match_sample_rate(&self) {
        let _ = self.events.send(BindingEvent::SampleRateChanged);
    }

    /// Tear the binding down without resolving a replacement.
    pub fn unbind(&self) {
        let _ = self.events.send(BindingEvent::Deinitialize);
    }

    /// Force a fresh resolve-and-bind pass.
    pub fn rebind(&self) {
        let _ = self.events.send(BindingEvent::SetupTarget);
    }

    /// Wait until every previously submitted event has been processed.
    pub fn flush(&self) {
        let (ack, done) = crossbeam_channel::bounded(1);
        if self.events.send(BindingEvent::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Stop the worker and join it. The binding is torn down first.
    pub fn shutdown(&self) {
        let _ = self.events.send(BindingEvent::Deinitialize);
        let _ = self.events.send(BindingEvent::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceBindingManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct BindingWorker {
    engine: Arc<RelayEngine>,
    host: Arc<dyn OutputHost>,
    settings: Arc<SettingsStore>,
    binding: Option<ActiveBinding>,
    status: Arc<Mutex<BindingStatus>>,
}

impl BindingWorker {
    fn run(mut self, events: Receiver<BindingEvent>) {
        for event in events.iter() {
            match event {
                BindingEvent::SetupTarget | BindingEvent::DevicesChanged => self.setup_target(),
                BindingEvent::AliveChanged => self.alive_changed(),
                BindingEvent::SampleRateChanged => self.match_sample_rate(),
                BindingEvent::SetTargetDevice(uid) => {
                    self.settings.update(|s| s.output_device_uid = uid.clone());
                    self.setup_target();
                }
                BindingEvent::SetBufferFrameSize(frames) => {
                    let frames = frames.max(MIN_OUTPUT_BUFFER_FRAMES);
                    self.settings.update(|s| s.output_buffer_frames = frames);
                    self.setup_target();
                }
                BindingEvent::Deinitialize => self.teardown(),
                BindingEvent::Flush(ack) => {
                    let _ = ack.send(());
                }
                BindingEvent::Shutdown => break,
            }
        }
    }

    fn publish_status(&self) {
        let status = match &self.binding {
            None => BindingStatus::Unbound,
            Some(binding) => BindingStatus::Bound {
                uid: binding.info.uid.clone(),
                name: binding.info.name.clone(),
                buffer_frames: binding.buffer_frames,
                sample_rate: binding.info.sample_rate,
                started: binding.started,
            },
        };
        *self.status.lock() = status;
    }

    /// Resolution order: persisted UID, then the OS default (never the
    /// virtual device itself), then the first live stereo output device.
    fn resolve_target(&self) -> Option<DeviceInfo> {
        let settings = self.settings.get();

        if let Some(uid) = settings.output_device_uid {
            if uid != VIRTUAL_DEVICE_UID {
                match self.host.device(&uid) {
                    Some(info) if info.alive => return Some(info),
                    _ => debug!(%uid, "persisted output device unavailable"),
                }
            }
        }

        if let Some(uid) = self.host.default_output_uid() {
            if uid != VIRTUAL_DEVICE_UID {
                if let Some(info) = self.host.device(&uid) {
                    if info.alive {
                        return Some(info);
                    }
                }
            }
        }

        self.host
            .devices()
            .into_iter()
            .find(|d| d.alive && d.output_channels >= 2 && d.uid != VIRTUAL_DEVICE_UID)
    }

    fn setup_target(&mut self) {
        *self.status.lock() = BindingStatus::Resolving;
        let target = self.resolve_target();

        if let (Some(bound), Some(info)) = (&self.binding, &target) {
            let requested = self.settings.get().output_buffer_frames;
            if bound.info.uid == info.uid && bound.buffer_frames == requested {
                debug!(uid = %info.uid, "no change in target device");
                self.publish_status();
                return;
            }
        }

        self.teardown();

        let Some(info) = target else {
            warn!("could not find a viable output device");
            push_log("binding: no viable output device".to_string());
            return;
        };

        debug!(uid = %info.uid, name = %info.name, "binding output device");
        self.engine.reset_input_data();

        let requested = self.settings.get().output_buffer_frames;
        let granted = match self.host.set_buffer_frame_size(&info.uid, requested) {
            Ok(granted) => granted,
            Err(err) => {
                warn!(uid = %info.uid, %err, "buffer size negotiation failed");
                return;
            }
        };
        if let Err(err) = self.host.attach_relay(&info.uid, self.engine.clone()) {
            warn!(uid = %info.uid, %err, "could not attach relay to output device");
            return;
        }

        self.engine
            .configure_binding(info.sample_rate, granted, info.safety_offset);
        self.binding = Some(ActiveBinding {
            info,
            buffer_frames: granted,
            started: false,
        });
        self.publish_status();
        self.match_sample_rate();
    }

    /// Full stop-detach-invalidate sequence. Must complete before any new
    /// binding is constructed: the relay callback reads binding attributes
    /// without locks while IO is inactive.
    fn teardown(&mut self) {
        if let Some(binding) = self.binding.take() {
            debug!(uid = %binding.info.uid, "tearing down output binding");
            self.host.stop(&binding.info.uid);
            self.host.detach_relay(&binding.info.uid);
            self.engine.clear_binding();
        }
        self.publish_status();
    }

    /// Align the virtual device's sample rate with the bound device's.
    ///
    /// Equal rates start the device. A mismatch stops it, resets the sync
    /// state, and asks the plugin host for a coordinated rate change; the
    /// confirmation re-enters here and starts playback.
    fn match_sample_rate(&mut self) {
        let Some(mut binding) = self.binding.take() else {
            return;
        };
        let uid = binding.info.uid.clone();

        let Some(info) = self.host.device(&uid) else {
            warn!(%uid, "bound output device vanished during rate matching");
            self.host.stop(&uid);
            self.host.detach_relay(&uid);
            self.engine.clear_binding();
            self.publish_status();
            return;
        };
        binding.info.sample_rate = info.sample_rate;

        let engine_rate = self.engine.sample_rate();
        if engine_rate == info.sample_rate {
            self.engine
                .configure_binding(info.sample_rate, binding.buffer_frames, info.safety_offset);
            match self.host.start(&uid) {
                Ok(()) => binding.started = true,
                Err(err) => warn!(%uid, %err, "could not start output device"),
            }
            self.binding = Some(binding);
            self.publish_status();
            return;
        }

        // The device must be stopped before its attributes change.
        self.host.stop(&uid);
        binding.started = false;
        self.engine.reset_input_data();
        self.engine
            .configure_binding(info.sample_rate, binding.buffer_frames, info.safety_offset);

        if !SUPPORTED_SAMPLE_RATES.contains(&info.sample_rate) {
            warn!(%uid, rate = info.sample_rate, "output device uses an unavailable sample rate, cannot play");
            push_log(format!(
                "binding: unavailable sample rate {} on {}",
                info.sample_rate, uid
            ));
            self.binding = Some(binding);
            self.publish_status();
            return;
        }

        debug!(%uid, rate = info.sample_rate, "requesting coordinated sample rate change");
        self.binding = Some(binding);
        self.publish_status();
        self.host.request_configuration_change(info.sample_rate);
    }

    fn alive_changed(&mut self) {
        let Some(binding) = self.binding.as_ref() else {
            return;
        };
        let alive = self
            .host
            .device(&binding.info.uid)
            .map(|d| d.alive)
            .unwrap_or(false);
        if alive {
            return;
        }
        warn!(uid = %binding.info.uid, "output device no longer alive");
        push_log(format!("binding: device {} lost", binding.info.uid));
        self.teardown();
    }
}
