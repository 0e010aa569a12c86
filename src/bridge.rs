//! C entry points bridging the host audio server shim to the relay core.
//!
//! The embedding shim owns plugin registration and property dispatch; it
//! installs the active driver and forwards IO calls here. Every entry
//! point validates its arguments and answers with an explicit status code
//! instead of crashing.

use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;
use std::slice;

use coreaudio_sys::{
    AudioBuffer, AudioBufferList, AudioTimeStamp, OSStatus, kAudioDeviceUnsupportedFormatError,
    kAudioHardwareBadObjectError, kAudioHardwareIllegalOperationError,
    kAudioHardwareUnspecifiedError,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{CHANNELS, CycleTime, DriverError, RelayDriver, active_driver};

/// Audio object identifier the relay device registers under.
pub const DEVICE_OBJECT_ID: u32 = 3;

static LOG_CACHE: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn status_code(code: u32) -> OSStatus {
    code.try_into().unwrap_or(-1)
}

fn translate_error(err: DriverError) -> OSStatus {
    match err {
        DriverError::IllegalOperation => status_code(kAudioHardwareIllegalOperationError),
        DriverError::UnsupportedSampleRate(_) | DriverError::UnsupportedChannels(_) => {
            status_code(kAudioDeviceUnsupportedFormatError)
        }
    }
}

fn with_driver(
    device_id: u32,
    f: impl FnOnce(&RelayDriver) -> OSStatus,
) -> OSStatus {
    if device_id != DEVICE_OBJECT_ID {
        return status_code(kAudioHardwareBadObjectError);
    }
    match active_driver() {
        Some(driver) => f(&driver),
        None => status_code(kAudioHardwareBadObjectError),
    }
}

/// Start IO for one client of the relay device.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_start_io(device_id: u32) -> OSStatus {
    with_driver(device_id, |driver| match driver.engine().start_io() {
        Ok(()) => 0,
        Err(err) => translate_error(err),
    })
}

/// Stop IO for one client of the relay device.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_stop_io(device_id: u32) -> OSStatus {
    with_driver(device_id, |driver| match driver.engine().stop_io() {
        Ok(()) => 0,
        Err(err) => translate_error(err),
    })
}

/// Zero-timestamp query: where is the device timeline right now?
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_driver_zero_timestamp(
    device_id: u32,
    out_sample_time: *mut f64,
    out_host_time: *mut u64,
    out_seed: *mut u64,
) -> OSStatus {
    if out_sample_time.is_null() || out_host_time.is_null() || out_seed.is_null() {
        return status_code(kAudioHardwareUnspecifiedError);
    }
    with_driver(device_id, |driver| {
        let timestamp = driver.engine().zero_timestamp();
        unsafe {
            *out_sample_time = timestamp.sample_time;
            *out_host_time = timestamp.host_time;
            *out_seed = timestamp.seed;
        }
        0
    })
}

/// Ingest callback: an application wrote `frame_count` interleaved stereo
/// frames to the virtual device at the cycle's output sample time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_driver_write_mix(
    device_id: u32,
    data: *const f32,
    frame_count: u32,
    output_time: *const AudioTimeStamp,
) -> OSStatus {
    if data.is_null() || output_time.is_null() {
        return status_code(kAudioHardwareUnspecifiedError);
    }
    with_driver(device_id, |driver| {
        let samples = unsafe { slice::from_raw_parts(data, frame_count as usize * CHANNELS) };
        let sample_time = unsafe { (*output_time).mSampleTime };
        driver.engine().write_mix(samples, frame_count, sample_time);
        0
    })
}

/// Relay callback invoked by the physical output device's IO shim.
/// Accumulates into every buffer of `buffer_list`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn relay_device_render(
    buffer_list: *mut AudioBufferList,
    frame_count: u32,
    output_time: *const AudioTimeStamp,
) -> OSStatus {
    if buffer_list.is_null() || output_time.is_null() {
        return status_code(kAudioHardwareUnspecifiedError);
    }
    let Some(driver) = active_driver() else {
        return status_code(kAudioHardwareBadObjectError);
    };

    let cycle = {
        let ts = unsafe { &*output_time };
        CycleTime {
            sample_time: ts.mSampleTime,
            host_time: ts.mHostTime,
            rate_scalar: ts.mRateScalar,
        }
    };

    let list = unsafe { &mut *buffer_list };
    let buffers = list.mBuffers.as_mut_ptr();
    for index in 0..list.mNumberBuffers as usize {
        let buffer: &mut AudioBuffer = unsafe { &mut *buffers.add(index) };
        if buffer.mData.is_null() || buffer.mNumberChannels == 0 {
            continue;
        }
        let samples = buffer.mDataByteSize as usize / std::mem::size_of::<f32>();
        let output = unsafe { slice::from_raw_parts_mut(buffer.mData as *mut f32, samples) };
        driver
            .engine()
            .relay_pull(output, buffer.mNumberChannels, frame_count, &cycle);
    }
    0
}

/// Set one output channel's volume control value.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_set_volume(channel: u32, value: f32) -> OSStatus {
    match active_driver() {
        Some(driver) => {
            if driver.engine().set_volume(channel as usize, value) {
                0
            } else {
                status_code(kAudioHardwareBadObjectError)
            }
        }
        None => status_code(kAudioHardwareBadObjectError),
    }
}

/// Set the master mute state.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_set_mute(mute: bool) -> OSStatus {
    match active_driver() {
        Some(driver) => {
            driver.engine().set_mute(mute);
            0
        }
        None => status_code(kAudioHardwareBadObjectError),
    }
}

/// The host confirmed a requested sample-rate configuration change.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_perform_configuration_change(
    device_id: u32,
    sample_rate: f64,
) -> OSStatus {
    with_driver(device_id, |driver| {
        match driver.perform_configuration_change(sample_rate) {
            Ok(()) => 0,
            Err(err) => translate_error(err),
        }
    })
}

/// The host denied a requested sample-rate configuration change.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_abort_configuration_change(
    device_id: u32,
    sample_rate: f64,
) -> OSStatus {
    with_driver(device_id, |driver| {
        driver.abort_configuration_change(sample_rate);
        0
    })
}

/// Pop the next buffered diagnostic line. Returns `NULL` when none remain.
#[unsafe(no_mangle)]
pub extern "C" fn relay_driver_pop_log() -> *const c_char {
    if let Some(message) = crate::pop_log() {
        let mut cache = LOG_CACHE.lock();
        *cache = Some(CString::new(message).unwrap_or_default());
        cache.as_ref().map(|c| c.as_ptr()).unwrap_or(ptr::null())
    } else {
        ptr::null()
    }
}
