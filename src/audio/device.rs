//! Audio device enumeration and lookup
//!
//! Device ids have the form `input:<name>` / `output:<name>`. The literal
//! `"default"` (or an empty string) selects the host's default device.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::SYSTEM_DEFAULT_DEVICE;
use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

const COMMON_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Which side of a device we want
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Input => "input:",
            Direction::Output => "output:",
        }
    }
}

/// Resolved cpal device plus the direction it was opened for
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: Direction,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device, direction: Direction) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            direction,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    pub fn id(&self) -> String {
        format!("{}{}", self.direction.prefix(), self.name)
    }

    /// Host default stream config for this direction
    pub fn default_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        let config = match self.direction {
            Direction::Input => self.inner.default_input_config()?,
            Direction::Output => self.inner.default_output_config()?,
        };
        Ok(config)
    }

    /// Whether the device advertises support for `sample_rate` at `channels`
    pub fn supports(&self, sample_rate: u32, channels: u16) -> bool {
        let rate = cpal::SampleRate(sample_rate);
        let matches = |range: cpal::SupportedStreamConfigRange| {
            range.channels() >= channels
                && rate >= range.min_sample_rate()
                && rate <= range.max_sample_rate()
        };
        match self.direction {
            Direction::Input => self
                .inner
                .supported_input_configs()
                .map(|mut configs| configs.any(matches))
                .unwrap_or(false),
            Direction::Output => self
                .inner
                .supported_output_configs()
                .map(|mut configs| configs.any(matches))
                .unwrap_or(false),
        }
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let (sample_rates, channels) = capabilities(&device, Direction::Input);
            devices.push(AudioDeviceInfo {
                id: format!("input:{}", name),
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                sample_rates,
                channels,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let is_default = default_output_name.as_ref() == Some(&name);
            let (sample_rates, channels) = capabilities(&device, Direction::Output);
            devices.push(AudioDeviceInfo {
                id: format!("output:{}", name),
                name,
                is_input: false,
                is_output: true,
                is_default,
                sample_rates,
                channels,
            });
        }
    }

    devices
}

fn capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>) {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default(),
    };

    let mut rates = Vec::new();
    let mut channels = Vec::new();
    for range in &ranges {
        for rate in COMMON_SAMPLE_RATES {
            let sr = cpal::SampleRate(rate);
            if sr >= range.min_sample_rate() && sr <= range.max_sample_rate() && !rates.contains(&rate) {
                rates.push(rate);
            }
        }
        if !channels.contains(&range.channels()) {
            channels.push(range.channels());
        }
    }
    rates.sort_unstable();
    channels.sort_unstable();
    (rates, channels)
}

/// True when `id` means "the system default device"
pub fn is_default_id(id: &str) -> bool {
    let id = id.trim();
    id.is_empty() || id.eq_ignore_ascii_case(SYSTEM_DEFAULT_DEVICE)
}

/// Resolve an input device id, honoring "default"
pub fn resolve_input_device(id: &str) -> Result<AudioDevice, AudioError> {
    if is_default_id(id) {
        get_default_input_device()
    } else {
        get_device_by_id(id, Direction::Input)
    }
}

/// Resolve an output device id, honoring "default"
pub fn resolve_output_device(id: &str) -> Result<AudioDevice, AudioError> {
    if is_default_id(id) {
        get_default_output_device()
    } else {
        get_device_by_id(id, Direction::Output)
    }
}

/// Find a device by id; a bare name is looked up in `direction`
pub fn get_device_by_id(id: &str, direction: Direction) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (direction, name) = if let Some(name) = id.strip_prefix("input:") {
        (Direction::Input, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (Direction::Output, name)
    } else {
        (direction, id)
    };

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, direction));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_input_device()
        .map(|d| AudioDevice::from_cpal(d, Direction::Input))
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    cpal::default_host()
        .default_output_device()
        .map(|d| AudioDevice::from_cpal(d, Direction::Output))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_id_detection() {
        assert!(is_default_id("default"));
        assert!(is_default_id("DEFAULT"));
        assert!(is_default_id("  "));
        assert!(!is_default_id("input:USB Mic"));
    }

    #[test]
    fn test_unknown_device_is_not_found() {
        let result = get_device_by_id("input:__no_such_device__", Direction::Input);
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }

    #[test]
    fn test_listed_ids_carry_direction_prefix() {
        // Machines without audio hardware simply list nothing
        for device in list_devices() {
            assert!(device.id.starts_with("input:") || device.id.starts_with("output:"));
        }
    }
}
