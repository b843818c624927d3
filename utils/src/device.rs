use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device named `device_name`, or the host default when `None`.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("no default input device"),
        Some(target) => host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("input device not found: {}", target)),
    }
}

/// Finds the output device named `device_name`, or the host default when `None`.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("no default output device"),
        Some(target) => host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("output device not found: {}", target)),
    }
}

fn describe(device: &Device, config: cpal::SupportedStreamConfig, default_name: &str) -> String {
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    let mut line = format!(
        " * {}({}ch, {}hz)",
        name,
        config.channels(),
        config.sample_rate().0
    );
    if name == default_name {
        line.push_str(" [default]");
    }
    line
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("available host: {:?}", host);
    }
    let host = get_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut lines = Vec::new();
    for device in host.input_devices().context("failed to enumerate input devices")? {
        match device.default_input_config() {
            Ok(config) => lines.push(describe(&device, config, &default_name)),
            Err(e) => tracing::debug!("skipping input device without default config: {}", e),
        }
    }
    Ok(lines.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut lines = Vec::new();
    for device in host.output_devices().context("failed to enumerate output devices")? {
        match device.default_output_config() {
            Ok(config) => lines.push(describe(&device, config, &default_name)),
            Err(e) => tracing::debug!("skipping output device without default config: {}", e),
        }
    }
    Ok(lines.join("\n"))
}
