use anyhow::{bail, Result};
use crate::core::{DeviceAddr, ExperimentConfig};
use crate::device::DeviceClient;
use super::fanout::join_devices;

/// The set of paired devices plus the configuration they run under
pub struct Session {
    config: ExperimentConfig,
    devices: Vec<DeviceClient>,
}

impl Session {
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            config,
            devices: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Pair a device over HTTP using the configured request timeout
    pub fn pair(&mut self, addr: DeviceAddr) -> Result<()> {
        let device = DeviceClient::http(addr, self.config.request_timeout())?;
        self.add_device(device)
    }

    pub fn add_device(&mut self, device: DeviceClient) -> Result<()> {
        if self.contains(device.addr()) {
            bail!("Device {} is already paired", device.addr());
        }
        log::info!("Paired device {}", device.addr());
        self.devices.push(device);
        Ok(())
    }

    pub fn remove(&mut self, addr: DeviceAddr) -> Option<DeviceClient> {
        let index = self.devices.iter().position(|device| device.addr() == addr)?;
        Some(self.devices.remove(index))
    }

    pub fn contains(&self, addr: DeviceAddr) -> bool {
        self.devices.iter().any(|device| device.addr() == addr)
    }

    pub fn devices(&self) -> &[DeviceClient] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [DeviceClient] {
        &mut self.devices
    }

    pub fn addrs(&self) -> Vec<DeviceAddr> {
        self.devices.iter().map(|device| device.addr()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Ping every device and unpair the ones that do not answer
    pub async fn check_connectivity(&mut self) -> Vec<DeviceAddr> {
        let alive = join_devices(&mut self.devices, |device| device.ping()).await;

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.devices.len());
        for (device, alive) in self.devices.drain(..).zip(alive) {
            if alive {
                kept.push(device);
            } else {
                log::warn!("Device {} is unreachable, removing it from the session", device.addr());
                removed.push(device.addr());
            }
        }
        self.devices = kept;
        removed
    }

    /// Read and clear every sticky failure flag, returning the flagged devices
    pub fn collect_failures(&mut self) -> Vec<DeviceAddr> {
        self.devices
            .iter_mut()
            .filter_map(|device| device.take_failure().then(|| device.addr()))
            .collect()
    }

    pub fn scale_factors(&self) -> Vec<(DeviceAddr, Option<f64>)> {
        self.devices
            .iter()
            .map(|device| (device.addr(), device.scale_factor()))
            .collect()
    }

    /// Hand the devices to a run; the session is empty until they come back
    pub(crate) fn take_devices(&mut self) -> Vec<DeviceClient> {
        std::mem::take(&mut self.devices)
    }

    pub(crate) fn restore_devices(&mut self, devices: Vec<DeviceClient>) {
        self.devices = devices;
    }
}
