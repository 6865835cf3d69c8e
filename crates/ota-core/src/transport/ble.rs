//! btleplug-based GATT transport implementation.
//!
//! btleplug is async; this transport owns a small tokio runtime and blocks
//! on it, so the transfer engine stays synchronous. Notifications are pumped
//! by a background task into the registered handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{
    BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::traits::{Attribute, GattTransport, NotifyCallback, TransportError};
use crate::protocol::constants::{COMMAND_CHAR_UUID16, FIRMWARE_CHAR_UUID16, OTA_SERVICE_UUID16};

type Callbacks = Arc<Mutex<HashMap<Attribute, Arc<NotifyCallback>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection options for [`BleTransport`].
#[derive(Debug, Clone)]
pub struct BleOptions {
    /// How long to scan for the target before giving up.
    pub scan_timeout: Duration,
    /// ATT MTU to size chunks for. btleplug does not report the negotiated
    /// value, so this must not exceed what the link actually supports.
    pub mtu: usize,
}

impl Default for BleOptions {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            mtu: 23,
        }
    }
}

/// btleplug-based BLE transport.
pub struct BleTransport {
    runtime: Runtime,
    peripheral: Peripheral,
    command: Characteristic,
    firmware: Characteristic,
    unit_size: usize,
    callbacks: Callbacks,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    /// Scan for the device at `address` and connect to its OTA service.
    ///
    /// `address` is matched against the peripheral's MAC address, or against
    /// its platform identifier where MACs are hidden (macOS).
    #[instrument(level = "info", skip(options), fields(mtu = options.mtu))]
    pub fn connect(address: &str, options: &BleOptions) -> Result<Self, TransportError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let peripheral = runtime.block_on(find_peripheral(address, options.scan_timeout))?;
        runtime.block_on(async {
            peripheral
                .connect()
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
            peripheral
                .discover_services()
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))
        })?;

        let service = uuid_from_u16(OTA_SERVICE_UUID16);
        let find = |attribute: Attribute, uuid: Uuid| {
            peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == uuid && c.service_uuid == service)
                .ok_or(TransportError::AttributeNotFound(attribute))
        };
        let command = find(Attribute::Command, uuid_from_u16(COMMAND_CHAR_UUID16))?;
        let firmware = find(Attribute::Firmware, uuid_from_u16(FIRMWARE_CHAR_UUID16))?;

        info!(address = %address, "Connected to OTA service");

        let transport = Self {
            runtime,
            peripheral,
            command,
            firmware,
            unit_size: options.mtu,
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            pump: Mutex::new(None),
        };
        transport.start_pump()?;
        Ok(transport)
    }

    fn characteristic(&self, attribute: Attribute) -> &Characteristic {
        match attribute {
            Attribute::Command => &self.command,
            Attribute::Firmware => &self.firmware,
        }
    }

    fn start_pump(&self) -> Result<(), TransportError> {
        let mut stream = self
            .runtime
            .block_on(self.peripheral.notifications())
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let callbacks = Arc::clone(&self.callbacks);
        let command_uuid = self.command.uuid;
        let firmware_uuid = self.firmware.uuid;

        let handle = self.runtime.spawn(async move {
            while let Some(notification) = stream.next().await {
                let attribute = if notification.uuid == command_uuid {
                    Attribute::Command
                } else if notification.uuid == firmware_uuid {
                    Attribute::Firmware
                } else {
                    continue;
                };
                trace!(%attribute, len = notification.value.len(), "Notification");
                let callback = lock(&callbacks).get(&attribute).cloned();
                if let Some(cb) = callback {
                    cb(&notification.value);
                }
            }
            debug!("Notification stream ended");
            lock(&callbacks).clear();
        });
        *lock(&self.pump) = Some(handle);
        Ok(())
    }
}

async fn find_peripheral(address: &str, timeout: Duration) -> Result<Peripheral, TransportError> {
    let target: Option<BDAddr> = address.parse().ok();

    let manager = Manager::new()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?
        .into_iter()
        .next()
        .ok_or(TransportError::AdapterNotFound)?;

    adapter
        .start_scan(ScanFilter {
            services: vec![uuid_from_u16(OTA_SERVICE_UUID16)],
        })
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    info!(address = %address, "Scanning for device");

    let start = Instant::now();
    let found = loop {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let hit = peripherals.into_iter().find(|p| {
            target.is_some_and(|t| p.address() == t)
                || p.id().to_string().eq_ignore_ascii_case(address)
        });
        if let Some(p) = hit {
            break Some(p);
        }
        if start.elapsed() > timeout {
            break None;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        warn!(error = %e, "Failed to stop scan");
    }
    found.ok_or_else(|| TransportError::DeviceNotFound {
        address: address.to_string(),
    })
}

impl GattTransport for BleTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(
        &self,
        attribute: Attribute,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.runtime
            .block_on(
                self.peripheral
                    .write(self.characteristic(attribute), data, write_type),
            )
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        trace!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    fn subscribe(
        &self,
        attribute: Attribute,
        callback: NotifyCallback,
    ) -> Result<(), TransportError> {
        lock(&self.callbacks).insert(attribute, Arc::new(callback));
        self.runtime
            .block_on(self.peripheral.subscribe(self.characteristic(attribute)))
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        debug!(%attribute, "Subscribed");
        Ok(())
    }

    fn unit_size(&self) -> usize {
        self.unit_size
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        lock(&self.callbacks).clear();
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
        self.runtime
            .block_on(self.peripheral.disconnect())
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        info!("Disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.runtime
            .block_on(self.peripheral.is_connected())
            .unwrap_or(false)
    }
}
