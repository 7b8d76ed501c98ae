/*!
 * Driver entry points.
 *
 * `VirtualSerialDriver` is what the host framework talks to: it is built at
 * driver load, receives a `device_add` per device node, and hands the host a
 * cleanup hook for every device object it creates.
 */
use std::sync::Arc;

use tracing::{error, info};

use vcom_core::config::SharedConfig;
use vcom_core::types::DeviceHandle;

use crate::error::Result;
use crate::host::{CleanupHook, DeviceHost, DeviceInit};
use crate::legacy::CleanupReport;
use crate::lifecycle::LifecycleController;
use crate::table::DeviceTable;

/// The virtual serial port driver
#[derive(Debug)]
pub struct VirtualSerialDriver {
    controller: Arc<LifecycleController>,
    config: SharedConfig,
}

impl VirtualSerialDriver {
    /// Driver entry: validate the configuration and get ready for devices
    pub fn new(host: Arc<dyn DeviceHost>, config: SharedConfig) -> Result<Self> {
        config.get().port.validate()?;

        let controller = Arc::new(LifecycleController::new(host, &config.get().port));
        info!("Driver {} was initialized", config.get().general.driver_name);

        Ok(Self { controller, config })
    }

    /// The driver configuration
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// The lifecycle controller
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// The handle -> record table
    pub fn devices(&self) -> &DeviceTable {
        self.controller.devices()
    }

    /// Device-add callback: create the device, then configure it.
    ///
    /// On error the host is expected to destroy the device object, which
    /// runs the cleanup hook registered here.
    pub fn device_add(&self, init: DeviceInit) -> Result<DeviceHandle> {
        let instance_id = init.instance_id.clone();

        let result = self
            .controller
            .create(init, self.cleanup_hook())
            .and_then(|device| self.controller.configure(&device).map(|_| device));

        match result {
            Ok(device) => {
                info!("Device {} added for {}", device, instance_id);
                Ok(device)
            }
            Err(e) => {
                error!("Errors occurred while adding device {}: {}", instance_id, e);
                Err(e)
            }
        }
    }

    /// Cleanup callback, normally reached through the registered hook
    pub fn device_cleanup(&self, device: &DeviceHandle) -> Option<CleanupReport> {
        self.controller.cleanup(device)
    }

    /// Driver unload. Returns how many devices still hold a record.
    pub fn unload(&self) -> usize {
        let remaining = match self.devices().len() {
            Ok(remaining) => remaining,
            Err(e) => {
                error!("Cannot count bound devices at unload: {}", e);
                0
            }
        };
        info!("Driver was unloaded with {} device(s) still bound", remaining);
        remaining
    }

    fn cleanup_hook(&self) -> CleanupHook {
        let controller = Arc::downgrade(&self.controller);
        Arc::new(move |device: &DeviceHandle| match controller.upgrade() {
            Some(controller) => {
                controller.cleanup(device);
            }
            None => error!("Driver gone before cleanup of device {}", device),
        })
    }
}
