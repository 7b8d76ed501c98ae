/*!
 * Device lifecycle controller.
 *
 * Drives a device from creation through configuration and, when the host
 * destroys it, through cleanup. Configuration is fail-fast up to identity
 * resolution and never rolls back completed steps; the legacy port map is
 * the only registration this module unwinds itself.
 */
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use vcom_core::config::PortConfig;
use vcom_core::logging::{device_span, operation_span};
use vcom_core::types::{DeviceHandle, GUID_DEVINTERFACE_COMPORT};

use crate::context::{DeviceContext, LifecycleState};
use crate::error::{DeviceError, Result};
use crate::host::{CleanupHook, DeviceHost, DeviceInit};
use crate::legacy::{CleanupReport, LegacyPortMap};
use crate::port_name::PortNameResolver;
use crate::symlink::SymbolicLinkPublisher;
use crate::table::{lock_context, DeviceEvent, DeviceTable};

/// Creates, configures and cleans up virtual serial devices
#[derive(Debug)]
pub struct LifecycleController {
    host: Arc<dyn DeviceHost>,
    devices: DeviceTable,
    resolver: PortNameResolver,
    publisher: SymbolicLinkPublisher,
    legacy: LegacyPortMap,
}

impl LifecycleController {
    /// Create a controller over a host using the given port configuration
    pub fn new(host: Arc<dyn DeviceHost>, config: &PortConfig) -> Self {
        Self {
            host,
            devices: DeviceTable::new(),
            resolver: PortNameResolver::from_config(config),
            publisher: SymbolicLinkPublisher::from_config(config),
            legacy: LegacyPortMap::from_config(config),
        }
    }

    /// The handle -> record table
    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    /// The host this controller talks to
    pub fn host(&self) -> &Arc<dyn DeviceHost> {
        &self.host
    }

    /// Create the device object and bind a zeroed record to it
    pub fn create(&self, init: DeviceInit, cleanup: CleanupHook) -> Result<DeviceHandle> {
        let instance_id = init.instance_id.clone();
        let handle = self.host.create_device(init, cleanup).map_err(|e| {
            error!("Device creation failed for {}: {}", instance_id, e);
            DeviceError::AllocationFailed(e)
        })?;

        self.devices.bind(DeviceContext::new(handle.clone()))?;
        self.devices.publish(DeviceEvent::Created(handle.clone()));
        debug!("Created device {} for {}", handle, instance_id);

        Ok(handle)
    }

    /// Publish a created device under its port name.
    ///
    /// Only valid once, from `Created`. A failure before the legacy port map
    /// step leaves the device `Failed`; a legacy port map failure does not.
    pub fn configure(&self, device: &DeviceHandle) -> Result<()> {
        let span = device_span(device.as_str(), None);
        let _enter = span.enter();

        let context = self.devices.get(device)?;
        let mut ctx = lock_context(&context)?;

        if ctx.state() != LifecycleState::Created {
            return Err(DeviceError::invalid_state(format!(
                "cannot configure device {} in state {}",
                device,
                ctx.state()
            )));
        }
        ctx.set_state(LifecycleState::Configuring);

        match self.run_configuration(device, &mut *ctx) {
            Ok(()) => {
                ctx.set_state(LifecycleState::Configured);
                self.devices.publish(DeviceEvent::Configured {
                    device: device.clone(),
                    port_name: ctx.port_name().map(|p| p.to_string()).unwrap_or_default(),
                    legacy_registered: ctx.legacy_key_registered(),
                });
                info!("Device {} configured", device);
                Ok(())
            }
            Err(e) => {
                ctx.set_state(LifecycleState::Failed);
                self.devices.publish(DeviceEvent::ConfigurationFailed {
                    device: device.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run_configuration(&self, device: &DeviceHandle, ctx: &mut DeviceContext) -> Result<()> {
        self.host
            .create_device_interface(device, GUID_DEVINTERFACE_COMPORT)
            .map_err(|e| {
                error!("Cannot create device interface: {}", e);
                DeviceError::publication(format!("device interface: {}", e))
            })?;

        // The port name was written by the ports class installer
        let port_name = {
            let key = self.host.open_hardware_key(device).map_err(|e| {
                error!("Failed to retrieve device hardware key root: {}", e);
                DeviceError::LocationUnavailable(format!("hardware key: {}", e))
            })?;
            self.resolver.resolve(key.as_ref())?
        };

        let link = self.publisher.compose(&port_name)?;
        self.publisher.publish(self.host.as_ref(), device, &link)?;
        ctx.set_port_name(port_name.clone());
        ctx.set_symbolic_link(link);

        let identity = self.host.query_physical_device_name(device).map_err(|e| {
            error!("Failed to query PDO name: {}", e);
            DeviceError::IdentityUnavailable(e.to_string())
        })?;
        info!("PDO name is {}", identity);
        ctx.set_physical_device_identity(identity);

        let registered = match ctx.physical_device_identity() {
            Some(identity) => {
                let _op = operation_span("legacy_create", "legacy_port_map").entered();
                match self.legacy.create(self.host.as_ref(), device, identity, &port_name) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Continuing without legacy port map entry: {}", e);
                        false
                    }
                }
            }
            None => false,
        };

        ctx.set_legacy_key_registered(registered);
        if registered {
            self.devices.publish(DeviceEvent::LegacyRegistrationChanged {
                device: device.clone(),
                registered: true,
            });
        }

        Ok(())
    }

    /// Cleanup hook body, run when the host destroys the device object.
    ///
    /// Never fails. Returns the legacy port map report when there was a
    /// registration to remove, `None` when nothing had to be done.
    pub fn cleanup(&self, device: &DeviceHandle) -> Option<CleanupReport> {
        let context = match self.devices.release(device) {
            Some(context) => context,
            None => {
                debug!("No context for device {}, nothing to clean up", device);
                return None;
            }
        };

        let mut ctx = match context.lock() {
            Ok(ctx) => ctx,
            Err(poisoned) => {
                warn!("Context lock of device {} poisoned, cleaning up anyway", device);
                poisoned.into_inner()
            }
        };
        let report = self.release_legacy_registration(device, &mut ctx);
        drop(ctx);

        self.devices.publish(DeviceEvent::CleanedUp(device.clone()));

        report
    }

    fn release_legacy_registration(
        &self,
        device: &DeviceHandle,
        ctx: &mut DeviceContext,
    ) -> Option<CleanupReport> {
        if !ctx.legacy_key_registered() {
            debug!("Device {} has no legacy port map entry", device);
            return None;
        }

        let identity = match ctx.physical_device_identity() {
            Some(identity) => identity.to_string(),
            None => {
                error!("Device {} is registered without an identity", device);
                ctx.set_legacy_key_registered(false);
                return None;
            }
        };

        let _op = operation_span("legacy_destroy", "legacy_port_map").entered();
        let report = self.legacy.destroy(self.host.as_ref(), device, &identity);

        if report.entry_absent() {
            ctx.set_legacy_key_registered(false);
            self.devices.publish(DeviceEvent::LegacyRegistrationChanged {
                device: device.clone(),
                registered: false,
            });
        } else {
            error!("Legacy port map entry {} may still exist", identity);
        }

        Some(report)
    }
}
