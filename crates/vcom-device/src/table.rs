/*!
 * Device context table.
 *
 * Maps every host device handle to its state record. This is the
 * back-reference the cleanup hook and transport code use to reach a device's
 * record, and the place lifecycle events are broadcast from.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, error};

use vcom_core::types::DeviceHandle;

use crate::context::{DeviceContext, SharedDeviceContext};
use crate::error::{DeviceError, Result};

/// Lifecycle events published by the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A record was bound to a new device object
    Created(DeviceHandle),
    /// Configuration finished
    Configured {
        /// The device handle
        device: DeviceHandle,
        /// The published port name
        port_name: String,
        /// Whether the legacy port map entry was written
        legacy_registered: bool,
    },
    /// Configuration aborted
    ConfigurationFailed {
        /// The device handle
        device: DeviceHandle,
        /// The error that aborted it
        error: String,
    },
    /// The legacy registration flag changed
    LegacyRegistrationChanged {
        /// The device handle
        device: DeviceHandle,
        /// The new flag value
        registered: bool,
    },
    /// The cleanup hook ran and the record was released
    CleanedUp(DeviceHandle),
}

/// Handle -> record table
#[derive(Debug)]
pub struct DeviceTable {
    contexts: RwLock<HashMap<DeviceHandle, SharedDeviceContext>>,
    event_sender: broadcast::Sender<DeviceEvent>,
}

impl DeviceTable {
    /// Create an empty table
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            contexts: RwLock::new(HashMap::new()),
            event_sender,
        }
    }

    /// Bind a record to its device handle
    pub fn bind(&self, context: DeviceContext) -> Result<SharedDeviceContext> {
        let handle = context.handle().clone();
        let mut contexts = self.contexts.write().map_err(|_| {
            DeviceError::context("Failed to acquire write lock on device table")
        })?;

        if contexts.contains_key(&handle) {
            return Err(DeviceError::invalid_state(format!(
                "Device {} already has a context",
                handle
            )));
        }

        let shared = Arc::new(Mutex::new(context));
        contexts.insert(handle.clone(), shared.clone());
        debug!("Bound context for device {}", handle);

        Ok(shared)
    }

    /// Release the record of a device
    pub fn unbind(&self, handle: &DeviceHandle) -> Result<SharedDeviceContext> {
        let mut contexts = self.contexts.write().map_err(|_| {
            DeviceError::context("Failed to acquire write lock on device table")
        })?;

        let context = contexts
            .remove(handle)
            .ok_or_else(|| DeviceError::context(format!("Device {} has no context", handle)))?;
        debug!("Unbound context for device {}", handle);

        Ok(context)
    }

    /// Remove the record of a device for teardown.
    ///
    /// Unlike `unbind`, a poisoned table is recovered so the record can still
    /// be released. Returns `None` if the device has no record.
    pub fn release(&self, handle: &DeviceHandle) -> Option<SharedDeviceContext> {
        let mut contexts = match self.contexts.write() {
            Ok(contexts) => contexts,
            Err(poisoned) => {
                error!("Device table lock poisoned while releasing device {}", handle);
                poisoned.into_inner()
            }
        };

        let context = contexts.remove(handle);
        if context.is_some() {
            debug!("Released context for device {}", handle);
        }
        context
    }

    /// Get the record of a device
    pub fn get(&self, handle: &DeviceHandle) -> Result<SharedDeviceContext> {
        let contexts = self.contexts.read().map_err(|_| {
            DeviceError::context("Failed to acquire read lock on device table")
        })?;

        contexts
            .get(handle)
            .cloned()
            .ok_or_else(|| DeviceError::context(format!("Device {} has no context", handle)))
    }

    /// Run `f` with exclusive access to a device's record
    pub fn with_context<R>(
        &self,
        handle: &DeviceHandle,
        f: impl FnOnce(&mut DeviceContext) -> R,
    ) -> Result<R> {
        let context = self.get(handle)?;
        let mut guard = lock_context(&context)?;
        Ok(f(&mut *guard))
    }

    /// All bound device handles
    pub fn handles(&self) -> Result<Vec<DeviceHandle>> {
        let contexts = self.contexts.read().map_err(|_| {
            DeviceError::context("Failed to acquire read lock on device table")
        })?;

        Ok(contexts.keys().cloned().collect())
    }

    /// Number of bound records
    pub fn len(&self) -> Result<usize> {
        let contexts = self.contexts.read().map_err(|_| {
            DeviceError::context("Failed to acquire read lock on device table")
        })?;

        Ok(contexts.len())
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether a device has a record
    pub fn contains(&self, handle: &DeviceHandle) -> Result<bool> {
        let contexts = self.contexts.read().map_err(|_| {
            DeviceError::context("Failed to acquire read lock on device table")
        })?;

        Ok(contexts.contains_key(handle))
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_sender.subscribe()
    }

    pub(crate) fn publish(&self, event: DeviceEvent) {
        // No subscribers is fine
        let _ = self.event_sender.send(event);
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = self.contexts.write();
                panic!("device table poisoned");
            })
            .join()
        });
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a record, reporting a poisoned lock as an error
pub fn lock_context(context: &SharedDeviceContext) -> Result<MutexGuard<'_, DeviceContext>> {
    context
        .lock()
        .map_err(|_| DeviceError::context("Device context lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::SerialTimeouts;

    #[test]
    fn test_bind_get_unbind() {
        let table = DeviceTable::new();
        let handle = DeviceHandle::from_string("dev-0");

        table.bind(DeviceContext::new(handle.clone())).unwrap();
        assert!(table.contains(&handle).unwrap());
        assert_eq!(table.len().unwrap(), 1);
        assert_eq!(table.handles().unwrap(), vec![handle.clone()]);

        let context = table.get(&handle).unwrap();
        assert_eq!(lock_context(&context).unwrap().handle(), &handle);

        table.unbind(&handle).unwrap();
        assert!(table.is_empty().unwrap());
        assert!(matches!(table.get(&handle), Err(DeviceError::ContextUnavailable(_))));
        assert!(table.unbind(&handle).is_err());
    }

    #[test]
    fn test_double_bind_rejected() {
        let table = DeviceTable::new();
        let handle = DeviceHandle::new();

        table.bind(DeviceContext::new(handle.clone())).unwrap();
        assert!(matches!(
            table.bind(DeviceContext::new(handle)),
            Err(DeviceError::InvalidState(_))
        ));
    }

    #[test]
    fn test_with_context_mutates_record() {
        let table = DeviceTable::new();
        let handle = DeviceHandle::new();
        table.bind(DeviceContext::new(handle.clone())).unwrap();

        let timeouts = SerialTimeouts {
            read_interval: 10,
            read_total_multiplier: 1,
            read_total_constant: 100,
            write_total_multiplier: 2,
            write_total_constant: 200,
        };

        table
            .with_context(&handle, |ctx| {
                ctx.registers_mut().set_timeouts(timeouts);
                *ctx.registers_mut().line_control_register_mut() |= 0x03;
            })
            .unwrap();

        let (read_back, lcr) = table
            .with_context(&handle, |ctx| {
                (ctx.registers().timeouts(), ctx.registers().line_control_register())
            })
            .unwrap();
        assert_eq!(read_back, timeouts);
        assert_eq!(lcr, 0x03);
    }

    #[test]
    fn test_release_recovers_poisoned_table() {
        let table = DeviceTable::new();
        let handle = DeviceHandle::new();
        table.bind(DeviceContext::new(handle.clone())).unwrap();

        table.poison();
        assert!(matches!(table.get(&handle), Err(DeviceError::ContextUnavailable(_))));

        let context = table.release(&handle).unwrap();
        assert_eq!(lock_context(&context).unwrap().handle(), &handle);
        assert!(table.release(&handle).is_none());
    }

    #[test]
    fn test_events_are_broadcast() {
        let table = DeviceTable::new();
        let mut rx = table.subscribe();
        let handle = DeviceHandle::new();

        table.publish(DeviceEvent::Created(handle.clone()));
        assert_eq!(rx.try_recv().unwrap(), DeviceEvent::Created(handle));
    }
}
