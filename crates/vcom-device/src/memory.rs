/*!
 * In-memory host framework.
 *
 * `MemoryHost` implements `DeviceHost` over plain maps. It stands in for the
 * real framework in tests and simulations: device nodes can be plugged in,
 * devices destroyed (which fires their cleanup hook), any host operation can
 * be made to fail, and the registry contents and open key handles can be
 * inspected afterwards.
 */
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use vcom_core::types::{DeviceHandle, InterfaceClass};

use crate::host::{
    CleanupHook, DeviceHost, DeviceInit, HostError, HostResult, RegistryKey, RegistryValue,
};

const DEVICE_MAP_ROOT: &str = "HARDWARE\\DEVICEMAP";
const ENUM_ROOT: &str = "SYSTEM\\CurrentControlSet\\Enum";

/// Host operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOperation {
    /// `create_device`
    CreateDevice,
    /// `create_device_interface`
    CreateDeviceInterface,
    /// `open_hardware_key`
    OpenHardwareKey,
    /// `create_symbolic_link`
    CreateSymbolicLink,
    /// `query_physical_device_name`
    QueryPhysicalDeviceName,
    /// `open_device_map_key`
    OpenDeviceMapKey,
    /// `RegistryKey::query_value`
    QueryValue,
    /// `RegistryKey::assign_string`
    AssignValue,
    /// `RegistryKey::remove_value`
    RemoveValue,
    /// `RegistryKey::value_names`
    ListValues,
    /// `RegistryKey::remove_key`
    RemoveKey,
}

struct DeviceNode {
    physical_device_name: String,
}

struct DeviceObject {
    instance_id: String,
    cleanup: CleanupHook,
    interfaces: Vec<InterfaceClass>,
    symbolic_links: Vec<String>,
}

#[derive(Default)]
struct HostState {
    registry: BTreeMap<String, BTreeMap<String, RegistryValue>>,
    nodes: HashMap<String, DeviceNode>,
    devices: HashMap<DeviceHandle, DeviceObject>,
    failures: HashMap<HostOperation, HostError>,
    open_keys: usize,
    device_map_opens: usize,
}

impl HostState {
    fn check(&self, op: HostOperation) -> HostResult<()> {
        match self.failures.get(&op) {
            Some(error) => {
                trace!("Injected failure for {:?}: {}", op, error);
                Err(error.clone())
            }
            None => Ok(()),
        }
    }

    fn device(&self, handle: &DeviceHandle) -> HostResult<&DeviceObject> {
        self.devices
            .get(handle)
            .ok_or_else(|| HostError::NotFound(format!("device {}", handle)))
    }

    fn device_mut(&mut self, handle: &DeviceHandle) -> HostResult<&mut DeviceObject> {
        self.devices
            .get_mut(handle)
            .ok_or_else(|| HostError::NotFound(format!("device {}", handle)))
    }
}

fn lock(state: &Mutex<HostState>) -> MutexGuard<'_, HostState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `DeviceHost`
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryHost")
            .field("keys", &state.registry.len())
            .field("devices", &state.devices.len())
            .field("open_keys", &state.open_keys)
            .finish_non_exhaustive()
    }
}

impl MemoryHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of a `HARDWARE\DEVICEMAP` sub-key
    pub fn device_map_path(subkey: &str) -> String {
        format!("{}\\{}", DEVICE_MAP_ROOT, subkey)
    }

    /// Path of a device node's hardware key
    pub fn hardware_key_path(instance_id: &str) -> String {
        format!("{}\\{}\\Device Parameters", ENUM_ROOT, instance_id)
    }

    /// Announce a device node, as the bus enumerator would.
    ///
    /// `port_name` is what the ports class installer wrote to the node's
    /// hardware key, if anything.
    pub fn plug_in(
        &self,
        instance_id: &str,
        physical_device_name: &str,
        port_name: Option<&str>,
    ) -> DeviceInit {
        let mut state = lock(&self.state);
        state.nodes.insert(
            instance_id.to_string(),
            DeviceNode {
                physical_device_name: physical_device_name.to_string(),
            },
        );

        let values = state
            .registry
            .entry(Self::hardware_key_path(instance_id))
            .or_default();
        if let Some(port_name) = port_name {
            values.insert("PortName".to_string(), RegistryValue::from(port_name));
        }

        debug!("Plugged in {} ({})", instance_id, physical_device_name);
        DeviceInit::new(instance_id)
    }

    /// Overwrite a value in a device node's hardware key
    pub fn set_hardware_value(&self, instance_id: &str, name: &str, value: RegistryValue) {
        self.seed_value(&Self::hardware_key_path(instance_id), name, value);
    }

    /// Write a value directly into the registry, creating the key
    pub fn seed_value(&self, path: &str, name: &str, value: RegistryValue) {
        lock(&self.state)
            .registry
            .entry(path.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Destroy a device object, running its cleanup hook.
    ///
    /// Returns false if the handle is unknown. Symbolic links and interfaces
    /// of the device go with it.
    pub fn destroy_device(&self, handle: &DeviceHandle) -> bool {
        let cleanup = match lock(&self.state).devices.get(handle) {
            Some(object) => {
                debug!("Destroying device {} ({})", handle, object.instance_id);
                object.cleanup.clone()
            }
            None => return false,
        };

        // The object stays valid while its hook runs; the hook calls back
        // into the host, so the lock is not held.
        cleanup(handle);

        lock(&self.state).devices.remove(handle);
        true
    }

    /// Make every call of `op` fail with `error` until cleared
    pub fn fail_on(&self, op: HostOperation, error: HostError) {
        lock(&self.state).failures.insert(op, error);
    }

    /// Stop failing `op`
    pub fn clear_failure(&self, op: HostOperation) {
        lock(&self.state).failures.remove(&op);
    }

    /// Stop failing every operation
    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    /// Handles of live device objects
    pub fn device_handles(&self) -> Vec<DeviceHandle> {
        lock(&self.state).devices.keys().cloned().collect()
    }

    /// Symbolic links of a device
    pub fn symbolic_links(&self, handle: &DeviceHandle) -> Vec<String> {
        lock(&self.state)
            .devices
            .get(handle)
            .map(|d| d.symbolic_links.clone())
            .unwrap_or_default()
    }

    /// Interface classes a device is published under
    pub fn interfaces(&self, handle: &DeviceHandle) -> Vec<InterfaceClass> {
        lock(&self.state)
            .devices
            .get(handle)
            .map(|d| d.interfaces.clone())
            .unwrap_or_default()
    }

    /// Read a registry value
    pub fn registry_value(&self, path: &str, name: &str) -> Option<RegistryValue> {
        lock(&self.state)
            .registry
            .get(path)
            .and_then(|values| values.get(name).cloned())
    }

    /// Whether a registry key exists
    pub fn key_exists(&self, path: &str) -> bool {
        lock(&self.state).registry.contains_key(path)
    }

    /// Number of registry key handles currently open
    pub fn open_key_count(&self) -> usize {
        lock(&self.state).open_keys
    }

    /// Number of times any device map key was opened
    pub fn device_map_open_count(&self) -> usize {
        lock(&self.state).device_map_opens
    }

    fn open_key(&self, state: &mut HostState, path: String) -> Box<dyn RegistryKey> {
        state.open_keys += 1;
        Box::new(MemoryKey {
            state: self.state.clone(),
            path,
        })
    }

    #[cfg(test)]
    pub(crate) fn plug_in_and_create(
        &self,
        instance_id: &str,
        physical_device_name: &str,
        port_name: Option<&str>,
    ) -> DeviceHandle {
        let init = self.plug_in(instance_id, physical_device_name, port_name);
        self.create_device(init, Arc::new(|_: &DeviceHandle| {}))
            .expect("device creation")
    }
}

impl DeviceHost for MemoryHost {
    fn create_device(&self, init: DeviceInit, cleanup: CleanupHook) -> HostResult<DeviceHandle> {
        let mut state = lock(&self.state);
        state.check(HostOperation::CreateDevice)?;

        if !state.nodes.contains_key(&init.instance_id) {
            return Err(HostError::NotFound(format!("device node {}", init.instance_id)));
        }

        let handle = DeviceHandle::new();
        state.devices.insert(
            handle.clone(),
            DeviceObject {
                instance_id: init.instance_id,
                cleanup,
                interfaces: Vec::new(),
                symbolic_links: Vec::new(),
            },
        );

        Ok(handle)
    }

    fn create_device_interface(&self, device: &DeviceHandle, class: InterfaceClass) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.check(HostOperation::CreateDeviceInterface)?;

        let object = state.device_mut(device)?;
        if !object.interfaces.contains(&class) {
            object.interfaces.push(class);
        }
        Ok(())
    }

    fn open_hardware_key(&self, device: &DeviceHandle) -> HostResult<Box<dyn RegistryKey>> {
        let mut state = lock(&self.state);
        state.check(HostOperation::OpenHardwareKey)?;

        let path = Self::hardware_key_path(&state.device(device)?.instance_id);
        if !state.registry.contains_key(&path) {
            return Err(HostError::NotFound(path));
        }

        Ok(self.open_key(&mut state, path))
    }

    fn create_symbolic_link(&self, device: &DeviceHandle, name: &str) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.check(HostOperation::CreateSymbolicLink)?;
        state.device(device)?;

        let taken = state
            .devices
            .values()
            .any(|d| d.symbolic_links.iter().any(|l| l.eq_ignore_ascii_case(name)));
        if taken {
            return Err(HostError::Failed(format!("object name collision: {}", name)));
        }

        state.device_mut(device)?.symbolic_links.push(name.to_string());
        Ok(())
    }

    fn query_physical_device_name(&self, device: &DeviceHandle) -> HostResult<String> {
        let state = lock(&self.state);
        state.check(HostOperation::QueryPhysicalDeviceName)?;

        let instance_id = &state.device(device)?.instance_id;
        state
            .nodes
            .get(instance_id)
            .map(|node| node.physical_device_name.clone())
            .ok_or_else(|| HostError::NotFound(format!("device node {}", instance_id)))
    }

    fn open_device_map_key(&self, device: &DeviceHandle, subkey: &str) -> HostResult<Box<dyn RegistryKey>> {
        let mut state = lock(&self.state);
        state.check(HostOperation::OpenDeviceMapKey)?;
        state.device(device)?;
        state.device_map_opens += 1;

        let path = Self::device_map_path(subkey);
        state.registry.entry(path.clone()).or_default();

        Ok(self.open_key(&mut state, path))
    }
}

/// Open key handle into a `MemoryHost` registry
struct MemoryKey {
    state: Arc<Mutex<HostState>>,
    path: String,
}

impl fmt::Debug for MemoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKey").field("path", &self.path).finish()
    }
}

impl MemoryKey {
    fn missing(&self) -> HostError {
        HostError::NotFound(format!("key {}", self.path))
    }
}

impl RegistryKey for MemoryKey {
    fn path(&self) -> &str {
        &self.path
    }

    fn query_value(&self, name: &str) -> HostResult<RegistryValue> {
        let state = lock(&self.state);
        state.check(HostOperation::QueryValue)?;

        let values = state.registry.get(&self.path).ok_or_else(|| self.missing())?;
        values
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("value {} under {}", name, self.path)))
    }

    fn assign_string(&mut self, name: &str, value: &str) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.check(HostOperation::AssignValue)?;

        let missing = self.missing();
        let values = state.registry.get_mut(&self.path).ok_or(missing)?;
        values.insert(name.to_string(), RegistryValue::from(value));
        Ok(())
    }

    fn remove_value(&mut self, name: &str) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.check(HostOperation::RemoveValue)?;

        let missing = self.missing();
        let values = state.registry.get_mut(&self.path).ok_or(missing)?;
        values
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| HostError::NotFound(format!("value {} under {}", name, self.path)))
    }

    fn value_names(&self) -> HostResult<Vec<String>> {
        let state = lock(&self.state);
        state.check(HostOperation::ListValues)?;

        let values = state.registry.get(&self.path).ok_or_else(|| self.missing())?;
        Ok(values.keys().cloned().collect())
    }

    fn remove_key(&mut self) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.check(HostOperation::RemoveKey)?;

        state.registry.remove(&self.path).map(|_| ()).ok_or_else(|| self.missing())
    }
}

impl Drop for MemoryKey {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_keys = state.open_keys.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vcom_core::types::GUID_DEVINTERFACE_COMPORT;

    #[test]
    fn test_create_requires_plugged_node() {
        let host = MemoryHost::new();
        let result = host.create_device(DeviceInit::new("ROOT\\PORTS\\9999"), Arc::new(|_: &DeviceHandle| {}));
        assert!(matches!(result, Err(HostError::NotFound(_))));
    }

    #[test]
    fn test_destroy_runs_cleanup_hook() {
        let host = MemoryHost::new();
        let init = host.plug_in("ROOT\\PORTS\\0000", "\\Device\\00000001", Some("COM1"));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = host
            .create_device(init, Arc::new(move |_: &DeviceHandle| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        host.create_device_interface(&handle, GUID_DEVINTERFACE_COMPORT).unwrap();
        host.create_symbolic_link(&handle, "\\DosDevices\\Global\\COM1").unwrap();

        assert!(host.destroy_device(&handle));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(host.symbolic_links(&handle).is_empty());
        assert!(host.interfaces(&handle).is_empty());

        assert!(!host.destroy_device(&handle));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_device_is_live_while_hook_runs() {
        let host = MemoryHost::new();
        let init = host.plug_in("ROOT\\PORTS\\0000", "\\Device\\00000001", Some("COM1"));
        let path = MemoryHost::device_map_path("SERIALCOMM");
        host.seed_value(&path, "\\Device\\00000001", RegistryValue::from("COM1"));

        let seen = Arc::new(Mutex::new(None));
        let record = seen.clone();
        let hook_host = host.clone();
        let handle = host
            .create_device(init, Arc::new(move |device: &DeviceHandle| {
                let links = hook_host.symbolic_links(device);
                let removed = hook_host
                    .open_device_map_key(device, "SERIALCOMM")
                    .and_then(|mut key| key.remove_value("\\Device\\00000001"));
                *record.lock().unwrap() = Some((links, removed));
            }))
            .unwrap();
        host.create_symbolic_link(&handle, "\\DosDevices\\Global\\COM1").unwrap();

        assert!(host.destroy_device(&handle));

        let (links, removed) = seen.lock().unwrap().take().unwrap();
        assert_eq!(links, vec!["\\DosDevices\\Global\\COM1".to_string()]);
        assert_eq!(removed, Ok(()));
        assert_eq!(host.registry_value(&path, "\\Device\\00000001"), None);
        assert_eq!(host.open_key_count(), 0);

        // Gone once the hook has returned
        assert!(host.device_handles().is_empty());
        assert!(host.symbolic_links(&handle).is_empty());
    }

    #[test]
    fn test_symbolic_link_collision() {
        let host = MemoryHost::new();
        let a = host.plug_in_and_create("ROOT\\PORTS\\0000", "\\Device\\00000001", Some("COM1"));
        let b = host.plug_in_and_create("ROOT\\PORTS\\0001", "\\Device\\00000002", Some("COM1"));

        host.create_symbolic_link(&a, "\\DosDevices\\Global\\COM1").unwrap();
        assert!(host.create_symbolic_link(&b, "\\DosDevices\\Global\\com1").is_err());
    }

    #[test]
    fn test_key_handles_are_counted() {
        let host = MemoryHost::new();
        let handle = host.plug_in_and_create("ROOT\\PORTS\\0000", "\\Device\\00000001", Some("COM1"));

        let key = host.open_hardware_key(&handle).unwrap();
        let mut map = host.open_device_map_key(&handle, "SERIALCOMM").unwrap();
        assert_eq!(host.open_key_count(), 2);
        assert_eq!(host.device_map_open_count(), 1);

        assert_eq!(key.query_value("PortName").unwrap(), RegistryValue::from("COM1"));
        map.assign_string("\\Device\\00000001", "COM1").unwrap();
        assert_eq!(map.value_names().unwrap(), vec!["\\Device\\00000001".to_string()]);

        drop(key);
        drop(map);
        assert_eq!(host.open_key_count(), 0);
    }

    #[test]
    fn test_removed_key_reports_not_found() {
        let host = MemoryHost::new();
        let handle = host.plug_in_and_create("ROOT\\PORTS\\0000", "\\Device\\00000001", None);

        let mut map = host.open_device_map_key(&handle, "SERIALCOMM").unwrap();
        map.remove_key().unwrap();
        assert!(!host.key_exists(&MemoryHost::device_map_path("SERIALCOMM")));
        assert!(map.remove_value("x").unwrap_err().is_not_found());
        assert!(map.remove_key().unwrap_err().is_not_found());
    }

    #[test]
    fn test_failure_injection() {
        let host = MemoryHost::new();
        let handle = host.plug_in_and_create("ROOT\\PORTS\\0000", "\\Device\\00000001", None);

        host.fail_on(HostOperation::QueryPhysicalDeviceName, HostError::Failed("boom".into()));
        assert!(host.query_physical_device_name(&handle).is_err());

        host.clear_failure(HostOperation::QueryPhysicalDeviceName);
        assert_eq!(host.query_physical_device_name(&handle).unwrap(), "\\Device\\00000001");
    }
}
