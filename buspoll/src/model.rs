//! Devices and items as seen by the scheduler and its backends
//!
//! The model only carries what polling needs: addresses, register kinds, unit offsets and
//! the last known raw value of every item. Value changes are published on a broadcast
//! channel obtained with [`Project::subscribe`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::capability::BackendKind;
use crate::config::{DeviceConfig, ProjectConfig};
use crate::constants::poll::CHANGE_CHANNEL_CAPACITY;
use crate::error::ConfigError;
use crate::types::{RegisterKind, Value};

/// Identifier of a device item, unique within a project
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u32);

/// Identifier of a device, unique within a project
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notification that the raw value of an item changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemChange {
    /// item whose value changed
    pub item: ItemId,
    /// new value, `None` when the item became disconnected
    pub value: Option<Value>,
    /// user that requested the change, `None` for values read from the bus
    pub user_id: Option<u32>,
}

/// Single addressable value belonging to a device
#[derive(Debug)]
pub struct DeviceItem {
    id: ItemId,
    name: String,
    device: DeviceId,
    device_address: i32,
    kind: RegisterKind,
    unit: i32,
    value: Mutex<Option<Value>>,
    changes: broadcast::Sender<ItemChange>,
}

impl DeviceItem {
    /// Identifier of the item
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Display name of the item
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device the item belongs to
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Bus address of the owning device
    pub fn device_address(&self) -> i32 {
        self.device_address
    }

    /// Register kind of the item
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    /// Offset of the item within its device's address space for its kind
    pub fn unit(&self) -> i32 {
        self.unit
    }

    /// Last known raw value
    pub fn raw_value(&self) -> Option<Value> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a value has been read or assigned
    pub fn is_connected(&self) -> bool {
        self.raw_value().is_some()
    }

    /// Set the raw value as observed on the bus
    ///
    /// Returns true if the value changed. Setting the same value again is a no-op.
    pub fn set_raw_value(&self, value: Option<Value>) -> bool {
        self.set_raw_value_from(value, None)
    }

    /// Set the raw value on behalf of a user
    pub fn set_raw_value_from(&self, value: Option<Value>, user_id: Option<u32>) -> bool {
        {
            let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == value {
                return false;
            }
            *current = value;
        }

        // nobody listening is fine
        let _ = self.changes.send(ItemChange {
            item: self.id,
            value,
            user_id,
        });
        true
    }
}

impl std::fmt::Display for DeviceItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "item {}", self.id)
        } else {
            write!(f, "'{}' ({})", self.name, self.id)
        }
    }
}

/// Field device with an ordered collection of items
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    name: String,
    address: i32,
    backend: Option<BackendKind>,
    items: Vec<Arc<DeviceItem>>,
}

impl Device {
    /// Identifier of the device
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Display name of the device
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus address, only `1..=255` can be polled
    pub fn address(&self) -> i32 {
        self.address
    }

    /// Backend responsible for the device, `None` for software-only devices
    pub fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    /// Items in configuration order
    pub fn items(&self) -> &[Arc<DeviceItem>] {
        &self.items
    }

    fn from_config(config: &DeviceConfig, changes: &broadcast::Sender<ItemChange>) -> Self {
        let id = DeviceId(config.id);
        let items = config
            .items
            .iter()
            .map(|item| {
                Arc::new(DeviceItem {
                    id: ItemId(item.id),
                    name: item.name.clone(),
                    device: id,
                    device_address: config.address,
                    kind: item.register,
                    unit: item.unit,
                    value: Mutex::new(None),
                    changes: changes.clone(),
                })
            })
            .collect();

        Self {
            id,
            name: config.name.clone(),
            address: config.address,
            backend: config.backend,
            items,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "device {}", self.id)
        } else {
            write!(f, "'{}' ({})", self.name, self.id)
        }
    }
}

/// All devices known to one controller
#[derive(Debug)]
pub struct Project {
    devices: Vec<Device>,
    items: HashMap<ItemId, Arc<DeviceItem>>,
    changes: broadcast::Sender<ItemChange>,
}

impl Project {
    /// Build the project described by a configuration
    ///
    /// Device and item ids must be unique. Devices handled by the same backend must not
    /// share a bus address.
    pub fn from_config(config: &ProjectConfig) -> Result<Self, ConfigError> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let mut device_ids = HashSet::new();
        let mut addresses = HashSet::new();
        let mut items = HashMap::new();
        let mut devices = Vec::with_capacity(config.devices.len());

        for device in &config.devices {
            if !device_ids.insert(device.id) {
                return Err(ConfigError::DuplicateDeviceId(device.id));
            }
            if let Some(backend) = device.backend {
                if device.address > 0 && !addresses.insert((backend, device.address)) {
                    return Err(ConfigError::DuplicateAddress(device.address));
                }
            }

            let device = Device::from_config(device, &changes);
            for item in device.items() {
                if items.insert(item.id(), item.clone()).is_some() {
                    return Err(ConfigError::DuplicateItemId(item.id().0));
                }
            }
            devices.push(device);
        }

        Ok(Self {
            devices,
            items,
            changes,
        })
    }

    /// Devices in configuration order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Look up a device by id
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Look up an item by id
    pub fn item(&self, id: ItemId) -> Option<&Arc<DeviceItem>> {
        self.items.get(&id)
    }

    /// Receive every subsequent item change
    pub fn subscribe(&self) -> broadcast::Receiver<ItemChange> {
        self.changes.subscribe()
    }
}

/// Value requested for an item, waiting to be written
#[derive(Clone, Debug)]
pub struct PendingWrite {
    /// target item
    pub item: Arc<DeviceItem>,
    /// requested raw value
    pub value: Value,
    /// user that requested the write
    pub user_id: u32,
}
