//! Settings and project description
//!
//! Everything deserializes with serde. Every key is optional and unknown keys are rejected.
//! A complete file looks like
//!
//! ```toml
//! [modbus]
//! port = ""
//! port_pattern = "ttyUSB"
//! baud_rate = 9600
//! parity = "none"
//! timeout_ms = 200
//! retries = 5
//!
//! [poll]
//! interval_ms = 1500
//! write_debounce_ms = 50
//!
//! [[device]]
//! id = 1
//! name = "boiler"
//! address = 5
//! backend = "modbus"
//!
//! [[device.item]]
//! id = 10
//! name = "temperature"
//! register = "input_register"
//! unit = 0
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::BackendKind;
use crate::constants::{poll, serial};
use crate::decode::DecodeLevel;
use crate::types::RegisterKind;

/// Top level settings shared by the scheduler and the backends
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// settings of the Modbus backend
    pub modbus: ModbusConfig,
    /// settings of the poll scheduler
    pub poll: PollConfig,
    /// protocol logging
    pub decode: DecodeLevel,
}

/// Number of data bits per character
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    /// 5 bits per character
    Five,
    /// 6 bits per character
    Six,
    /// 7 bits per character
    Seven,
    /// 8 bits per character
    Eight,
}

/// Parity checking modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit
    None,
    /// Parity bit sets odd number of 1 bits
    Odd,
    /// Parity bit sets even number of 1 bits
    Even,
}

/// Number of stop bits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

/// Flow control modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    /// No flow control
    None,
    /// Flow control using XON/XOFF bytes
    Software,
    /// Flow control using RTS/CTS signals
    Hardware,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(format!("unsupported number of data bits: {value}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(format!("unsupported number of stop bits: {value}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(value: FlowControl) -> Self {
        match value {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Settings of the Modbus backend
///
/// The serial line settings live alongside the protocol settings in the `[modbus]` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModbusConfig {
    /// path of the port, empty to rediscover it by `port_pattern`
    pub port: String,
    /// substring identifying the adapter among the available ports
    pub port_pattern: String,
    /// baud rate
    pub baud_rate: u32,
    /// data bits per character
    pub data_bits: DataBits,
    /// parity
    pub parity: Parity,
    /// stop bits
    pub stop_bits: StopBits,
    /// flow control
    pub flow_control: FlowControl,
    /// time to wait for a response before retrying
    pub timeout_ms: u64,
    /// number of times a request is resent after a timeout
    pub retries: usize,
    /// silent interval between frames, 0 to derive it from the baud rate
    pub inter_frame_delay_us: u64,
    /// capacity of the command queue in front of the engine
    pub max_queued_requests: usize,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            port_pattern: serial::DEFAULT_PORT_PATTERN.to_string(),
            baud_rate: serial::DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout_ms: serial::DEFAULT_TIMEOUT_MS,
            retries: serial::DEFAULT_RETRIES,
            inter_frame_delay_us: 0,
            max_queued_requests: poll::DEFAULT_MAX_QUEUED_REQUESTS,
        }
    }
}

impl ModbusConfig {
    /// response timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// configured inter-frame delay, if any
    pub fn inter_frame_delay(&self) -> Option<Duration> {
        match self.inter_frame_delay_us {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }
}

/// Settings of the poll scheduler
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// time between the start of two poll cycles, below 50 ms polling runs only once
    pub interval_ms: u64,
    /// delay between a routine write request and the flush of the write cache
    pub write_debounce_ms: u64,
    /// delay between a priority write request and the flush of the write cache
    pub priority_write_debounce_ms: u64,
    /// capacity of the request queue in front of the scheduler
    pub max_queued_requests: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: poll::DEFAULT_POLL_INTERVAL_MS,
            write_debounce_ms: poll::DEFAULT_WRITE_DEBOUNCE_MS,
            priority_write_debounce_ms: poll::DEFAULT_PRIORITY_WRITE_DEBOUNCE_MS,
            max_queued_requests: poll::DEFAULT_MAX_QUEUED_REQUESTS,
        }
    }
}

impl PollConfig {
    /// poll interval as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// routine write debounce as a `Duration`
    pub fn write_debounce(&self) -> Duration {
        Duration::from_millis(self.write_debounce_ms)
    }

    /// priority write debounce as a `Duration`
    pub fn priority_write_debounce(&self) -> Duration {
        Duration::from_millis(self.priority_write_debounce_ms)
    }
}

fn no_address() -> i32 {
    -1
}

/// Devices of a project
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// devices in poll order
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceConfig>,
}

/// Description of one device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// unique id
    pub id: u32,
    /// display name
    #[serde(default)]
    pub name: String,
    /// bus address, -1 when the device is not on a bus
    #[serde(default = "no_address")]
    pub address: i32,
    /// backend handling the device, absent for a software-only device
    #[serde(default)]
    pub backend: Option<BackendKind>,
    /// items in configuration order
    #[serde(rename = "item", default)]
    pub items: Vec<ItemConfig>,
}

/// Description of one device item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemConfig {
    /// unique id
    pub id: u32,
    /// display name
    #[serde(default)]
    pub name: String,
    /// register kind, `invalid` when the item is not a register
    #[serde(default)]
    pub register: RegisterKind,
    /// unit offset within the device
    #[serde(default = "no_address")]
    pub unit: i32,
}

impl ProjectConfig {
    /// append a device
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.devices.push(device);
        self
    }
}

impl DeviceConfig {
    /// create a software-only device with no items
    pub fn new(id: u32, name: &str, address: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            address,
            backend: None,
            items: Vec::new(),
        }
    }

    /// assign the backend handling the device
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// append an item
    pub fn with_item(mut self, item: ItemConfig) -> Self {
        self.items.push(item);
        self
    }
}

impl ItemConfig {
    /// create an item description
    pub fn new(id: u32, name: &str, register: RegisterKind, unit: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            register,
            unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.modbus.port_pattern, "ttyUSB");
        assert_eq!(settings.modbus.baud_rate, 9600);
        assert_eq!(settings.modbus.timeout(), Duration::from_millis(200));
        assert_eq!(settings.modbus.retries, 5);
        assert_eq!(settings.modbus.inter_frame_delay(), None);
        assert_eq!(settings.poll.interval(), Duration::from_millis(1500));
        assert_eq!(settings.poll.write_debounce(), Duration::from_millis(50));
    }

    #[test]
    fn serial_keys_share_the_modbus_section() {
        let settings: Settings = toml::from_str(
            r#"
            [modbus]
            port = "/dev/ttyS1"
            baud_rate = 19200
            data_bits = 7
            parity = "even"
            stop_bits = 2
            flow_control = "hardware"
            timeout_ms = 500
            inter_frame_delay_us = 3000

            [poll]
            interval_ms = 10
            "#,
        )
        .unwrap();

        let modbus = &settings.modbus;
        assert_eq!(modbus.port, "/dev/ttyS1");
        assert_eq!(modbus.port_pattern, "ttyUSB");
        assert_eq!(modbus.baud_rate, 19200);
        assert_eq!(modbus.data_bits, DataBits::Seven);
        assert_eq!(modbus.parity, Parity::Even);
        assert_eq!(modbus.stop_bits, StopBits::Two);
        assert_eq!(modbus.flow_control, FlowControl::Hardware);
        assert_eq!(modbus.timeout_ms, 500);
        assert_eq!(
            settings.modbus.inter_frame_delay(),
            Some(Duration::from_micros(3000))
        );
        assert_eq!(settings.poll.interval_ms, 10);
        assert_eq!(settings.poll.write_debounce_ms, 50);
    }

    #[test]
    fn misspelled_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("[poll]\ninterval_msec = 10\n").is_err());
        assert!(toml::from_str::<Settings>("[modbus]\nbaudrate = 19200\n").is_err());
        assert!(toml::from_str::<Settings>("[decode]\nframe = \"header\"\n").is_err());
        assert!(toml::from_str::<Settings>("[polling]\ninterval_ms = 10\n").is_err());
        assert!(toml::from_str::<ProjectConfig>("[[device]]\nid = 1\nadress = 5\n").is_err());
        assert!(toml::from_str::<ProjectConfig>(
            "[[device]]\nid = 1\n[[device.item]]\nid = 2\nregister_type = \"coil\"\n"
        )
        .is_err());
    }

    #[test]
    fn rejects_unsupported_stop_bits() {
        assert!(toml::from_str::<Settings>("[modbus]\nstop_bits = 3").is_err());
    }

    #[test]
    fn parses_devices_and_items() {
        let project: ProjectConfig = toml::from_str(
            r#"
            [[device]]
            id = 1
            name = "boiler"
            address = 5
            backend = "modbus"

            [[device.item]]
            id = 10
            register = "holding_register"
            unit = 2

            [[device]]
            id = 2

            [[device.item]]
            id = 20
            "#,
        )
        .unwrap();

        assert_eq!(project.devices.len(), 2);
        let boiler = &project.devices[0];
        assert_eq!(boiler.backend, Some(BackendKind::Modbus));
        assert_eq!(
            boiler.items,
            vec![ItemConfig::new(10, "", RegisterKind::HoldingRegister, 2)]
        );

        let virt = &project.devices[1];
        assert_eq!(virt.address, -1);
        assert_eq!(virt.backend, None);
        assert_eq!(virt.items[0].register, RegisterKind::Invalid);
        assert_eq!(virt.items[0].unit, -1);
    }
}
