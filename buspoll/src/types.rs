use serde::{Deserialize, Serialize};

use crate::constants::limits;
use crate::error::InvalidRange;

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }

    /// Map a configured device address onto a unit id
    ///
    /// Only addresses in `1..=255` identify a single device. Zero is the RTU broadcast
    /// address and is never polled.
    pub fn from_address(address: i32) -> Option<Self> {
        match u8::try_from(address) {
            Ok(0) | Err(_) => None,
            Ok(value) => Some(Self { value }),
        }
    }

    /// Returns true if the address is reserved in RTU mode
    pub fn is_rtu_reserved(&self) -> bool {
        self.value >= 248
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Start and count tuple describing a block of consecutive units
///
/// Cannot be constructed with invalid start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

impl AddressRange {
    /// Create a new address range
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidRange> {
        if count == 0 {
            return Err(InvalidRange::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);

        if start > max_start {
            return Err(InvalidRange::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    /// Converts to std::ops::Range
    pub fn to_std_range(self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        let end = start + (self.count as usize);
        start..end
    }

    pub(crate) fn limited_count(self, limit: u16) -> Result<Self, InvalidRange> {
        if self.count > limit {
            return Err(InvalidRange::CountTooLargeForType(self.count, limit));
        }
        Ok(self)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

/// Protocol level classification of an addressable unit
///
/// The ordering `Invalid < DiscreteInput < Coil < InputRegister < HoldingRegister` is
/// significant: only `Coil` and `HoldingRegister` accept writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Not a Modbus register (file transfer, virtual values, ...)
    #[default]
    Invalid,
    /// Read-only bit
    DiscreteInput,
    /// Read/write bit
    Coil,
    /// Read-only word
    InputRegister,
    /// Read/write word
    HoldingRegister,
}

impl RegisterKind {
    /// True for every kind that maps onto a Modbus table
    pub fn is_valid(self) -> bool {
        self > RegisterKind::Invalid
    }

    /// True if items of this kind may be written
    pub fn is_writable(self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::HoldingRegister)
    }

    /// True for the single bit kinds
    pub fn is_bit(self) -> bool {
        matches!(self, RegisterKind::DiscreteInput | RegisterKind::Coil)
    }

    /// Maximum number of units a single read request may cover
    pub(crate) fn max_read_count(self) -> u16 {
        if self.is_bit() {
            limits::MAX_READ_COILS_COUNT
        } else {
            limits::MAX_READ_REGISTERS_COUNT
        }
    }

    /// Maximum number of units a single write request may cover
    pub(crate) fn max_write_count(self) -> u16 {
        if self.is_bit() {
            limits::MAX_WRITE_COILS_COUNT
        } else {
            limits::MAX_WRITE_REGISTERS_COUNT
        }
    }

    /// Convert a raw unit read from the bus into an item value
    pub(crate) fn to_value(self, raw: u16) -> Value {
        if self.is_bit() {
            Value::Bool(raw != 0)
        } else {
            Value::Int(i64::from(raw))
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterKind::Invalid => f.write_str("Invalid"),
            RegisterKind::DiscreteInput => f.write_str("DiscreteInputs"),
            RegisterKind::Coil => f.write_str("Coils"),
            RegisterKind::InputRegister => f.write_str("InputRegisters"),
            RegisterKind::HoldingRegister => f.write_str("HoldingRegisters"),
        }
    }
}

/// Raw value of a device item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// state of a bit
    Bool(bool),
    /// numeric value of a register
    Int(i64),
}

impl Value {
    /// Encode the value as a single register or bit.
    ///
    /// Returns `None` for integers that do not fit into a `u16`.
    pub fn to_register(self) -> Option<u16> {
        match self {
            Value::Bool(x) => Some(u16::from(x)),
            Value::Int(x) => u16::try_from(x).ok(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(x) => write!(f, "{x}"),
            Value::Int(x) => write!(f, "{x}"),
        }
    }
}
