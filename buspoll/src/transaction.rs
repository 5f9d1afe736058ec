use std::sync::Arc;

use crate::error::{InvalidItem, InvalidRange};
use crate::model::DeviceItem;
use crate::pack::Pack;
use crate::types::{AddressRange, RegisterKind, UnitId};

/// What a transaction does with its range
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// read the values of the range
    Read,
    /// write one value per unit of the range
    Write(Vec<u16>),
}

/// Item value waiting to be written, as collected by the pack builder
#[derive(Clone, Debug)]
pub struct WriteEntry {
    /// target item
    pub item: Arc<DeviceItem>,
    /// encoded value
    pub value: u16,
    /// user that requested the write
    pub user_id: u32,
}

/// One contiguous range access against one device
///
/// Immutable once constructed. Items are ordered so that `items[i]` lives at
/// `range.start + i`.
#[derive(Clone, Debug)]
pub struct BusTransaction {
    unit_id: UnitId,
    kind: RegisterKind,
    range: AddressRange,
    items: Vec<Arc<DeviceItem>>,
    /// users that requested each written value, empty for reads
    users: Vec<u32>,
    operation: Operation,
}

impl BusTransaction {
    /// Read all items of a pack
    pub fn read(pack: Pack<Arc<DeviceItem>>) -> Result<Self, InvalidItem> {
        let range = Self::validate(&pack, pack.kind.max_read_count())?;
        Ok(Self {
            unit_id: pack.unit_id,
            kind: pack.kind,
            range,
            items: pack.entries,
            users: Vec::new(),
            operation: Operation::Read,
        })
    }

    /// Write all entries of a pack
    pub fn write(pack: Pack<WriteEntry>) -> Result<Self, InvalidItem> {
        if !pack.kind.is_writable() {
            return Err(InvalidItem::ReadOnly(pack.kind));
        }
        let range = Self::validate(&pack, pack.kind.max_write_count())?;
        let users = pack.entries.iter().map(|e| e.user_id).collect();
        let (items, values) = pack.entries.into_iter().map(|e| (e.item, e.value)).unzip();
        Ok(Self {
            unit_id: pack.unit_id,
            kind: pack.kind,
            range,
            items,
            users,
            operation: Operation::Write(values),
        })
    }

    fn validate<T>(pack: &Pack<T>, limit: u16) -> Result<AddressRange, InvalidItem> {
        if pack.unit_id.value == 0 {
            return Err(InvalidItem::BadAddress(0));
        }
        if !pack.kind.is_valid() {
            return Err(InvalidItem::InvalidKind);
        }
        let count = u16::try_from(pack.entries.len())
            .map_err(|_| InvalidItem::Range(InvalidRange::CountTooLargeForType(u16::MAX, limit)))?;
        Ok(AddressRange::try_from(pack.start, count)?.limited_count(limit)?)
    }

    /// Device addressed by the transaction
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Kind of every unit in the range
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    /// Units covered
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// Items in unit order
    pub fn items(&self) -> &[Arc<DeviceItem>] {
        &self.items
    }

    /// Users that requested the written values, in unit order
    pub fn users(&self) -> &[u32] {
        &self.users
    }

    /// Read or write
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// True for a write transaction
    pub fn is_write(&self) -> bool {
        matches!(self.operation, Operation::Write(_))
    }

    /// True if both transactions read the same units of the same device
    pub(crate) fn is_same_read(&self, other: &BusTransaction) -> bool {
        self.operation == Operation::Read
            && other.operation == Operation::Read
            && self.unit_id == other.unit_id
            && self.kind == other.kind
            && self.range == other.range
    }
}

impl std::fmt::Display for BusTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.operation {
            Operation::Read => "read",
            Operation::Write(_) => "write",
        };
        write!(f, "{op} unit {} {} {}", self.unit_id, self.kind, self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::BackendKind;
    use crate::config::{DeviceConfig, ItemConfig, ProjectConfig};
    use crate::model::{ItemId, Project};
    use crate::pack::{Access, PackBuilder};

    fn project() -> Project {
        let config = ProjectConfig::default().with_device(
            DeviceConfig::new(1, "meter", 7)
                .with_backend(BackendKind::Modbus)
                .with_item(ItemConfig::new(1, "a", RegisterKind::HoldingRegister, 10))
                .with_item(ItemConfig::new(2, "b", RegisterKind::HoldingRegister, 11))
                .with_item(ItemConfig::new(3, "c", RegisterKind::InputRegister, 0)),
        );
        Project::from_config(&config).unwrap()
    }

    #[test]
    fn reads_keep_items_in_unit_order() {
        let project = project();
        let mut builder = PackBuilder::new(Access::Read);
        for id in [2, 1] {
            let item = project.item(ItemId(id)).unwrap();
            builder
                .add(item.device_address(), item.kind(), item.unit(), item.clone())
                .unwrap();
        }
        let tx = BusTransaction::read(builder.finish().remove(0)).unwrap();

        assert_eq!(tx.unit_id(), UnitId::new(7));
        assert_eq!(tx.range(), AddressRange::try_from(10, 2).unwrap());
        let ids: Vec<_> = tx.items().iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec![ItemId(1), ItemId(2)]);
        assert_eq!(tx.to_string(), "read unit 7 HoldingRegisters start: 0x000A qty: 2");
        assert!(tx.users().is_empty());
    }

    #[test]
    fn writes_carry_their_values() {
        let project = project();
        let item = project.item(ItemId(1)).unwrap().clone();
        let pack = Pack {
            unit_id: UnitId::new(7),
            kind: RegisterKind::HoldingRegister,
            start: 10,
            entries: vec![WriteEntry {
                item,
                value: 0x1234,
                user_id: 3,
            }],
        };
        let tx = BusTransaction::write(pack).unwrap();
        assert!(tx.is_write());
        assert_eq!(tx.operation(), &Operation::Write(vec![0x1234]));
        assert_eq!(tx.users(), &[3]);
    }

    #[test]
    fn rejects_writes_to_read_only_kinds() {
        let project = project();
        let item = project.item(ItemId(3)).unwrap().clone();
        let pack = Pack {
            unit_id: UnitId::new(7),
            kind: RegisterKind::InputRegister,
            start: 0,
            entries: vec![WriteEntry {
                item,
                value: 1,
                user_id: 0,
            }],
        };
        assert_eq!(
            BusTransaction::write(pack).unwrap_err(),
            InvalidItem::ReadOnly(RegisterKind::InputRegister)
        );
    }

    #[test]
    fn rejects_empty_and_oversized_packs() {
        let empty: Pack<Arc<DeviceItem>> = Pack {
            unit_id: UnitId::new(1),
            kind: RegisterKind::Coil,
            start: 0,
            entries: Vec::new(),
        };
        assert_eq!(
            BusTransaction::read(empty).unwrap_err(),
            InvalidItem::Range(InvalidRange::CountOfZero)
        );

        let project = project();
        let item = project.item(ItemId(1)).unwrap();
        let oversized = Pack {
            unit_id: UnitId::new(1),
            kind: RegisterKind::HoldingRegister,
            start: 0,
            entries: vec![item.clone(); 126],
        };
        assert_eq!(
            BusTransaction::read(oversized).unwrap_err(),
            InvalidItem::Range(InvalidRange::CountTooLargeForType(126, 125))
        );
    }

    #[test]
    fn identical_reads_are_detected() {
        let project = project();
        let item = project.item(ItemId(1)).unwrap();
        let pack = || Pack {
            unit_id: UnitId::new(7),
            kind: RegisterKind::HoldingRegister,
            start: 10,
            entries: vec![item.clone()],
        };
        let first = BusTransaction::read(pack()).unwrap();
        let second = BusTransaction::read(pack()).unwrap();
        assert!(first.is_same_read(&second));
    }
}
