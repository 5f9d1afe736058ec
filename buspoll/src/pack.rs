//! Groups per-item accesses into contiguous ranges
//!
//! Items are added one at a time. An item whose unit directly follows an open run of the
//! same device and kind extends that run, any other item opens a new run. After every
//! insertion the run is merged with its successor if the two became adjacent, so the
//! runs are always maximal regardless of the order in which items arrive.
//!
//! [`PackBuilder::finish`] splits the maximal runs into packs that respect the per-function
//! quantity limits of the protocol.

use std::collections::BTreeMap;

use crate::error::InvalidItem;
use crate::types::{AddressRange, RegisterKind, UnitId};

/// Direction of the accesses collected by a builder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// items are read
    Read,
    /// items are written
    Write,
}

/// Contiguous block of entries on one device, ready to become a bus transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pack<T> {
    /// device
    pub unit_id: UnitId,
    /// kind shared by all entries
    pub kind: RegisterKind,
    /// unit of the first entry
    pub start: u16,
    /// one entry per unit in `start..start + entries.len()`
    pub entries: Vec<T>,
}

impl<T> Pack<T> {
    /// Range covered by the pack
    pub fn range(&self) -> AddressRange {
        AddressRange {
            start: self.start,
            count: self.entries.len() as u16,
        }
    }
}

struct Group<T> {
    unit_id: UnitId,
    kind: RegisterKind,
    /// runs keyed by their first unit
    runs: BTreeMap<u16, Vec<T>>,
}

impl<T> Group<T> {
    fn insert(&mut self, unit: u16, entry: T) -> Result<(), InvalidItem> {
        let previous = self
            .runs
            .range(..=unit)
            .next_back()
            .map(|(&first, run)| (first, u32::from(first) + run.len() as u32));

        let start = match previous {
            Some((_, end)) if end > u32::from(unit) => {
                return Err(InvalidItem::DuplicateUnit(unit));
            }
            Some((first, end)) if end == u32::from(unit) => {
                if let Some(run) = self.runs.get_mut(&first) {
                    run.push(entry);
                }
                first
            }
            _ => {
                self.runs.insert(unit, vec![entry]);
                unit
            }
        };

        self.merge_with_next(start);
        Ok(())
    }

    fn merge_with_next(&mut self, start: u16) {
        let Some(len) = self.runs.get(&start).map(Vec::len) else {
            return;
        };
        let Ok(next) = u16::try_from(u32::from(start) + len as u32) else {
            return;
        };
        if let Some(mut tail) = self.runs.remove(&next) {
            if let Some(run) = self.runs.get_mut(&start) {
                run.append(&mut tail);
            }
        }
    }
}

/// Collects accesses and turns them into the minimum number of packs
pub struct PackBuilder<T> {
    access: Access,
    groups: Vec<Group<T>>,
    count: usize,
}

impl<T> PackBuilder<T> {
    /// Create an empty builder
    pub fn new(access: Access) -> Self {
        Self {
            access,
            groups: Vec::new(),
            count: 0,
        }
    }

    /// Add the access of one item
    ///
    /// Fails without modifying the builder if the item cannot be part of a valid
    /// transaction.
    pub fn add(
        &mut self,
        address: i32,
        kind: RegisterKind,
        unit: i32,
        entry: T,
    ) -> Result<(), InvalidItem> {
        let unit_id = UnitId::from_address(address).ok_or(InvalidItem::BadAddress(address))?;
        if !kind.is_valid() {
            return Err(InvalidItem::InvalidKind);
        }
        if self.access == Access::Write && !kind.is_writable() {
            return Err(InvalidItem::ReadOnly(kind));
        }
        let unit = u16::try_from(unit).map_err(|_| InvalidItem::BadUnit(unit))?;

        let group = match self
            .groups
            .iter()
            .position(|g| g.unit_id == unit_id && g.kind == kind)
        {
            Some(index) => &mut self.groups[index],
            None => {
                self.groups.push(Group {
                    unit_id,
                    kind,
                    runs: BTreeMap::new(),
                });
                let last = self.groups.len() - 1;
                &mut self.groups[last]
            }
        };

        group.insert(unit, entry)?;
        self.count += 1;
        Ok(())
    }

    /// Number of accepted entries
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if no entry was accepted
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Produce the packs, grouped by device and kind in the order the groups were first
    /// seen, each group in ascending unit order
    pub fn finish(self) -> Vec<Pack<T>> {
        let access = self.access;
        let mut packs = Vec::new();

        for group in self.groups {
            let limit = match access {
                Access::Read => group.kind.max_read_count(),
                Access::Write => group.kind.max_write_count(),
            } as usize;

            for (start, run) in group.runs {
                let mut start = start;
                let mut entries = run.into_iter().peekable();
                while entries.peek().is_some() {
                    let chunk: Vec<T> = entries.by_ref().take(limit).collect();
                    let len = chunk.len() as u16;
                    packs.push(Pack {
                        unit_id: group.unit_id,
                        kind: group.kind,
                        start,
                        entries: chunk,
                    });
                    start = start.wrapping_add(len);
                }
            }
        }

        packs
    }
}
