use std::future::Future;

use crate::error::RequestError;
use crate::types::{AddressRange, RegisterKind, UnitId};

/// Register level access to a half-duplex bus
///
/// The engine owns its transport exclusively and issues one call at a time. Implementations
/// only have to move the registers, batching and error bookkeeping happen in the engine.
pub trait Transport: Send + 'static {
    /// True if the connection is usable
    fn is_open(&self) -> bool;

    /// Open, or re-open, the connection
    fn open(&mut self) -> impl Future<Output = Result<(), RequestError>> + Send;

    /// Close the connection, the next transaction re-opens it
    fn close(&mut self);

    /// Read `range.count` consecutive units of a kind
    ///
    /// Bits are returned as 0 or 1, one element per unit.
    fn read(
        &mut self,
        unit_id: UnitId,
        kind: RegisterKind,
        range: AddressRange,
    ) -> impl Future<Output = Result<Vec<u16>, RequestError>> + Send;

    /// Write one value per unit starting at `start`
    fn write(
        &mut self,
        unit_id: UnitId,
        kind: RegisterKind,
        start: u16,
        values: &[u16],
    ) -> impl Future<Output = Result<(), RequestError>> + Send;
}
