use crate::transaction::BusTransaction;

/// Messages handed from a [`ModbusBackend`](super::ModbusBackend) to its engine task
#[derive(Debug)]
pub(crate) enum Command {
    /// queue read transactions
    Read(Vec<BusTransaction>),
    /// queue write transactions, drained before any read
    Write(Vec<BusTransaction>),
    /// forget every reported error
    ClearStatusCache,
}
