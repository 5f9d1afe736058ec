use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::Instrument;

use crate::error::{AduParseError, RequestError, Shutdown};
use crate::modbus::message::Command;
use crate::modbus::{PortState, Transport};
use crate::status::{StatusCache, StatusKey};
use crate::transaction::{BusTransaction, Operation};

/// Owns the transport and executes queued transactions one at a time
///
/// Writes always go out before reads. A transaction that fails does not stop the
/// queue, only a failure to open the bus does.
pub(crate) struct EngineTask<T> {
    rx: crate::channel::Receiver<Command>,
    transport: T,
    writes: VecDeque<BusTransaction>,
    reads: VecDeque<BusTransaction>,
    status: StatusCache,
    cancel: Arc<AtomicBool>,
    state: watch::Sender<PortState>,
}

impl<T: Transport> EngineTask<T> {
    pub(crate) fn new(
        rx: crate::channel::Receiver<Command>,
        transport: T,
        cancel: Arc<AtomicBool>,
        state: watch::Sender<PortState>,
    ) -> Self {
        Self {
            rx,
            transport,
            writes: VecDeque::new(),
            reads: VecDeque::new(),
            status: StatusCache::new(),
            cancel,
            state,
        }
    }

    pub(crate) async fn run(&mut self) -> Shutdown {
        loop {
            if let Err(Shutdown) = self.poll().await {
                tracing::info!("modbus engine shutdown");
                self.transport.close();
                return Shutdown;
            }
        }
    }

    async fn poll(&mut self) -> Result<(), Shutdown> {
        if self.is_idle() {
            let command = self.rx.recv().await?;
            self.handle(command);
        }

        // pick up whatever arrived while the last transaction was on the bus
        while let Some(command) = self.rx.try_recv()? {
            self.handle(command);
        }

        self.process_queue().await;
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.writes.is_empty() && self.reads.is_empty()
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Read(transactions) => {
                for tx in transactions {
                    if self.reads.iter().any(|queued| queued.is_same_read(&tx)) {
                        tracing::trace!("{} already queued", tx);
                        continue;
                    }
                    self.reads.push_back(tx);
                }
            }
            Command::Write(transactions) => self.writes.extend(transactions),
            Command::ClearStatusCache => self.status.clear_all(),
        }
    }

    /// Execute the next transaction, if any
    pub(crate) async fn process_queue(&mut self) {
        if self.cancel.load(Ordering::SeqCst) {
            if !self.is_idle() {
                tracing::debug!(
                    "cycle cancelled, discarding {} write and {} read transactions",
                    self.writes.len(),
                    self.reads.len()
                );
                self.writes.clear();
                self.reads.clear();
            }
            return;
        }

        if self.is_idle() || !self.ensure_connected().await {
            return;
        }

        let Some(tx) = self.writes.pop_front().or_else(|| self.reads.pop_front()) else {
            return;
        };

        let result = self
            .execute(&tx)
            .instrument(tracing::info_span!(
                "transaction",
                unit = %tx.unit_id(),
                kind = %tx.kind(),
                range = %tx.range()
            ))
            .await;
        self.on_finished(tx, result);
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.transport.is_open() {
            return true;
        }

        match self.transport.open().await {
            Ok(()) => {
                self.set_state(PortState::Open);
                self.status.clear(StatusKey::CONNECTION);
                true
            }
            Err(err) => {
                self.set_state(PortState::Failed);
                self.status.report(
                    StatusKey::CONNECTION,
                    err,
                    format!("unable to open the bus: {err}"),
                );
                self.drop_queues();
                false
            }
        }
    }

    fn drop_queues(&mut self) {
        let writes = self.writes.len();
        let reads = self.reads.len();
        self.writes.clear();
        self.reads.clear();

        if writes > 0 {
            tracing::warn!(
                "bus unavailable, dropped {} write and {} read transactions",
                writes,
                reads
            );
        } else {
            tracing::debug!("bus unavailable, dropped {} read transactions", reads);
        }
    }

    async fn execute(&mut self, tx: &BusTransaction) -> Result<Vec<u16>, RequestError> {
        match tx.operation() {
            Operation::Read => {
                self.transport
                    .read(tx.unit_id(), tx.kind(), tx.range())
                    .await
            }
            Operation::Write(values) => {
                self.transport
                    .write(tx.unit_id(), tx.kind(), tx.range().start, values)
                    .await?;
                Ok(Vec::new())
            }
        }
    }

    fn on_finished(&mut self, tx: BusTransaction, result: Result<Vec<u16>, RequestError>) {
        let key = StatusKey::new(tx.unit_id().value, tx.kind());
        match result {
            Ok(values) => {
                if !tx.is_write() {
                    if values.len() != tx.items().len() {
                        let err = RequestError::BadResponse(AduParseError::ByteCountMismatch(
                            tx.items().len(),
                            values.len(),
                        ));
                        self.status.report(key, err, format!("{tx} failed: {err}"));
                        return;
                    }
                    for (item, value) in tx.items().iter().zip(values) {
                        item.set_raw_value(Some(tx.kind().to_value(value)));
                    }
                }
                self.status.clear(key);
            }
            Err(err) if err.is_connection_error() => {
                self.transport.close();
                self.set_state(PortState::Closed);
                self.status.report(StatusKey::CONNECTION, err, failure(&tx, err));
            }
            Err(err) => {
                self.status.report(key, err, failure(&tx, err));
            }
        }
    }

    fn set_state(&self, state: PortState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Failed writes are prefixed with the users that requested them
fn failure(tx: &BusTransaction, err: RequestError) -> String {
    let mut users = tx.users().to_vec();
    if users.is_empty() {
        return format!("{tx} failed: {err}");
    }
    users.sort_unstable();
    users.dedup();
    let users: Vec<String> = users.iter().map(|u| u.to_string()).collect();
    format!("{}|{tx} failed: {err}", users.join(","))
}
