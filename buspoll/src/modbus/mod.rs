//! Modbus backend
//!
//! A [`ModbusBackend`] turns device checks and item writes into [`BusTransaction`]s and
//! hands them to an engine task that owns the bus. The engine runs on its own Tokio task
//! so that a slow or absent bus never stalls the scheduler.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::capability::{BackendKind, Capability};
use crate::config::Settings;
use crate::error::{InvalidItem, Shutdown};
use crate::model::{Device, DeviceItem, ItemId, PendingWrite, Project};
use crate::pack::{Access, PackBuilder};
use crate::serial::SerialTransport;
use crate::transaction::{BusTransaction, WriteEntry};
use crate::types::UnitId;

use message::Command;
use task::EngineTask;

pub use transport::Transport;

mod message;
mod task;
mod transport;

/// State of the bus connection as seen by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
    /// not opened yet, or closed after a connection error
    Closed,
    /// open and usable
    Open,
    /// the last attempt to open failed
    Failed,
}

/// Read transactions for every item of one device
#[derive(Debug, Default)]
pub struct ReadPlan {
    /// transactions in the order they are queued
    pub transactions: Vec<BusTransaction>,
    /// items that cannot be read, and why
    pub rejected: Vec<(Arc<DeviceItem>, InvalidItem)>,
}

/// Batch the items of a device into read transactions
pub fn read_plan(device: &Device) -> ReadPlan {
    let mut plan = ReadPlan::default();
    let mut builder = PackBuilder::new(Access::Read);

    for item in device.items() {
        if let Err(err) = builder.add(
            item.device_address(),
            item.kind(),
            item.unit(),
            item.clone(),
        ) {
            plan.rejected.push((item.clone(), err));
        }
    }

    for pack in builder.finish() {
        let items = pack.entries.clone();
        match BusTransaction::read(pack) {
            Ok(tx) => plan.transactions.push(tx),
            Err(err) => plan
                .rejected
                .extend(items.into_iter().map(|item| (item, err))),
        }
    }

    plan
}

/// Handle to a Modbus engine
///
/// Created unconfigured, the engine is spawned by [`Capability::configure`] or directly by
/// [`ModbusBackend::with_transport`]. Both must be called from within a Tokio runtime.
pub struct ModbusBackend {
    tx: Option<mpsc::Sender<Command>>,
    cancel: Arc<AtomicBool>,
    state: Option<watch::Receiver<PortState>>,
    /// items already reported as unusable
    rejected: HashSet<ItemId>,
}

impl Default for ModbusBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusBackend {
    /// Create a backend that opens the serial port described by the settings once configured
    pub fn new() -> Self {
        Self {
            tx: None,
            cancel: Arc::new(AtomicBool::new(false)),
            state: None,
            rejected: HashSet::new(),
        }
    }

    /// Create a backend running over the provided transport
    pub fn with_transport<T: Transport>(transport: T, settings: &Settings) -> Self {
        let mut backend = Self::new();
        backend.spawn(transport, settings);
        backend
    }

    fn spawn<T: Transport>(&mut self, transport: T, settings: &Settings) {
        let (tx, rx) = mpsc::channel(settings.modbus.max_queued_requests.max(1));
        let (state_tx, state_rx) = watch::channel(PortState::Closed);
        let mut task = EngineTask::new(rx.into(), transport, self.cancel.clone(), state_tx);
        tokio::spawn(
            async move {
                let _ = task.run().await;
            }
            .instrument(tracing::info_span!("modbus")),
        );
        self.tx = Some(tx);
        self.state = Some(state_rx);
    }

    /// Watch the connection state, `None` until the engine is running
    pub fn port_state(&self) -> Option<watch::Receiver<PortState>> {
        self.state.clone()
    }

    /// Forget every reported error so that persistent failures are logged again
    pub async fn clear_status_cache(&self) -> Result<(), Shutdown> {
        let tx = self.tx.as_ref().ok_or(Shutdown)?;
        tx.send(Command::ClearStatusCache)
            .await
            .map_err(|_| Shutdown)
    }

    fn reject(&mut self, item: &DeviceItem, err: InvalidItem) {
        if self.rejected.insert(item.id()) {
            tracing::warn!("{} cannot be polled: {}", item, err);
        }
    }
}

fn write_transactions(writes: Vec<PendingWrite>) -> Vec<BusTransaction> {
    let mut builder = PackBuilder::new(Access::Write);

    for write in writes {
        let item = write.item;
        let Some(value) = write.value.to_register() else {
            tracing::warn!(
                "write of {} to {} rejected: {}",
                write.value,
                item,
                InvalidItem::BadValue
            );
            continue;
        };
        tracing::debug!(
            "{}|WRITE {} TO {} ADR {} UNIT {} {}",
            write.user_id,
            write.value,
            item.name(),
            item.device_address(),
            item.unit(),
            item.kind()
        );
        let entry = WriteEntry {
            item: item.clone(),
            value,
            user_id: write.user_id,
        };
        if let Err(err) = builder.add(item.device_address(), item.kind(), item.unit(), entry) {
            tracing::warn!("write to {} rejected: {}", item, err);
        }
    }

    builder
        .finish()
        .into_iter()
        .filter_map(|pack| match BusTransaction::write(pack) {
            Ok(tx) => Some(tx),
            Err(err) => {
                tracing::warn!("write rejected: {}", err);
                None
            }
        })
        .collect()
}

impl Capability for ModbusBackend {
    fn configure(&mut self, settings: &Settings, project: &Project) {
        if self.tx.is_none() {
            let transport = SerialTransport::new(settings.modbus.clone(), settings.decode);
            self.spawn(transport, settings);
        }

        let devices = project
            .devices()
            .iter()
            .filter(|d| d.backend() == Some(BackendKind::Modbus));
        for device in devices {
            if UnitId::from_address(device.address()).is_none() {
                tracing::warn!(
                    "{} has invalid bus address {}, it will not be polled",
                    device,
                    device.address()
                );
                continue;
            }
            for (item, err) in read_plan(device).rejected {
                self.reject(&item, err);
            }
        }
    }

    async fn check(&mut self, device: &Device) -> bool {
        let Some(tx) = self.tx.clone() else {
            return false;
        };
        // a new cycle lifts a previous stop
        self.cancel.store(false, Ordering::SeqCst);

        if UnitId::from_address(device.address()).is_none() {
            return false;
        }

        let plan = read_plan(device);
        for (item, err) in plan.rejected {
            self.reject(&item, err);
        }
        if plan.transactions.is_empty() {
            return true;
        }
        tx.send(Command::Read(plan.transactions)).await.is_ok()
    }

    async fn write(&mut self, writes: Vec<PendingWrite>) {
        let Some(tx) = self.tx.clone() else {
            tracing::warn!("modbus backend not configured, dropped {} writes", writes.len());
            return;
        };

        let transactions = write_transactions(writes);
        if transactions.is_empty() {
            return;
        }
        if tx.send(Command::Write(transactions)).await.is_err() {
            tracing::warn!("modbus engine has shut down, writes dropped");
        }
    }

    fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{DeviceConfig, ItemConfig, ProjectConfig};
    use crate::mock::{BusEvent, MockBus};
    use crate::model::DeviceId;
    use crate::types::{AddressRange, RegisterKind, Value};

    fn project() -> Project {
        let config = ProjectConfig::default()
            .with_device(
                DeviceConfig::new(1, "boiler", 5)
                    .with_backend(BackendKind::Modbus)
                    .with_item(ItemConfig::new(1, "t1", RegisterKind::InputRegister, 0))
                    .with_item(ItemConfig::new(2, "t2", RegisterKind::InputRegister, 1))
                    .with_item(ItemConfig::new(3, "pump", RegisterKind::Coil, 2))
                    .with_item(ItemConfig::new(4, "note", RegisterKind::Invalid, 0)),
            )
            .with_device(
                DeviceConfig::new(2, "broken", 0)
                    .with_backend(BackendKind::Modbus)
                    .with_item(ItemConfig::new(5, "x", RegisterKind::Coil, 0)),
            );
        Project::from_config(&config).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn plans_batch_items_and_collect_rejections() {
        let project = project();
        let plan = read_plan(project.device(DeviceId(1)).unwrap());

        let ranges: Vec<_> = plan
            .transactions
            .iter()
            .map(|tx| (tx.kind(), tx.range()))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (
                    RegisterKind::InputRegister,
                    AddressRange::try_from(0, 2).unwrap()
                ),
                (RegisterKind::Coil, AddressRange::try_from(2, 1).unwrap()),
            ]
        );
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].0.id(), ItemId(4));
        assert_eq!(plan.rejected[0].1, InvalidItem::InvalidKind);
    }

    #[tokio::test(start_paused = true)]
    async fn checks_read_every_item() {
        let project = project();
        let bus = MockBus::default();
        bus.set(5, RegisterKind::InputRegister, 0, 215);
        bus.set(5, RegisterKind::Coil, 2, 1);
        let mut backend = ModbusBackend::with_transport(bus.transport(), &Settings::default());

        assert!(backend.check(project.device(DeviceId(1)).unwrap()).await);
        settle().await;

        let item = |id| project.item(ItemId(id)).unwrap().raw_value();
        assert_eq!(item(1), Some(Value::Int(215)));
        assert_eq!(item(2), Some(Value::Int(0)));
        assert_eq!(item(3), Some(Value::Bool(true)));
        assert_eq!(item(4), None);
        assert_eq!(*backend.port_state().unwrap().borrow(), PortState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn devices_without_a_valid_address_fail_the_check() {
        let project = project();
        let bus = MockBus::default();
        let mut backend = ModbusBackend::with_transport(bus.transport(), &Settings::default());

        assert!(!backend.check(project.device(DeviceId(2)).unwrap()).await);
        settle().await;
        assert!(bus.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_backends_fail_the_check() {
        let project = project();
        let mut backend = ModbusBackend::new();
        assert!(!backend.check(project.device(DeviceId(1)).unwrap()).await);
        assert!(backend.port_state().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_batched_and_bad_values_dropped() {
        let project = project();
        let bus = MockBus::default();
        let mut backend = ModbusBackend::with_transport(bus.transport(), &Settings::default());
        let pump = project.item(ItemId(3)).unwrap().clone();
        let t1 = project.item(ItemId(1)).unwrap().clone();

        backend
            .write(vec![
                PendingWrite {
                    item: pump,
                    value: Value::Bool(true),
                    user_id: 9,
                },
                PendingWrite {
                    item: t1,
                    value: Value::Int(4),
                    user_id: 9,
                },
            ])
            .await;
        settle().await;

        // the input register is read-only, only the coil goes out
        assert_eq!(
            bus.events(),
            vec![
                BusEvent::Open,
                BusEvent::Write(5, RegisterKind::Coil, 2, vec![1])
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_queued_reads() {
        let project = project();
        let bus = MockBus::default();
        let mut backend = ModbusBackend::with_transport(bus.transport(), &Settings::default());

        backend.stop();
        // the check itself lifts the stop, so queue through the engine directly
        let tx = backend.tx.clone().unwrap();
        let plan = read_plan(project.device(DeviceId(1)).unwrap());
        tx.send(Command::Read(plan.transactions)).await.unwrap();
        settle().await;
        assert!(bus.events().is_empty());

        backend.check(project.device(DeviceId(1)).unwrap()).await;
        settle().await;
        assert!(!bus.events().is_empty());
    }
}
