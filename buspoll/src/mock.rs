//! In-memory stand-ins for a bus and a backend, used by the unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::capability::Capability;
use crate::config::Settings;
use crate::error::RequestError;
use crate::model::{Device, DeviceId, ItemId, PendingWrite, Project};
use crate::modbus::Transport;
use crate::types::{AddressRange, RegisterKind, UnitId, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BusEvent {
    Open,
    Read(u8, RegisterKind, AddressRange),
    Write(u8, RegisterKind, u16, Vec<u16>),
}

#[derive(Default)]
struct BusState {
    registers: HashMap<(u8, RegisterKind, u16), u16>,
    fail_open: bool,
    errors: VecDeque<RequestError>,
    events: Vec<BusEvent>,
}

/// Register map shared by every transport created from it
#[derive(Clone, Default)]
pub(crate) struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    pub(crate) fn transport(&self) -> MockTransport {
        MockTransport {
            bus: self.clone(),
            open: false,
        }
    }

    pub(crate) fn set(&self, unit_id: u8, kind: RegisterKind, unit: u16, value: u16) {
        self.lock().registers.insert((unit_id, kind, unit), value);
    }

    pub(crate) fn get(&self, unit_id: u8, kind: RegisterKind, unit: u16) -> Option<u16> {
        self.lock().registers.get(&(unit_id, kind, unit)).copied()
    }

    pub(crate) fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// the next read or write fails with this error
    pub(crate) fn fail_next(&self, err: RequestError) {
        self.lock().errors.push_back(err);
    }

    pub(crate) fn events(&self) -> Vec<BusEvent> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap()
    }
}

pub(crate) struct MockTransport {
    bus: MockBus,
    open: bool,
}

impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<(), RequestError> {
        let mut state = self.bus.lock();
        state.events.push(BusEvent::Open);
        if state.fail_open {
            return Err(RequestError::NoConnection);
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    async fn read(
        &mut self,
        unit_id: UnitId,
        kind: RegisterKind,
        range: AddressRange,
    ) -> Result<Vec<u16>, RequestError> {
        let mut state = self.bus.lock();
        state.events.push(BusEvent::Read(unit_id.value, kind, range));
        if let Some(err) = state.errors.pop_front() {
            return Err(err);
        }
        Ok(range
            .to_std_range()
            .map(|unit| {
                state
                    .registers
                    .get(&(unit_id.value, kind, unit as u16))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write(
        &mut self,
        unit_id: UnitId,
        kind: RegisterKind,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let mut state = self.bus.lock();
        state
            .events
            .push(BusEvent::Write(unit_id.value, kind, start, values.to_vec()));
        if let Some(err) = state.errors.pop_front() {
            return Err(err);
        }
        for (unit, value) in (start..).zip(values) {
            state.registers.insert((unit_id.value, kind, unit), *value);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum BackendEvent {
    Configure,
    Check(DeviceId),
    Write(Instant, Vec<(ItemId, Value, u32)>),
    Stop,
}

#[derive(Default)]
struct BackendState {
    events: Vec<BackendEvent>,
    failing: HashSet<DeviceId>,
    slow: HashMap<DeviceId, Duration>,
}

/// Backend that records what the scheduler asks of it
#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub(crate) fn events(&self) -> Vec<BackendEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub(crate) fn checks(&self) -> Vec<DeviceId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BackendEvent::Check(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn writes(&self) -> Vec<(Instant, Vec<(ItemId, Value, u32)>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BackendEvent::Write(at, values) => Some((at, values)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn fail(&self, device: DeviceId) {
        self.state.lock().unwrap().failing.insert(device);
    }

    /// Checks of the device take this long to complete
    pub(crate) fn delay(&self, device: DeviceId, duration: Duration) {
        self.state.lock().unwrap().slow.insert(device, duration);
    }

    fn record(&self, event: BackendEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}

impl Capability for MockBackend {
    fn configure(&mut self, _settings: &Settings, _project: &Project) {
        self.record(BackendEvent::Configure);
    }

    async fn check(&mut self, device: &Device) -> bool {
        self.record(BackendEvent::Check(device.id()));
        let delay = self.state.lock().unwrap().slow.get(&device.id()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        !self.state.lock().unwrap().failing.contains(&device.id())
    }

    async fn write(&mut self, writes: Vec<PendingWrite>) {
        let values = writes
            .into_iter()
            .map(|w| (w.item.id(), w.value, w.user_id))
            .collect();
        self.record(BackendEvent::Write(Instant::now(), values));
    }

    fn stop(&mut self) {
        self.record(BackendEvent::Stop);
    }
}
