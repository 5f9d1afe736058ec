//! Seam between the scheduler and the code that talks to devices

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::model::{Device, PendingWrite, Project};
use crate::modbus::ModbusBackend;

/// Kinds of backend a device can be attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Modbus RTU over a serial line
    Modbus,
    /// records calls, test builds only
    #[cfg(test)]
    Mock,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Modbus => f.write_str("modbus"),
            #[cfg(test)]
            BackendKind::Mock => f.write_str("mock"),
        }
    }
}

/// Operations the scheduler needs from a backend
pub trait Capability {
    /// Validate the project and prepare the backend, called once before the first cycle
    fn configure(&mut self, settings: &Settings, project: &Project);

    /// Request fresh values for every item of a device
    ///
    /// Returns false if the device could not be checked. Values may arrive after the
    /// returned future completes.
    fn check(&mut self, device: &Device) -> impl Future<Output = bool> + Send;

    /// Write values to the bus
    fn write(&mut self, writes: Vec<PendingWrite>) -> impl Future<Output = ()> + Send;

    /// Abandon the work of the current cycle
    fn stop(&mut self);
}

/// A backend known to the scheduler
pub enum Backend {
    /// Modbus devices
    Modbus(ModbusBackend),
    /// records calls, test builds only
    #[cfg(test)]
    Mock(crate::mock::MockBackend),
}

impl Backend {
    /// Kind of devices served by this backend
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Modbus(_) => BackendKind::Modbus,
            #[cfg(test)]
            Backend::Mock(_) => BackendKind::Mock,
        }
    }
}

impl From<ModbusBackend> for Backend {
    fn from(value: ModbusBackend) -> Self {
        Backend::Modbus(value)
    }
}

impl Capability for Backend {
    fn configure(&mut self, settings: &Settings, project: &Project) {
        match self {
            Backend::Modbus(x) => x.configure(settings, project),
            #[cfg(test)]
            Backend::Mock(x) => x.configure(settings, project),
        }
    }

    async fn check(&mut self, device: &Device) -> bool {
        match self {
            Backend::Modbus(x) => x.check(device).await,
            #[cfg(test)]
            Backend::Mock(x) => x.check(device).await,
        }
    }

    async fn write(&mut self, writes: Vec<PendingWrite>) {
        match self {
            Backend::Modbus(x) => x.write(writes).await,
            #[cfg(test)]
            Backend::Mock(x) => x.write(writes).await,
        }
    }

    fn stop(&mut self) {
        match self {
            Backend::Modbus(x) => x.stop(),
            #[cfg(test)]
            Backend::Mock(x) => x.stop(),
        }
    }
}
