//! Modbus RTU over a serial port
//!
//! [`SerialTransport`] implements [`Transport`] for a USB or on-board serial adapter.
//! USB adapters may re-enumerate under a different name after being unplugged, so the
//! port can be located by a name pattern instead of a fixed path.

use tokio_serial::SerialPortBuilderExt;

use crate::config::ModbusConfig;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::modbus::Transport;
use crate::types::{AddressRange, RegisterKind, UnitId};

use frame::Request;
use phys::PhysLayer;

mod client;
mod frame;
mod phys;

/// Names of the serial ports present on the system
pub fn available_ports() -> Result<Vec<String>, RequestError> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// First available port whose name contains the pattern
pub fn discover(pattern: &str) -> Option<String> {
    match available_ports() {
        Ok(ports) => find_port(ports, pattern),
        Err(err) => {
            tracing::warn!("unable to list serial ports: {}", err);
            None
        }
    }
}

fn find_port(ports: Vec<String>, pattern: &str) -> Option<String> {
    ports.into_iter().find(|name| name.contains(pattern))
}

/// Open a serial port with the configured line settings
pub fn open(path: &str, settings: &ModbusConfig) -> Result<tokio_serial::SerialStream, RequestError> {
    let stream = tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits.into())
        .parity(settings.parity.into())
        .stop_bits(settings.stop_bits.into())
        .flow_control(settings.flow_control.into())
        .open_native_async()?;
    Ok(stream)
}

/// Register access over Modbus RTU
pub struct SerialTransport {
    config: ModbusConfig,
    decode: DecodeLevel,
    phys: Option<PhysLayer<tokio_serial::SerialStream>>,
    /// set after a failure, the next open looks for the adapter again
    rediscover: bool,
}

impl SerialTransport {
    /// Create a closed transport
    pub fn new(config: ModbusConfig, decode: DecodeLevel) -> Self {
        Self {
            config,
            decode,
            phys: None,
            rediscover: false,
        }
    }

    fn select_port(&self) -> Result<String, RequestError> {
        let configured = &self.config.port;
        if !configured.is_empty() && !self.rediscover {
            return Ok(configured.clone());
        }

        if let Some(port) = discover(&self.config.port_pattern) {
            return Ok(port);
        }

        if configured.is_empty() {
            tracing::debug!(
                "no serial port matching '{}'",
                self.config.port_pattern
            );
            return Err(RequestError::NoConnection);
        }
        Ok(configured.clone())
    }

    fn inter_frame_delay(&self) -> std::time::Duration {
        self.config
            .inter_frame_delay()
            .unwrap_or_else(|| phys::inter_frame_delay(self.config.baud_rate))
    }

    async fn transact(&mut self, request: Request) -> Result<Vec<u16>, RequestError> {
        let Some(phys) = self.phys.as_mut() else {
            return Err(RequestError::NoConnection);
        };

        let result = client::transact(
            phys,
            &request,
            self.config.timeout(),
            self.config.retries,
            self.decode,
        )
        .await;

        if let Err(err) = &result {
            if err.is_connection_error() {
                self.close();
            }
        }
        result
    }
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.phys.is_some()
    }

    async fn open(&mut self) -> Result<(), RequestError> {
        if self.phys.is_some() {
            return Ok(());
        }

        let path = self.select_port()?;
        match open(&path, &self.config) {
            Ok(stream) => {
                tracing::info!("opened serial port {}", path);
                self.phys = Some(PhysLayer::new(stream, self.inter_frame_delay()));
                self.rediscover = false;
                Ok(())
            }
            Err(err) => {
                self.rediscover = true;
                Err(err)
            }
        }
    }

    fn close(&mut self) {
        if self.phys.take().is_some() {
            tracing::info!("closed serial port");
            self.rediscover = true;
        }
    }

    async fn read(
        &mut self,
        unit_id: UnitId,
        kind: RegisterKind,
        range: AddressRange,
    ) -> Result<Vec<u16>, RequestError> {
        let request = Request::read(unit_id, kind, range)?;
        self.transact(request).await
    }

    async fn write(
        &mut self,
        unit_id: UnitId,
        kind: RegisterKind,
        start: u16,
        values: &[u16],
    ) -> Result<(), RequestError> {
        let request = Request::write(unit_id, kind, start, values)?;
        self.transact(request).await.map(|_| ())
    }
}
