use std::fmt::Write;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::decode::PhysDecodeLevel;

/// Byte stream carrying RTU frames
pub(crate) trait Line: AsyncRead + AsyncWrite + Unpin + Send {
    /// Drop whatever the device sent outside of a transaction
    fn discard_input(&mut self) -> Result<(), std::io::Error> {
        Ok(())
    }
}

impl Line for tokio_serial::SerialStream {
    fn discard_input(&mut self) -> Result<(), std::io::Error> {
        use tokio_serial::SerialPort;
        self.clear(tokio_serial::ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

#[cfg(test)]
impl Line for tokio::io::DuplexStream {}

pub(crate) struct PhysLayer<S> {
    line: S,
    inter_frame_delay: Duration,
    last_activity: Option<Instant>,
}

impl<S> std::fmt::Debug for PhysLayer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Serial")
    }
}

impl<S: Line> PhysLayer<S> {
    pub(crate) fn new(line: S, inter_frame_delay: Duration) -> Self {
        Self {
            line,
            inter_frame_delay,
            last_activity: None,
        }
    }

    pub(crate) fn discard_input(&mut self) -> Result<(), std::io::Error> {
        self.line.discard_input()
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = self.line.read(buffer).await?;
        self.last_activity = Some(Instant::now());

        if decode_level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(decode_level, x))
            }
        }

        Ok(length)
    }

    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if decode_level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(decode_level, data));
        }

        // respect the silent interval between frames
        if let Some(last_activity) = self.last_activity {
            tokio::time::sleep_until(last_activity + self.inter_frame_delay).await;
        }

        self.line.write_all(data).await?;
        self.line.flush().await?;
        self.last_activity = Some(Instant::now());
        Ok(())
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

/// Silent interval between two frames at a given baud rate
pub(crate) fn inter_frame_delay(baud_rate: u32) -> Duration {
    // Modbus RTU uses 11-bit characters (1 start, 8 data, 1 parity or stop, 1 stop)
    const NUM_BITS_IN_CHAR: u64 = 11;

    // above this baud rate the delay is fixed
    const MAX_BAUD_RATE: u32 = 19200;
    const MIN_DELAY: Duration = Duration::from_micros(1750);

    if baud_rate == 0 || baud_rate > MAX_BAUD_RATE {
        return MIN_DELAY;
    }

    let character_time = Duration::from_secs(NUM_BITS_IN_CHAR) / baud_rate;
    35 * character_time / 10 // multiply by 3.5
}

const BYTES_PER_DECODE_LINE: usize = 18;

pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for chunk in bytes.chunks(BYTES_PER_DECODE_LINE) {
        writeln!(f)?;
        let mut first = true;
        for byte in chunk {
            if !first {
                f.write_char(' ')?;
            }
            first = false;
            write!(f, "{byte:02X?}")?;
        }
    }
    Ok(())
}
