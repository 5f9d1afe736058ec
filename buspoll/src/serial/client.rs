use std::time::Duration;

use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::serial::frame::{constants, parse_frame, Frame, PduDisplay, Request};
use crate::serial::phys::{Line, PhysLayer};

/// Send a request and wait for the matching response
///
/// The request is resent up to `retries` times when no response arrives within `timeout`.
pub(crate) async fn transact<S: Line>(
    phys: &mut PhysLayer<S>,
    request: &Request,
    timeout: Duration,
    retries: usize,
    decode: DecodeLevel,
) -> Result<Vec<u16>, RequestError> {
    let frame = request.format()?;
    let mut attempt = 0;

    loop {
        phys.discard_input()?;

        if decode.pdu.enabled() {
            tracing::info!(
                "PDU TX - {}",
                PduDisplay::new(decode.pdu, request.function, &request.body)
            );
        }
        phys.write(&frame, decode.physical).await?;

        match tokio::time::timeout(timeout, read_frame(phys, decode)).await {
            Ok(response) => {
                let response = response?;
                if decode.pdu.enabled() {
                    tracing::info!(
                        "PDU RX - {}",
                        PduDisplay::new(decode.pdu, response.function, &response.body)
                    );
                }
                return request.parse_response(&response);
            }
            Err(_) => {
                if attempt >= retries {
                    return Err(RequestError::ResponseTimeout);
                }
                attempt += 1;
                tracing::debug!(
                    "no response from unit {}, resending ({}/{})",
                    request.unit_id,
                    attempt,
                    retries
                );
            }
        }
    }
}

async fn read_frame<S: Line>(
    phys: &mut PhysLayer<S>,
    decode: DecodeLevel,
) -> Result<Frame, RequestError> {
    let mut buffer = Vec::with_capacity(constants::MAX_FRAME_LENGTH);
    let mut chunk = [0u8; constants::MAX_FRAME_LENGTH];

    loop {
        if let Some(frame) = parse_frame(&buffer)? {
            return Ok(frame);
        }

        let count = phys.read(&mut chunk, decode.physical).await?;
        if count == 0 {
            return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
        }
        buffer.extend_from_slice(&chunk[..count]);
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::types::{AddressRange, RegisterKind, UnitId};

    const REQUEST: &[u8] = &[0x2A, 0x03, 0x00, 0x10, 0x00, 0x03, 0x02, 0x15];
    const RESPONSE: &[u8] = &[
        0x2A, 0x03, 0x06, 0x12, 0x34, 0x56, 0x78, 0x23, 0x45, 0x30, 0x60,
    ];

    fn request() -> Request {
        Request::read(
            UnitId::new(0x2A),
            RegisterKind::HoldingRegister,
            AddressRange::try_from(0x10, 3).unwrap(),
        )
        .unwrap()
    }

    fn phys() -> (PhysLayer<DuplexStream>, DuplexStream) {
        let (line, device) = tokio::io::duplex(256);
        (PhysLayer::new(line, Duration::from_millis(2)), device)
    }

    async fn expect_request(device: &mut DuplexStream) {
        let mut received = [0u8; 8];
        device.read_exact(&mut received).await.unwrap();
        assert_eq!(received, REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn reassembles_responses_split_across_reads() {
        let (mut phys, mut device) = phys();

        let server = tokio::spawn(async move {
            expect_request(&mut device).await;
            device.write_all(&RESPONSE[..3]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
            device.write_all(&RESPONSE[3..]).await.unwrap();
            device
        });

        let values = transact(
            &mut phys,
            &request(),
            Duration::from_millis(200),
            0,
            DecodeLevel::nothing(),
        )
        .await
        .unwrap();
        assert_eq!(values, vec![0x1234, 0x5678, 0x2345]);
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn resends_after_a_timeout() {
        let (mut phys, mut device) = phys();

        let server = tokio::spawn(async move {
            // ignore the first attempt
            expect_request(&mut device).await;
            expect_request(&mut device).await;
            device.write_all(RESPONSE).await.unwrap();
            device
        });

        let values = transact(
            &mut phys,
            &request(),
            Duration::from_millis(200),
            1,
            DecodeLevel::nothing(),
        )
        .await
        .unwrap();
        assert_eq!(values.len(), 3);
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fails_once_the_retries_are_exhausted() {
        let (mut phys, device) = phys();

        let result = transact(
            &mut phys,
            &request(),
            Duration::from_millis(200),
            2,
            DecodeLevel::nothing(),
        )
        .await;
        assert_eq!(result, Err(RequestError::ResponseTimeout));
        drop(device);
    }

    #[tokio::test]
    async fn a_closed_line_is_an_io_error() {
        let (mut phys, mut device) = phys();

        let server = tokio::spawn(async move {
            expect_request(&mut device).await;
        });

        let result = transact(
            &mut phys,
            &request(),
            Duration::from_secs(5),
            0,
            DecodeLevel::nothing(),
        )
        .await;
        server.await.unwrap();
        assert_eq!(
            result,
            Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof))
        );
    }
}
