use crate::constants::{coil, function};
use crate::decode::PduDecodeLevel;
use crate::error::{AduParseError, FrameParseError, InternalError, InvalidRange, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{AddressRange, RegisterKind, UnitId};

use scursor::{ReadCursor, WriteCursor};

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
    pub(crate) const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum LengthMode {
    /// The length is always the same (without function code)
    Fixed(usize),
    /// You need to read X more bytes. The last byte contains the number of extra bytes to read after that
    Offset(usize),
    /// Unknown function code, can't determine the size
    Unknown,
}

// only responses are ever parsed
fn length_mode(function_code: u8) -> LengthMode {
    if function_code & function::ERROR_FLAG != 0 {
        return LengthMode::Fixed(1);
    }

    match function_code {
        function::READ_COILS
        | function::READ_DISCRETE_INPUTS
        | function::READ_HOLDING_REGISTERS
        | function::READ_INPUT_REGISTERS => LengthMode::Offset(1),
        function::WRITE_SINGLE_COIL
        | function::WRITE_SINGLE_REGISTER
        | function::WRITE_MULTIPLE_COILS
        | function::WRITE_MULTIPLE_REGISTERS => LengthMode::Fixed(4),
        _ => LengthMode::Unknown,
    }
}

/// A request ready to be sent, along with what is needed to validate its response
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Request {
    pub(crate) unit_id: UnitId,
    pub(crate) function: u8,
    /// body of the PDU following the function code
    pub(crate) body: Vec<u8>,
    pub(crate) expect: Expect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Expect {
    Bits(u16),
    Registers(u16),
    /// the address and the value or quantity of the request are echoed back
    Echo,
}

impl Request {
    pub(crate) fn read(
        unit_id: UnitId,
        kind: RegisterKind,
        range: AddressRange,
    ) -> Result<Self, RequestError> {
        let (function, expect) = match kind {
            RegisterKind::Coil => (function::READ_COILS, Expect::Bits(range.count)),
            RegisterKind::DiscreteInput => {
                (function::READ_DISCRETE_INPUTS, Expect::Bits(range.count))
            }
            RegisterKind::HoldingRegister => (
                function::READ_HOLDING_REGISTERS,
                Expect::Registers(range.count),
            ),
            RegisterKind::InputRegister => (
                function::READ_INPUT_REGISTERS,
                Expect::Registers(range.count),
            ),
            RegisterKind::Invalid => return Err(RequestError::UnsupportedKind(kind)),
        };

        let body = serialize(|cursor| {
            cursor.write_u16_be(range.start)?;
            cursor.write_u16_be(range.count)?;
            Ok(())
        })?;

        Ok(Self {
            unit_id,
            function,
            body,
            expect,
        })
    }

    /// A single value uses the write single functions, longer ranges the write multiple ones
    pub(crate) fn write(
        unit_id: UnitId,
        kind: RegisterKind,
        start: u16,
        values: &[u16],
    ) -> Result<Self, RequestError> {
        if values.is_empty() {
            return Err(InvalidRange::CountOfZero.into());
        }
        let count = u16::try_from(values.len())
            .map_err(|_| RequestError::Internal(InternalError::InsufficientWriteSpace))?;

        let (function, body) = match (kind, values) {
            (RegisterKind::Coil, [value]) => {
                let state = if *value == 0 { coil::OFF } else { coil::ON };
                let body = serialize(|cursor| {
                    cursor.write_u16_be(start)?;
                    cursor.write_u16_be(state)?;
                    Ok(())
                })?;
                (function::WRITE_SINGLE_COIL, body)
            }
            (RegisterKind::HoldingRegister, [value]) => {
                let body = serialize(|cursor| {
                    cursor.write_u16_be(start)?;
                    cursor.write_u16_be(*value)?;
                    Ok(())
                })?;
                (function::WRITE_SINGLE_REGISTER, body)
            }
            (RegisterKind::Coil, _) => {
                let packed = pack_bits(values);
                let body = serialize(|cursor| {
                    cursor.write_u16_be(start)?;
                    cursor.write_u16_be(count)?;
                    cursor.write_u8(byte_count(packed.len())?)?;
                    for byte in packed.iter() {
                        cursor.write_u8(*byte)?;
                    }
                    Ok(())
                })?;
                (function::WRITE_MULTIPLE_COILS, body)
            }
            (RegisterKind::HoldingRegister, _) => {
                let body = serialize(|cursor| {
                    cursor.write_u16_be(start)?;
                    cursor.write_u16_be(count)?;
                    cursor.write_u8(byte_count(2 * values.len())?)?;
                    for value in values {
                        cursor.write_u16_be(*value)?;
                    }
                    Ok(())
                })?;
                (function::WRITE_MULTIPLE_REGISTERS, body)
            }
            _ => return Err(RequestError::UnsupportedKind(kind)),
        };

        Ok(Self {
            unit_id,
            function,
            body,
            expect: Expect::Echo,
        })
    }

    /// The complete RTU frame including the CRC
    pub(crate) fn format(&self) -> Result<Vec<u8>, RequestError> {
        let mut buffer = [0u8; constants::MAX_FRAME_LENGTH];
        let length = {
            let mut cursor = WriteCursor::new(&mut buffer);
            cursor.write_u8(self.unit_id.value)?;
            cursor.write_u8(self.function)?;
            for byte in self.body.iter() {
                cursor.write_u8(*byte)?;
            }
            let mut digest = CRC.digest();
            digest.update(&[self.unit_id.value, self.function]);
            digest.update(&self.body);
            cursor.write_u16_le(digest.finalize())?;
            cursor.position()
        };
        Ok(buffer[..length].to_vec())
    }

    /// Validate a response frame against this request
    ///
    /// Returns the values read, or an empty vector for writes.
    pub(crate) fn parse_response(&self, response: &Frame) -> Result<Vec<u16>, RequestError> {
        if response.unit_id != self.unit_id {
            let err = FrameParseError::UnexpectedUnit(response.unit_id.value, self.unit_id.value);
            return Err(err.into());
        }

        let mut cursor = ReadCursor::new(&response.body);

        let error_function = self.function | function::ERROR_FLAG;
        if response.function == error_function {
            return Err(ExceptionCode::from(cursor.read_u8()?).into());
        }
        if response.function != self.function {
            return Err(AduParseError::UnknownResponseFunction(
                response.function,
                self.function,
                error_function,
            )
            .into());
        }

        let values = match self.expect {
            Expect::Bits(count) => {
                let data = counted_data(&mut cursor, num_bytes_for_bits(count))?;
                unpack_bits(data, count)
            }
            Expect::Registers(count) => {
                let mut data = ReadCursor::new(counted_data(&mut cursor, 2 * count as usize)?);
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(data.read_u16_be()?);
                }
                values
            }
            Expect::Echo => {
                let mut echo = ReadCursor::new(&self.body);
                for _ in 0..2 {
                    if cursor.read_u16_be()? != echo.read_u16_be()? {
                        return Err(AduParseError::ReplyEchoMismatch.into());
                    }
                }
                Vec::new()
            }
        };

        if !cursor.is_empty() {
            return Err(AduParseError::TrailingBytes(cursor.remaining()).into());
        }
        Ok(values)
    }
}

/// Function code and data of a received frame, CRC already checked
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) unit_id: UnitId,
    pub(crate) function: u8,
    pub(crate) body: Vec<u8>,
}

/// Try to parse one response frame from the start of the buffer
///
/// Returns `Ok(None)` if more bytes are needed.
pub(crate) fn parse_frame(buffer: &[u8]) -> Result<Option<Frame>, RequestError> {
    let mut cursor = ReadCursor::new(buffer);
    if cursor.remaining() < constants::HEADER_LENGTH + constants::FUNCTION_CODE_LENGTH {
        return Ok(None);
    }
    let unit_id = cursor.read_u8()?;
    let function_code = cursor.read_u8()?;

    let body_length = match length_mode(function_code) {
        LengthMode::Fixed(length) => length,
        LengthMode::Offset(offset) => {
            if cursor.remaining() < offset {
                return Ok(None);
            }
            // the last byte of the offset holds the number of bytes that follow
            let mut lookahead = ReadCursor::new(
                &buffer[constants::HEADER_LENGTH + constants::FUNCTION_CODE_LENGTH..],
            );
            lookahead.read_bytes(offset - 1)?;
            offset + lookahead.read_u8()? as usize
        }
        LengthMode::Unknown => {
            return Err(FrameParseError::UnknownFunctionCode(function_code).into());
        }
    };

    if constants::FUNCTION_CODE_LENGTH + body_length > constants::MAX_ADU_LENGTH {
        return Err(FrameParseError::FrameLengthTooBig(
            constants::FUNCTION_CODE_LENGTH + body_length,
            constants::MAX_ADU_LENGTH,
        )
        .into());
    }

    if cursor.remaining() < body_length + constants::CRC_LENGTH {
        return Ok(None);
    }
    let body = cursor.read_bytes(body_length)?;
    let received_crc = cursor.read_u16_le()?;

    let expected_crc = {
        let mut digest = CRC.digest();
        digest.update(&[unit_id, function_code]);
        digest.update(body);
        digest.finalize()
    };
    if received_crc != expected_crc {
        return Err(FrameParseError::CrcValidationFailure(received_crc, expected_crc).into());
    }

    if !cursor.is_empty() {
        return Err(AduParseError::TrailingBytes(cursor.remaining()).into());
    }

    Ok(Some(Frame {
        unit_id: UnitId::new(unit_id),
        function: function_code,
        body: body.to_vec(),
    }))
}

/// Write a PDU body into a buffer sized for the largest ADU
fn serialize<F>(write: F) -> Result<Vec<u8>, RequestError>
where
    F: FnOnce(&mut WriteCursor) -> Result<(), RequestError>,
{
    let mut buffer = [0u8; constants::MAX_ADU_LENGTH];
    let length = {
        let mut cursor = WriteCursor::new(&mut buffer);
        write(&mut cursor)?;
        cursor.position()
    };
    Ok(buffer[..length].to_vec())
}

fn byte_count(count: usize) -> Result<u8, RequestError> {
    u8::try_from(count).map_err(|_| RequestError::Internal(InternalError::InsufficientWriteSpace))
}

fn counted_data<'a>(
    cursor: &mut ReadCursor<'a>,
    expected: usize,
) -> Result<&'a [u8], RequestError> {
    let count = cursor.read_u8()? as usize;
    if count != expected {
        return Err(AduParseError::ByteCountMismatch(expected, count).into());
    }
    if cursor.remaining() != count {
        return Err(AduParseError::ByteCountMismatch(count, cursor.remaining()).into());
    }
    Ok(cursor.read_bytes(count)?)
}

fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize).div_ceil(8)
}

fn pack_bits(values: &[u16]) -> Vec<u8> {
    let mut packed = vec![0u8; values.len().div_ceil(8)];
    for (i, value) in values.iter().enumerate() {
        if *value != 0 {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

fn unpack_bits(data: &[u8], count: u16) -> Vec<u16> {
    (0..count as usize)
        .map(|i| u16::from((data[i / 8] >> (i % 8)) & 1))
        .collect()
}

pub(crate) struct PduDisplay<'a> {
    level: PduDecodeLevel,
    function: u8,
    body: &'a [u8],
}

impl<'a> PduDisplay<'a> {
    pub(crate) fn new(level: PduDecodeLevel, function: u8, body: &'a [u8]) -> Self {
        Self {
            level,
            function,
            body,
        }
    }
}

impl std::fmt::Display for PduDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", function_name(self.function))?;
        if self.level.data_headers() {
            write!(f, " ({} bytes)", self.body.len())?;
        }
        if self.level.data_values() {
            crate::serial::phys::format_bytes(f, self.body)?;
        }
        Ok(())
    }
}

fn function_name(code: u8) -> &'static str {
    if code & function::ERROR_FLAG != 0 {
        return "EXCEPTION";
    }
    match code {
        function::READ_COILS => "READ COILS",
        function::READ_DISCRETE_INPUTS => "READ DISCRETE INPUTS",
        function::READ_HOLDING_REGISTERS => "READ HOLDING REGISTERS",
        function::READ_INPUT_REGISTERS => "READ INPUT REGISTERS",
        function::WRITE_SINGLE_COIL => "WRITE SINGLE COIL",
        function::WRITE_SINGLE_REGISTER => "WRITE SINGLE REGISTER",
        function::WRITE_MULTIPLE_COILS => "WRITE MULTIPLE COILS",
        function::WRITE_MULTIPLE_REGISTERS => "WRITE MULTIPLE REGISTERS",
        _ => "UNKNOWN",
    }
}
