use crate::exception::ExceptionCode;
use crate::types::RegisterKind;

/// The task processing requests has terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown;

impl std::error::Error for Shutdown {}

impl std::fmt::Display for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("the task processing requests has terminated")
    }
}

/// Top level error type for a bus transaction
///
/// `Copy + PartialEq` so that it can be stored and compared by the status cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred
    Io(std::io::ErrorKind),
    /// A Modbus exception was returned by the device
    Exception(ExceptionCode),
    /// Request was not performed because it is invalid
    BadRequest(InvalidRange),
    /// Unable to parse a frame from the serial port
    BadFrame(FrameParseError),
    /// Response ADU was invalid
    BadResponse(AduParseError),
    /// Timeout occurred before receiving a response from the device
    ResponseTimeout,
    /// No connection exists to the bus
    NoConnection,
    /// The register kind cannot be accessed this way
    UnsupportedKind(RegisterKind),
    /// An internal error occurred while encoding a request
    Internal(InternalError),
    /// Task processing requests has been shut down
    Shutdown,
}

impl RequestError {
    /// True for errors that leave the connection unusable
    ///
    /// Everything else is a per-transaction failure and the queue keeps draining.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, RequestError::Io(_) | RequestError::NoConnection)
    }
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind}"),
            RequestError::Exception(err) => write!(f, "modbus exception: {err}"),
            RequestError::BadRequest(err) => write!(f, "bad request: {err}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::ResponseTimeout => f.write_str("response timeout"),
            RequestError::NoConnection => f.write_str("no connection to the bus"),
            RequestError::UnsupportedKind(kind) => write!(f, "unsupported register type: {kind}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::Shutdown => f.write_str("the engine has been shut down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<tokio_serial::Error> for RequestError {
    fn from(err: tokio_serial::Error) -> Self {
        match err.kind {
            tokio_serial::ErrorKind::Io(kind) => RequestError::Io(kind),
            tokio_serial::ErrorKind::NoDevice => RequestError::NoConnection,
            tokio_serial::ErrorKind::InvalidInput => {
                RequestError::Io(std::io::ErrorKind::InvalidInput)
            }
            _ => RequestError::Io(std::io::ErrorKind::Other),
        }
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(_: scursor::ReadError) -> Self {
        RequestError::BadResponse(AduParseError::InsufficientBytes)
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(_: scursor::WriteError) -> Self {
        RequestError::Internal(InternalError::InsufficientWriteSpace)
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(err: ExceptionCode) -> Self {
        RequestError::Exception(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InvalidRange> for InvalidItem {
    fn from(err: InvalidRange) -> Self {
        InvalidItem::Range(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

impl From<tokio::time::error::Elapsed> for RequestError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RequestError::ResponseTimeout
    }
}

/// Errors that indicate a bug while encoding a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// The request does not fit in a single frame
    InsufficientWriteSpace,
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace => {
                f.write_str("the request does not fit in a single frame")
            }
        }
    }
}

/// Errors that result from an invalid start/count pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// Count of zero not allowed
    CountOfZero,
    /// Address in range overflows u16
    AddressOverflow(u16, u16),
    /// Count too large for type
    CountTooLargeForType(u16, u16), // actual and limit
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("range contains count == 0"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count = {count} would overflow the representation of u16"
            ),
            InvalidRange::CountTooLargeForType(count, max) => write!(
                f,
                "the request count of {count} exceeds maximum allowed count of {max} for this type"
            ),
        }
    }
}

/// Errors that occur while parsing an RTU frame off the serial port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// The CRC of the frame does not match the calculated value
    CrcValidationFailure(u16, u16), // received and expected
    /// The response function code is neither the request's nor its exception form
    UnknownFunctionCode(u8),
    /// Frame length exceeds the allowed maximum
    FrameLengthTooBig(usize, usize), // actual and maximum
    /// Frame was sent by a different unit than the one addressed
    UnexpectedUnit(u8, u8), // received and expected
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received crc {received:#06X} does not match calculated crc {expected:#06X}"
            ),
            FrameParseError::UnknownFunctionCode(code) => {
                write!(f, "received unexpected function code {code:#04X}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "frame length of {size} exceeds the maximum allowed length of {max}"
            ),
            FrameParseError::UnexpectedUnit(received, expected) => write!(
                f,
                "received frame from unit {received} while waiting on unit {expected}"
            ),
        }
    }
}

/// Errors that occur while parsing the body of a response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// Response is too short to be valid
    InsufficientBytes,
    /// Byte count in the response doesn't match the request
    ByteCountMismatch(usize, usize), // expected and actual
    /// Response contains extra trailing bytes
    TrailingBytes(usize),
    /// A write response does not echo the parameters of its request
    ReplyEchoMismatch,
    /// A response was received for a function code the request did not use
    UnknownResponseFunction(u8, u8, u8), // actual, expected, expected error
    /// Bad value for the coil state
    UnknownCoilState(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("response is too short to be valid"),
            AduParseError::ByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({expected}) doesn't match the actual number of bytes remaining ({actual})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "response contains {remaining} extra trailing bytes")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {error}"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

/// Reasons an item cannot be mapped onto a bus transaction
///
/// Items failing validation are dropped with a warning, never queued
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidItem {
    /// Device address is outside `1..=255`
    BadAddress(i32),
    /// Unit offset is negative or does not fit the 16-bit address space
    BadUnit(i32),
    /// Register kind is `Invalid`
    InvalidKind,
    /// Write attempted on a read-only kind
    ReadOnly(RegisterKind),
    /// Another item already occupies this unit
    DuplicateUnit(u16),
    /// Value cannot be encoded into a single bit or register
    BadValue,
    /// Units do not form a valid protocol range
    Range(InvalidRange),
}

impl std::error::Error for InvalidItem {}

impl std::fmt::Display for InvalidItem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidItem::BadAddress(address) => write!(f, "invalid device address {address}"),
            InvalidItem::BadUnit(unit) => write!(f, "invalid unit {unit}"),
            InvalidItem::InvalidKind => f.write_str("invalid register type"),
            InvalidItem::ReadOnly(kind) => write!(f, "{kind} are read-only"),
            InvalidItem::DuplicateUnit(unit) => write!(f, "unit {unit} is already in use"),
            InvalidItem::BadValue => f.write_str("value is out of range for the register"),
            InvalidItem::Range(err) => write!(f, "{err}"),
        }
    }
}

/// Errors detected while building a project from its configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Two devices share the same id
    DuplicateDeviceId(u32),
    /// Two items share the same id
    DuplicateItemId(u32),
    /// Two devices on the same backend share a bus address
    DuplicateAddress(i32),
}

impl std::error::Error for ConfigError {}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::DuplicateDeviceId(id) => write!(f, "duplicate device id {id}"),
            ConfigError::DuplicateItemId(id) => write!(f, "duplicate item id {id}"),
            ConfigError::DuplicateAddress(address) => {
                write!(f, "more than one device uses address {address}")
            }
        }
    }
}
