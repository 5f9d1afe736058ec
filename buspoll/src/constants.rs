pub(crate) mod coil {
    /// u16 representation of COIL == ON when performing write single coil
    pub(crate) const ON: u16 = 0xFF00;
    /// u16 representation of COIL == OFF when performing write single coil
    pub(crate) const OFF: u16 = 0x0000;
}

pub(crate) mod limits {
    /// Maximum count allowed in a read coils/discrete inputs request
    pub(crate) const MAX_READ_COILS_COUNT: u16 = 0x07D0;
    /// Maximum count allowed in a read holding/input registers request
    pub(crate) const MAX_READ_REGISTERS_COUNT: u16 = 0x007D;
    /// Maximum count allowed in a `write multiple coils` request
    pub(crate) const MAX_WRITE_COILS_COUNT: u16 = 0x07B0;
    /// Maximum count allowed in a `write multiple registers` request
    pub(crate) const MAX_WRITE_REGISTERS_COUNT: u16 = 0x007B;
}

pub(crate) mod function {
    pub(crate) const READ_COILS: u8 = 0x01;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 0x04;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 0x05;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub(crate) const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub(crate) const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    /// bit set in the function code of an exception response
    pub(crate) const ERROR_FLAG: u8 = 0x80;
}

pub(crate) mod exceptions {
    pub(crate) const ILLEGAL_FUNCTION: u8 = 0x01;
    pub(crate) const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub(crate) const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub(crate) const SERVER_DEVICE_FAILURE: u8 = 0x04;
    pub(crate) const ACKNOWLEDGE: u8 = 0x05;
    pub(crate) const SERVER_DEVICE_BUSY: u8 = 0x06;
    pub(crate) const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub(crate) const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub(crate) const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;
}

pub(crate) mod poll {
    use std::time::Duration;

    /// Poll intervals below this value disable periodic polling
    pub(crate) const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;
    pub(crate) const DEFAULT_WRITE_DEBOUNCE_MS: u64 = 50;
    pub(crate) const DEFAULT_PRIORITY_WRITE_DEBOUNCE_MS: u64 = 5;
    /// Capacity of the request queue between a handle and its task
    pub(crate) const DEFAULT_MAX_QUEUED_REQUESTS: usize = 16;
    /// Item changes buffered for each subscriber before it starts lagging
    pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;
}

pub(crate) mod serial {
    pub(crate) const DEFAULT_PORT_PATTERN: &str = "ttyUSB";
    pub(crate) const DEFAULT_BAUD_RATE: u32 = 9600;
    pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 200;
    pub(crate) const DEFAULT_RETRIES: usize = 5;
}
