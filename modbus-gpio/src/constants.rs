/// Number of addressable pins, one slot per `u8` address
pub const PIN_COUNT: usize = 256;

/// Default values used by the server and the command line front end
pub mod defaults {
    /// Only unit id accepted by the request mapper unless configured otherwise
    pub const UNIT_ID: u8 = 255;
    /// Default Modbus/TCP port
    pub const PORT: u16 = 502;
    /// Maximum number of concurrent client sessions
    pub const MAX_SESSIONS: usize = 15;
    /// Seconds without a request after which a client connection is closed
    pub const IDLE_TIMEOUT_SECS: u64 = 30;
    /// Polling period of a watched discrete input in milliseconds
    pub const WATCH_PERIOD_MS: u64 = 100;
}

/// Protocol limits enforced by the request mapper
pub mod limits {
    /// The only quantity accepted in coil and discrete input requests
    pub const QUANTITY: u16 = 1;
}
