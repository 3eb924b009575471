use crate::error::DriverError;

/// In-memory backend used for tests and dry runs
pub mod simulated;

/// Raspberry Pi backend built on `rppal`
#[cfg(feature = "rpi")]
pub mod rpi;

/// Electrical level of a pin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// logic low
    Low,
    /// logic high
    High,
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        matches!(level, Level::High)
    }
}

/// Pull resistor requested when programming an input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bias {
    /// resistor to the supply rail, the pin rests high
    PullUp,
    /// resistor to ground, the pin rests low
    PullDown,
}

impl Bias {
    /// level of an input that nothing external is driving
    pub fn resting_level(self) -> Level {
        match self {
            Bias::PullUp => Level::High,
            Bias::PullDown => Level::Low,
        }
    }
}

/// Capability to acquire the GPIO hardware and program individual pins
///
/// A backend is opened once per registry lifecycle. Programming a pin hands
/// back a handle that the registry owns exclusively until the pin is
/// reconfigured.
pub trait GpioBackend: Send + Sync + 'static {
    /// Handle to a programmed pin
    type Pin: GpioPin;

    /// Acquire the hardware resource
    fn open(&mut self) -> Result<(), DriverError>;

    /// Release the hardware resource
    fn close(&mut self) -> Result<(), DriverError>;

    /// Program a pin as an output
    fn output(&mut self, number: u8) -> Result<Self::Pin, DriverError>;

    /// Program a pin as an input with the requested pull resistor
    fn input(&mut self, number: u8, bias: Bias) -> Result<Self::Pin, DriverError>;
}

/// Electrical operations on a programmed pin
pub trait GpioPin: Send + Sync + 'static {
    /// Drive the pin high
    fn high(&mut self) -> Result<(), DriverError>;

    /// Drive the pin low
    fn low(&mut self) -> Result<(), DriverError>;

    /// Read the electrical level of the pin
    fn read(&self) -> Result<Level, DriverError>;

    /// Drive the pin to `level`
    fn write(&mut self, level: Level) -> Result<(), DriverError> {
        match level {
            Level::High => self.high(),
            Level::Low => self.low(),
        }
    }
}
