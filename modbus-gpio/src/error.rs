use crate::pin::PullMode;

/// Errors reported by a [`GpioBackend`](crate::backend::GpioBackend) or one of its pins
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// the driver resource is already acquired
    #[error("GPIO driver is already open")]
    AlreadyOpen,
    /// the driver resource has not been acquired
    #[error("GPIO driver is not open")]
    NotOpen,
    /// the driver resource could not be acquired
    #[error("GPIO driver unavailable: {0}")]
    Unavailable(String),
    /// the pin number does not exist on this hardware
    #[error("GPIO pin {0} does not exist")]
    InvalidPin(u8),
    /// the pin is held by another live handle
    #[error("GPIO pin {0} is already in use")]
    PinInUse(u8),
    /// attempted to drive a pin that is configured as an input
    #[error("GPIO pin {0} is not configured as an output")]
    WrongDirection(u8),
    /// the electrical read returned neither high nor low
    #[error("GPIO pin {0} returned an invalid level")]
    BadRead(u8),
    /// any other error reported by the underlying hardware library
    #[error("GPIO hardware error: {0}")]
    Hardware(String),
}

/// Errors returned when configuring pins of a [`PinRegistry`](crate::registry::PinRegistry)
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// the registry is closed
    #[error("pin registry is not open")]
    NotOpen,
    /// a discrete input was configured without a pull-up or pull-down resistor
    #[error("invalid pull mode for a discrete input: {0}")]
    InvalidPullMode(PullMode),
    /// permission was changed on a pin that has no role
    #[error("pin {0} is not configured")]
    NotConfigured(u8),
    /// the driver failed to program the pin
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors returned when reading the value of a pin
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// the registry is closed
    #[error("pin registry is not open")]
    NotOpen,
    /// discrete input read on a pin without a pull mode
    #[error("pin {0} has invalid pull mode {1}")]
    InvalidPullMode(u8, PullMode),
    /// coil read on a pin that is not a coil
    #[error("pin {0} is not configured as a coil")]
    NotACoil(u8),
    /// the driver failed to read the pin
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors returned when driving a coil
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// the registry is closed
    #[error("pin registry is not open")]
    NotOpen,
    /// coil write on a pin that is not a coil
    #[error("pin {0} is not configured as a coil")]
    NotACoil(u8),
    /// the driver failed to drive the pin
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Modbus-shaped errors returned by the [`RequestMapper`](crate::mapper::RequestMapper)
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModbusError {
    /// the request was addressed to a unit id this server does not answer
    #[error("unit id {0} is not served")]
    BadUnitId(u8),
    /// the function or data type is not supported
    #[error("function not supported")]
    IllegalFunction,
    /// the quantity or payload of the request is not acceptable
    #[error("illegal data value")]
    IllegalDataValue,
    /// remote access to the address is not allowed
    #[error("address {0} is not accessible")]
    IllegalDataAddress(u16),
    /// the registry failed while servicing an accepted request
    #[error("server device failure")]
    ServerDeviceFailure,
}

impl From<ReadError> for ModbusError {
    fn from(_: ReadError) -> Self {
        ModbusError::ServerDeviceFailure
    }
}

impl From<WriteError> for ModbusError {
    fn from(_: WriteError) -> Self {
        ModbusError::ServerDeviceFailure
    }
}

impl From<ModbusError> for tokio_modbus::ExceptionCode {
    fn from(err: ModbusError) -> Self {
        match err {
            ModbusError::BadUnitId(_) => tokio_modbus::ExceptionCode::GatewayTargetDevice,
            ModbusError::IllegalFunction => tokio_modbus::ExceptionCode::IllegalFunction,
            ModbusError::IllegalDataValue => tokio_modbus::ExceptionCode::IllegalDataValue,
            ModbusError::IllegalDataAddress(_) => tokio_modbus::ExceptionCode::IllegalDataAddress,
            ModbusError::ServerDeviceFailure => tokio_modbus::ExceptionCode::ServerDeviceFailure,
        }
    }
}
