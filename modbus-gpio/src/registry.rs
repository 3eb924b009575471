use crate::backend::{GpioBackend, GpioPin, Level};
use crate::constants::PIN_COUNT;
use crate::error::{ConfigError, DriverError, ReadError, WriteError};
use crate::pin::{PinRole, PinState, PullMode};

/// Logical value of a discrete input given its pull mode and electrical level
///
/// The resting level imposed by the resistor reads as `false`; the opposite
/// level, which only an external signal can produce, reads as `true`.
/// Returns `None` for [`PullMode::Off`].
pub fn discrete_input_value(pull_mode: PullMode, level: Level) -> Option<bool> {
    match (pull_mode, level) {
        (PullMode::PullDown, Level::Low) => Some(false),
        (PullMode::PullDown, Level::High) => Some(true),
        (PullMode::PullUp, Level::Low) => Some(true),
        (PullMode::PullUp, Level::High) => Some(false),
        (PullMode::Off, _) => None,
    }
}

struct Slot<P> {
    state: PinState,
    handle: Option<P>,
}

impl<P> Slot<P> {
    fn empty() -> Self {
        Self {
            state: PinState::UNCONFIGURED,
            handle: None,
        }
    }
}

/// Access-control and configuration table for every pin address
///
/// Owns the driver backend and one slot per `u8` address. A slot holds the
/// [`PinState`] of the address together with the driver handle created when
/// the pin was configured. Every operation other than [`open`](Self::open),
/// [`close`](Self::close) and the read-only queries requires the registry to
/// be open and fails with a `NotOpen` error otherwise. The queries report the
/// unconfigured, denied default while the registry is closed.
pub struct PinRegistry<B: GpioBackend> {
    backend: B,
    open: bool,
    pins: Box<[Slot<B::Pin>; PIN_COUNT]>,
}

impl<B: GpioBackend> std::fmt::Debug for PinRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRegistry")
            .field("open", &self.open)
            .field("configured", &self.configured().count())
            .finish()
    }
}

impl<B: GpioBackend> PinRegistry<B> {
    /// Create a closed, empty registry on top of `backend`
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            open: false,
            pins: Box::new(std::array::from_fn(|_| Slot::empty())),
        }
    }

    /// Backend the registry programs pins through
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Acquire the driver and start from an empty pin table
    pub fn open(&mut self) -> Result<(), DriverError> {
        if self.open {
            return Err(DriverError::AlreadyOpen);
        }
        self.backend.open()?;
        self.pins.iter_mut().for_each(|slot| *slot = Slot::empty());
        self.open = true;
        tracing::info!("GPIO port opened");
        Ok(())
    }

    /// Release the driver
    ///
    /// The pin table is left as is but must not be relied on until the next
    /// [`open`](Self::open).
    pub fn close(&mut self) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::NotOpen);
        }
        self.backend.close()?;
        self.open = false;
        tracing::info!("GPIO port closed");
        Ok(())
    }

    /// true between a successful [`open`](Self::open) and [`close`](Self::close)
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Configuration of `addr`
    pub fn state(&self, addr: u8) -> PinState {
        if !self.open {
            return PinState::UNCONFIGURED;
        }
        self.slot(addr).state
    }

    /// true if `addr` is a coil or a discrete input
    pub fn is_configured(&self, addr: u8) -> bool {
        self.state(addr).is_configured()
    }

    /// true if Modbus clients may access `addr`
    pub fn is_allowed(&self, addr: u8) -> bool {
        self.state(addr).allowed
    }

    /// Pull mode of `addr`, [`PullMode::Off`] unless it is a discrete input
    pub fn pull_mode(&self, addr: u8) -> PullMode {
        self.state(addr).pull_mode
    }

    /// Configured addresses in ascending order
    pub fn configured(&self) -> impl Iterator<Item = (u8, PinState)> + '_ {
        (0..=u8::MAX)
            .map(|addr| (addr, self.state(addr)))
            .filter(|(_, state)| state.is_configured())
    }

    /// Dump the pin table at debug level
    pub fn log_configuration(&self) {
        tracing::debug!("GPIO port open: {}", self.open);
        for (addr, state) in self.configured() {
            tracing::debug!("pin {addr} -> {state}");
        }
    }

    /// Program `addr` as an output and expose it as a coil
    ///
    /// Replaces any previous configuration and revokes remote access. If the
    /// driver refuses the pin, `addr` is left unconfigured.
    pub fn set_pin_as_coil(&mut self, addr: u8) -> Result<(), ConfigError> {
        self.ensure_open(ConfigError::NotOpen)?;
        self.program(addr, PinState::coil(), |backend| backend.output(addr))?;
        tracing::debug!("pin {addr} configured as coil");
        Ok(())
    }

    /// Program `addr` as an input and expose it as a discrete input
    ///
    /// `pull_mode` must be [`PullMode::PullDown`] or [`PullMode::PullUp`];
    /// otherwise the table is left untouched. Replaces any previous
    /// configuration and revokes remote access. If the driver refuses the
    /// pin, `addr` is left unconfigured.
    pub fn set_pin_as_discrete_input(
        &mut self,
        addr: u8,
        pull_mode: PullMode,
    ) -> Result<(), ConfigError> {
        self.ensure_open(ConfigError::NotOpen)?;
        let bias = pull_mode
            .bias()
            .ok_or(ConfigError::InvalidPullMode(pull_mode))?;
        self.program(addr, PinState::discrete_input(pull_mode), |backend| {
            backend.input(addr, bias)
        })?;
        tracing::debug!("pin {addr} configured as discrete input ({pull_mode})");
        Ok(())
    }

    /// Grant remote access to a configured pin
    pub fn allow(&mut self, addr: u8) -> Result<(), ConfigError> {
        self.set_allowed(addr, true)
    }

    /// Revoke remote access to a configured pin
    pub fn deny(&mut self, addr: u8) -> Result<(), ConfigError> {
        self.set_allowed(addr, false)
    }

    fn set_allowed(&mut self, addr: u8, allowed: bool) -> Result<(), ConfigError> {
        self.ensure_open(ConfigError::NotOpen)?;
        let slot = self.slot_mut(addr);
        if !slot.state.is_configured() {
            return Err(ConfigError::NotConfigured(addr));
        }
        slot.state.allowed = allowed;
        tracing::debug!("pin {addr} allowed: {allowed}");
        Ok(())
    }

    /// Drive a coil high (`true`) or low (`false`)
    pub fn set_coil(&mut self, addr: u8, value: bool) -> Result<(), WriteError> {
        self.ensure_open(WriteError::NotOpen)?;
        let slot = self.slot_mut(addr);
        match (slot.state.role, slot.handle.as_mut()) {
            (PinRole::Coil, Some(pin)) => Ok(pin.write(Level::from(value))?),
            _ => Err(WriteError::NotACoil(addr)),
        }
    }

    /// Electrical level of a coil, `true` when high
    pub fn get_coil(&self, addr: u8) -> Result<bool, ReadError> {
        self.ensure_open(ReadError::NotOpen)?;
        let slot = self.slot(addr);
        match (slot.state.role, slot.handle.as_ref()) {
            (PinRole::Coil, Some(pin)) => Ok(pin.read()?.into()),
            _ => Err(ReadError::NotACoil(addr)),
        }
    }

    /// Logical value of a discrete input, see [`discrete_input_value`]
    pub fn get_discrete_input(&self, addr: u8) -> Result<bool, ReadError> {
        self.ensure_open(ReadError::NotOpen)?;
        let slot = self.slot(addr);
        let pull_mode = slot.state.pull_mode;
        let pin = match slot.handle.as_ref() {
            Some(pin) if slot.state.role == PinRole::DiscreteInput => pin,
            _ => return Err(ReadError::InvalidPullMode(addr, pull_mode)),
        };
        let level = pin.read()?;
        discrete_input_value(pull_mode, level).ok_or(ReadError::InvalidPullMode(addr, pull_mode))
    }

    /// Release the current handle of `addr`, then claim a new one
    fn program<F>(&mut self, addr: u8, state: PinState, claim: F) -> Result<(), DriverError>
    where
        F: FnOnce(&mut B) -> Result<B::Pin, DriverError>,
    {
        // a driver hands out a single live handle per pin
        *self.slot_mut(addr) = Slot::empty();
        let handle = claim(&mut self.backend)?;
        *self.slot_mut(addr) = Slot {
            state,
            handle: Some(handle),
        };
        Ok(())
    }

    fn ensure_open<E>(&self, err: E) -> Result<(), E> {
        if self.open {
            Ok(())
        } else {
            Err(err)
        }
    }

    fn slot(&self, addr: u8) -> &Slot<B::Pin> {
        &self.pins[usize::from(addr)]
    }

    fn slot_mut(&mut self, addr: u8) -> &mut Slot<B::Pin> {
        &mut self.pins[usize::from(addr)]
    }
}
