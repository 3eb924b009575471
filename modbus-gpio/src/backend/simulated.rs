use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{Bias, GpioBackend, GpioPin, Level};
use crate::error::DriverError;

/// Direction and bias a simulated pin was last programmed with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    /// programmed with [`GpioBackend::output`]
    Output,
    /// programmed with [`GpioBackend::input`]
    Input(Bias),
}

#[derive(Debug)]
struct SimulatedPinState {
    mode: PinMode,
    latch: Level,
    driven: Option<Level>,
    faulty: bool,
    claimed: bool,
}

impl SimulatedPinState {
    fn new(mode: PinMode) -> Self {
        Self {
            mode,
            latch: Level::Low,
            driven: None,
            faulty: false,
            claimed: true,
        }
    }

    fn level(&self) -> Level {
        match self.mode {
            PinMode::Output => self.latch,
            PinMode::Input(bias) => self.driven.unwrap_or(bias.resting_level()),
        }
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    open: bool,
    open_failure: Option<String>,
    pins: BTreeMap<u8, SimulatedPinState>,
}

/// GPIO backend that keeps every pin in memory
///
/// Clones share the same simulated board, so a test can hand one clone to a
/// [`PinRegistry`](crate::registry::PinRegistry) and keep another to play
/// the outside world: driving inputs, observing outputs and injecting faults.
#[derive(Clone, Debug, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimulatedState>>,
}

/// Pin handle returned by [`SimulatedBackend`]
///
/// Only one handle per pin may be alive at a time; dropping it frees the pin.
#[derive(Debug)]
pub struct SimulatedPin {
    number: u8,
    state: Arc<Mutex<SimulatedState>>,
}

fn lock(state: &Mutex<SimulatedState>) -> MutexGuard<'_, SimulatedState> {
    // the simulated board stays usable after a panicking test thread
    state.lock().unwrap_or_else(|err| err.into_inner())
}

impl SimulatedBackend {
    /// Create a closed board with no programmed pins
    pub fn new() -> Self {
        Self::default()
    }

    /// true while the board is open
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Make the next call to [`GpioBackend::open`] fail with `reason`
    pub fn fail_next_open(&self, reason: &str) {
        lock(&self.state).open_failure = Some(reason.to_string());
    }

    /// Drive an input pin from the outside, overriding its pull resistor
    pub fn drive(&self, number: u8, level: Level) {
        if let Some(pin) = lock(&self.state).pins.get_mut(&number) {
            pin.driven = Some(level);
        }
    }

    /// Stop driving an input pin, letting it return to its resting level
    pub fn release(&self, number: u8) {
        if let Some(pin) = lock(&self.state).pins.get_mut(&number) {
            pin.driven = None;
        }
    }

    /// Make every read of the pin fail as if the driver returned garbage
    pub fn inject_read_fault(&self, number: u8) {
        if let Some(pin) = lock(&self.state).pins.get_mut(&number) {
            pin.faulty = true;
        }
    }

    /// Current electrical level of a programmed pin
    pub fn level(&self, number: u8) -> Option<Level> {
        lock(&self.state).pins.get(&number).map(|pin| pin.level())
    }

    /// Direction and bias of a programmed pin
    pub fn mode(&self, number: u8) -> Option<PinMode> {
        lock(&self.state).pins.get(&number).map(|pin| pin.mode)
    }

    fn program(&self, number: u8, mode: PinMode) -> Result<SimulatedPin, DriverError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        if state.pins.get(&number).is_some_and(|pin| pin.claimed) {
            return Err(DriverError::PinInUse(number));
        }
        state.pins.insert(number, SimulatedPinState::new(mode));
        Ok(SimulatedPin {
            number,
            state: self.state.clone(),
        })
    }
}

impl GpioBackend for SimulatedBackend {
    type Pin = SimulatedPin;

    fn open(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.open_failure.take() {
            return Err(DriverError::Unavailable(reason));
        }
        if state.open {
            return Err(DriverError::AlreadyOpen);
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        state.open = false;
        Ok(())
    }

    fn output(&mut self, number: u8) -> Result<SimulatedPin, DriverError> {
        self.program(number, PinMode::Output)
    }

    fn input(&mut self, number: u8, bias: Bias) -> Result<SimulatedPin, DriverError> {
        self.program(number, PinMode::Input(bias))
    }
}

impl SimulatedPin {
    fn drive(&mut self, level: Level) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        match state.pins.get_mut(&self.number) {
            Some(pin) if pin.mode == PinMode::Output => {
                pin.latch = level;
                Ok(())
            }
            Some(_) => Err(DriverError::WrongDirection(self.number)),
            None => Err(DriverError::InvalidPin(self.number)),
        }
    }
}

impl Drop for SimulatedPin {
    fn drop(&mut self) {
        if let Some(pin) = lock(&self.state).pins.get_mut(&self.number) {
            pin.claimed = false;
        }
    }
}

impl GpioPin for SimulatedPin {
    fn high(&mut self) -> Result<(), DriverError> {
        self.drive(Level::High)
    }

    fn low(&mut self) -> Result<(), DriverError> {
        self.drive(Level::Low)
    }

    fn read(&self) -> Result<Level, DriverError> {
        let state = lock(&self.state);
        if !state.open {
            return Err(DriverError::NotOpen);
        }
        match state.pins.get(&self.number) {
            Some(pin) if pin.faulty => Err(DriverError::BadRead(self.number)),
            Some(pin) => Ok(pin.level()),
            None => Err(DriverError::InvalidPin(self.number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_backend() -> SimulatedBackend {
        let mut backend = SimulatedBackend::new();
        backend.open().unwrap();
        backend
    }

    #[test]
    fn cannot_program_pins_while_closed() {
        let mut backend = SimulatedBackend::new();
        assert_eq!(backend.output(4).unwrap_err(), DriverError::NotOpen);
    }

    #[test]
    fn open_twice_fails() {
        let mut backend = open_backend();
        assert_eq!(backend.open(), Err(DriverError::AlreadyOpen));
        backend.close().unwrap();
        assert_eq!(backend.close(), Err(DriverError::NotOpen));
    }

    #[test]
    fn injected_open_failure_is_reported_once() {
        let mut backend = SimulatedBackend::new();
        backend.fail_next_open("no /dev/gpiomem");
        assert_eq!(
            backend.open(),
            Err(DriverError::Unavailable("no /dev/gpiomem".to_string()))
        );
        assert!(!backend.is_open());
        backend.open().unwrap();
        assert!(backend.is_open());
    }

    #[test]
    fn outputs_latch_the_driven_level() {
        let mut backend = open_backend();
        let mut pin = backend.output(17).unwrap();
        assert_eq!(pin.read(), Ok(Level::Low));
        pin.high().unwrap();
        assert_eq!(pin.read(), Ok(Level::High));
        assert_eq!(backend.level(17), Some(Level::High));
        assert_eq!(backend.mode(17), Some(PinMode::Output));
    }

    #[test]
    fn inputs_rest_at_their_pull_level() {
        let mut backend = open_backend();
        let up = backend.input(6, Bias::PullUp).unwrap();
        let down = backend.input(7, Bias::PullDown).unwrap();
        assert_eq!(up.read(), Ok(Level::High));
        assert_eq!(down.read(), Ok(Level::Low));

        backend.drive(6, Level::Low);
        assert_eq!(up.read(), Ok(Level::Low));
        backend.release(6);
        assert_eq!(up.read(), Ok(Level::High));
    }

    #[test]
    fn inputs_cannot_be_driven() {
        let mut backend = open_backend();
        let mut pin = backend.input(6, Bias::PullDown).unwrap();
        assert_eq!(pin.high(), Err(DriverError::WrongDirection(6)));
    }

    #[test]
    fn pin_is_exclusive_until_its_handle_is_dropped() {
        let mut backend = open_backend();
        let mut pin = backend.output(17).unwrap();
        pin.high().unwrap();
        assert_eq!(
            backend.input(17, Bias::PullUp).unwrap_err(),
            DriverError::PinInUse(17)
        );
        assert_eq!(backend.mode(17), Some(PinMode::Output));

        drop(pin);
        assert_eq!(backend.level(17), Some(Level::High));
        let pin = backend.input(17, Bias::PullUp).unwrap();
        assert_eq!(pin.read(), Ok(Level::High));
        assert_eq!(backend.mode(17), Some(PinMode::Input(Bias::PullUp)));
    }

    #[test]
    fn faulty_pins_fail_reads() {
        let mut backend = open_backend();
        let pin = backend.input(6, Bias::PullUp).unwrap();
        backend.inject_read_fault(6);
        assert_eq!(pin.read(), Err(DriverError::BadRead(6)));
    }
}
