use std::sync::{Mutex, MutexGuard};

use rppal::gpio::{Gpio, InputPin, OutputPin};

use crate::backend::{Bias, GpioBackend, GpioPin, Level};
use crate::error::DriverError;

/// Raspberry Pi GPIO through the memory mapped `/dev/gpiomem` interface
///
/// Pins are addressed with BCM numbers.
#[derive(Debug, Default)]
pub struct RpiBackend {
    gpio: Option<Gpio>,
}

#[derive(Debug)]
enum Programmed {
    Output(OutputPin),
    Input(InputPin),
}

/// Pin handle returned by [`RpiBackend`]
#[derive(Debug)]
pub struct RpiPin {
    number: u8,
    inner: Mutex<Programmed>,
}

impl From<rppal::gpio::Error> for DriverError {
    fn from(err: rppal::gpio::Error) -> Self {
        match err {
            rppal::gpio::Error::PinNotAvailable(number) => DriverError::InvalidPin(number),
            rppal::gpio::Error::PinUsed(number) => DriverError::PinInUse(number),
            other => DriverError::Hardware(other.to_string()),
        }
    }
}

impl From<rppal::gpio::Level> for Level {
    fn from(level: rppal::gpio::Level) -> Self {
        match level {
            rppal::gpio::Level::Low => Level::Low,
            rppal::gpio::Level::High => Level::High,
        }
    }
}

impl RpiBackend {
    /// Create a closed backend
    pub fn new() -> Self {
        Self::default()
    }

    fn gpio(&self) -> Result<&Gpio, DriverError> {
        self.gpio.as_ref().ok_or(DriverError::NotOpen)
    }
}

impl GpioBackend for RpiBackend {
    type Pin = RpiPin;

    fn open(&mut self) -> Result<(), DriverError> {
        if self.gpio.is_some() {
            return Err(DriverError::AlreadyOpen);
        }
        let gpio = Gpio::new().map_err(|err| DriverError::Unavailable(err.to_string()))?;
        self.gpio = Some(gpio);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.gpio.take() {
            Some(_) => Ok(()),
            None => Err(DriverError::NotOpen),
        }
    }

    fn output(&mut self, number: u8) -> Result<RpiPin, DriverError> {
        let pin = self.gpio()?.get(number)?.into_output();
        Ok(RpiPin::new(number, Programmed::Output(pin)))
    }

    fn input(&mut self, number: u8, bias: Bias) -> Result<RpiPin, DriverError> {
        let pin = self.gpio()?.get(number)?;
        let pin = match bias {
            Bias::PullUp => pin.into_input_pullup(),
            Bias::PullDown => pin.into_input_pulldown(),
        };
        Ok(RpiPin::new(number, Programmed::Input(pin)))
    }
}

impl RpiPin {
    fn new(number: u8, pin: Programmed) -> Self {
        Self {
            number,
            inner: Mutex::new(pin),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Programmed>, DriverError> {
        self.inner
            .lock()
            .map_err(|_| DriverError::Hardware(format!("pin {} lock poisoned", self.number)))
    }
}

impl GpioPin for RpiPin {
    fn high(&mut self) -> Result<(), DriverError> {
        match &mut *self.lock()? {
            Programmed::Output(pin) => {
                pin.set_high();
                Ok(())
            }
            Programmed::Input(_) => Err(DriverError::WrongDirection(self.number)),
        }
    }

    fn low(&mut self) -> Result<(), DriverError> {
        match &mut *self.lock()? {
            Programmed::Output(pin) => {
                pin.set_low();
                Ok(())
            }
            Programmed::Input(_) => Err(DriverError::WrongDirection(self.number)),
        }
    }

    fn read(&self) -> Result<Level, DriverError> {
        match &*self.lock()? {
            Programmed::Output(pin) => Ok(Level::from(pin.is_set_high())),
            Programmed::Input(pin) => Ok(pin.read().into()),
        }
    }
}
