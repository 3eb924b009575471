use crate::backend::Bias;

/// Role of a pin from the point of view of a Modbus client
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PinRole {
    /// not exposed
    #[default]
    Unconfigured,
    /// output pin exposed as a read/write coil
    Coil,
    /// input pin exposed as a read-only discrete input
    DiscreteInput,
}

/// Pull resistor configuration of a pin
///
/// Only meaningful for discrete inputs, where it also decides which
/// electrical level is reported as the active (`true`) state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PullMode {
    /// no pull resistor, the value of every pin that is not a discrete input
    #[default]
    Off,
    /// resting level is low, a driven high level reads as `true`
    PullDown,
    /// resting level is high, a level pulled to ground reads as `true`
    PullUp,
}

impl PullMode {
    /// the resistor bias to request from the driver, `None` for [`PullMode::Off`]
    pub fn bias(self) -> Option<Bias> {
        match self {
            PullMode::Off => None,
            PullMode::PullDown => Some(Bias::PullDown),
            PullMode::PullUp => Some(Bias::PullUp),
        }
    }
}

impl std::fmt::Display for PullMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullMode::Off => f.write_str("off"),
            PullMode::PullDown => f.write_str("pull-down"),
            PullMode::PullUp => f.write_str("pull-up"),
        }
    }
}

impl std::str::FromStr for PullMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(PullMode::Off),
            "down" | "pull-down" => Ok(PullMode::PullDown),
            "up" | "pull-up" => Ok(PullMode::PullUp),
            _ => Err(format!("unknown pull mode: {s}")),
        }
    }
}

/// Configuration of a single pin address
///
/// Addresses without a configuration report [`PinState::UNCONFIGURED`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinState {
    /// role of the pin
    pub role: PinRole,
    /// whether a Modbus client may access the pin
    pub allowed: bool,
    /// pull resistor, [`PullMode::Off`] unless the pin is a discrete input
    pub pull_mode: PullMode,
}

impl PinState {
    /// State of every address that was never configured
    pub const UNCONFIGURED: PinState = PinState {
        role: PinRole::Unconfigured,
        allowed: false,
        pull_mode: PullMode::Off,
    };

    pub(crate) fn coil() -> Self {
        Self {
            role: PinRole::Coil,
            allowed: false,
            pull_mode: PullMode::Off,
        }
    }

    pub(crate) fn discrete_input(pull_mode: PullMode) -> Self {
        Self {
            role: PinRole::DiscreteInput,
            allowed: false,
            pull_mode,
        }
    }

    /// true if the pin has a role
    pub fn is_configured(&self) -> bool {
        self.role != PinRole::Unconfigured
    }
}

impl std::fmt::Display for PinState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.role {
            PinRole::Unconfigured => f.write_str("unconfigured")?,
            PinRole::Coil => f.write_str("coil")?,
            PinRole::DiscreteInput => write!(f, "discrete input ({})", self.pull_mode)?,
        }
        if self.allowed {
            f.write_str(", allowed")
        } else {
            f.write_str(", denied")
        }
    }
}
