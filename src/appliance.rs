//! Local view of the appliance and the commands a host can send.
//!
//! Outbound commands update the view optimistically once the broker has
//! accepted the publish; inbound shadow reports overwrite it.

use std::fmt;

use crate::protocol::shadow::{PresetMode, ShadowDocument};

/// Observable appliance state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub power_on: bool,

    /// Last mode set through this controller. Reports do not carry a mode
    /// this crate maps back, so this is `None` until a mode is sent.
    pub preset_mode: Option<PresetMode>,
}

impl State {
    /// Applies the effect of a command that was published successfully.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::TurnOn(mode) => {
                self.power_on = true;
                if mode.is_some() {
                    self.preset_mode = mode;
                }
            }
            Command::TurnOff => self.power_on = false,
            Command::SetPresetMode(mode) => self.preset_mode = Some(mode),
        }
    }

    /// Merges a shadow report. Returns whether anything changed.
    pub fn reconcile(&mut self, report: &ShadowDocument) -> bool {
        match report.reported_power() {
            Some(power_on) if power_on != self.power_on => {
                self.power_on = power_on;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let power = if self.power_on { "on" } else { "off" };
        match self.preset_mode {
            Some(mode) => write!(f, "{power}, mode {mode}"),
            None => write!(f, "{power}"),
        }
    }
}

/// A host command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Power on, then optionally select a mode.
    TurnOn(Option<PresetMode>),
    TurnOff,
    SetPresetMode(PresetMode),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnOn(None) => f.write_str("turn on"),
            Self::TurnOn(Some(mode)) => write!(f, "turn on in {mode}"),
            Self::TurnOff => f.write_str("turn off"),
            Self::SetPresetMode(mode) => write!(f, "set mode {mode}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_update_state() {
        let mut state = State::default();

        state.apply(Command::TurnOn(None));
        assert_eq!(
            state,
            State {
                power_on: true,
                preset_mode: None
            }
        );

        state.apply(Command::SetPresetMode(PresetMode::Low));
        state.apply(Command::TurnOn(None));
        assert_eq!(state.preset_mode, Some(PresetMode::Low));

        state.apply(Command::TurnOn(Some(PresetMode::High)));
        assert_eq!(state.preset_mode, Some(PresetMode::High));

        state.apply(Command::TurnOff);
        assert!(!state.power_on);
        assert_eq!(state.preset_mode, Some(PresetMode::High));
    }

    #[test]
    fn reports_overwrite_power_only() {
        let mut state = State {
            power_on: true,
            preset_mode: Some(PresetMode::Medium),
        };

        let report: ShadowDocument =
            serde_json::from_str(r#"{"state":{"reported":{"powerOn":false,"D0310C":18}}}"#)
                .unwrap();
        assert!(state.reconcile(&report));
        assert!(!state.power_on);
        assert_eq!(state.preset_mode, Some(PresetMode::Medium));

        assert!(!state.reconcile(&report));
        assert!(!state.reconcile(&ShadowDocument::desired_power(true)));
        assert!(!state.power_on);
    }

    #[test]
    fn displays_state() {
        let state = State {
            power_on: true,
            preset_mode: Some(PresetMode::Auto),
        };
        assert_eq!(state.to_string(), "on, mode Auto");
        assert_eq!(State::default().to_string(), "off");
    }
}
