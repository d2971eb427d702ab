//! Device shadow and control command payloads.
//!
//! Two topics carry outbound traffic for a thing:
//!
//! * `$aws/things/{thing}/shadow/update` takes desired-state documents:
//!   ```json
//!   { "state": { "desired": { "powerOn": true } } }
//!   ```
//! * `da_ctrl/{thing}/to_ncp` takes structured commands for the appliance's
//!   network co-processor:
//!   ```json
//!   {
//!       "cid": "1a2b3c4d",
//!       "time": "2024-05-01T12:00:00Z",
//!       "type": "command",
//!       "cn": "setPort",
//!       "ct": "mobile",
//!       "data": { "portName": "Control", "properties": { "D0310C": 18 } }
//!   }
//!   ```
//!
//! State reports arrive on `$aws/things/{thing}/shadow/update/accepted` as
//! shadow documents with a `reported` section.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};

use crate::{
    error::{Error, Result},
    util,
};

/// Topic names derived from a thing name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topics {
    pub shadow_update: String,
    pub shadow_accepted: String,
    pub control: String,
}

impl Topics {
    #[must_use]
    pub fn new(thing_name: &str) -> Self {
        let shadow_update = format!("$aws/things/{thing_name}/shadow/update");
        Self {
            shadow_accepted: format!("{shadow_update}/accepted"),
            shadow_update,
            control: format!("da_ctrl/{thing_name}/to_ncp"),
        }
    }
}

/// Fan preset modes the appliance accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PresetMode {
    Auto,
    Low,
    Medium,
    High,
}

impl PresetMode {
    /// All modes in the order they are offered to users.
    pub const ALL: [Self; 4] = [Self::Auto, Self::Low, Self::Medium, Self::High];

    /// Value of the `D0310C` control property for this mode.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Medium => 1,
            Self::Low => 17,
            Self::High => 18,
        }
    }
}

impl fmt::Display for PresetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "Auto",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        };
        f.write_str(name)
    }
}

impl FromStr for PresetMode {
    type Err = Error;

    /// Parses a preset name, ignoring case.
    ///
    /// # Errors
    ///
    /// Unknown names are rejected with `InvalidArgument`.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "unknown preset mode \"{s}\"; expected one of Auto, Low, Medium, High"
                ))
            })
    }
}

/// Shadow properties this crate understands.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_on: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ShadowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Properties>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<Properties>,
}

/// A shadow document as published to `update` and echoed on `accepted`.
///
/// Unknown fields (`metadata`, `version`, `timestamp`, other properties)
/// are ignored.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ShadowDocument {
    #[serde(default)]
    pub state: ShadowState,
}

impl ShadowDocument {
    /// Desired-state document switching the appliance on or off.
    #[must_use]
    pub fn desired_power(power_on: bool) -> Self {
        Self {
            state: ShadowState {
                desired: Some(Properties {
                    power_on: Some(power_on),
                }),
                reported: None,
            },
        }
    }

    /// Reported power state, if the document carries one.
    #[must_use]
    pub fn reported_power(&self) -> Option<bool> {
        self.state.reported.and_then(|reported| reported.power_on)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ControlProperties {
    #[serde(rename = "D0310C")]
    pub preset_mode: u8,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortData {
    pub port_name: String,
    pub properties: ControlProperties,
}

/// Envelope for commands on the control topic.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ControlCommand {
    /// Correlation id, 8 hex digits.
    pub cid: String,
    /// UTC issue time in `YYYY-MM-DDTHH:MM:SSZ` form.
    pub time: String,
    #[serde(rename = "type")]
    pub typ: String,
    pub cn: String,
    pub ct: String,
    pub data: PortData,
}

impl ControlCommand {
    const TYPE: &'static str = "command";
    const COMMAND_SET_PORT: &'static str = "setPort";
    const CLIENT_TYPE: &'static str = "mobile";
    const PORT_CONTROL: &'static str = "Control";

    /// Builds a `setPort` command selecting `mode`, stamped with `now`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the timestamp cannot be formatted.
    pub fn set_preset_mode(mode: PresetMode, now: OffsetDateTime) -> Result<Self> {
        let time = now
            .to_offset(time::UtcOffset::UTC)
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
            ))?;

        Ok(Self {
            cid: util::hex_id(),
            time,
            typ: Self::TYPE.to_owned(),
            cn: Self::COMMAND_SET_PORT.to_owned(),
            ct: Self::CLIENT_TYPE.to_owned(),
            data: PortData {
                port_name: Self::PORT_CONTROL.to_owned(),
                properties: ControlProperties {
                    preset_mode: mode.code(),
                },
            },
        })
    }
}
