use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target state of a single light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightState {
    /// Unknown or unset, never rendered
    #[default]
    None,
    Off,
    Red,
    Yellow,
    Green,
}

impl LightState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightState::None => "none",
            LightState::Off => "off",
            LightState::Red => "red",
            LightState::Yellow => "yellow",
            LightState::Green => "green",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, LightState::None)
    }
}

impl FromStr for LightState {
    type Err = std::convert::Infallible;

    /// Anything that is not a known state reads as [`LightState::None`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "off" => LightState::Off,
            "red" => LightState::Red,
            "yellow" => LightState::Yellow,
            "green" => LightState::Green,
            _ => LightState::None,
        };
        Ok(state)
    }
}

impl From<&str> for LightState {
    fn from(value: &str) -> Self {
        let Ok(state) = value.parse();
        state
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LightState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LightState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(LightState::from(s.as_str()))
    }
}

/// One of the two lights of the intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Light {
    Light1,
    Light2,
}

impl fmt::Display for Light {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Light::Light1 => f.write_str("light1"),
            Light::Light2 => f.write_str("light2"),
        }
    }
}

/// Connectivity tag reported while the peer board is reachable
pub const CONNECTED: &str = "connected";

/// Connectivity tag reported while the peer board is unreachable
pub const DISCONNECTED: &str = "disconnected";

/// Contents of the shared FlexContainer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexContainerRecord {
    #[serde(rename = "l1s")]
    pub light1: LightState,
    #[serde(rename = "l2s")]
    pub light2: LightState,
    #[serde(rename = "bts")]
    pub connectivity: String,
}

impl Default for FlexContainerRecord {
    fn default() -> Self {
        Self {
            light1: LightState::Red,
            light2: LightState::Red,
            connectivity: DISCONNECTED.to_owned(),
        }
    }
}

impl FlexContainerRecord {
    pub fn light(&self, light: Light) -> LightState {
        match light {
            Light::Light1 => self.light1,
            Light::Light2 => self.light2,
        }
    }

    pub fn set_light(&mut self, light: Light, state: LightState) {
        match light {
            Light::Light1 => self.light1 = state,
            Light::Light2 => self.light2 = state,
        }
    }

    /// Apply the fields present in `fragment`.
    ///
    /// Missing fields and lights reading as [`LightState::None`] keep their
    /// current value. Returns true if anything changed.
    pub fn apply(&mut self, fragment: &FlexFragment) -> bool {
        let before = self.clone();
        if let Some(state) = fragment.light1
            && !state.is_none()
        {
            self.light1 = state;
        }
        if let Some(state) = fragment.light2
            && !state.is_none()
        {
            self.light2 = state;
        }
        if let Some(tag) = &fragment.connectivity {
            self.connectivity.clone_from(tag);
        }
        *self != before
    }
}

/// Partial FlexContainer representation, as delivered by notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexFragment {
    #[serde(rename = "l1s", default, skip_serializing_if = "Option::is_none")]
    pub light1: Option<LightState>,
    #[serde(rename = "l2s", default, skip_serializing_if = "Option::is_none")]
    pub light2: Option<LightState>,
    #[serde(rename = "bts", default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<String>,
}

impl From<FlexContainerRecord> for FlexFragment {
    fn from(record: FlexContainerRecord) -> Self {
        Self {
            light1: Some(record.light1),
            light2: Some(record.light2),
            connectivity: Some(record.connectivity),
        }
    }
}
