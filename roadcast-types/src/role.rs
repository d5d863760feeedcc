//! Worker roles.

use core::fmt;
use core::str::FromStr;

/// The role a supervised worker plays on the appliance.
///
/// There is exactly one worker per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Role {
    /// Cellular modem and GPS monitor.
    Modem,
    /// Motion and temperature sensor reader.
    Sensor,
    /// Audio/video broadcaster driving the live session.
    Broadcast,
}

impl Role {
    /// All roles, in start order.
    pub const ALL: [Role; 3] = [Role::Modem, Role::Sensor, Role::Broadcast];

    /// Lowercase name used in configuration keys and log fields.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Modem => "modem",
            Role::Sensor => "sensor",
            Role::Broadcast => "broadcast",
        }
    }

    /// Whether messages from this role are relayed to the broadcaster.
    pub const fn is_relayed(&self) -> bool {
        matches!(self, Role::Modem | Role::Sensor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole;

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown worker role")
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or(UnknownRole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_modem_and_sensor_are_relayed() {
        assert!(Role::Modem.is_relayed());
        assert!(Role::Sensor.is_relayed());
        assert!(!Role::Broadcast.is_relayed());
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Broadcast".parse::<Role>(), Ok(Role::Broadcast));
        assert_eq!(" modem ".parse::<Role>(), Ok(Role::Modem));
        assert_eq!("camera".parse::<Role>(), Err(UnknownRole));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Role::Sensor).unwrap();
        assert_eq!(json, "\"sensor\"");
    }
}
