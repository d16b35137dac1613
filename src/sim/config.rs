//! Per-run pendulum configuration
//!
//! Supplied once with `start` and never mutated while the run lasts.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::collision::bob_radius;
use crate::error::ConfigError;

/// Upper bound for `max_wind` (matches the control UI's slider range)
pub const MAX_WIND_LIMIT: f64 = 10.0;
/// Upper bound for `wind_freq`
pub const MAX_WIND_FREQ: f64 = 10.0;

/// Physical parameters of one pendulum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendulumConfig {
    /// Initial angle (rad)
    pub theta: f64,
    /// Rod length (m)
    pub length: f64,
    /// Bob mass (kg). Density is 1, so this is also the bob volume.
    pub mass: f64,
    /// Linear damping coefficient
    pub damping: f64,
    /// Maximum absolute wind torque
    pub max_wind: f64,
    /// Wind frequency
    pub wind_freq: f64,
    /// Run the cluster stop/wait/restart protocol when a collision is seen
    #[serde(default)]
    pub stop_and_restart_on_collision: bool,
}

impl Default for PendulumConfig {
    fn default() -> Self {
        Self {
            theta: 0.0,
            length: 4.0,
            mass: 1.0,
            damping: 0.2,
            max_wind: 1.0,
            wind_freq: 0.1,
            stop_and_restart_on_collision: false,
        }
    }
}

impl PendulumConfig {
    /// Reject physically meaningless configurations.
    ///
    /// Must be called before any state is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_finite("theta", self.theta)?;
        if self.theta.abs() > PI {
            return Err(ConfigError::out_of_range("theta", "within [-pi, pi]", self.theta));
        }

        check_finite("length", self.length)?;
        if self.length <= 0.0 {
            return Err(ConfigError::out_of_range("length", "> 0", self.length));
        }

        check_finite("mass", self.mass)?;
        if self.mass <= 0.0 {
            return Err(ConfigError::out_of_range("mass", "> 0", self.mass));
        }
        // The bob hangs from its center, so it must fit on the rod
        if bob_radius(self.mass) >= self.length {
            return Err(ConfigError::out_of_range(
                "mass",
                "bob radius smaller than length",
                self.mass,
            ));
        }

        check_finite("damping", self.damping)?;
        if self.damping < 0.0 {
            return Err(ConfigError::out_of_range("damping", ">= 0", self.damping));
        }

        check_finite("maxWind", self.max_wind)?;
        if !(0.0..=MAX_WIND_LIMIT).contains(&self.max_wind) {
            return Err(ConfigError::out_of_range("maxWind", "within [0, 10]", self.max_wind));
        }

        check_finite("windFreq", self.wind_freq)?;
        if !(0.0..=MAX_WIND_FREQ).contains(&self.wind_freq) {
            return Err(ConfigError::out_of_range("windFreq", "within [0, 10]", self.wind_freq));
        }

        Ok(())
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PendulumConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_length() {
        let config = PendulumConfig {
            length: 0.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "length", .. }));
    }

    #[test]
    fn test_rejects_nan() {
        let config = PendulumConfig {
            damping: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotFinite { field: "damping" })
        ));
    }

    #[test]
    fn test_rejects_bob_larger_than_rod() {
        // radius of a unit-density sphere of 10 kg is ~1.34 m
        let config = PendulumConfig {
            length: 1.0,
            mass: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wind_out_of_range() {
        let config = PendulumConfig {
            max_wind: 11.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PendulumConfig {
            wind_freq: -0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let json = r#"{
            "theta": 0.5,
            "length": 2.0,
            "mass": 1.5,
            "damping": 0.1,
            "maxWind": 2.0,
            "windFreq": 0.3,
            "stopAndRestartOnCollision": true
        }"#;
        let config: PendulumConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_wind, 2.0);
        assert_eq!(config.wind_freq, 0.3);
        assert!(config.stop_and_restart_on_collision);
    }
}
