// Six-axis velocity command and the shared speed setting

use serde::{Deserialize, Serialize};

use crate::axis::Axis;
use crate::config::{ConfigError, DEFAULT_SPEED, MAX_SPEED};

/// Three components of either the linear or the angular part
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Velocity sent with every cmd_vel. Linear in m/s, angular in rad/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityVector {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl VelocityVector {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::LinearX => self.linear.x,
            Axis::LinearY => self.linear.y,
            Axis::LinearZ => self.linear.z,
            Axis::AngularX => self.angular.x,
            Axis::AngularY => self.angular.y,
            Axis::AngularZ => self.angular.z,
        }
    }

    fn component_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::LinearX => &mut self.linear.x,
            Axis::LinearY => &mut self.linear.y,
            Axis::LinearZ => &mut self.linear.z,
            Axis::AngularX => &mut self.angular.x,
            Axis::AngularY => &mut self.angular.y,
            Axis::AngularZ => &mut self.angular.z,
        }
    }

    /// Set one component, clamped to +/- `limit`
    pub fn set_clamped(&mut self, axis: Axis, value: f64, limit: SpeedSetting) {
        let limit = limit.get();
        *self.component_mut(axis) = value.clamp(-limit, limit);
    }

    pub fn clear(&mut self, axis: Axis) {
        *self.component_mut(axis) = 0.0;
    }

    pub fn is_zero(&self) -> bool {
        Axis::ALL.iter().all(|&axis| self.get(axis) == 0.0)
    }
}

/// Magnitude applied to every active axis
///
/// Always finite, strictly positive and no larger than [`MAX_SPEED`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct SpeedSetting(f64);

impl SpeedSetting {
    /// Values above `MAX_SPEED` are clamped; zero, negative and non-finite values are rejected
    pub fn new(value: f64) -> Result<Self, ConfigError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::InvalidSpeed(value));
        }
        Ok(Self(value.min(MAX_SPEED)))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for SpeedSetting {
    fn default() -> Self {
        Self(DEFAULT_SPEED)
    }
}
