// Per-axis toggle state machine
//
// Each axis is either neutral or driven in one of two opposing directions.
// The velocity vector is only ever written from here, so a non-neutral
// direction always has a nonzero component and a neutral one always has zero.

use crate::velocity::{SpeedSetting, VelocityVector};

/// One of the six motion degrees of freedom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    LinearX,
    LinearY,
    LinearZ,
    /// Roll
    AngularX,
    /// Pitch
    AngularY,
    /// Yaw
    AngularZ,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::LinearX,
        Axis::LinearY,
        Axis::LinearZ,
        Axis::AngularX,
        Axis::AngularY,
        Axis::AngularZ,
    ];

    fn index(self) -> usize {
        match self {
            Axis::LinearX => 0,
            Axis::LinearY => 1,
            Axis::LinearZ => 2,
            Axis::AngularX => 3,
            Axis::AngularY => 4,
            Axis::AngularZ => 5,
        }
    }
}

/// Direction of travel along an axis. For angular axes `Positive` is a
/// counter-clockwise rotation (rotate left).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    None,
    Positive,
    Negative,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::None => 0.0,
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

/// Directions, speed and the velocity they produce
#[derive(Debug, Clone, Default)]
pub struct AxisState {
    directions: [Direction; 6],
    velocity: VelocityVector,
    speed: SpeedSetting,
}

impl AxisState {
    pub fn new(speed: SpeedSetting) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }

    /// Press a directional control.
    ///
    /// Pressing the direction that is already active toggles the axis off.
    /// Pressing the opposite direction switches over immediately.
    /// Returns the direction the axis ends up in.
    pub fn press(&mut self, axis: Axis, direction: Direction) -> Direction {
        let current = self.directions[axis.index()];

        if direction == Direction::None || current == direction {
            self.release(axis);
        } else {
            self.drive(axis, direction);
        }

        self.directions[axis.index()]
    }

    /// Control released, whatever direction it was in
    pub fn release(&mut self, axis: Axis) {
        self.directions[axis.index()] = Direction::None;
        self.velocity.clear(axis);
    }

    /// Every axis back to neutral
    pub fn neutralize(&mut self) {
        for axis in Axis::ALL {
            self.release(axis);
        }
    }

    /// Change the speed; axes already active are rescaled to it
    pub fn set_speed(&mut self, speed: SpeedSetting) {
        self.speed = speed;
        for axis in Axis::ALL {
            let direction = self.directions[axis.index()];
            if direction != Direction::None {
                self.drive(axis, direction);
            }
        }
    }

    fn drive(&mut self, axis: Axis, direction: Direction) {
        self.directions[axis.index()] = direction;
        self.velocity
            .set_clamped(axis, direction.sign() * self.speed.get(), self.speed);
    }

    pub fn direction(&self, axis: Axis) -> Direction {
        self.directions[axis.index()]
    }

    pub fn velocity(&self) -> VelocityVector {
        self.velocity
    }

    pub fn speed(&self) -> SpeedSetting {
        self.speed
    }

    pub fn is_active(&self) -> bool {
        self.directions.iter().any(|&d| d != Direction::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(speed: f64) -> AxisState {
        AxisState::new(SpeedSetting::new(speed).unwrap())
    }

    #[test]
    fn test_press_same_direction_twice_toggles_off() {
        for axis in Axis::ALL {
            for dir in [Direction::Positive, Direction::Negative] {
                let mut s = state(0.5);
                s.press(axis, dir);
                assert_eq!(s.press(axis, dir), Direction::None);
                assert_eq!(s.direction(axis), Direction::None);
                assert_eq!(s.velocity().get(axis), 0.0);
            }
        }
    }

    #[test]
    fn test_opposite_direction_wins() {
        for axis in Axis::ALL {
            let mut s = state(0.8);
            s.press(axis, Direction::Positive);
            assert_eq!(s.velocity().get(axis), 0.8);

            s.press(axis, Direction::Negative);
            assert_eq!(s.direction(axis), Direction::Negative);
            assert_eq!(s.velocity().get(axis), -0.8);
        }
    }

    #[test]
    fn test_forward_sets_only_linear_x() {
        let mut s = state(0.5);
        s.press(Axis::LinearX, Direction::Positive);

        let v = s.velocity();
        assert_eq!(v.linear.x, 0.5);
        assert_eq!(v.linear.y, 0.0);
        assert_eq!(v.linear.z, 0.0);
        assert_eq!(v.angular.x, 0.0);
        assert_eq!(v.angular.y, 0.0);
        assert_eq!(v.angular.z, 0.0);
    }

    #[test]
    fn test_release_neutralizes_one_axis() {
        let mut s = state(0.5);
        s.press(Axis::LinearZ, Direction::Positive);
        s.press(Axis::AngularZ, Direction::Negative);

        s.release(Axis::LinearZ);
        assert_eq!(s.direction(Axis::LinearZ), Direction::None);
        assert_eq!(s.velocity().linear.z, 0.0);
        assert_eq!(s.velocity().angular.z, -0.5);
        assert!(s.is_active());

        // Redundant release after a toggle-off is harmless
        s.press(Axis::AngularZ, Direction::Negative);
        s.release(Axis::AngularZ);
        assert!(!s.is_active());
        assert!(s.velocity().is_zero());
    }

    #[test]
    fn test_neutralize_clears_everything() {
        let mut s = state(1.0);
        for axis in Axis::ALL {
            s.press(axis, Direction::Negative);
        }
        s.neutralize();

        assert!(!s.is_active());
        assert!(s.velocity().is_zero());
        for axis in Axis::ALL {
            assert_eq!(s.direction(axis), Direction::None);
        }
    }

    #[test]
    fn test_speed_change_rescales_active_axes() {
        let mut s = state(0.5);
        s.press(Axis::LinearY, Direction::Negative);
        s.set_speed(SpeedSetting::new(1.5).unwrap());

        assert_eq!(s.velocity().linear.y, -1.5);
        assert_eq!(s.velocity().linear.x, 0.0);

        s.press(Axis::AngularX, Direction::Positive);
        assert_eq!(s.velocity().angular.x, 1.5);
    }
}
