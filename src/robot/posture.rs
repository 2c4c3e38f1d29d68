// Leg poses and the hip target table shared by every gait.

use serde::{Deserialize, Serialize};

use crate::config::{CoxaConfig, HexapodConfig, PoseConfig};
use crate::robot::leg::Side;

/// Three joint angles of one leg, centi-degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegPose {
    pub coxa: i32,
    pub femur: i32,
    pub tibia: i32,
}

impl LegPose {
    pub const fn new(coxa: i32, femur: i32, tibia: i32) -> Self {
        Self { coxa, femur, tibia }
    }

    pub fn with_lift(coxa: i32, lift: PoseConfig) -> Self {
        Self::new(coxa, lift.femur, lift.tibia)
    }

    pub fn as_array(&self) -> [i32; 3] {
        [self.coxa, self.femur, self.tibia]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Left,
    Right,
}

/// Where each hip goes for swing and push.
///
/// Walking mirrors the two sides: a right leg swings to the forward extreme
/// while a left leg swings to the backward extreme, so both feet travel the
/// same way relative to the body. Rotation sends every leg to the same
/// extreme, which yaws the body instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HipMap {
    forward: i32,
    backward: i32,
    rotate_forward: i32,
    rotate_backward: i32,
    trim_left: i32,
    trim_right: i32,
}

impl HipMap {
    pub fn new(coxa: &CoxaConfig, trim_left: i32, trim_right: i32) -> Self {
        Self {
            forward: coxa.forward,
            backward: coxa.backward,
            rotate_forward: coxa.rotate_forward,
            rotate_backward: coxa.rotate_backward,
            trim_left,
            trim_right,
        }
    }

    pub fn from_config(config: &HexapodConfig) -> Self {
        Self::new(&config.coxa, config.gait.hip_trim_left, config.gait.hip_trim_right)
    }

    fn trim(&self, side: Side) -> i32 {
        match side {
            Side::Left => self.trim_left,
            Side::Right => self.trim_right,
        }
    }

    /// Hip angle a lifted leg travels to.
    pub fn swing(&self, side: Side, direction: Direction) -> i32 {
        let base = match (side, direction) {
            (Side::Right, Direction::Forward) | (Side::Left, Direction::Backward) => self.forward,
            (Side::Right, Direction::Backward) | (Side::Left, Direction::Forward) => self.backward,
        };
        base + self.trim(side)
    }

    /// Hip angle a grounded leg pushes to; always the opposite extreme of `swing`.
    pub fn push(&self, side: Side, direction: Direction) -> i32 {
        self.swing(side, direction.reversed())
    }

    /// +1 or -1: the way a grounded hip on `side` moves while the body advances.
    pub fn push_sign(&self, side: Side, direction: Direction) -> i32 {
        (self.push(side, direction) - self.swing(side, direction)).signum()
    }

    /// Walking stride envelope (forward and backward extremes, low to high).
    pub fn stride_range(&self) -> (i32, i32) {
        (self.forward.min(self.backward), self.forward.max(self.backward))
    }

    pub fn rotate_swing(&self, turn: Turn) -> i32 {
        match turn {
            Turn::Left => self.rotate_forward,
            Turn::Right => self.rotate_backward,
        }
    }

    pub fn rotate_push(&self, turn: Turn) -> i32 {
        match turn {
            Turn::Left => self.rotate_backward,
            Turn::Right => self.rotate_forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{COXA_BACKWARD, COXA_FORWARD};

    fn hips() -> HipMap {
        HipMap::from_config(&HexapodConfig::default())
    }

    #[test]
    fn test_walking_mirrors_sides() {
        let hips = hips();
        assert_eq!(hips.swing(Side::Right, Direction::Forward), COXA_FORWARD);
        assert_eq!(hips.swing(Side::Left, Direction::Forward), COXA_BACKWARD);
        assert_eq!(hips.push(Side::Right, Direction::Forward), COXA_BACKWARD);
        assert_eq!(hips.push(Side::Left, Direction::Forward), COXA_FORWARD);
    }

    #[test]
    fn test_backward_swaps_extremes() {
        let hips = hips();
        for side in [Side::Left, Side::Right] {
            assert_eq!(
                hips.swing(side, Direction::Backward),
                hips.push(side, Direction::Forward)
            );
            assert_eq!(
                hips.push_sign(side, Direction::Backward),
                -hips.push_sign(side, Direction::Forward)
            );
        }
    }

    #[test]
    fn test_trim_shifts_one_side() {
        let mut config = HexapodConfig::default();
        config.gait.hip_trim_left = -150;
        let hips = HipMap::from_config(&config);
        assert_eq!(hips.swing(Side::Left, Direction::Forward), COXA_BACKWARD - 150);
        assert_eq!(hips.swing(Side::Right, Direction::Forward), COXA_FORWARD);
        assert_eq!(hips.push_sign(Side::Left, Direction::Forward), 1);
    }

    #[test]
    fn test_rotation_uses_same_extreme_for_all_legs() {
        let hips = hips();
        assert_eq!(hips.rotate_swing(Turn::Left), 15000);
        assert_eq!(hips.rotate_push(Turn::Left), 9000);
        assert_eq!(hips.rotate_swing(Turn::Right), hips.rotate_push(Turn::Left));
    }
}
