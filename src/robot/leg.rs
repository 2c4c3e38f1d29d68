// Leg, joint and tripod identities.
//
// Legs are numbered 0..=5. Each leg owns three consecutive actuator slots
// starting at `id * 3`: coxa (hip yaw), femur (upper) and tibia (lower).

use std::fmt::Display;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

pub const LEG_COUNT: usize = 6;
pub const JOINTS_PER_LEG: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Leg(u8);

impl Leg {
    pub const ALL: [Leg; LEG_COUNT] = [Leg(0), Leg(1), Leg(2), Leg(3), Leg(4), Leg(5)];

    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < LEG_COUNT {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// First actuator slot of this leg (its coxa).
    pub const fn actuator_base(self) -> usize {
        self.0 as usize * JOINTS_PER_LEG
    }

    pub const fn actuator_index(self, joint: Joint) -> usize {
        self.actuator_base() + joint as usize
    }
}

impl TryFrom<u8> for Leg {
    type Error = PartitionError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Leg::new(id).ok_or(PartitionError::UnknownLeg(id))
    }
}

impl From<Leg> for u8 {
    fn from(leg: Leg) -> Self {
        leg.0
    }
}

impl Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "leg {}", self.0)
    }
}

impl<T> Index<Leg> for [T; LEG_COUNT] {
    type Output = T;

    fn index(&self, leg: Leg) -> &Self::Output {
        &self[leg.index()]
    }
}

impl<T> IndexMut<Leg> for [T; LEG_COUNT] {
    fn index_mut(&mut self, leg: Leg) -> &mut Self::Output {
        &mut self[leg.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Coxa = 0,
    Femur = 1,
    Tibia = 2,
}

impl Joint {
    pub const ALL: [Joint; JOINTS_PER_LEG] = [Joint::Coxa, Joint::Femur, Joint::Tibia];
}

impl Display for Joint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Joint::Coxa => write!(f, "coxa"),
            Joint::Femur => write!(f, "femur"),
            Joint::Tibia => write!(f, "tibia"),
        }
    }
}

impl<T> Index<Joint> for [T; JOINTS_PER_LEG] {
    type Output = T;

    fn index(&self, joint: Joint) -> &Self::Output {
        &self[joint as usize]
    }
}

impl<T> IndexMut<Joint> for [T; JOINTS_PER_LEG] {
    fn index_mut(&mut self, joint: Joint) -> &mut Self::Output {
        &mut self[joint as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Three legs that swing together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tripod([Leg; 3]);

impl Tripod {
    pub fn from_ids(ids: [u8; 3]) -> Result<Self, PartitionError> {
        let mut legs = [Leg(0); 3];
        for (slot, id) in legs.iter_mut().zip(ids) {
            *slot = Leg::try_from(id)?;
        }
        if legs[0] == legs[1] || legs[0] == legs[2] || legs[1] == legs[2] {
            return Err(PartitionError::Duplicate(ids));
        }
        Ok(Self(legs))
    }

    pub fn legs(&self) -> &[Leg; 3] {
        &self.0
    }

    pub fn contains(&self, leg: Leg) -> bool {
        self.0.contains(&leg)
    }
}

impl<'a> IntoIterator for &'a Tripod {
    type Item = Leg;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, Leg>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

/// Two disjoint tripods that together cover all six legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripodPair {
    pub a: Tripod,
    pub b: Tripod,
}

impl TripodPair {
    pub fn new(a: Tripod, b: Tripod) -> Result<Self, PartitionError> {
        if let Some(&leg) = a.legs().iter().find(|&&leg| b.contains(leg)) {
            return Err(PartitionError::Overlap(leg.id()));
        }
        Ok(Self { a, b })
    }

    /// The other half of the partition.
    pub fn partner(&self, tripod: &Tripod) -> Tripod {
        if *tripod == self.a { self.b } else { self.a }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("leg id {0} is out of range (expected 0..=5)")]
    UnknownLeg(u8),

    #[error("tripod {0:?} lists the same leg twice")]
    Duplicate([u8; 3]),

    #[error("leg {0} appears in both tripods")]
    Overlap(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ROTATE_TRIPOD_A, ROTATE_TRIPOD_B, TRIPOD_A, TRIPOD_B};

    fn covers_all_legs(pair: &TripodPair) -> bool {
        let mut seen = [false; LEG_COUNT];
        for leg in pair.a.legs().iter().chain(pair.b.legs()) {
            seen[*leg] = true;
        }
        seen.iter().all(|&s| s)
    }

    #[test]
    fn test_actuator_layout() {
        let leg = Leg::new(5).unwrap();
        assert_eq!(leg.actuator_base(), 15);
        assert_eq!(leg.actuator_index(Joint::Coxa), 15);
        assert_eq!(leg.actuator_index(Joint::Tibia), 17);
        assert!(Leg::new(6).is_none());
    }

    #[test]
    fn test_default_partitions_cover_every_leg_once() {
        for (a, b) in [(TRIPOD_A, TRIPOD_B), (ROTATE_TRIPOD_A, ROTATE_TRIPOD_B)] {
            let pair =
                TripodPair::new(Tripod::from_ids(a).unwrap(), Tripod::from_ids(b).unwrap()).unwrap();
            assert!(covers_all_legs(&pair));
        }
    }

    #[test]
    fn test_overlap_rejected() {
        let a = Tripod::from_ids([0, 1, 2]).unwrap();
        let b = Tripod::from_ids([2, 3, 4]).unwrap();
        assert_eq!(TripodPair::new(a, b), Err(PartitionError::Overlap(2)));
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        assert_eq!(
            Tripod::from_ids([1, 1, 2]),
            Err(PartitionError::Duplicate([1, 1, 2]))
        );
        assert_eq!(Tripod::from_ids([1, 7, 2]), Err(PartitionError::UnknownLeg(7)));
    }

    #[test]
    fn test_partner() {
        let a = Tripod::from_ids(TRIPOD_A).unwrap();
        let b = Tripod::from_ids(TRIPOD_B).unwrap();
        let pair = TripodPair::new(a, b).unwrap();
        assert_eq!(pair.partner(&a), b);
        assert_eq!(pair.partner(&b), a);
    }

    #[test]
    fn test_leg_indexes_arrays() {
        let mut angles = [0i32; LEG_COUNT];
        angles[Leg::new(3).unwrap()] = 42;
        assert_eq!(angles[3], 42);
        let mut joints = [0i32; JOINTS_PER_LEG];
        joints[Joint::Femur] = 7;
        assert_eq!(joints, [0, 7, 0]);
    }
}
