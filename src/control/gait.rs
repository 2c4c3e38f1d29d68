// Walking and rotation sequences.
//
// One call to `GaitEngine::step` runs one full cycle of the selected
// pattern and blocks (through the context clock) until it finishes. Mode
// changes are only observed between cycles.
//
// A tripod phase moves the swing tripod S while the support tripod P holds
// the body:
//
// 1. re-assert P on the ground
// 2. lift S (femur and tibia to `up`, hips untouched)
// 3. swing S's hips to their swing targets
// 4. lower S (timed, or closed-loop on the foot switches)
// 5. push P's hips to their push targets while keeping P down
//
// A cycle is two phases with the roles exchanged.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{ConfigError, HexapodConfig, LegConfig, LiftJointConfig, PhaseTiming, PoseConfig, WaveConfig};
use crate::control::contact::GroundContactController;
use crate::messages::GaitPattern;
use crate::robot::context::RobotContext;
use crate::robot::leg::{Joint, LEG_COUNT, Leg, Side, Tripod, TripodPair};
use crate::robot::posture::{Direction, HipMap, LegPose, Turn};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stride {
    Walk(Direction),
    Rotate(Turn),
}

pub struct GaitEngine {
    pattern: GaitPattern,
    hips: HipMap,
    femur: LiftJointConfig,
    tibia: LiftJointConfig,
    rotation_stance: PoseConfig,
    legs: [LegConfig; LEG_COUNT],
    walking: TripodPair,
    rotation: TripodPair,
    walk_timing: PhaseTiming,
    rotate_timing: PhaseTiming,
    wave: WaveConfig,
    wave_order: [Leg; LEG_COUNT],
    adaptive: bool,
    ripple_warned: bool,
}

impl GaitEngine {
    pub fn new(config: &HexapodConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut wave_order = Leg::ALL;
        for (slot, &id) in wave_order.iter_mut().zip(&config.wave.order) {
            *slot = Leg::try_from(id)?;
        }
        Ok(Self {
            pattern: GaitPattern::Tripod,
            hips: HipMap::from_config(config),
            femur: config.femur,
            tibia: config.tibia,
            rotation_stance: config.stance.rotation,
            legs: config.legs,
            walking: config.tripods.walking()?,
            rotation: config.tripods.rotation()?,
            walk_timing: config.timing.tripod,
            rotate_timing: config.timing.rotation,
            wave: config.wave.clone(),
            wave_order,
            adaptive: config.gait.adaptive_lowering,
            ripple_warned: false,
        })
    }

    pub fn pattern(&self) -> GaitPattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: GaitPattern) {
        if pattern != self.pattern {
            debug!(from = ?self.pattern, to = ?pattern, "Gait pattern changed");
            self.pattern = pattern;
        }
    }

    pub fn hips(&self) -> &HipMap {
        &self.hips
    }

    fn side(&self, leg: Leg) -> Side {
        self.legs[leg].side
    }

    /// Run one cycle. Returns false when the selected pattern does not move.
    pub fn step(
        &mut self,
        ctx: &mut RobotContext,
        contact: &mut GroundContactController,
        direction: Direction,
    ) -> bool {
        match self.pattern {
            GaitPattern::Tripod => {
                self.tripod_cycle(ctx, contact, Stride::Walk(direction));
                true
            }
            GaitPattern::Wave => {
                self.wave_cycle(ctx, contact, direction);
                true
            }
            GaitPattern::Ripple => {
                if !self.ripple_warned {
                    warn!("Ripple gait is not implemented, holding position");
                    self.ripple_warned = true;
                }
                false
            }
        }
    }

    /// One in-place rotation cycle. Always tripod-based, whatever the pattern.
    pub fn rotate(&mut self, ctx: &mut RobotContext, contact: &mut GroundContactController, turn: Turn) {
        self.tripod_cycle(ctx, contact, Stride::Rotate(turn));
    }

    fn tripod_cycle(&self, ctx: &mut RobotContext, contact: &mut GroundContactController, stride: Stride) {
        let pair = match stride {
            Stride::Walk(_) => self.walking,
            Stride::Rotate(_) => self.rotation,
        };
        self.tripod_phase(ctx, contact, &pair.a, &pair.b, stride);
        self.tripod_phase(ctx, contact, &pair.b, &pair.a, stride);
    }

    fn swing_target(&self, leg: Leg, stride: Stride) -> i32 {
        match stride {
            Stride::Walk(direction) => self.hips.swing(self.side(leg), direction),
            Stride::Rotate(turn) => self.hips.rotate_swing(turn),
        }
    }

    fn push_target(&self, leg: Leg, stride: Stride) -> i32 {
        match stride {
            Stride::Walk(direction) => self.hips.push(self.side(leg), direction),
            Stride::Rotate(turn) => self.hips.rotate_push(turn),
        }
    }

    fn stance(&self, stride: Stride) -> PoseConfig {
        match stride {
            Stride::Walk(_) => PoseConfig {
                femur: self.femur.down,
                tibia: self.tibia.down,
            },
            Stride::Rotate(_) => self.rotation_stance,
        }
    }

    fn tripod_phase(
        &self,
        ctx: &mut RobotContext,
        contact: &mut GroundContactController,
        swing: &Tripod,
        support: &Tripod,
        stride: Stride,
    ) {
        let timing = match stride {
            Stride::Walk(_) => self.walk_timing,
            Stride::Rotate(_) => self.rotate_timing,
        };
        let stance = self.stance(stride);
        let settle = ms(timing.settle_ms);
        let adaptive = self.adaptive && contact.is_available(ctx);

        // 1. support tripod firmly down
        for leg in support {
            ctx.move_lift(leg, stance.femur, stance.tibia, ms(timing.reassert_ms));
        }
        ctx.sleep(ms(timing.reassert_ms) + settle);

        // 2. lift
        for leg in swing {
            ctx.move_lift(leg, self.femur.up, self.tibia.up, ms(timing.lift_ms));
        }
        ctx.sleep(ms(timing.lift_ms) + settle);

        // 3. swing
        for leg in swing {
            let hip = self.swing_target(leg, stride);
            ctx.move_joint(leg, Joint::Coxa, hip, ms(timing.swing_ms));
        }
        ctx.sleep(ms(timing.swing_ms) + settle);

        // 4. lower
        if adaptive {
            let landing = contact.lower_tripod(ctx, swing, stance);
            if !landing.all_grounded() {
                warn!(airborne = ?landing.airborne().map(Leg::id).collect::<Vec<_>>(), "Swing tripod landed short");
            }
        } else {
            for leg in swing {
                ctx.move_lift(leg, stance.femur, stance.tibia, ms(timing.lower_ms));
            }
            ctx.sleep(ms(timing.lower_ms) + settle);
        }

        // 5. push
        for leg in support {
            let pose = LegPose::with_lift(self.push_target(leg, stride), stance);
            ctx.move_leg(leg, pose, ms(timing.push_ms));
        }
        ctx.sleep(ms(timing.push_ms) + settle);

        if adaptive && !contact.wait_for_grounded(ctx, swing, contact.wait_timeout()) {
            warn!("Swing tripod not confirmed on the ground, continuing");
        }
    }

    /// One wave cycle: every leg in `wave.order` steps once while the other
    /// five stay on the ground.
    fn wave_cycle(&self, ctx: &mut RobotContext, contact: &mut GroundContactController, direction: Direction) {
        let wave = &self.wave;
        let settle = ms(wave.settle_ms);
        let (lift, swing, lower, push) = (
            ms(wave.lift_ms),
            ms(wave.swing_ms),
            ms(wave.lower_ms),
            ms(wave.push_ms),
        );
        let delta = wave.body_push_delta;
        let adaptive = self.adaptive && contact.is_available(ctx);
        let (stride_min, stride_max) = self.hips.stride_range();
        let down = PoseConfig {
            femur: self.femur.down,
            tibia: self.tibia.down,
        };
        let up = PoseConfig {
            femur: self.femur.up,
            tibia: self.tibia.up,
        };

        for leg in self.wave_order {
            // lift in place
            let hip = ctx.read_joint(leg, Joint::Coxa);
            ctx.move_leg(leg, LegPose::with_lift(hip, up), lift);
            ctx.sleep(lift + settle);

            // swing
            let target = self.hips.swing(self.side(leg), direction);
            ctx.move_leg(leg, LegPose::with_lift(target, up), swing);
            ctx.sleep(swing + settle);

            // lower
            if adaptive {
                if !contact.lower_leg_until_grounded(ctx, leg, target, contact.lower_timeout()) {
                    warn!(%leg, "Wave step landed short");
                }
            } else {
                ctx.move_leg(leg, LegPose::with_lift(target, down), lower);
                ctx.sleep(lower + settle);
            }

            // shift the body over the grounded legs
            for other in self.wave_order.into_iter().filter(|&other| other != leg) {
                let shift = self.hips.push_sign(self.side(other), direction) * delta;
                let current = ctx.read_joint(other, Joint::Coxa);
                let hip = (current + shift).clamp(stride_min, stride_max);
                ctx.move_leg(other, LegPose::with_lift(hip, down), push);
            }
            ctx.sleep(push + settle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{COXA_BACKWARD, COXA_DEFAULT, COXA_FORWARD, FEMUR_DOWN, TIBIA_DOWN};
    use crate::sim::SimHexapod;

    fn leg(id: u8) -> Leg {
        Leg::new(id).unwrap()
    }

    fn timed_config() -> HexapodConfig {
        let mut config = HexapodConfig::default();
        config.gait.adaptive_lowering = false;
        config
    }

    fn within_safe_ranges(sim: &SimHexapod, config: &HexapodConfig) -> bool {
        sim.history().iter().all(|record| match record.joint {
            Joint::Coxa => config.coxa.safe.contains(record.angle),
            Joint::Femur => config.femur.safe.contains(record.angle),
            Joint::Tibia => config.tibia.safe.contains(record.angle),
        })
    }

    #[test]
    fn test_tripod_phase_scenario() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();
        let pair = config.tripods.walking().unwrap();

        gait.tripod_phase(&mut ctx, &mut contact, &pair.a, &pair.b, Stride::Walk(Direction::Forward));

        // leg 5 (actuator base 15) is on the mirrored side
        assert_eq!(sim.pose(leg(5)), LegPose::new(COXA_BACKWARD, FEMUR_DOWN, TIBIA_DOWN));
        // leg 2 (actuator base 6)
        assert_eq!(sim.pose(leg(2)), LegPose::new(COXA_FORWARD, FEMUR_DOWN, TIBIA_DOWN));
        // support legs pushed the opposite way
        assert_eq!(sim.joint(leg(0), Joint::Coxa), COXA_BACKWARD);
        assert_eq!(sim.joint(leg(3), Joint::Coxa), COXA_FORWARD);
    }

    #[test]
    fn test_lift_leaves_hips_alone() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();

        gait.step(&mut ctx, &mut contact, Direction::Forward);

        // the first hip command for a swing leg is its swing target, never a re-centre
        let first_hip = sim
            .history()
            .into_iter()
            .find(|record| record.leg == leg(5) && record.joint == Joint::Coxa)
            .unwrap();
        assert_eq!(first_hip.angle, COXA_BACKWARD);
    }

    #[test]
    fn test_full_cycle_stays_in_safe_ranges() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();

        for direction in [Direction::Forward, Direction::Backward] {
            assert!(gait.step(&mut ctx, &mut contact, direction));
        }
        gait.rotate(&mut ctx, &mut contact, Turn::Left);
        gait.set_pattern(GaitPattern::Wave);
        assert!(gait.step(&mut ctx, &mut contact, Direction::Forward));

        assert!(within_safe_ranges(&sim, &config));
    }

    #[test]
    fn test_tripod_cycle_duration() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();

        gait.step(&mut ctx, &mut contact, Direction::Forward);

        let t = config.timing.tripod;
        let phase = t.reassert_ms + t.lift_ms + t.swing_ms + t.lower_ms + t.push_ms + 5 * t.settle_ms;
        assert_eq!(sim.now(), Duration::from_millis(2 * phase));
    }

    #[test]
    fn test_rotation_moves_every_hip_the_same_way() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();
        let pair = config.tripods.rotation().unwrap();

        gait.tripod_phase(&mut ctx, &mut contact, &pair.a, &pair.b, Stride::Rotate(Turn::Left));

        for swing in pair.a.legs() {
            assert_eq!(
                sim.pose(*swing),
                LegPose::new(
                    config.coxa.rotate_forward,
                    config.stance.rotation.femur,
                    config.stance.rotation.tibia
                )
            );
        }
        for support in pair.b.legs() {
            assert_eq!(sim.joint(*support, Joint::Coxa), config.coxa.rotate_backward);
        }
    }

    #[test]
    fn test_adaptive_lowering_stops_on_contact() {
        let config = HexapodConfig::default();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();
        let pair = config.tripods.walking().unwrap();
        // leg 4 meets a step 500 units above the nominal ground
        sim.set_ground_femur(leg(4), Some(FEMUR_DOWN + 500));

        gait.tripod_phase(&mut ctx, &mut contact, &pair.a, &pair.b, Stride::Walk(Direction::Forward));

        assert_eq!(sim.joint(leg(4), Joint::Femur), FEMUR_DOWN + 500);
        assert_eq!(sim.joint(leg(5), Joint::Femur), FEMUR_DOWN);
    }

    #[test]
    fn test_adaptive_rotation_lowers_to_rotation_stance() {
        let config = HexapodConfig::default();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();
        let pair = config.tripods.rotation().unwrap();

        gait.tripod_phase(&mut ctx, &mut contact, &pair.a, &pair.b, Stride::Rotate(Turn::Left));

        // same end pose as the timed path, ground is never reached above it
        for swing in pair.a.legs() {
            assert_eq!(sim.joint(*swing, Joint::Femur), config.stance.rotation.femur);
            assert_eq!(sim.joint(*swing, Joint::Tibia), config.stance.rotation.tibia);
        }
        assert!(within_safe_ranges(&sim, &config));
    }

    #[test]
    fn test_wave_body_push_is_clamped() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();
        gait.set_pattern(GaitPattern::Wave);

        gait.step(&mut ctx, &mut contact, Direction::Forward);

        let (lo, hi) = gait.hips().stride_range();
        for record in sim.history().iter().filter(|r| r.joint == Joint::Coxa) {
            assert!((lo..=hi).contains(&record.angle) || record.angle == COXA_DEFAULT);
        }
        // the last leg to step ends at its swing target
        assert_eq!(sim.joint(leg(5), Joint::Coxa), COXA_BACKWARD);
        // leg 0 stepped first, then got pushed back once per later step
        assert_eq!(
            sim.joint(leg(0), Joint::Coxa),
            COXA_FORWARD - 5 * config.wave.body_push_delta
        );
    }

    #[test]
    fn test_ripple_holds_position() {
        let config = timed_config();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let mut gait = GaitEngine::new(&config).unwrap();
        gait.set_pattern(GaitPattern::Ripple);

        assert!(!gait.step(&mut ctx, &mut contact, Direction::Forward));
        assert!(!gait.step(&mut ctx, &mut contact, Direction::Forward));
        assert!(sim.history().is_empty());
    }
}
