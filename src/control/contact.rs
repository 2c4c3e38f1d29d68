// Foot-switch debouncing and closed-loop leg lowering.
//
// Lowering walks the femur and tibia towards their stance angles in fixed
// steps and stops as soon as a debounced contact is seen. A step that would
// overshoot the stance angle lands exactly on it. When both joints sit on
// the stance angle and the foot still reports nothing, the leg is reported
// as not grounded instead of pressing further.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ContactConfig, HexapodConfig, LiftJointConfig, PoseConfig};
use crate::robot::context::RobotContext;
use crate::robot::leg::{Joint, LEG_COUNT, Leg, Tripod};

/// Presses needed out of `samples` readings to call the foot grounded (3 of 5).
pub fn debounce_threshold(samples: usize) -> usize {
    (samples * 3 / 5).max(1)
}

pub fn majority_vote(pressed: usize, samples: usize) -> bool {
    pressed >= debounce_threshold(samples)
}

/// Move `current` one step towards `target` without passing it.
fn step_toward(current: i32, target: i32, step: i32) -> i32 {
    if current > target {
        (current - step).max(target)
    } else {
        (current + step).min(target)
    }
}

/// Outcome of lowering a whole tripod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripodLanding {
    pub legs: [Leg; 3],
    pub grounded: [bool; 3],
    pub steps: usize,
}

impl TripodLanding {
    pub fn all_grounded(&self) -> bool {
        self.grounded.iter().all(|&g| g)
    }

    pub fn airborne(&self) -> impl Iterator<Item = Leg> + '_ {
        self.legs
            .iter()
            .zip(self.grounded)
            .filter(|(_, grounded)| !grounded)
            .map(|(&leg, _)| leg)
    }
}

pub struct GroundContactController {
    config: ContactConfig,
    femur: LiftJointConfig,
    tibia: LiftJointConfig,
    last_known: [Option<bool>; LEG_COUNT],
    missing_logged: bool,
}

impl GroundContactController {
    pub fn new(config: &HexapodConfig) -> Self {
        Self {
            config: config.contact.clone(),
            femur: config.femur,
            tibia: config.tibia,
            last_known: [None; LEG_COUNT],
            missing_logged: false,
        }
    }

    fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.config.sample_interval_ms)
    }

    fn step_delay(&self) -> Duration {
        Duration::from_millis(self.config.step_delay_ms)
    }

    pub fn lower_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lower_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.config.wait_timeout_ms)
    }

    /// Lowering floors, kept inside the safe envelope so the clamp in
    /// `RobotContext` never disagrees with the tracked angles.
    fn floors(&self, stance: PoseConfig) -> (i32, i32) {
        (
            self.femur.safe.clamp(stance.femur),
            self.tibia.safe.clamp(stance.tibia),
        )
    }

    /// The nominal standing pose of femur and tibia.
    pub fn standard_stance(&self) -> PoseConfig {
        PoseConfig {
            femur: self.femur.down,
            tibia: self.tibia.down,
        }
    }

    /// True when foot switches are fitted. Logs their absence once.
    pub fn is_available(&mut self, ctx: &RobotContext) -> bool {
        if ctx.has_contact_sensors() {
            return true;
        }
        if !self.missing_logged {
            warn!("Foot contact sensors not present, falling back to timed lowering");
            self.missing_logged = true;
        }
        false
    }

    /// Majority vote over `debounce_samples` raw readings.
    pub fn read_debounced(&mut self, ctx: &mut RobotContext, leg: Leg) -> bool {
        let samples = self.config.debounce_samples;
        let mut pressed = 0;
        for i in 0..samples {
            match ctx.read_contact(leg) {
                Some(true) => pressed += 1,
                Some(false) => {}
                None => {
                    self.is_available(ctx);
                    return false;
                }
            }
            if i + 1 < samples {
                ctx.sleep(self.sample_interval());
            }
        }
        let grounded = majority_vote(pressed, samples);
        self.last_known[leg] = Some(grounded);
        grounded
    }

    /// Most recent debounced result per leg, `None` until a leg is first read.
    pub fn last_known(&self) -> [Option<bool>; LEG_COUNT] {
        self.last_known
    }

    /// Lower one leg until its foot reports contact.
    ///
    /// The hip is commanded to `target_coxa` first. Returns false on timeout,
    /// on reaching the down angles without contact, or without sensors.
    pub fn lower_leg_until_grounded(
        &mut self,
        ctx: &mut RobotContext,
        leg: Leg,
        target_coxa: i32,
        timeout: Duration,
    ) -> bool {
        if !self.is_available(ctx) {
            return false;
        }

        let start = ctx.now();
        let (femur_floor, tibia_floor) = self.floors(self.standard_stance());
        let step = self.config.step_size;
        let mut femur = ctx.read_joint(leg, Joint::Femur);
        let mut tibia = ctx.read_joint(leg, Joint::Tibia);

        ctx.move_joint(
            leg,
            Joint::Coxa,
            target_coxa,
            Duration::from_millis(self.config.hip_snap_ms),
        );
        debug!(%leg, femur, tibia, "Lowering leg until grounded");

        while ctx.elapsed_since(start) < timeout {
            if self.read_debounced(ctx, leg) {
                debug!(%leg, femur, tibia, "Ground contact");
                return true;
            }
            if femur == femur_floor && tibia == tibia_floor {
                warn!(%leg, "Reached full extension without ground contact");
                return false;
            }
            femur = step_toward(femur, femur_floor, step);
            tibia = step_toward(tibia, tibia_floor, step);
            ctx.move_lift(leg, femur, tibia, self.step_delay());
            ctx.sleep(self.step_delay());
        }

        let raw = ctx.read_contact(leg);
        warn!(%leg, ?raw, timeout_ms = timeout.as_millis() as u64, "Timed out lowering leg");
        false
    }

    /// Lower all three legs in lockstep towards `stance`; each leg stops on its
    /// own contact.
    pub fn lower_tripod(
        &mut self,
        ctx: &mut RobotContext,
        tripod: &Tripod,
        stance: PoseConfig,
    ) -> TripodLanding {
        let legs = *tripod.legs();
        let mut landing = TripodLanding {
            legs,
            grounded: [false; 3],
            steps: 0,
        };
        if !self.is_available(ctx) {
            return landing;
        }

        let (femur_floor, tibia_floor) = self.floors(stance);
        let step = self.config.step_size;
        let mut femur = legs.map(|leg| ctx.read_joint(leg, Joint::Femur));
        let mut tibia = legs.map(|leg| ctx.read_joint(leg, Joint::Tibia));

        for _ in 0..self.config.tripod_max_steps {
            let mut pending = false;
            for (i, &leg) in legs.iter().enumerate() {
                if landing.grounded[i] {
                    continue;
                }
                if self.read_debounced(ctx, leg) {
                    landing.grounded[i] = true;
                    debug!(%leg, step = landing.steps, "Ground contact");
                    continue;
                }
                if femur[i] == femur_floor && tibia[i] == tibia_floor {
                    continue;
                }
                pending = true;
                femur[i] = step_toward(femur[i], femur_floor, step);
                tibia[i] = step_toward(tibia[i], tibia_floor, step);
                ctx.move_lift(leg, femur[i], tibia[i], self.step_delay());
            }
            if !pending {
                break;
            }
            landing.steps += 1;
            ctx.sleep(self.step_delay());
        }

        // Legs that reached the floor on the final step still get one last look.
        for (i, &leg) in legs.iter().enumerate() {
            if !landing.grounded[i] {
                landing.grounded[i] = self.read_debounced(ctx, leg);
            }
        }
        for leg in landing.airborne() {
            let raw = ctx.read_contact(leg);
            warn!(%leg, ?raw, steps = landing.steps, "Leg did not make ground contact");
        }
        landing
    }

    /// Poll until every leg of `tripod` reports contact or `timeout` elapses.
    pub fn wait_for_grounded(
        &mut self,
        ctx: &mut RobotContext,
        tripod: &Tripod,
        timeout: Duration,
    ) -> bool {
        if !self.is_available(ctx) {
            return false;
        }

        let start = ctx.now();
        let interval = Duration::from_millis(self.config.wait_interval_ms);
        loop {
            let pending = tripod
                .into_iter()
                .find(|&leg| !self.read_debounced(ctx, leg));
            let Some(leg) = pending else {
                return true;
            };
            if ctx.elapsed_since(start) >= timeout {
                let raw: Vec<_> = tripod
                    .into_iter()
                    .map(|leg| (leg.id(), ctx.read_contact(leg)))
                    .collect();
                warn!(%leg, ?raw, "Timed out waiting for tripod to ground");
                return false;
            }
            ctx.sleep(interval);
        }
    }

    /// Settle every leg on uneven ground at boot.
    ///
    /// Each joint travels towards its nominal down angle from wherever it is,
    /// continuing up to `level_envelope` past it. Returns per-leg success.
    pub fn level_on_startup(&mut self, ctx: &mut RobotContext) -> [bool; LEG_COUNT] {
        let mut grounded = [false; LEG_COUNT];
        if !self.is_available(ctx) {
            return grounded;
        }
        info!("Leveling legs on startup");
        for leg in Leg::ALL {
            grounded[leg] = self.level_leg(ctx, leg);
        }
        let count = grounded.iter().filter(|&&g| g).count();
        info!(grounded = count, "Startup leveling finished");
        grounded
    }

    fn level_leg(&mut self, ctx: &mut RobotContext, leg: Leg) -> bool {
        let envelope = self.config.level_envelope;
        let step = self.config.step_size;
        let limits = *ctx.limits();

        let mut femur = ctx.read_joint(leg, Joint::Femur);
        let mut tibia = ctx.read_joint(leg, Joint::Tibia);
        let femur_target = limits
            .femur
            .clamp(self.femur.down + travel_sign(femur, &self.femur) * envelope);
        let tibia_target = limits
            .tibia
            .clamp(self.tibia.down + travel_sign(tibia, &self.tibia) * envelope);

        loop {
            if self.read_debounced(ctx, leg) {
                debug!(%leg, femur, tibia, "Leveled");
                return true;
            }
            if femur == femur_target && tibia == tibia_target {
                warn!(%leg, "Leveling envelope exhausted without ground contact");
                return false;
            }
            femur = step_toward(femur, femur_target, step);
            tibia = step_toward(tibia, tibia_target, step);
            ctx.move_lift(leg, femur, tibia, self.step_delay());
            ctx.sleep(self.step_delay());
        }
    }
}

/// Direction from `current` towards the nominal down angle; at the nominal
/// angle, keep extending the leg.
fn travel_sign(current: i32, joint: &LiftJointConfig) -> i32 {
    match (joint.down - current).signum() {
        0 => joint.lowering_sign(),
        sign => sign,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::posture::LegPose;
    use crate::sim::SimHexapod;

    fn leg(id: u8) -> Leg {
        Leg::new(id).unwrap()
    }

    fn lifted_sim(config: &HexapodConfig) -> SimHexapod {
        let sim = SimHexapod::standing(config);
        for leg in Leg::ALL {
            sim.set_pose(leg, LegPose::new(12000, config.femur.up, config.tibia.up));
        }
        sim
    }

    #[test]
    fn test_majority_vote() {
        assert_eq!(debounce_threshold(5), 3);
        assert!(majority_vote(4, 5));
        assert!(majority_vote(3, 5));
        assert!(!majority_vote(2, 5));
        assert_eq!(debounce_threshold(1), 1);
    }

    #[test]
    fn test_debounce_accepts_single_bounce() {
        let config = HexapodConfig::default();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);

        sim.script_contact(leg(0), &[true, true, false, true, true]);
        assert!(contact.read_debounced(&mut ctx, leg(0)));
    }

    #[test]
    fn test_debounce_rejects_minority() {
        let config = HexapodConfig::default();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);

        sim.script_contact(leg(0), &[true, true, false, false, false]);
        assert!(!contact.read_debounced(&mut ctx, leg(0)));
    }

    #[test]
    fn test_debounce_spaces_samples() {
        let config = HexapodConfig::default();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);

        contact.read_debounced(&mut ctx, leg(2));
        assert_eq!(sim.now(), Duration::from_millis(4 * config.contact.sample_interval_ms));
    }

    #[test]
    fn test_lowering_stops_after_k_steps() {
        let config = HexapodConfig::default();
        let sim = lifted_sim(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let k = 4;
        sim.set_ground_femur(leg(3), Some(config.femur.up - k * config.contact.step_size));

        let grounded = contact.lower_leg_until_grounded(
            &mut ctx,
            leg(3),
            13000,
            contact.lower_timeout(),
        );

        assert!(grounded);
        assert_eq!(sim.joint(leg(3), Joint::Coxa), 13000);
        assert_eq!(sim.joint(leg(3), Joint::Femur), config.femur.up - k * 100);
        assert_eq!(sim.joint(leg(3), Joint::Tibia), config.tibia.up - k * 100);
        assert_eq!(sim.moves_of(leg(3), Joint::Femur), k as usize);
    }

    #[test]
    fn test_lowering_without_contact_stops_at_floor() {
        let config = HexapodConfig::default();
        let sim = lifted_sim(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        sim.set_ground_femur(leg(1), None);

        let grounded = contact.lower_leg_until_grounded(
            &mut ctx,
            leg(1),
            12000,
            contact.lower_timeout(),
        );

        assert!(!grounded);
        assert_eq!(sim.joint(leg(1), Joint::Femur), config.femur.down);
        assert_eq!(sim.joint(leg(1), Joint::Tibia), config.tibia.down);
        // tibia travels 3000 units at 100 per step
        assert!(sim.moves_of(leg(1), Joint::Tibia) <= 30);
        assert!(sim.now() < contact.lower_timeout());
    }

    #[test]
    fn test_lowering_times_out() {
        let mut config = HexapodConfig::default();
        config.contact.lower_timeout_ms = 100;
        let sim = lifted_sim(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        sim.set_ground_femur(leg(5), None);

        assert!(!contact.lower_leg_until_grounded(
            &mut ctx,
            leg(5),
            12000,
            contact.lower_timeout(),
        ));
        assert!(sim.joint(leg(5), Joint::Femur) > config.femur.down);
    }

    #[test]
    fn test_lowering_without_sensors_returns_false_immediately() {
        let config = HexapodConfig::default();
        let sim = lifted_sim(&config);
        let mut ctx = sim.bare_context(&config);
        let mut contact = GroundContactController::new(&config);

        assert!(!contact.lower_leg_until_grounded(
            &mut ctx,
            leg(0),
            12000,
            contact.lower_timeout(),
        ));
        assert!(sim.history().is_empty());
    }

    #[test]
    fn test_tripod_legs_stop_independently() {
        let config = HexapodConfig::default();
        let sim = lifted_sim(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let tripod = Tripod::from_ids([5, 4, 2]).unwrap();
        sim.set_ground_femur(leg(5), Some(config.femur.up - 200));
        sim.set_ground_femur(leg(4), Some(config.femur.up - 500));
        sim.set_ground_femur(leg(2), None);

        let landing = contact.lower_tripod(&mut ctx, &tripod, contact.standard_stance());

        assert_eq!(landing.grounded, [true, true, false]);
        assert!(!landing.all_grounded());
        assert_eq!(landing.airborne().collect::<Vec<_>>(), vec![leg(2)]);
        assert_eq!(sim.joint(leg(5), Joint::Femur), config.femur.up - 200);
        assert_eq!(sim.joint(leg(4), Joint::Femur), config.femur.up - 500);
        assert_eq!(sim.joint(leg(2), Joint::Femur), config.femur.down);
        assert!(landing.steps <= config.contact.tripod_max_steps);
    }

    #[test]
    fn test_wait_for_grounded() {
        let config = HexapodConfig::default();
        let sim = SimHexapod::standing(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        let tripod = Tripod::from_ids([0, 1, 3]).unwrap();

        assert!(contact.wait_for_grounded(&mut ctx, &tripod, contact.wait_timeout()));

        sim.force_contact(leg(1), Some(false));
        assert!(!contact.wait_for_grounded(&mut ctx, &tripod, contact.wait_timeout()));
    }

    #[test]
    fn test_startup_leveling() {
        let config = HexapodConfig::default();
        let sim = lifted_sim(&config);
        let mut ctx = sim.context(&config);
        let mut contact = GroundContactController::new(&config);
        // leg 0 stands in a hole below the nominal pose
        sim.set_ground_femur(leg(0), Some(config.femur.down - 300));
        sim.set_ground_femur(leg(1), None);

        let grounded = contact.level_on_startup(&mut ctx);

        assert_eq!(grounded, [true, false, true, true, true, true]);
        assert_eq!(sim.joint(leg(0), Joint::Femur), config.femur.down - 300);
        assert_eq!(sim.joint(leg(2), Joint::Femur), config.femur.down);
        assert_eq!(
            sim.joint(leg(1), Joint::Femur),
            config.femur.safe.clamp(config.femur.down - config.contact.level_envelope)
        );
    }
}
