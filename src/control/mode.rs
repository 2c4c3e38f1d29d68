// Robot mode state machine, driven once per motion-loop tick.
//
// The requested mode comes from the shared command record. A change of mode
// is handled once, on the tick where it is first seen: leaving Balance exits
// balance mode, entering Balance enters it. Continuous modes (walking,
// Balance, Idle) then do their per-tick work. One-shot modes (rotations,
// LayDown, StandUp) run to completion and settle into their follow-up mode,
// which is handed back so the caller can update the shared record.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::{BackwardMode, ConfigError, HexapodConfig};
use crate::control::balance::BalanceController;
use crate::control::contact::GroundContactController;
use crate::control::gait::GaitEngine;
use crate::messages::{GaitPattern, RobotMode};
use crate::motor::driver::CENTIDEG_PER_UNIT;
use crate::robot::context::RobotContext;
use crate::robot::leg::{Joint, Leg};
use crate::robot::posture::{Direction, LegPose, Turn};

// Servo readback is quantized; smaller differences are not drift
const DRIFT_TOLERANCE: i32 = CENTIDEG_PER_UNIT;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub struct RobotModeController {
    mode: RobotMode,
    gait: GaitEngine,
    contact: GroundContactController,
    balance: BalanceController,
    standard_stance: LegPose,
    lay_down_pose: LegPose,
    idle_move: Duration,
    posture_move: Duration,
    startup_move: Duration,
    adaptive: bool,
    backward_mode: BackwardMode,
    half_turn_cycles: u32,
    turned_around: bool,
}

impl RobotModeController {
    pub fn new(config: &HexapodConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            mode: RobotMode::Idle,
            gait: GaitEngine::new(config)?,
            contact: GroundContactController::new(config),
            balance: BalanceController::new(config),
            standard_stance: LegPose::new(config.coxa.default, config.femur.down, config.tibia.down),
            lay_down_pose: LegPose::with_lift(config.coxa.default, config.stance.lay_down),
            idle_move: ms(config.stance.idle_move_ms),
            posture_move: ms(config.stance.posture_move_ms),
            startup_move: ms(config.stance.startup_move_ms),
            adaptive: config.gait.adaptive_lowering,
            backward_mode: config.gait.backward_mode,
            half_turn_cycles: config.gait.half_turn_cycles,
            turned_around: false,
        })
    }

    pub fn mode(&self) -> RobotMode {
        self.mode
    }

    pub fn gait(&self) -> &GaitEngine {
        &self.gait
    }

    pub fn balance(&self) -> &BalanceController {
        &self.balance
    }

    pub fn balance_mut(&mut self) -> &mut BalanceController {
        &mut self.balance
    }

    pub fn contact(&self) -> &GroundContactController {
        &self.contact
    }

    pub fn contact_mut(&mut self) -> &mut GroundContactController {
        &mut self.contact
    }

    /// Boot sequence: standard stance, leveling on uneven ground, balance init.
    pub fn startup(&mut self, ctx: &mut RobotContext) {
        info!("Moving to standard stance");
        self.drive_pose(ctx, self.standard_stance, self.startup_move);
        if self.adaptive && self.contact.is_available(ctx) {
            self.contact.level_on_startup(ctx);
        }
        if !self.balance.begin(ctx) {
            warn!("Balance unavailable, continuing without it");
        }
        self.mode = RobotMode::Idle;
        info!("Hexapod ready");
    }

    /// One tick. Returns the mode a completed one-shot action settled into.
    pub fn tick(
        &mut self,
        ctx: &mut RobotContext,
        requested: RobotMode,
        pattern: GaitPattern,
    ) -> Option<RobotMode> {
        self.gait.set_pattern(pattern);
        if requested != self.mode {
            self.transition(ctx, requested);
        }

        match self.mode {
            RobotMode::Idle => {
                self.hold_stance(ctx);
                None
            }
            RobotMode::MoveForward => {
                self.gait.step(ctx, &mut self.contact, Direction::Forward);
                None
            }
            RobotMode::MoveBackward => {
                self.walk_backward(ctx);
                None
            }
            RobotMode::RotateLeft => {
                self.gait.rotate(ctx, &mut self.contact, Turn::Left);
                self.settle(RobotMode::Idle)
            }
            RobotMode::RotateRight => {
                self.gait.rotate(ctx, &mut self.contact, Turn::Right);
                self.settle(RobotMode::Idle)
            }
            RobotMode::LayDown => {
                info!("Laying down");
                self.drive_pose(ctx, self.lay_down_pose, self.posture_move);
                self.settle(RobotMode::LaidDown)
            }
            RobotMode::StandUp => {
                info!("Standing up");
                self.drive_pose(ctx, self.standard_stance, self.posture_move);
                self.settle(RobotMode::Idle)
            }
            RobotMode::Balance => {
                self.balance.update(ctx);
                None
            }
            RobotMode::LaidDown | RobotMode::Dance => None,
        }
    }

    fn settle(&mut self, next: RobotMode) -> Option<RobotMode> {
        self.mode = next;
        Some(next)
    }

    fn transition(&mut self, ctx: &mut RobotContext, next: RobotMode) {
        let previous = self.mode;
        info!(from = ?previous, to = ?next, "Mode transition");

        if previous == RobotMode::Balance {
            self.balance.exit(ctx);
        }
        if previous == RobotMode::MoveBackward && self.turned_around {
            self.turn_around(ctx);
        }
        match next {
            RobotMode::Balance => self.balance.enter(ctx),
            RobotMode::Dance => info!("Dance mode has no choreography, holding position"),
            _ => {}
        }
        self.mode = next;
    }

    fn walk_backward(&mut self, ctx: &mut RobotContext) {
        match self.backward_mode {
            BackwardMode::Reverse => {
                self.gait.step(ctx, &mut self.contact, Direction::Backward);
            }
            BackwardMode::TurnAround => {
                if !self.turned_around {
                    self.turn_around(ctx);
                }
                self.gait.step(ctx, &mut self.contact, Direction::Forward);
            }
        }
    }

    /// Rotate 180°. Calling it twice faces the original heading again.
    fn turn_around(&mut self, ctx: &mut RobotContext) {
        info!(cycles = self.half_turn_cycles, "Turning around");
        for _ in 0..self.half_turn_cycles {
            self.gait.rotate(ctx, &mut self.contact, Turn::Left);
        }
        self.turned_around = !self.turned_around;
    }

    /// Re-assert the standard stance on any joint that drifted from it.
    fn hold_stance(&mut self, ctx: &mut RobotContext) {
        let nominal = self.standard_stance.as_array();
        let commanded = ctx.commanded();
        for leg in Leg::ALL {
            for joint in Joint::ALL {
                let drifted = commanded[leg][joint] != nominal[joint]
                    || (ctx.read_joint(leg, joint) - nominal[joint]).abs() >= DRIFT_TOLERANCE;
                if drifted {
                    ctx.move_joint(leg, joint, nominal[joint], self.idle_move);
                }
            }
        }
    }

    fn drive_pose(&self, ctx: &mut RobotContext, pose: LegPose, duration: Duration) {
        for leg in Leg::ALL {
            ctx.move_leg(leg, pose, duration);
        }
        ctx.sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::motor::driver::{centideg_to_units, units_to_centideg};
    use crate::robot::context::{Actuators, JointLimits};
    use crate::robot::leg::{JOINTS_PER_LEG, LEG_COUNT};
    use crate::sim::SimHexapod;

    /// Servos that only hold whole position units, like the LX-16A bus.
    struct QuantizedServos {
        units: Arc<Mutex<[[u16; JOINTS_PER_LEG]; LEG_COUNT]>>,
        moves: Arc<AtomicUsize>,
    }

    impl Actuators for QuantizedServos {
        fn move_joint(&mut self, leg: Leg, joint: Joint, angle: i32, _duration: Duration) {
            self.units.lock().unwrap()[leg][joint] = centideg_to_units(angle);
            self.moves.fetch_add(1, Ordering::Relaxed);
        }

        fn read_joint(&mut self, leg: Leg, joint: Joint) -> i32 {
            units_to_centideg(self.units.lock().unwrap()[leg][joint] as i16)
        }
    }

    fn setup(config: &HexapodConfig) -> (SimHexapod, RobotContext, RobotModeController) {
        let sim = SimHexapod::standing(config);
        let ctx = sim.context(config);
        let controller = RobotModeController::new(config).unwrap();
        (sim, ctx, controller)
    }

    fn quick_config() -> HexapodConfig {
        let mut config = HexapodConfig::default();
        config.gait.adaptive_lowering = false;
        config.balance.autotune_on_start = false;
        config
    }

    fn leg(id: u8) -> Leg {
        Leg::new(id).unwrap()
    }

    #[test]
    fn test_lay_down_settles_into_laid_down() {
        let config = quick_config();
        let (sim, mut ctx, mut modes) = setup(&config);

        let settled = modes.tick(&mut ctx, RobotMode::LayDown, GaitPattern::Tripod);
        assert_eq!(settled, Some(RobotMode::LaidDown));
        assert_eq!(modes.mode(), RobotMode::LaidDown);
        assert_eq!(sim.joint(leg(0), Joint::Femur), config.stance.lay_down.femur);

        sim.clear_history();
        for _ in 0..5 {
            assert_eq!(modes.tick(&mut ctx, RobotMode::LaidDown, GaitPattern::Tripod), None);
        }
        assert_eq!(modes.mode(), RobotMode::LaidDown);
        assert!(sim.history().is_empty());
    }

    #[test]
    fn test_stand_up_settles_into_idle() {
        let config = quick_config();
        let (sim, mut ctx, mut modes) = setup(&config);
        modes.tick(&mut ctx, RobotMode::LayDown, GaitPattern::Tripod);

        let settled = modes.tick(&mut ctx, RobotMode::StandUp, GaitPattern::Tripod);
        assert_eq!(settled, Some(RobotMode::Idle));
        assert_eq!(modes.mode(), RobotMode::Idle);
        for leg in Leg::ALL {
            assert_eq!(sim.pose(leg), LegPose::new(12000, 17000, 7000));
        }
    }

    #[test]
    fn test_balance_entered_exactly_once() {
        let config = quick_config();
        let (_sim, mut ctx, mut modes) = setup(&config);
        modes.startup(&mut ctx);

        for _ in 0..20 {
            modes.tick(&mut ctx, RobotMode::Balance, GaitPattern::Tripod);
            ctx.sleep(Duration::from_millis(20));
        }
        assert_eq!(modes.balance().activations(), 1);
        assert!(modes.balance().is_active());

        modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        assert!(!modes.balance().is_active());

        modes.tick(&mut ctx, RobotMode::Balance, GaitPattern::Tripod);
        assert_eq!(modes.balance().activations(), 2);
    }

    #[test]
    fn test_rotation_is_one_shot() {
        let config = quick_config();
        let (sim, mut ctx, mut modes) = setup(&config);

        let settled = modes.tick(&mut ctx, RobotMode::RotateRight, GaitPattern::Tripod);
        assert_eq!(settled, Some(RobotMode::Idle));
        assert_eq!(modes.mode(), RobotMode::Idle);
        // leg 0 swings first, then pushes during the second phase
        assert_eq!(sim.joint(leg(0), Joint::Coxa), config.coxa.rotate_forward);
        assert_eq!(sim.joint(leg(5), Joint::Coxa), config.coxa.rotate_backward);
    }

    #[test]
    fn test_idle_reasserts_only_drifted_joints() {
        let config = quick_config();
        let (sim, mut ctx, mut modes) = setup(&config);

        modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        assert!(sim.history().is_empty());

        sim.set_pose(leg(2), LegPose::new(12500, 17000, 7000));
        modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        let history = sim.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].leg, leg(2));
        assert_eq!(history[0].angle, 12000);
    }

    #[test]
    fn test_idle_settles_on_quantized_servos() {
        let config = quick_config();
        let sim = SimHexapod::standing(&config);
        let stance = [config.coxa.default, config.femur.down, config.tibia.down];
        let units = Arc::new(Mutex::new([stance.map(centideg_to_units); LEG_COUNT]));
        let moves = Arc::new(AtomicUsize::new(0));
        let servos = QuantizedServos {
            units: units.clone(),
            moves: moves.clone(),
        };
        let mut ctx = RobotContext::new(
            Box::new(servos),
            Box::new(sim.clock()),
            JointLimits::from_config(&config),
        );
        let mut modes = RobotModeController::new(&config).unwrap();
        // 17000 reads back as 16992
        assert_eq!(ctx.read_joint(leg(0), Joint::Femur), 16992);

        modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        let after_first = moves.load(Ordering::Relaxed);
        for _ in 0..10 {
            modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        }
        assert_eq!(moves.load(Ordering::Relaxed), after_first);

        // a real push off the stance is still corrected
        units.lock().unwrap()[leg(2)][Joint::Coxa] = centideg_to_units(12500);
        modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        assert_eq!(moves.load(Ordering::Relaxed), after_first + 1);
        assert_eq!(ctx.read_joint(leg(2), Joint::Coxa), 12000);
    }

    #[test]
    fn test_backward_turns_around_and_back() {
        let mut config = quick_config();
        config.gait.half_turn_cycles = 2;
        let (sim, mut ctx, mut modes) = setup(&config);
        let rotation_time = |config: &HexapodConfig| {
            let t = config.timing.rotation;
            2 * (t.reassert_ms + t.lift_ms + t.swing_ms + t.lower_ms + t.push_ms + 5 * t.settle_ms)
        };
        let walk_time = {
            let t = config.timing.tripod;
            2 * (t.reassert_ms + t.lift_ms + t.swing_ms + t.lower_ms + t.push_ms + 5 * t.settle_ms)
        };

        modes.tick(&mut ctx, RobotMode::MoveBackward, GaitPattern::Tripod);
        let after_first = sim.now();
        assert_eq!(
            after_first,
            Duration::from_millis(2 * rotation_time(&config) + walk_time)
        );

        modes.tick(&mut ctx, RobotMode::MoveBackward, GaitPattern::Tripod);
        assert_eq!(sim.now() - after_first, Duration::from_millis(walk_time));

        // leaving backward turns back to the original heading
        let before_stop = sim.now();
        modes.tick(&mut ctx, RobotMode::Idle, GaitPattern::Tripod);
        assert!(sim.now() - before_stop >= Duration::from_millis(2 * rotation_time(&config)));
    }

    #[test]
    fn test_reverse_backward_mirrors_extremes() {
        let mut config = quick_config();
        config.gait.backward_mode = BackwardMode::Reverse;
        let (sim, mut ctx, mut modes) = setup(&config);

        modes.tick(&mut ctx, RobotMode::MoveBackward, GaitPattern::Tripod);
        // a forward cycle leaves both legs at the forward extreme
        assert_eq!(sim.joint(leg(0), Joint::Coxa), config.coxa.backward);
        assert_eq!(sim.joint(leg(5), Joint::Coxa), config.coxa.backward);
    }

    #[test]
    fn test_dance_is_inert() {
        let config = quick_config();
        let (sim, mut ctx, mut modes) = setup(&config);
        for _ in 0..3 {
            assert_eq!(modes.tick(&mut ctx, RobotMode::Dance, GaitPattern::Tripod), None);
        }
        assert_eq!(modes.mode(), RobotMode::Dance);
        assert!(sim.history().is_empty());
    }
}
