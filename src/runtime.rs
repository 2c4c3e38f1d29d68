// Motion loop thread and the zenoh command bridge
//
// The motion loop owns the robot context and the mode controller and runs on a
// dedicated thread, because gait cycles block for hundreds of milliseconds.
// Everything else talks to it through a `CommandHandle`:
// - requested mode and gait live in two atomics (last write wins)
// - one-shot requests go over a channel drained at the start of each tick
// - a telemetry snapshot comes back through a watch channel after each tick

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{HexapodConfig, RuntimeConfig};
use crate::control::mode::RobotModeController;
use crate::control::pid::PidGains;
use crate::messages::{
    BalanceStatus, GaitPattern, RobotCommand, RobotMode, RuntimeHealth, Telemetry,
};
use crate::robot::context::RobotContext;
use crate::robot::leg::Leg;

/// Requested mode and gait, shared between the bridge and the motion loop.
#[derive(Debug, Default)]
pub struct CommandState {
    mode: AtomicU8,
    gait: AtomicU8,
}

impl CommandState {
    pub fn requested_mode(&self) -> RobotMode {
        RobotMode::from_u8(self.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn requested_gait(&self) -> GaitPattern {
        GaitPattern::from_u8(self.gait.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: RobotMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn set_gait(&self, gait: GaitPattern) {
        self.gait.store(gait as u8, Ordering::Release);
    }

    /// Record that a one-shot action finished, unless a newer request replaced it.
    pub fn settle(&self, from: RobotMode, to: RobotMode) -> bool {
        self.mode
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Work that has to run on the motion loop thread.
#[derive(Debug)]
pub enum MotionRequest {
    Calibrate(oneshot::Sender<bool>),
    Autotune(oneshot::Sender<bool>),
    GroundedState(Leg, oneshot::Sender<bool>),
    SetBalanceGains { roll: PidGains, pitch: PidGains },
    TestCompensation { roll: f64, pitch: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("motion loop is not running")]
    Stopped,
}

#[derive(Clone)]
pub struct CommandHandle {
    state: Arc<CommandState>,
    requests: mpsc::UnboundedSender<MotionRequest>,
    telemetry: watch::Receiver<Telemetry>,
}

impl CommandHandle {
    pub fn set_requested_mode(&self, mode: RobotMode) {
        debug!(?mode, "Requested mode");
        self.state.set_mode(mode);
    }

    pub fn set_requested_gait(&self, gait: GaitPattern) {
        debug!(?gait, "Requested gait");
        self.state.set_gait(gait);
    }

    pub fn requested_mode(&self) -> RobotMode {
        self.state.requested_mode()
    }

    pub fn requested_gait(&self) -> GaitPattern {
        self.state.requested_gait()
    }

    /// Snapshot published after the most recent tick.
    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.borrow().clone()
    }

    pub fn balance_status(&self) -> BalanceStatus {
        self.telemetry.borrow().balance
    }

    /// Fresh debounced contact reading, taken between two ticks. The request
    /// is queued immediately; the returned future resolves once it ran.
    pub fn grounded_state(
        &self,
        leg: Leg,
    ) -> impl Future<Output = Result<bool, CommandError>> + Send + 'static {
        self.request(move |reply| MotionRequest::GroundedState(leg, reply))
    }

    pub fn calibrate_balance(
        &self,
    ) -> impl Future<Output = Result<bool, CommandError>> + Send + 'static {
        self.request(MotionRequest::Calibrate)
    }

    pub fn autotune_balance(
        &self,
    ) -> impl Future<Output = Result<bool, CommandError>> + Send + 'static {
        self.request(MotionRequest::Autotune)
    }

    pub fn set_balance_gains(&self, roll: PidGains, pitch: PidGains) -> Result<(), CommandError> {
        self.send(MotionRequest::SetBalanceGains { roll, pitch })
    }

    pub fn test_compensation(&self, roll: f64, pitch: f64) -> Result<(), CommandError> {
        self.send(MotionRequest::TestCompensation { roll, pitch })
    }

    /// Route a wire command. Replies to calibrate/autotune are not awaited;
    /// the balance controller logs their outcome.
    pub fn apply(&self, command: RobotCommand) -> Result<(), CommandError> {
        match command {
            RobotCommand::Forward
            | RobotCommand::Backward
            | RobotCommand::Left
            | RobotCommand::Right
            | RobotCommand::Stop
            | RobotCommand::Stand
            | RobotCommand::LayDown
            | RobotCommand::Dance
            | RobotCommand::Balance => {
                if let Some(mode) = command.requested_mode() {
                    self.set_requested_mode(mode);
                }
                Ok(())
            }
            RobotCommand::Gait { pattern } => {
                self.set_requested_gait(pattern);
                Ok(())
            }
            RobotCommand::Calibrate => self.send(MotionRequest::Calibrate(oneshot::channel().0)),
            RobotCommand::Autotune => self.send(MotionRequest::Autotune(oneshot::channel().0)),
            RobotCommand::SetBalanceGains { roll, pitch } => self.set_balance_gains(roll, pitch),
            RobotCommand::TestCompensation { roll, pitch } => self.test_compensation(roll, pitch),
        }
    }

    fn send(&self, request: MotionRequest) -> Result<(), CommandError> {
        self.requests.send(request).map_err(|_| CommandError::Stopped)
    }

    fn request<T: Send + 'static>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MotionRequest,
    ) -> impl Future<Output = Result<T, CommandError>> + Send + 'static {
        let (reply, response) = oneshot::channel();
        let sent = self.send(make(reply));
        async move {
            sent?;
            response.await.map_err(|_| CommandError::Stopped)
        }
    }
}

pub struct MotionLoop {
    ctx: RobotContext,
    controller: RobotModeController,
    state: Arc<CommandState>,
    requests: mpsc::UnboundedReceiver<MotionRequest>,
    telemetry: watch::Sender<Telemetry>,
    shutdown: Arc<AtomicBool>,
    period: Duration,
    health: RuntimeHealth,
}

impl MotionLoop {
    pub fn new(
        mut ctx: RobotContext,
        controller: RobotModeController,
        config: &RuntimeConfig,
    ) -> (Self, CommandHandle) {
        let state = Arc::new(CommandState::default());
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, telemetry_rx) = watch::channel(Telemetry::default());

        let health = if ctx.has_contact_sensors() && ctx.has_accelerometer() {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::Degraded
        };

        let motion = Self {
            ctx,
            controller,
            state: Arc::clone(&state),
            requests: request_rx,
            telemetry: telemetry_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            period: config.loop_period(),
            health,
        };
        let handle = CommandHandle {
            state,
            requests: request_tx,
            telemetry: telemetry_rx,
        };
        (motion, handle)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn controller(&self) -> &RobotModeController {
        &self.controller
    }

    pub fn startup(&mut self) {
        if self.health == RuntimeHealth::Degraded {
            warn!("Running degraded: contact sensors or accelerometer missing");
        }
        self.controller.startup(&mut self.ctx);
        self.publish();
    }

    /// Drain pending requests, run one controller tick and publish telemetry.
    pub fn tick(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            self.handle_request(request);
        }

        let requested = self.state.requested_mode();
        let gait = self.state.requested_gait();
        if let Some(settled) = self.controller.tick(&mut self.ctx, requested, gait) {
            if !self.state.settle(requested, settled) {
                debug!(?settled, "Newer request arrived during one-shot action");
            }
        }

        self.publish();
    }

    /// Tick at the configured rate until the shutdown flag is raised.
    pub fn run(&mut self) {
        info!("Motion loop started: {}ms period", self.period.as_millis());
        while !self.shutdown.load(Ordering::Acquire) {
            let started = self.ctx.now();
            self.tick();
            if let Some(rest) = self.period.checked_sub(self.ctx.elapsed_since(started)) {
                self.ctx.sleep(rest);
            }
        }
        info!("Motion loop stopped");
    }

    fn handle_request(&mut self, request: MotionRequest) {
        match request {
            MotionRequest::Calibrate(reply) => {
                let ok = self.controller.balance_mut().calibrate(&mut self.ctx);
                let _ = reply.send(ok);
            }
            MotionRequest::Autotune(reply) => {
                let ok = self.controller.balance_mut().autotune(&mut self.ctx);
                let _ = reply.send(ok);
            }
            MotionRequest::GroundedState(leg, reply) => {
                let grounded = self.controller.contact_mut().read_debounced(&mut self.ctx, leg);
                let _ = reply.send(grounded);
            }
            MotionRequest::SetBalanceGains { roll, pitch } => {
                self.controller.balance_mut().set_pid_parameters(roll, pitch);
            }
            MotionRequest::TestCompensation { roll, pitch } => {
                self.controller
                    .balance_mut()
                    .test_compensation(&mut self.ctx, roll, pitch);
            }
        }
    }

    fn publish(&mut self) {
        let snapshot = Telemetry {
            mode: self.controller.mode(),
            requested_mode: self.state.requested_mode(),
            gait: self.state.requested_gait(),
            balance: self.controller.balance().status(),
            grounded: self.controller.contact().last_known(),
            joints: self.ctx.commanded(),
            health: self.health,
            uptime_ms: self.ctx.now().as_millis() as u64,
        };
        self.telemetry.send_replace(snapshot);
    }
}

/// Start the motion thread and bridge zenoh commands into it until Ctrl-C.
pub async fn run(
    config: HexapodConfig,
    ctx: RobotContext,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let controller = RobotModeController::new(&config)?;
    let (mut motion, handle) = MotionLoop::new(ctx, controller, &config.runtime);
    let shutdown = motion.shutdown_flag();

    let motion_thread = std::thread::Builder::new()
        .name("motion".to_string())
        .spawn(move || {
            motion.startup();
            motion.run();
        })?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(config.runtime.cmd_topic.as_str()).await?;
    let pub_state = session
        .declare_publisher(config.runtime.state_topic.as_str())
        .await?;

    let mut cmd_tick = interval(config.runtime.loop_period());
    let mut state_tick = interval(config.runtime.state_period());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Subscribed to: {}", config.runtime.cmd_topic);
    info!(
        "Publishing to: {} at {}Hz",
        config.runtime.state_topic, config.runtime.state_hz
    );

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown requested");
                break;
            }
            _ = cmd_tick.tick() => {
                while let Ok(Some(sample)) = subscriber.try_recv() {
                    let payload = sample.payload().to_bytes();
                    match RobotCommand::parse(&payload) {
                        Ok(command) => {
                            info!("Received command: {:?}", command);
                            if let Err(e) = handle.apply(command) {
                                warn!("Dropping command: {}", e);
                            }
                        }
                        Err(e) => warn!("Ignoring command: {}", e),
                    }
                }
            }
            _ = state_tick.tick() => {
                match serde_json::to_string(&handle.telemetry()) {
                    Ok(state_json) => {
                        if let Err(e) = pub_state.put(state_json).await {
                            warn!("Failed to publish telemetry: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to encode telemetry: {}", e),
                }
            }
        }
    }

    shutdown.store(true, Ordering::Release);
    match tokio::task::spawn_blocking(move || motion_thread.join()).await {
        Ok(Ok(())) => info!("Motion thread joined"),
        Ok(Err(_)) => warn!("Motion thread panicked"),
        Err(e) => warn!("Failed to join motion thread: {}", e),
    }
    Ok(())
}
