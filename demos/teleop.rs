// Keyboard teleop for the hexapod runtime
//
// W/S walk, A/D rotate, space stop, L lay down, U stand up, B balance,
// 1/2/3 tripod/wave/ripple gait, C calibrate, T autotune, Q quit.
//
// Modes are latched by the runtime, so a key is published once per press.
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

use hexapod_runtime::config::{TOPIC_CMD, TOPIC_STATE};
use hexapod_runtime::messages::{GaitPattern, RobotCommand, Telemetry};

fn command_for(code: KeyCode) -> Option<RobotCommand> {
    let command = match code {
        KeyCode::Char('w') => RobotCommand::Forward,
        KeyCode::Char('s') => RobotCommand::Backward,
        KeyCode::Char('a') => RobotCommand::Left,
        KeyCode::Char('d') => RobotCommand::Right,
        KeyCode::Char(' ') => RobotCommand::Stop,
        KeyCode::Char('l') => RobotCommand::LayDown,
        KeyCode::Char('u') => RobotCommand::Stand,
        KeyCode::Char('b') => RobotCommand::Balance,
        KeyCode::Char('1') => RobotCommand::Gait {
            pattern: GaitPattern::Tripod,
        },
        KeyCode::Char('2') => RobotCommand::Gait {
            pattern: GaitPattern::Wave,
        },
        KeyCode::Char('3') => RobotCommand::Gait {
            pattern: GaitPattern::Ripple,
        },
        KeyCode::Char('c') => RobotCommand::Calibrate,
        KeyCode::Char('t') => RobotCommand::Autotune,
        _ => return None,
    };
    Some(command)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;
    let state = session.declare_subscriber(TOPIC_STATE).await?;

    info!("Controls: W/S=walk, A/D=rotate, SPACE=stop, L/U=lay down/stand, B=balance");
    info!("          1/2/3=tripod/wave/ripple, C=calibrate, T=autotune, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher, &state).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    state: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut last_mode = None;

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind != KeyEventKind::Press {
                    continue;
                }
                if matches!(code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
                if let Some(command) = command_for(code) {
                    info!("Sending {:?}", command);
                    publisher.put(serde_json::to_string(&command)?).await?;
                }
            }
        }

        // Report mode changes from the runtime's telemetry
        while let Ok(Some(sample)) = state.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Ok(telemetry) = serde_json::from_slice::<Telemetry>(&payload) {
                if last_mode != Some(telemetry.mode) {
                    info!(
                        "Mode: {:?} (gait {:?}, balance {})",
                        telemetry.mode,
                        telemetry.gait,
                        if telemetry.balance.active { "on" } else { "off" }
                    );
                    last_mode = Some(telemetry.mode);
                }
            }
        }
    }

    Ok(())
}
