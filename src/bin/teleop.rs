// Keyboard teleop: WASD move, space stop, R/F speed, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use plotter_zenoh_runtime::config::{log_filter, TOPIC_CMD_MOVE};
use plotter_zenoh_runtime::messages::MoveCommand;

const SPEEDS: [f32; 3] = [15.0, 30.0, 50.0]; // duty cycle
const SPEED_LABELS: [&str; 3] = ["LOW", "MED", "HIGH"];
const INPUT_TIMEOUT_MS: u64 = 100; // Reset speeds after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_MOVE).await?;

    info!("Controls: A/D=X axis, W/S=Y axis, SPACE=stop, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    // Leave the plotter stopped
    publisher
        .put(serde_json::to_string(&MoveCommand::default())?)
        .await?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent speed state
    let mut cmd = MoveCommand::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Movement - update speed and refresh timestamp
                    KeyCode::Char('d') if pressed => {
                        cmd.x_speed = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        cmd.x_speed = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('w') if pressed => {
                        cmd.y_speed = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        cmd.y_speed = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char(' ') if pressed => cmd = MoveCommand::default(),

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset speeds if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            cmd = MoveCommand::default();
        }

        // Always publish at ~50Hz
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    info!("Speed: {} ({}%)", SPEED_LABELS[idx], SPEEDS[idx]);
}
