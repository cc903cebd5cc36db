// 50 Hz loop with watchdog
// The watchdog zeroes the motor speeds when move commands stop arriving, so a
// crashed teleop never leaves the plotter running.
//
// Hub I/O is blocking and paced, so it runs in a separate worker that only
// ever sees the latest desired speeds.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};
use zenoh::pubsub::Publisher;

use crate::config::{
    Cli, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_MOVE, TOPIC_HEALTH, TOPIC_HUB, TOPIC_MOTORS,
};
use crate::link::{HubLink, SerialLink, SimLink};
use crate::messages::{HubStatus, MotorMoveData, MoveCommand, RuntimeHealth};
use crate::service::{HubService, ServiceConfig};

pub struct Runtime {
    latest_cmd: Option<MoveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: MoveCommand) {
        info!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Compute the speeds to apply, based on watchdog state
    pub fn compute_speeds(&mut self) -> MoveCommand {
        self.compute_speeds_at(Instant::now())
    }

    fn compute_speeds_at(&mut self, now: Instant) -> MoveCommand {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the motors
            if self.health != RuntimeHealth::CmdStale {
                warn!("Command stale ({:?} old), stopping motors", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            MoveCommand::default()
        } else if let Some(cmd) = self.latest_cmd {
            self.health = RuntimeHealth::Ok;
            cmd
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            MoveCommand::default()
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// What the hub worker last reported
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HubSnapshot {
    pub status: HubStatus,
    pub motors: MotorMoveData,
}

/// Run a blocking call against the service off the async executor
async fn blocking<L, F>(mut service: HubService<L>, f: F) -> Result<HubService<L>, JoinError>
where
    L: HubLink + Send + 'static,
    F: FnOnce(&mut HubService<L>) + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        f(&mut service);
        service
    })
    .await
}

fn apply(service: &mut HubService<impl HubLink>, target: MoveCommand) {
    if target.x_speed == 0.0 && target.y_speed == 0.0 {
        service.stop_all_motors();
    } else {
        service.set_motor_speeds(target.x_speed, target.y_speed);
    }
}

/// Forward desired speeds to the hub until the sender goes away, then stop
/// the motors and disconnect. Returns the service for inspection.
pub async fn run_hub_worker<L>(
    mut service: HubService<L>,
    mut desired: watch::Receiver<MoveCommand>,
    snapshot: watch::Sender<HubSnapshot>,
) -> Result<HubService<L>, JoinError>
where
    L: HubLink + Send + 'static,
{
    let gap = service.config().command_gap;
    let mut applied: Option<MoveCommand> = None;
    let mut poll_tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    loop {
        tokio::select! {
            changed = desired.changed() => {
                if changed.is_err() {
                    break;
                }
                let target = *desired.borrow_and_update();
                if applied != Some(target) {
                    service = blocking(service, move |s| apply(s, target)).await?;
                    applied = Some(target);
                    if !gap.is_zero() {
                        sleep(gap).await;
                    }
                }
            }
            _ = poll_tick.tick() => {
                service = blocking(service, |s| {
                    if let Err(e) = s.poll() {
                        warn!("Failed to poll hub: {}", e);
                    }
                })
                .await?;
            }
        }

        snapshot.send_replace(HubSnapshot {
            status: service.status(),
            motors: service.move_data(),
        });
    }

    info!("Hub worker shutting down, stopping motors");
    service = blocking(service, |s| {
        s.stop_all_motors();
        if let Err(e) = s.poll() {
            warn!("Failed to poll hub: {}", e);
        }
        s.disconnect();
    })
    .await?;

    Ok(service)
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Close the worker's command channel and wait until it has stopped the
/// motors and disconnected
pub async fn shutdown_hub_worker<L>(
    desired_tx: watch::Sender<MoveCommand>,
    worker: JoinHandle<Result<HubService<L>, JoinError>>,
) -> Result<HubService<L>, JoinError> {
    drop(desired_tx);
    worker.await?
}

async fn publish_state(
    pub_motors: &Publisher<'_>,
    pub_health: &Publisher<'_>,
    pub_hub: &Publisher<'_>,
    health: RuntimeHealth,
    snapshot: HubSnapshot,
) -> Result<(), BoxError> {
    pub_motors.put(serde_json::to_string(&snapshot.motors)?).await?;
    pub_health.put(serde_json::to_string(&health)?).await?;
    pub_hub.put(serde_json::to_string(&snapshot.status)?).await?;
    Ok(())
}

pub async fn run(cli: Cli) -> Result<(), BoxError> {
    let driver = cli.driver_script()?;

    let link: Box<dyn HubLink + Send> = if cli.simulate {
        info!("Using simulated hub");
        Box::new(SimLink::new())
    } else {
        info!("Opening hub link on {} at {} baud", cli.port, cli.baud);
        Box::new(SerialLink::open_with_baudrate(&cli.port, cli.baud)?)
    };
    let config = if cli.simulate {
        ServiceConfig::immediate()
    } else {
        ServiceConfig::default()
    };

    let mut service = HubService::new(link, config);
    let service = tokio::task::spawn_blocking(move || service.connect(&driver).map(|_| service))
        .await??;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_MOVE).await?;
    let pub_motors = session.declare_publisher(TOPIC_MOTORS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
    let pub_hub = session.declare_publisher(TOPIC_HUB).await?;

    let (desired_tx, desired_rx) = watch::channel(MoveCommand::default());
    let (snapshot_tx, snapshot_rx) = watch::channel(HubSnapshot::default());
    let worker = tokio::spawn(run_hub_worker(service, desired_rx, snapshot_tx));

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_MOVE);
    info!("Publishing to: {}, {}, {}", TOPIC_MOTORS, TOPIC_HEALTH, TOPIC_HUB);

    let outcome = loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MoveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Compute speeds (includes watchdog logic) and hand them to the hub worker
        let speeds = runtime.compute_speeds();
        desired_tx.send_if_modified(|current| {
            if *current != speeds {
                *current = speeds;
                true
            } else {
                false
            }
        });

        // 3. Publish state
        let snapshot = *snapshot_rx.borrow();
        let published =
            publish_state(&pub_motors, &pub_health, &pub_hub, runtime.health, snapshot).await;
        if let Err(e) = published {
            error!("Failed to publish state: {}", e);
            break Err(e);
        }
    };

    // The worker stops the motors on the way out, whatever ended the loop
    shutdown_hub_worker(desired_tx, worker).await?;
    info!("Runtime stopped");
    outcome
}
