//! A command line monitor for a fleet of `fleetwise` devices.
//!
//! It connects to a broker, routes every device message into the registry,
//! and then either reports the fleet state until interrupted or performs a
//! single operator command.

use std::time::Duration;

use clap::{Parser, Subcommand};

use serde::Serialize;

use tracing::{Level, error, info};

use fleetwise_controller::controller::{Controller, ControllerConfig};
use fleetwise_controller::error::Error;
use fleetwise_controller::transport::{
    self, BrokerConfig, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_CLIENT_ID,
    MqttPublisher, ReceiverHandle,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Broker host.
    #[arg(long, default_value = DEFAULT_BROKER_HOST)]
    host: String,

    /// Broker port.
    #[arg(long, default_value_t = DEFAULT_BROKER_PORT)]
    port: u16,

    /// Client identifier used with the broker.
    #[arg(long, default_value = DEFAULT_CLIENT_ID)]
    client_id: String,

    /// Prefix of all device topics.
    #[arg(long, default_value = "devices")]
    prefix: String,

    /// Seconds after which a silent device is considered offline.
    #[arg(long, default_value_t = 30)]
    liveness_secs: u64,

    /// Log level.
    #[arg(long, default_value_t = Level::INFO)]
    level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track the fleet and periodically report its state until Ctrl-C.
    Run {
        /// Ask all devices to announce themselves on startup.
        #[arg(long)]
        discover: bool,
        /// Seconds between two reports.
        #[arg(long, default_value_t = 10)]
        report_secs: u64,
    },
    /// Rotate the colors of all eligible RGB devices.
    Mix {
        /// Seconds spent collecting device reports before mixing.
        #[arg(long, default_value_t = 5)]
        collect_secs: u64,
    },
    /// Set the color of a device.
    #[command(allow_negative_numbers = true)]
    SetColor {
        /// Device identifier.
        id: String,
        /// Red channel.
        red: i64,
        /// Green channel.
        green: i64,
        /// Blue channel.
        blue: i64,
        /// Seconds spent collecting device reports before sending.
        #[arg(long, default_value_t = 5)]
        collect_secs: u64,
    },
    /// Release the action button of a device.
    ResetButton {
        /// Device identifier.
        id: String,
        /// Seconds spent collecting device reports before sending.
        #[arg(long, default_value_t = 5)]
        collect_secs: u64,
    },
    /// Send a free-form command to a device.
    Send {
        /// Device identifier.
        id: String,
        /// Command name.
        command: String,
        /// Seconds spent collecting device reports before sending.
        #[arg(long, default_value_t = 5)]
        collect_secs: u64,
    },
    /// Send a free-form command to every online device.
    Broadcast {
        /// Command name.
        command: String,
        /// Seconds spent collecting device reports before sending.
        #[arg(long, default_value_t = 5)]
        collect_secs: u64,
    },
    /// Ask every listening device to announce itself.
    Discover,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => error!("Impossible to serialize the result: {e}"),
    }
}

async fn collect(seconds: u64) {
    info!("Collecting device reports for {seconds}s");
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

async fn run(
    controller: &Controller<MqttPublisher>,
    discover: bool,
    report_secs: u64,
) -> Result<(), Error> {
    if discover {
        controller.discover()?;
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut interval = tokio::time::interval(Duration::from_secs(report_secs.max(1)));

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Impossible to listen for Ctrl-C: {e}");
                }
                break;
            }
            _ = interval.tick() => {
                let stats = controller.stats();
                let system = controller.system_info();
                info!(
                    total = stats.total,
                    online = stats.online,
                    messages = system.message_count,
                    errors = system.error_count,
                    connected = system.transport_connected,
                    "Fleet report, uptime {}",
                    system.uptime
                );
                for (device_type, count) in &stats.by_type {
                    info!("  {device_type}: {count} connected");
                }
            }
        }
    }

    print_json(&controller.events(fleetwise_controller::event_log::DEFAULT_EVENTS_LIMIT));
    Ok(())
}

async fn execute(controller: &Controller<MqttPublisher>, command: Command) -> Result<(), Error> {
    match command {
        Command::Run {
            discover,
            report_secs,
        } => run(controller, discover, report_secs).await,
        Command::Mix { collect_secs } => {
            collect(collect_secs).await;
            let outcome = controller.mix()?;
            print_json(&outcome);
            Ok(())
        }
        Command::SetColor {
            id,
            red,
            green,
            blue,
            collect_secs,
        } => {
            collect(collect_secs).await;
            let color = controller.set_color(&id, red, green, blue)?;
            info!("Color of {id} set to {color}");
            Ok(())
        }
        Command::ResetButton { id, collect_secs } => {
            collect(collect_secs).await;
            if !controller.reset_button(&id)? {
                info!("Device {id} is not known yet, the command has been sent anyway");
            }
            Ok(())
        }
        Command::Send {
            id,
            command,
            collect_secs,
        } => {
            collect(collect_secs).await;
            controller.send_command(&id, &command)
        }
        Command::Broadcast {
            command,
            collect_secs,
        } => {
            collect(collect_secs).await;
            let sent = controller.broadcast(&command);
            info!("Command {command} sent to {sent} devices");
            Ok(())
        }
        Command::Discover => controller.discover(),
    }
}

// Gives the event loop some time to flush pending commands.
async fn stop(receiver: ReceiverHandle) {
    tokio::time::sleep(Duration::from_millis(500)).await;
    receiver.shutdown().await;
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    // Initialize tracing subscriber.
    tracing_subscriber::fmt().with_max_level(cli.level).init();

    let broker = BrokerConfig::new()
        .host(cli.host)
        .port(cli.port)
        .client_id(cli.client_id);
    info!("Connecting to {}", broker.address());

    let (publisher, connection) = transport::connect(&broker);

    let config = ControllerConfig::new()
        .topic_prefix(cli.prefix)
        .liveness_window(Duration::from_secs(cli.liveness_secs));

    let controller = Controller::new(config, publisher);
    let receiver = controller.start_receiver(connection);

    let result = execute(&controller, cli.command).await;
    if let Err(e) = &result {
        error!("{e}");
    }

    print_json(&controller.system_info());
    stop(receiver).await;

    result
}
