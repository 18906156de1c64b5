use std::{error::Error, fs, fs::File, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gridlink_device::{
    render, usb, Connection, ConnectionOptions, Device, ErrorHandler, GridError, Handler,
    RowConnection,
};
use log::{error, info, warn, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with connection options
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Also write a debug log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// More output, repeat for frame dumps
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Describe the matching usb devices without opening them
    List,
    /// Connect to every grid and greet it
    Scan,
    /// Light up keys while they are held down, until ctrl-c
    Echo {
        /// Join all grids into one row device with this name
        #[arg(long)]
        row: Option<String>,
    },
    /// Scroll a text across the grids
    Marquee {
        text: String,
        #[arg(long, default_value_t = 80)]
        delay: u64,
        #[arg(long)]
        row: Option<String>,
    },
    /// Show a text letter by letter
    Print {
        text: String,
        #[arg(long, default_value_t = 400)]
        hold: u64,
        #[arg(long)]
        row: Option<String>,
    },
    /// Run the worm animation on every grid
    Flash,
}

/// Mirrors key presses on the lights underneath.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, source: &dyn Device, x: u8, y: u8, down: bool) {
        info!(
            "{} {}/{} on {}",
            if down { "Pressed" } else { "Released" },
            x,
            y,
            source.name()
        );
        if let Err(e) = source.switch(x, y, down).await {
            warn!("Could not echo key on {}: {}", source.name(), e);
        }
    }
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));
    if let Some(path) = &cli.log_file {
        loggers.push(WriteLogger::new(
            LevelFilter::Debug,
            Config::default(),
            File::create(path)?,
        ));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn load_options(cli: &Cli) -> Result<ConnectionOptions, Box<dyn Error>> {
    match &cli.config {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(ConnectionOptions::default()),
    }
}

async fn connect_all(options: &ConnectionOptions) -> Result<Vec<Connection>, Box<dyn Error>> {
    let (connections, failure) = gridlink_device::connections(options).await?.into_parts();
    if let Some(e) = failure {
        error!("{}", e);
    }
    if connections.is_empty() {
        Err("no monome found")?
    }
    Ok(connections)
}

/// Either every connection on its own, or all of them joined into one row.
fn targets(connections: Vec<Connection>, row: Option<&str>) -> Vec<Box<dyn Device>> {
    match row {
        Some(name) => {
            let row = connections
                .into_iter()
                .fold(RowConnection::builder().name(name), |row, c| row.with(c))
                .build();
            vec![Box::new(row) as Box<dyn Device>]
        }
        None => connections
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Device>)
            .collect(),
    }
}

async fn close_all(devices: &[Box<dyn Device>]) {
    for device in devices {
        if let Err(e) = device.close().await {
            error!("{}", e);
        }
    }
}

async fn echo(devices: &[Box<dyn Device>]) -> Result<(), Box<dyn Error>> {
    let on_error: ErrorHandler = Arc::new(|e: GridError| {
        error!("Stopped listening: {}", e);
    });
    for device in devices {
        device.set_handler(Arc::new(EchoHandler));
        device.start_listening(Some(on_error.clone()));
        info!("Listening on {}", device.name());
    }
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    let options = load_options(&cli)?;

    if let Command::List = cli.command {
        for device in usb::usb_devices(&options.vendor_id, &options.product_id)? {
            info!("{}", usb::describe(&device)?);
        }
        return Ok(());
    }

    let connections = connect_all(&options).await?;
    let (devices, result): (Vec<Box<dyn Device>>, Result<(), Box<dyn Error>>) = match &cli.command {
        Command::List => (Vec::new(), Ok(())),
        Command::Scan => {
            let devices = targets(connections, None);
            for device in &devices {
                info!("{} ({} buttons)", device.name(), device.num_buttons());
                render::greeter(device.as_ref()).await;
            }
            (devices, Ok(()))
        }
        Command::Echo { row } => {
            let devices = targets(connections, row.as_deref());
            let result = echo(&devices).await;
            (devices, result)
        }
        Command::Marquee { text, delay, row } => {
            let devices = targets(connections, row.as_deref());
            let mut result = Ok(());
            for device in &devices {
                if let Err(e) = device.marquee(text, Duration::from_millis(*delay)).await {
                    result = Err(e.into());
                    break;
                }
            }
            (devices, result)
        }
        Command::Print { text, hold, row } => {
            let devices = targets(connections, row.as_deref());
            let mut result = Ok(());
            for device in &devices {
                if let Err(e) = device.print(text, Duration::from_millis(*hold)).await {
                    result = Err(e.into());
                    break;
                }
            }
            (devices, result)
        }
        Command::Flash => {
            let mut result = Ok(());
            for connection in &connections {
                if let Err(e) = connection.flash().await {
                    result = Err(e.into());
                    break;
                }
            }
            (targets(connections, None), result)
        }
    };

    close_all(&devices).await;
    result
}
