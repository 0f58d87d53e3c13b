//! CLI for topicd
//!
//! Subcommands:
//! - `server`: run the broker with its operator console
//! - `client`: a small WebSocket client for smoke tests

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use topicd::broker::Broker;
use topicd::client::session::{self, Action, ClientOptions, Role};
use topicd::config::{load_config, load_config_from};
use topicd::console::{self, ConsoleExit};
use topicd::transport::start_server;
use topicd::utils::error::BrokerError;
use topicd::utils::logging;

#[derive(Parser)]
#[command(name = "topicd")]
enum Command {
    /// Start the broker
    Server {
        /// Config file to load instead of `config/default.*`
        #[arg(long)]
        config: Option<PathBuf>,
        /// Do not read operator commands from stdin
        #[arg(long)]
        no_console: bool,
    },
    /// Register with a broker and produce, subscribe, withdraw or ask for status
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:12345")]
        url: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        topic: String,
        #[arg(value_enum)]
        action: Action,
        /// Registration removed by `withdraw`
        #[arg(long, value_enum, default_value_t = Role::Producer)]
        mode: Role,
        /// JSON payload of each published message
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Messages to publish, or to wait for when subscribing
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    match Command::parse() {
        Command::Server { config, no_console } => {
            if let Err(e) = run_server(config, !no_console).await {
                logging::init("info");
                error!("Server failed: {}", e);
            }
        }
        Command::Client {
            url,
            id,
            topic,
            action,
            mode,
            payload,
            count,
        } => {
            logging::init("info");
            let options = ClientOptions {
                url,
                id,
                topic,
                role: mode,
                payload,
                count,
            };
            if let Err(e) = session::run(action, &options).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server(config: Option<PathBuf>, with_console: bool) -> Result<(), BrokerError> {
    let settings = match config {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    };
    logging::init(&settings.log.level);

    let (broker, handle) = Broker::new(settings.server.id.clone());
    let dispatcher = tokio::spawn(broker.run());

    let console = {
        let handle = handle.clone();
        async move {
            if with_console && console::run(handle).await == ConsoleExit::Exit {
                return;
            }
            // Without a console (or once stdin is gone) only a signal stops the server.
            std::future::pending::<()>().await
        }
    };

    let result = tokio::select! {
        served = start_server(settings, handle.clone()) => served,
        _ = console => {
            info!("Exit requested from console.");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    handle.shutdown();
    if dispatcher.await.is_err() {
        error!("dispatcher task panicked");
    }
    result
}
