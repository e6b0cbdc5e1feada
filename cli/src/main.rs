//! Gator CLI: run the hub or talk to a running one.
//!
//! # Usage
//!
//! ```text
//! gator serve --config config.json
//! gator get sales/total
//! gator set sales/north 20000
//! gator node allSalesMetrics 0
//! gator config export > backup.json
//! gator config import backup.json
//! gator cache clear
//! gator eval employees/avgSalary --config config.json
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use serde_json::Value;

use gator_core::bus::{decode_payload, BusBridge, MqttTransport};
use gator_core::client::{Client, DEFAULT_URL};
use gator_core::config::{ConfigDocument, ConfigSource, Settings};
use gator_core::daemon::{self, Daemon, DaemonConfig};
use gator_core::script::ExprEvaluator;
use gator_core::service::Service;
use gator_core::{DocPath, Hub, Result};


#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "Data-aggregation hub")]
struct Cli {
    /// Base URL of a running hub.
    #[arg(long, global = true, env = "GATOR_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Configuration file (JSON, or YAML by extension).
    #[arg(long, global = true, env = "CONFIG_FILE_PATH")]
    config: Option<PathBuf>,

    /// Configuration fetched over HTTP when no file is given.
    #[arg(long = "config-url", global = true, env = "CONFIG_FILE_URL")]
    config_url: Option<String>,

    /// Log filter, e.g. `debug` or `gator_core=debug`.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configuration, connect the bus and serve HTTP.
    Serve {
        #[arg(long)]
        listen: Option<SocketAddr>,
        #[arg(long)]
        workers: Option<usize>,
        /// Do not publish bus-originated writes back to their own mapping.
        #[arg(long)]
        suppress_echo: bool,
    },
    /// Print the resolved value at a path.
    Get { path: String },
    /// Write a value (JSON, or a bare string) at a path.
    Set { path: String, value: String },
    /// Write a value to every path of a node alias.
    Node { alias: String, value: String },
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Resolve a path from the configuration without a running hub.
    Eval { path: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the hub's whole configuration document.
    Export,
    /// Replace the hub's configuration with a file.
    Import { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Drop every memoized transformation result.
    Clear,
}


fn main() {
    let cli = Cli::parse();
    let settings = match Settings::from_env() {
        Ok(settings) => with_log_flag(settings, cli.log.as_deref()),
        Err(e) => {
            eprintln!("gator: {}", e);
            process::exit(1);
        }
    };
    init_logging(&settings.log_filter);

    if let Err(e) = run(&cli, settings) {
        eprintln!("gator: {}", e);
        process::exit(1);
    }
}


/// `--log` takes precedence over `RUST_LOG`.
fn with_log_flag(mut settings: Settings, flag: Option<&str>) -> Settings {
    if let Some(filter) = flag {
        settings.log_filter = filter.to_string();
    }
    settings
}


fn init_logging(filter: &str) {
    let _ = env_logger::Builder::new().parse_filters(filter).try_init();
}


fn run(cli: &Cli, mut settings: Settings) -> Result<()> {
    match &cli.command {
        Command::Serve {
            listen,
            workers,
            suppress_echo,
        } => {
            if let Some(listen) = listen {
                settings.listen = *listen;
            }
            if let Some(workers) = workers {
                settings.workers = *workers;
            }
            if *suppress_echo {
                settings.suppress_echo = true;
            }
            settings.validate()?;
            serve(config_source(cli), settings)
        }
        Command::Get { path } => {
            let value = Client::new(&cli.url).get(&DocPath::parse(path))?;
            print_json(&value)
        }
        Command::Set { path, value } => {
            Client::new(&cli.url).set(&DocPath::parse(path), &parse_value(value))
        }
        Command::Node { alias, value } => Client::new(&cli.url).node(alias, &parse_value(value)),
        Command::Config(ConfigCommand::Export) => {
            let doc = Client::new(&cli.url).export_config()?;
            print_json(&serde_json::to_value(doc)?)
        }
        Command::Config(ConfigCommand::Import { file }) => {
            let doc = ConfigDocument::from_path(file)?;
            Client::new(&cli.url).import_config(&doc)
        }
        Command::Cache(CacheCommand::Clear) => Client::new(&cli.url).clear_cache(),
        Command::Eval { path } => {
            let value = eval(&config_source(cli), &settings, &DocPath::parse(path))?;
            print_json(&value)
        }
    }
}


fn config_source(cli: &Cli) -> ConfigSource {
    ConfigSource::select(cli.config.clone(), cli.config_url.clone())
}


/// Run the hub until the process is stopped.
fn serve(source: ConfigSource, settings: Settings) -> Result<()> {
    let doc = source.load()?;
    let evaluator = Arc::new(ExprEvaluator::new(settings.script_step_limit));
    let (handle, events) = daemon::channel();

    let mut hub = Hub::from_document(&doc, evaluator)?
        .with_persist_path(source.persist_path().map(Path::to_path_buf));

    let mut transport = None;
    if let Some(mqtt) = &doc.mqtt {
        let mqtt_transport = Arc::new(MqttTransport::connect(mqtt, handle.sender())?);
        let bridge = BusBridge::new(
            mqtt_transport.clone(),
            mqtt.mappings(),
            settings.publish_timeout,
            settings.suppress_echo,
        );
        let subscribed = bridge.subscribe_all();
        info!("bus bridge ready: {} mapping(s), {} subscription(s)", bridge.mappings().len(), subscribed);
        hub = hub.with_bridge(Arc::new(bridge));
        transport = Some(mqtt_transport);
    } else {
        info!("no mqtt section; running without a bus");
    }

    let hub = Arc::new(hub);
    let mut service = Service::start(Arc::clone(&hub), &settings)?;
    let mut daemon = Daemon::with_channel(hub, handle, events, DaemonConfig::default());
    daemon.run();

    service.shutdown();
    if let Some(t) = transport {
        t.disconnect();
    }
    Ok(())
}


/// Resolve `path` against a locally loaded configuration.
fn eval(source: &ConfigSource, settings: &Settings, path: &DocPath) -> Result<Value> {
    let doc = source.load()?;
    let evaluator = Arc::new(ExprEvaluator::new(settings.script_step_limit));
    Hub::from_document(&doc, evaluator)?.read_resolved(path)
}


/// JSON when it parses, otherwise the text as a string.
fn parse_value(text: &str) -> Value {
    decode_payload(text.as_bytes())
}


fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
