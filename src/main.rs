//! Demo console for the mall event bus.
//!
//! Boots the broker with the report timer and a small catalogue, then asks
//! the catalogue for items from a synchronous console thread, the way the
//! interactive menus do.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;
use mallbus::{
    init_logging, Broker, EventKind, ListenerError, LogFormat, Message, ResultExt,
    Settings, Subscriptions, Subsystem, SubsystemError, SubsystemHost, TimeActor,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mallbus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mall event bus demo console", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, default_value = mallbus::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Message queue slots
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// Listener worker count
    #[arg(short, long)]
    workers: Option<usize>,
    /// Base log level (trace|debug|info|warn|error)
    #[arg(long)]
    log_level: Option<String>,
    /// Console log format (pretty|compact|json)
    #[arg(long)]
    log_format: Option<LogFormat>,
    /// Text the console searches the catalogue for
    #[arg(short, long, default_value = "shoe")]
    query: String,
    /// How long the console waits for an answer, in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,
}

impl Cli {
    fn apply(
        &self,
        settings: &mut Settings,
    ) {
        if let Some(n) = self.queue_capacity {
            settings.broker.queue_capacity = n;
        }
        if let Some(n) = self.workers {
            settings.broker.worker_threads = n;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

/// Payload shapes exchanged by the demo subsystems.
#[derive(Debug)]
enum Payload {
    Empty,
    Query(String),
    Items(Vec<String>),
}

/// Answers item browse requests from a fixed list.
struct Catalogue {
    items: Arc<Vec<String>>,
    subscriptions: Option<Subscriptions<Payload>>,
}

impl Catalogue {
    fn new(items: &[&str]) -> Self {
        Self {
            items: Arc::new(items.iter().map(|s| s.to_string()).collect()),
            subscriptions: None,
        }
    }
}

impl Subsystem<Payload> for Catalogue {
    fn name(&self) -> &str {
        "catalogue"
    }

    fn init(
        &mut self,
        broker: &Broker<Payload>,
    ) -> Result<(), SubsystemError> {
        let mut subscriptions = Subscriptions::new(broker);
        let items = Arc::clone(&self.items);
        let responder = broker.clone();
        subscriptions.add_fn(
            EventKind::ItemBrowseRequested,
            move |msg: Arc<Message<Payload>>| {
                let items = Arc::clone(&items);
                let responder = responder.clone();
                async move {
                    let Payload::Query(query) = msg.payload() else {
                        return Err(ListenerError::unexpected_payload("Query"));
                    };
                    let found = items
                        .iter()
                        .filter(|item| item.contains(query.as_str()))
                        .cloned()
                        .collect();
                    responder
                        .reply(&msg, EventKind::ItemListReturned, Payload::Items(found))
                        .map_err(|e| ListenerError::failed(e.to_string()))?;
                    Ok(())
                }
            },
        );
        self.subscriptions = Some(subscriptions);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), SubsystemError> {
        if let Some(mut subscriptions) = self.subscriptions.take() {
            subscriptions.clear();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config).context("loading settings")?;
    cli.apply(&mut settings);
    settings.validate().context("validating CLI overrides")?;

    let logging = init_logging(&settings.logging).context("initialising logging")?;
    info!(
        commit = env!("GIT_COMMIT"),
        built = env!("BUILD_TIME"),
        "mallbus starting"
    );

    let broker = Broker::<Payload>::new(settings.broker.clone()).context("creating broker")?;
    broker.start().context("starting broker")?;

    let mut host = SubsystemHost::new(&broker)
        .with(TimeActor::new(|_kind| Payload::Empty))
        .with(Catalogue::new(&[
            "running shoes",
            "leather shoes",
            "denim jacket",
            "shoe polish",
        ]));
    if let Err(e) = host.init_all().and_then(|()| host.start_all()) {
        error!(code = %e.status_code(), error = ?e, "subsystems failed to come up");
        broker.stop_and_join().await;
        return Err(e.context("booting subsystems").into());
    }
    for (name, state) in host.states() {
        info!(subsystem = %name, state = ?state, "subsystem ready");
    }

    let console_broker = broker.clone();
    let query = cli.query.clone();
    let timeout = Duration::from_millis(cli.timeout_ms);
    let console = std::thread::spawn(move || {
        console_broker.request_blocking(
            EventKind::ItemBrowseRequested,
            Payload::Query(query),
            EventKind::ItemListReturned,
            timeout,
        )
    });
    let answer = tokio::task::spawn_blocking(move || console.join())
        .await?
        .map_err(|_| anyhow!("console thread panicked"))?;

    match answer.as_deref().map(Message::payload) {
        Some(Payload::Items(items)) => {
            println!("{} item(s) matching '{}':", items.len(), cli.query);
            for item in items {
                println!("  - {item}");
            }
        }
        Some(other) => warn!(payload = ?other, "unexpected answer"),
        None => println!("no answer from the catalogue"),
    }

    if let Err(e) = host.shutdown_all() {
        warn!(code = %e.status_code(), error = %e, "subsystem shutdown reported an error");
    }
    broker.stop_and_join().await;
    let stats = serde_json::to_string(&broker.stats())?;
    info!(%stats, "mallbus stopped");
    logging.shutdown_async(Duration::from_secs(2)).await;
    Ok(())
}
