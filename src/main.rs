use anyhow::Context;
use clap::Parser;
use followgraph_api::{run_heartbeat, EurekaClient, Registry, RegistryConfig, RestApi, ServerConfig};
use followgraph_core::{GraphStore, RelationshipService, Shutdown};
use followgraph_events::{amqp, AmqpConfig, ConsumerStats, DeadLetterConfig, EventConsumer, EventError, RetryPolicy};
use followgraph_storage::{StorageManager, StoreConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Follower graph service
#[derive(Parser, Debug)]
#[command(name = "followgraph")]
#[command(about = "Materializes user lifecycle events into a follower graph", long_about = None)]
struct Args {
    /// Path to the data directory
    #[arg(short, long, env = "FOLLOWGRAPH_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// LMDB map size in MiB
    #[arg(long, env = "FOLLOWGRAPH_MAP_SIZE_MB", default_value_t = 1024)]
    map_size_mb: usize,

    /// Upper bound on a single store operation, in milliseconds
    #[arg(long, env = "FOLLOWGRAPH_STORE_TIMEOUT_MS", default_value_t = 5000)]
    store_timeout_ms: u64,

    /// HTTP listen address
    #[arg(long, env = "FOLLOWGRAPH_HTTP_HOST", default_value = "0.0.0.0")]
    http_host: IpAddr,

    /// HTTP API port
    #[arg(long, env = "FOLLOWGRAPH_HTTP_PORT", default_value_t = 8082)]
    http_port: u16,

    /// HTTP worker threads (defaults to the number of cores)
    #[arg(long, env = "FOLLOWGRAPH_HTTP_WORKERS")]
    http_workers: Option<usize>,

    /// AMQP broker URI
    #[arg(long, env = "FOLLOWGRAPH_AMQP_URI", default_value = amqp::DEFAULT_URI)]
    amqp_uri: String,

    /// Fanout exchange carrying user lifecycle events
    #[arg(long, env = "FOLLOWGRAPH_EXCHANGE", default_value = amqp::DEFAULT_EXCHANGE)]
    exchange: String,

    /// Queue consumed by this service
    #[arg(long, env = "FOLLOWGRAPH_QUEUE", default_value = amqp::DEFAULT_QUEUE)]
    queue: String,

    /// Exchange receiving rejected events
    #[arg(long, env = "FOLLOWGRAPH_DEAD_LETTER_EXCHANGE", default_value = amqp::DEFAULT_DEAD_LETTER_EXCHANGE)]
    dead_letter_exchange: String,

    /// Queue bound to the dead-letter exchange
    #[arg(long, env = "FOLLOWGRAPH_DEAD_LETTER_QUEUE", default_value = amqp::DEFAULT_DEAD_LETTER_QUEUE)]
    dead_letter_queue: String,

    /// Let the broker discard rejected events
    #[arg(long, env = "FOLLOWGRAPH_NO_DEAD_LETTER")]
    no_dead_letter: bool,

    /// Declare the event queue as a quorum queue
    #[arg(long, env = "FOLLOWGRAPH_QUORUM_QUEUE")]
    quorum_queue: bool,

    /// Unacknowledged deliveries in flight
    #[arg(long, env = "FOLLOWGRAPH_PREFETCH", default_value_t = 1)]
    prefetch: u16,

    /// Store attempts per event before it is dead-lettered
    #[arg(long, env = "FOLLOWGRAPH_MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// Pause before a failed event is requeued, in milliseconds
    #[arg(long, env = "FOLLOWGRAPH_REQUEUE_DELAY_MS", default_value_t = 500)]
    requeue_delay_ms: u64,

    /// Pause between broker reconnect attempts, in milliseconds
    #[arg(long, env = "FOLLOWGRAPH_RECONNECT_DELAY_MS", default_value_t = 5000)]
    reconnect_delay_ms: u64,

    /// Eureka registry root
    #[arg(long, env = "FOLLOWGRAPH_REGISTRY_URL", default_value = "http://localhost:8761/eureka")]
    registry_url: String,

    /// Host name announced to the registry
    #[arg(long, env = "FOLLOWGRAPH_INSTANCE_HOST", default_value = "localhost")]
    instance_host: String,

    /// IP address announced to the registry
    #[arg(long, env = "FOLLOWGRAPH_INSTANCE_IP", default_value = "127.0.0.1")]
    instance_ip: String,

    /// Instance id (defaults to the announced host name)
    #[arg(long, env = "FOLLOWGRAPH_INSTANCE_ID")]
    instance_id: Option<String>,

    /// Skip service registration
    #[arg(long, env = "FOLLOWGRAPH_NO_REGISTRY")]
    no_registry: bool,

    /// Log level
    #[arg(long, env = "FOLLOWGRAPH_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let map_size = self
            .map_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| anyhow::anyhow!("--map-size-mb {} is too large", self.map_size_mb))?;
        Ok(StoreConfig {
            data_dir: self.data_dir.clone(),
            map_size,
            op_timeout: Duration::from_millis(self.store_timeout_ms),
        })
    }

    fn amqp_config(&self) -> AmqpConfig {
        let dead_letter = (!self.no_dead_letter).then(|| DeadLetterConfig {
            exchange: self.dead_letter_exchange.clone(),
            queue: self.dead_letter_queue.clone(),
        });
        AmqpConfig {
            uri: self.amqp_uri.clone(),
            exchange: self.exchange.clone(),
            queue: self.queue.clone(),
            dead_letter,
            prefetch: self.prefetch,
            quorum: self.quorum_queue,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            requeue_delay: Duration::from_millis(self.requeue_delay_ms),
            ..RetryPolicy::default()
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: SocketAddr::new(self.http_host, self.http_port),
            workers: self.http_workers,
            ..ServerConfig::default()
        }
    }

    fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            base_url: self.registry_url.clone(),
            instance_id: self.instance_id.clone(),
            host_name: self.instance_host.clone(),
            ip_addr: self.instance_ip.clone(),
            port: self.http_port,
            ..RegistryConfig::default()
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let log_level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Returns true when the consumer ended in failure.
fn consumer_failed(result: Result<Result<ConsumerStats, EventError>, JoinError>) -> bool {
    match result {
        Ok(Ok(stats)) => {
            info!(%stats, "event consumer stopped");
            false
        }
        Ok(Err(e)) => {
            error!(error = %e, "event consumer failed");
            true
        }
        Err(e) => {
            error!(error = %e, "event consumer task panicked");
            true
        }
    }
}

type HttpJoin = std::thread::Result<std::io::Result<()>>;

/// Returns true when the HTTP server ended in failure.
fn http_failed(result: Result<HttpJoin, JoinError>) -> bool {
    match result {
        Ok(Ok(Ok(()))) => {
            info!("HTTP server stopped");
            false
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "HTTP server failed");
            true
        }
        Ok(Err(_)) | Err(_) => {
            error!("HTTP server thread panicked");
            true
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting followgraph v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", args.data_dir);
    info!("HTTP API port: {}", args.http_port);
    info!("Broker: {}", amqp::redact_uri(&args.amqp_uri));

    let amqp_config = args.amqp_config();
    amqp_config.validate().context("invalid broker configuration")?;
    let retry = args.retry_policy();
    retry.validate().context("invalid retry policy")?;

    let storage = Arc::new(
        StorageManager::open(args.store_config().context("invalid store configuration")?)
            .with_context(|| format!("failed to open graph store in {:?}", args.data_dir))?,
    );
    let store: Arc<dyn GraphStore> = storage.clone();
    info!("Storage initialized");

    let shutdown = Shutdown::new();

    let heartbeat = if args.no_registry {
        info!("Service registration disabled");
        None
    } else {
        let config = args.registry_config();
        let interval = config.renewal_interval;
        let registry = Arc::new(EurekaClient::new(config).context("failed to build registry client")?);
        registry
            .register()
            .await
            .with_context(|| format!("failed to register with {}", args.registry_url))?;

        let signal = shutdown.signal();
        Some(tokio::spawn(async move {
            run_heartbeat(registry.as_ref(), interval, signal).await;
        }))
    };

    let handler = EventConsumer::new(store.clone(), retry);
    let consumer_signal = shutdown.signal();
    let mut consumer = tokio::spawn(async move { amqp::run(amqp_config, handler, consumer_signal).await });

    let service = RelationshipService::new(store);
    let server_config = args.server_config();
    let http_signal = shutdown.signal();
    let http_thread = std::thread::spawn(move || {
        let sys = actix_web::rt::System::new();
        sys.block_on(RestApi::start(service, server_config, http_signal))
    });
    let mut http = tokio::task::spawn_blocking(move || http_thread.join());

    info!("followgraph started successfully");
    info!("HTTP API: http://localhost:{}/", args.http_port);

    let mut failed = false;
    let mut consumer_done = false;
    let mut http_done = false;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = &mut consumer => {
            consumer_done = true;
            failed |= consumer_failed(result);
        }
        result = &mut http => {
            http_done = true;
            failed |= http_failed(result);
        }
    }

    info!("Shutting down...");
    shutdown.trigger();

    if !consumer_done {
        failed |= consumer_failed(consumer.await);
    }
    if !http_done {
        failed |= http_failed(http.await);
    }
    if let Some(heartbeat) = heartbeat {
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "heartbeat task panicked");
        }
    }

    storage.close();

    if failed {
        anyhow::bail!("followgraph stopped after a fatal error");
    }
    info!("followgraph stopped");
    Ok(())
}
