use clap::{Args, Parser, Subcommand};
use csrsign_apiserver::{ApiServer, AppState, Config as ApiConfig};
use csrsign_controller::{ControllerConfig, CsrController};
use csrsign_signer::{HttpSigner, HttpSignerConfig, MockSigner, Signer};
use csrsign_storage::{RedbBackend, ResourceStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "csrsign", about = "CertificateSigningRequest signer backed by an external CA")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug_logging: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server only
    Serve {
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Run the API server and the signing controller
    Run {
        #[command(flatten)]
        server: ServerArgs,
        #[command(flatten)]
        controller: ControllerArgs,
    },
}

#[derive(Args)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:6443")]
    bind: String,
    /// Path to the redb database file
    #[arg(long, default_value = "./csrsign.redb")]
    data_dir: String,
}

#[derive(Args)]
struct ControllerArgs {
    /// Only CSRs with this signerName are signed
    #[arg(long, default_value = "example.com/foo")]
    signer_name: String,
    /// Number of concurrent reconcile workers
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Seconds to wait before polling again while issuance is pending
    #[arg(long, default_value_t = 5)]
    retry_delay_secs: u64,
    /// Periodic full resync interval in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    resync_secs: u64,
    /// Base URL of the CA; a mock signer is used when unset
    #[arg(long, env = "CSRSIGN_CA_URL")]
    ca_url: Option<String>,
    /// Bearer token for the CA
    #[arg(long, env = "CSRSIGN_CA_TOKEN", hide_env_values = true)]
    ca_token: Option<String>,
    /// CA request timeout in seconds
    #[arg(long, default_value_t = 30)]
    ca_timeout_secs: u64,
    /// Polls the mock signer reports as pending before issuing
    #[arg(long, default_value_t = 1)]
    mock_pending_polls: u32,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug_logging { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { server } => run_serve(&server).await,
        Commands::Run { server, controller } => run_all(&server, &controller).await,
    }
}

/// Run only the API server
async fn run_serve(args: &ServerArgs) -> miette::Result<()> {
    info!("Starting csrsign API server");

    let store = open_store(&args.data_dir)?;
    let config = ApiConfig {
        listen_addr: parse_bind(&args.bind)?,
    };

    ApiServer::new(config, Arc::new(AppState::new(store)))
        .run()
        .await
        .map_err(|e| miette::miette!("API server error: {}", e))?;

    Ok(())
}

/// Run the API server and the controller until ctrl-c
async fn run_all(server: &ServerArgs, args: &ControllerArgs) -> miette::Result<()> {
    info!(signer_name = %args.signer_name, "Starting csrsign");

    let store = open_store(&server.data_dir)?;
    let listen_addr = parse_bind(&server.bind)?;
    let signer = create_signer(args)?;

    let token = CancellationToken::new();

    // 1. Spawn API server
    let api_server = ApiServer::new(
        ApiConfig { listen_addr },
        Arc::new(AppState::new(store.clone())),
    );
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        tokio::select! {
            result = api_server.run() => {
                if let Err(e) = result {
                    error!("API server error: {}", e);
                }
            }
            _ = api_token.cancelled() => {
                info!("API server shutting down");
            }
        }
    });

    // 2. Spawn controller
    let controller_config = ControllerConfig {
        signer_name: args.signer_name.clone(),
        workers: args.workers,
        retry_delay: Duration::from_secs(args.retry_delay_secs),
        resync_interval: (args.resync_secs > 0).then(|| Duration::from_secs(args.resync_secs)),
    };
    let controller = CsrController::new(store, signer, controller_config);
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_token).await {
            error!("CSR controller error: {}", e);
        }
    });

    info!("csrsign running on {}", listen_addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(api_handle, controller_handle);
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

fn parse_bind(bind: &str) -> miette::Result<SocketAddr> {
    bind.parse()
        .map_err(|e| miette::miette!("Invalid bind address '{}': {}", bind, e))
}

fn open_store(data_dir: &str) -> miette::Result<ResourceStore> {
    let backend = RedbBackend::new(std::path::Path::new(data_dir))
        .map_err(|e| miette::miette!("Failed to open storage at '{}': {}", data_dir, e))?;

    Ok(ResourceStore::new(Arc::new(backend)))
}

/// Pick the HTTP CA client when a URL is given, the mock otherwise
fn create_signer(args: &ControllerArgs) -> miette::Result<Arc<dyn Signer>> {
    match &args.ca_url {
        Some(url) => {
            info!(ca_url = %url, "Using HTTP signer");
            let mut config = HttpSignerConfig::new(url.clone())
                .with_timeout(Duration::from_secs(args.ca_timeout_secs));
            if let Some(token) = &args.ca_token {
                config = config.with_token(token.clone());
            }
            let signer = HttpSigner::new(config)?;
            Ok(Arc::new(signer))
        }
        None => {
            info!(
                pending_polls = args.mock_pending_polls,
                "No CA configured, using mock signer"
            );
            Ok(Arc::new(
                MockSigner::new().with_pending_polls(args.mock_pending_polls),
            ))
        }
    }
}
