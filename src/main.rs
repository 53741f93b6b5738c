use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use consul_merge_k8s::controller::{self, ControllerConfig, ControllerState};
use consul_merge_k8s::crd::{
    ConsulServiceIntentionsSource, ConsulServiceRoute, SERVICE_INTENTIONS_LABEL,
    SERVICE_ROUTER_LABEL,
};
use consul_merge_k8s::leader::{holder_identity, LeaderElector};
use consul_merge_k8s::{telemetry, Error};
use kube::api::{Api, ListParams};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show fragment counts in a namespace
    Info(InfoArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds before retrying a pass that hit a retriable error
    #[arg(long, env = "REQUEUE_SECS", default_value_t = 15)]
    requeue_secs: u64,

    /// Seconds before retrying after an unexpected error
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 60)]
    error_requeue_secs: u64,

    /// Deadline for a single reconcile pass
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    reconcile_timeout_secs: u64,

    /// Only reconcile while holding the leader lease
    #[arg(long, env = "LEADER_ELECTION")]
    leader_election: bool,

    /// Namespace holding the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    lease_namespace: String,

    /// Address serving /health and /metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl RunArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            namespace: self.namespace.clone(),
            requeue_after: Duration::from_secs(self.requeue_secs),
            error_requeue_after: Duration::from_secs(self.error_requeue_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }
}

#[derive(Parser, Debug)]
struct InfoArgs {
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Consul Merge Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let routes: Api<ConsulServiceRoute> = Api::namespaced(client.clone(), &args.namespace);
    let sources: Api<ConsulServiceIntentionsSource> = Api::namespaced(client, &args.namespace);

    let routes = routes
        .list(&ListParams::default().labels(SERVICE_ROUTER_LABEL))
        .await
        .map_err(Error::KubeError)?;
    let sources = sources
        .list(&ListParams::default().labels(SERVICE_INTENTIONS_LABEL))
        .await
        .map_err(Error::KubeError)?;

    println!("Namespace: {}", args.namespace);
    println!("ConsulServiceRoutes: {}", routes.items.len());
    println!("ConsulServiceIntentionsSources: {}", sources.items.len());
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if telemetry::otel_enabled() {
        let otel_layer = telemetry::init_telemetry(&registry);
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting Consul Merge Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    // Without election every replica acts as leader
    let is_leader = Arc::new(AtomicBool::new(!args.leader_election));

    if args.leader_election {
        let elector = LeaderElector::new(client.clone(), &args.lease_namespace, holder_identity());
        let is_leader_bg = Arc::clone(&is_leader);
        tokio::spawn(elector.run(is_leader_bg));
    }

    let state = Arc::new(ControllerState {
        client,
        config: args.controller_config(),
        is_leader,
    });

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let addr = args.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = consul_merge_k8s::rest_api::run_server(api_state, addr).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    let result = controller::run_controller(state).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}
