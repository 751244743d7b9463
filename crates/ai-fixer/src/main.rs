//! ai-fixer - watches one deployment's namespace and remediates it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use notify::{Notifier, NotifyChannel, PhoneCallChannel};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ai_fixer::config::{DEFAULT_MODEL, DEFAULT_NAMESPACE};
use ai_fixer::{
    health, Backoff, Collaborators, ErrorAggregator, EventWatcher, FixerConfig, FixerStats,
    GitHubChangeRequester, GitHubSettings, HttpManifestSource, InferenceClient, KubeEventSource,
    KubeWorkloads, RemediationLoop, RemediationOrchestrator, TargetPolicy, Timing,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// AI remediation controller for a single Kubernetes deployment.
#[derive(Parser)]
#[command(name = "ai-fixer")]
#[command(about = "Turns cluster warnings into AI-proposed manifest fixes")]
#[command(version)]
struct Cli {
    /// Kubeconfig file; when omitted, in-cluster config or the default
    /// lookup (which honours a multi-path KUBECONFIG) is used
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace to watch for warning events
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Refuse fixes for any deployment other than this one
    #[arg(long, env = "TARGET_DEPLOYMENT")]
    deployment: Option<String>,

    /// Base URL of the OpenAI-compatible inference service
    #[arg(long, env = "AI_URL")]
    ai_url: String,

    /// Model requested from the inference service
    #[arg(long, env = "AI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// URL serving the known-good manifest
    #[arg(long, env = "MANIFEST_URL")]
    manifest_url: String,

    /// Base URL of the phone call service; human escalation fails without it
    #[arg(long, env = "PHONE_SERVICE_URL")]
    phone_service_url: Option<String>,

    /// Clone URL of the manifest repository
    #[arg(long, env = "GITHUB_URL")]
    github_url: String,

    /// Token used for git pushes and the pull request API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: String,

    /// Path of the manifest inside the repository
    #[arg(long, env = "REPO_MANIFEST_PATH")]
    repo_manifest_path: String,

    /// Branch pull requests are opened against
    #[arg(long, default_value = "main")]
    base_branch: String,

    /// Local working copy of the manifest repository
    #[arg(long, default_value = "./tmp-repo")]
    work_dir: PathBuf,

    /// Seconds between buffer checks
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Minimum seconds between two remediation cycles
    #[arg(long, default_value = "10")]
    debounce_secs: u64,

    /// Seconds an applied fix is watched
    #[arg(long, default_value = "30")]
    rollout_timeout_secs: u64,

    /// Initial delay before re-subscribing to events
    #[arg(long, default_value = "2")]
    reconnect_delay_secs: u64,

    /// Upper bound for the re-subscribe delay
    #[arg(long, default_value = "60")]
    max_reconnect_delay_secs: u64,

    /// Timeout for outbound HTTP calls
    #[arg(long, default_value = "60")]
    http_timeout_secs: u64,

    /// Address of the health endpoint
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: SocketAddr,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn to_config(&self) -> FixerConfig {
        FixerConfig {
            namespace: self.namespace.clone(),
            target_deployment: self.deployment.clone(),
            ai_url: self.ai_url.clone(),
            model: self.model.clone(),
            manifest_url: self.manifest_url.clone(),
            phone_service_url: self.phone_service_url.clone(),
            github: GitHubSettings {
                repo_url: self.github_url.clone(),
                token: self.github_token.clone(),
                base_branch: self.base_branch.clone(),
                manifest_path: self.repo_manifest_path.clone(),
                work_dir: self.work_dir.clone(),
            },
            timing: Timing {
                poll_interval: Duration::from_secs(self.poll_interval_secs),
                debounce: Duration::from_secs(self.debounce_secs),
                rollout_timeout: Duration::from_secs(self.rollout_timeout_secs),
                reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
                max_reconnect_delay: Duration::from_secs(self.max_reconnect_delay_secs),
                http_timeout: Duration::from_secs(self.http_timeout_secs),
            },
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

async fn kube_client(kubeconfig: Option<&PathBuf>) -> Result<kube::Client> {
    let client = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Invalid kubeconfig")?;
            kube::Client::try_from(config).context("Failed to build Kubernetes client")?
        }
        None => kube::Client::try_default()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };
    Ok(client)
}

fn notifier(config: &FixerConfig) -> Result<Notifier> {
    let notifier = match &config.phone_service_url {
        Some(url) => {
            let phone: Arc<dyn NotifyChannel> = Arc::new(
                PhoneCallChannel::new(url, config.timing.http_timeout)
                    .context("Failed to build phone call channel")?,
            );
            Notifier::with_channels(vec![phone])
        }
        None => {
            warn!("PHONE_SERVICE_URL not set, failed rollouts cannot reach a human");
            Notifier::disabled()
        }
    };
    Ok(notifier)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting ai-fixer v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.to_config();
    config.validate()?;

    let client = kube_client(cli.kubeconfig.as_ref()).await?;
    info!(namespace = %config.namespace, "Connected to Kubernetes cluster");

    let http = reqwest::Client::builder()
        .timeout(config.timing.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let collaborators = Collaborators {
        manifests: Arc::new(HttpManifestSource::new(http.clone(), &config.manifest_url)),
        generator: Arc::new(InferenceClient::new(http, &config.ai_url, &config.model)),
        workloads: Arc::new(KubeWorkloads::new(client.clone())),
        change_requests: Arc::new(GitHubChangeRequester::new(config.github.clone())?),
        humans: Arc::new(notifier(&config)?),
    };
    let orchestrator = Arc::new(RemediationOrchestrator::new(
        collaborators,
        TargetPolicy {
            default_namespace: config.namespace.clone(),
            deployment: config.target_deployment.clone(),
        },
        config.timing.rollout_timeout,
    ));

    let aggregator = Arc::new(ErrorAggregator::new(config.timing.debounce));
    let stats = Arc::new(FixerStats::default());
    let cancel = CancellationToken::new();

    let watcher = EventWatcher::new(
        Arc::new(KubeEventSource::new(client)),
        aggregator.clone(),
        config.namespace.clone(),
        Backoff::new(
            config.timing.reconnect_delay,
            config.timing.max_reconnect_delay,
        ),
    );
    let mut watcher_handle = tokio::spawn(watcher.run(cancel.clone()));

    let runner = RemediationLoop::new(
        aggregator.clone(),
        orchestrator,
        stats.clone(),
        config.timing.poll_interval,
    );
    let runner_handle = tokio::spawn(runner.run(cancel.clone()));

    let listener = tokio::net::TcpListener::bind(cli.health_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cli.health_addr))?;
    info!(addr = %cli.health_addr, "Health server listening");
    let server = {
        let cancel = cancel.clone();
        axum::serve(listener, health::router(stats, aggregator))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
    };
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "Health server error");
        }
    });

    let watcher_result = tokio::select! {
        () = shutdown_signal() => None,
        joined = &mut watcher_handle => Some(joined),
    };
    cancel.cancel();

    let watcher_result = match watcher_result {
        Some(joined) => joined,
        None => watcher_handle.await,
    };

    if let Err(e) = runner_handle.await {
        error!(error = %e, "Remediation loop panicked");
    }
    if let Err(e) = server_handle.await {
        error!(error = %e, "Health server task panicked");
    }

    watcher_result
        .context("Event watcher panicked")?
        .context("Event watcher failed")?;

    info!("ai-fixer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
