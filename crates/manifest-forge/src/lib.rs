//! Service assembly: configuration, wiring and the run loop.

pub mod config;
pub mod logging;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{self, WrapErr};
use manifest_forge_cache::{ByteCache, MemoryCache, RedisCache};
use manifest_forge_git::auth::{AnonymousAuth, AuthProvider, GitHubAppAuth};
use manifest_forge_git::Git;
use manifest_forge_helm::{ChartRenderer, RenderDefaults};
use manifest_forge_kustomize::OverlayRenderer;
use manifest_forge_registry::HelmRemote;
use manifest_forge_source::{
    ChartProvider, GitRepositoryCache, HelmChartCache, HelmIndexCache, KustomizationProvider,
    ManifestService,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{ApplicationConfig, SynchronizationMethod};
use crate::web::metrics::Metrics;
use crate::web::AppState;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct Application {
    config: ApplicationConfig,
    state: AppState,
}

impl Application {
    /// Wire every collaborator. Construction performs no network I/O except
    /// an initial Redis connection when that backend is selected.
    pub async fn create(config: ApplicationConfig) -> eyre::Result<Self> {
        let auth: Arc<dyn AuthProvider> = match (
            config.github_app_id,
            config.github_app_installation_id,
            &config.github_app_private_key,
        ) {
            (Some(app_id), Some(installation_id), Some(private_key)) => Arc::new(
                GitHubAppAuth::new(app_id, installation_id, private_key)
                    .wrap_err("invalid GitHub app configuration")?,
            ),
            _ => Arc::new(AnonymousAuth),
        };

        let git = Arc::new(Git::new(auth));
        let remote = Arc::new(HelmRemote::new(config.helm_host_providers.clone()));

        let git_bytes = build_cache(&config, "git-repositories").await?;
        let index_bytes = build_cache(&config, "helm-indexes").await?;
        let chart_bytes = build_cache(&config, "helm-charts").await?;

        let git_cache = Arc::new(GitRepositoryCache::new(git, git_bytes));
        let index_cache = Arc::new(HelmIndexCache::new(remote.clone(), index_bytes));
        let chart_cache = Arc::new(HelmChartCache::new(remote, index_cache, chart_bytes));

        let service = ManifestService::new(
            ChartProvider::new(chart_cache, git_cache.clone()),
            ChartRenderer::new(RenderDefaults {
                release_name: config.helm_default_release_name.clone(),
                namespace: config.helm_default_kubernetes_namespace.clone(),
                api_versions: config.helm_default_kubernetes_api_versions.clone(),
            }),
            KustomizationProvider::new(git_cache.clone()),
            OverlayRenderer::new(),
            git_cache,
        );

        let state = AppState {
            service: Arc::new(service),
            metrics: Arc::new(Metrics::new()),
            request_timeout: config.request_timeout,
        };
        Ok(Self { config, state })
    }

    /// Serve until a shutdown signal arrives. Returns `true` for a clean
    /// drain, `false` when the grace period was exceeded.
    pub async fn run(self) -> eyre::Result<bool> {
        let address = self.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .wrap_err_with(|| format!("failed to bind '{address}'"))?;
        info!(
            application = %self.config.application_name,
            %address,
            "serving"
        );

        let router = web::build_router(self.state);

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining");
            let _ = shutdown_tx.send(true);
        });

        let mut drain_rx = shutdown_rx.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let mut rx = shutdown_rx;
            let _ = rx.wait_for(|stop| *stop).await;
        });

        tokio::select! {
            result = async move { server.await } => {
                result.wrap_err("server failed")?;
                Ok(true)
            }
            () = async {
                let _ = drain_rx.wait_for(|stop| *stop).await;
                tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
            } => {
                warn!("grace period exceeded, shutting down dirty");
                Ok(false)
            }
        }
    }
}

async fn build_cache(
    config: &ApplicationConfig,
    cache_name: &str,
) -> eyre::Result<Arc<dyn ByteCache>> {
    match config.synchronization_method {
        SynchronizationMethod::Memory => Ok(Arc::new(MemoryCache::new())),
        SynchronizationMethod::Redis => {
            let url = config
                .synchronization_redis_url
                .as_deref()
                .ok_or_else(|| eyre::eyre!("SYNCHRONIZATION_REDIS_URL is required for REDIS"))?;
            let cache = RedisCache::connect(
                url,
                config.synchronization_redis_password.as_deref(),
                cache_name,
            )
            .await
            .wrap_err_with(|| format!("failed to connect cache '{cache_name}'"))?;
            Ok(Arc::new(cache))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
