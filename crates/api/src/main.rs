use std::sync::Arc;

use anyhow::Context;

use closet_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    closet_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    if config.jwt_secret_is_default {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let services = Arc::new(
        closet_api::app::build_services(&config)
            .await
            .context("failed to wire services")?,
    );
    let worker = services.spawn_worker();
    let app = closet_api::app::router(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    if let Some(worker) = worker {
        let stats = worker.stats();
        worker.shutdown().await;
        tracing::info!(?stats, "ai worker stopped");
    }

    Ok(())
}
