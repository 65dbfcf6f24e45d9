use eyre::Context;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use youtube_stats::server::{self, AppState};
use youtube_stats::{Config, Services, background};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // a missing .env is fine; the environment may be set some other way
    let dotenv = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stdout().is_terminal())
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) => tracing::debug!("no .env loaded: {e}"),
    }

    let config = Arc::new(Config::from_env().context("load configuration")?);
    config.create_dirs()?;

    let services = Arc::new(Services::new(Arc::clone(&config)).context("set up services")?);

    let refresh_task = config
        .retention_refresh_interval
        .map(|period| background::spawn_retention_refresh_task(Arc::clone(&services), period));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind to {}", config.bind_addr))?;
    let state = Arc::new(AppState::new(services));

    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    if let Some(task) = refresh_task {
        task.abort();
    }
    Ok(())
}
