use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::time::Duration;
use turbotrapd::config::{Args, Config};
use turbotrapd::context::AppContext;
use turbotrapd::routes;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load(&args)?;

    let ctx = AppContext::bootstrap(&config).await?;
    let app = routes::router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("[turbotrapd] observability API on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("[turbotrapd] draining incident queues");
    ctx.bus
        .shutdown(Duration::from_secs(config.shutdown_grace_secs))
        .await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("[turbotrapd] shutdown signal received");
}
