use std::sync::Arc;

use log::info;
use tokio::{select, signal};
use tokio_context::context::RefContext;

use FirmwareLink::config::Config;
use FirmwareLink::session::receiver::start_upgrade_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = Arc::new(Config::default());
    let (ctx, ctx_handler) = RefContext::new();
    let server_handler = start_upgrade_server(ctx, cfg)?;

    shutdown_signal().await;
    ctx_handler.cancel();
    server_handler.await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Got Ctrl+C signal shutdown program")
    };
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("Recv terminate signal shutdown program")
    };

    select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
