use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};
use wss_prototype::{
    DEFAULT_CONFIG_PATH, DEFAULT_SERVICE, init_tracing, load_config, parse_protocols,
};
use wss_rpc::WssAdapter;

/// Connect and print pushed events for the given resource schemes until the
/// session closes or ctrl-c.
///
/// Usage: `monitor <scheme>...`
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let schemes: Vec<String> = std::env::args().skip(1).collect();
    let path = std::env::var("WSS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let service = std::env::var("WSS_SERVICE").unwrap_or_else(|_| DEFAULT_SERVICE.to_string());
    let protocols = parse_protocols(&std::env::var("WSS_PROTOCOLS").unwrap_or_default());
    let remote = std::env::var("WSS_REMOTE").ok();

    let (closed_tx, mut closed) = mpsc::unbounded_channel();
    let mut config = load_config(&path)
        .with_context(|| format!("loading {path}"))?
        .with_on_error(|message| error!(%message, "Remote error"))
        .with_on_disconnect(&service, move |event| {
            let _ = closed_tx.send(event.clone());
        })?;

    for scheme in &schemes {
        let label = scheme.clone();
        config = config.with_subscription(&service, scheme.clone(), move |event| {
            println!("[{label}] {event}");
        })?;
    }

    let adapter = WssAdapter::websocket(config)?;
    let app = adapter.service(&service)?;
    app.connect(protocols, remote.as_deref()).await?;
    info!(service = %service, ?schemes, "Monitoring");

    tokio::select! {
        event = closed.recv() => {
            if let Some(event) = event {
                info!(code = event.code, reason = %event.reason, "Session closed by server");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            app.disconnect();
        }
    }
    Ok(())
}
