use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::error;
use wss_prototype::{
    DEFAULT_CONFIG_PATH, DEFAULT_SERVICE, init_tracing, load_config, parse_protocols,
};
use wss_rpc::WssAdapter;

/// Connect, issue one call, print the reply, disconnect.
///
/// Usage: `call <method> [params-json]`
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info,wss_rpc=debug");

    let mut args = std::env::args().skip(1);
    let Some(method) = args.next() else {
        bail!("usage: call <method> [params-json]");
    };
    let params: Value = match args.next() {
        Some(raw) => serde_json::from_str(&raw).context("params must be a JSON object")?,
        None => Value::Null,
    };

    let path = std::env::var("WSS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let service = std::env::var("WSS_SERVICE").unwrap_or_else(|_| DEFAULT_SERVICE.to_string());
    let protocols = parse_protocols(&std::env::var("WSS_PROTOCOLS").unwrap_or_default());
    let remote = std::env::var("WSS_REMOTE").ok();

    let config = load_config(&path)
        .with_context(|| format!("loading {path}"))?
        .with_on_error(|message| error!(%message, "Remote error"));
    let adapter = WssAdapter::websocket(config)?;
    let app = adapter.service(&service)?;

    let handshake = app.connect(protocols, remote.as_deref()).await?;
    println!("connected to {service}: {handshake}");

    let result = app.call(&method, params).await;
    app.disconnect();

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
