use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Context as _, Result};
use script_proxy::{ExecutionProxy, ProxyConfig, ScriptSource, TracingEmbedder};
use tracing_subscriber::EnvFilter;
use url::Url;

fn main() -> Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let mut args = std::env::args().skip(1);
    let script_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: script-proxy <script.js> [document-url]"))?;
    let raw_url = args
        .next()
        .unwrap_or_else(|| String::from("https://example.com/"));
    let url = Url::parse(&raw_url).with_context(|| format!("invalid document URL {raw_url}"))?;

    let config_path = std::env::var("SCRIPT_PROXY_CONFIG").ok().map(PathBuf::from);
    let config = ProxyConfig::load(config_path).context("failed to load proxy configuration")?;

    let code = std::fs::read_to_string(&script_path)
        .with_context(|| format!("failed to read {}", script_path.display()))?;

    let proxy = ExecutionProxy::new(config, Rc::new(TracingEmbedder))
        .map_err(|err| anyhow!("failed to start script engine: {err}"))?;
    let frame = proxy.create_frame(url, None);
    let source = ScriptSource::with_url(code, script_path.display().to_string(), 1);
    let value = proxy
        .evaluate(&frame, &source, None)
        .map_err(|fault| anyhow!("{fault}"))?;
    println!("{value}");

    proxy.disconnect_frame(&frame);
    Ok(())
}
