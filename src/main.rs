use anyhow::{anyhow, Context};
use clap::Parser;
use wsrelay::config::{Cli, Settings};
use wsrelay::methods::default_registry;
use wsrelay::{DiagnosticMode, RelayServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::resolve(Cli::parse()).context("invalid configuration")?;

    let _telemetry = wsrelay_core::init_observability(settings.observability_config())
        .map_err(|e| anyhow!("failed to initialize observability: {}", e))?;

    if settings.diagnostics == DiagnosticMode::Full {
        tracing::warn!(
            "Error replies carry full diagnostics; use --redact-diagnostics when clients are untrusted"
        );
    }

    let mut builder = RelayServer::builder()
        .bind(settings.gateway_addr())
        .backend(settings.backend_addr())
        .http(settings.http_addr())
        .dispatcher(default_registry())
        .diagnostics(settings.diagnostics)
        .metrics("wsrelay");

    if let Some(template) = settings.load_index_template()? {
        builder = builder.index_template(template);
    }
    if let Some(ref dir) = settings.static_dir {
        builder = builder.static_dir(dir.clone());
    }

    let server = builder.build().await.context("failed to start listeners")?;

    tracing::info!(
        http = %settings.http_addr(),
        gateway = %settings.gateway_addr(),
        backend = %settings.backend_addr(),
        "wsrelay ready"
    );

    tokio::select! {
        result = server.run() => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C, exiting"),
    }

    Ok(())
}
