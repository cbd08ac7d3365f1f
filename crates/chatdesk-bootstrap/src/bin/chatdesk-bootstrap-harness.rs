#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chatdesk_bootstrap::{
    BootstrapConfig, BootstrapDeps, BootstrapDriver, BootstrapOrchestrator, init_tracing,
};
use chatdesk_client_core::{HeadlessPage, JsonFileStore, Page, PageEvent};
use chatdesk_control_client::ControlClient;
use chrono::Utc;
use clap::Parser;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Runs one bootstrap cycle against a live control backend from the terminal.
#[derive(Parser, Debug)]
struct Args {
    /// Control backend base URL. Defaults to CHATDESK_CONTROL_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,
    /// Page address the cycle starts on, e.g. `http://localhost:3000/en?code=...`.
    #[arg(long, default_value = "http://127.0.0.1:3000/")]
    page_url: String,
    /// Client store file shared across runs.
    #[arg(long, default_value = ".chatdesk/client-store.v1.json")]
    store: PathBuf,
    /// Cookies visible to the page, as a `Cookie` header (`authToken=...; theme=dark`).
    #[arg(long, value_name = "COOKIES")]
    cookie_header: Option<String>,
    /// Stop after this long and report whatever the cycle reached.
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
    /// Emit logs as JSON lines on stderr.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = BootstrapConfig::from_env().context("load bootstrap config")?;
    if let Some(base_url) = args.base_url.as_deref() {
        config = config
            .with_control_base_url(base_url)
            .context("apply --base-url")?;
    }
    init_tracing(&config.log_filter, args.json_logs);

    let run_id = uuid::Uuid::now_v7();
    tracing::info!(
        target: "chatdesk.bootstrap",
        run_id = %run_id,
        base_url = %config.control_base_url,
        base_url_source = config.control_base_url_source,
        store = %args.store.display(),
        "starting bootstrap harness",
    );

    let page = Arc::new(
        HeadlessPage::new(&args.page_url)
            .with_cookie_header(args.cookie_header.as_deref().unwrap_or_default()),
    );
    let store = Arc::new(JsonFileStore::open(args.store.clone()));
    let client = Arc::new(
        ControlClient::new(config.control_client_config()).context("build control client")?,
    );

    let orchestrator = Arc::new(BootstrapOrchestrator::new(
        &config,
        BootstrapDeps::with_control_client(client, page.clone(), store),
    ));
    let (trigger_tx, trigger_rx) = mpsc::channel(16);
    drop(trigger_tx);

    let report = BootstrapDriver::new(orchestrator.clone(), config.trigger_poll_interval)
        .with_deadline(Duration::from_millis(args.timeout_ms))
        .run(trigger_rx)
        .await;

    let output = json!({
        "run_id": run_id.to_string(),
        "completed_at": Utc::now().to_rfc3339(),
        "report": report,
        "flags": orchestrator.flags(),
        "selected_workspace": orchestrator.state().selected_workspace(),
        "chat_settings": orchestrator.state().chat_settings(),
        "page": {
            "location": page.location().to_relative(),
            "events": page.events().iter().map(page_event_json).collect::<Vec<_>>(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn page_event_json(event: &PageEvent) -> Value {
    match event {
        PageEvent::Replaced(target) => json!({"kind": "replaced", "target": target}),
        PageEvent::Navigated(target) => json!({"kind": "navigated", "target": target}),
        PageEvent::External(url) => json!({"kind": "external", "target": url}),
        PageEvent::Reloaded => json!({"kind": "reloaded"}),
    }
}
