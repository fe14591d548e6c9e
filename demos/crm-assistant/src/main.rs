//! Interactive CRM assistant: reads queries from stdin, answers via the
//! orchestration loop. Lines starting with `{` are treated as raw service
//! requests (`tools/list`, `tools/call`).

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use fieldhand::host::service::ToolService;
use fieldhand::host::{Orchestrator, QueryScheduler};
use fieldhand::providers::{GeminiConfig, GeminiProvider};
use fieldhand::tools::crm::{HttpCrmConfig, HttpCrmConnector, crm_api_request_tool, crm_query_tool};
use fieldhand::tools::synthesis::{InterpreterSandbox, Synthesizer};
use fieldhand::tools::ToolRegistry;

const SYSTEM_INSTRUCTION: &str = "You are a CRM assistant. Use the available tools to \
     answer questions about accounts, contacts, and opportunities. Prefer crm_query for \
     reads. When no existing tool fits, author one with define_tool.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    info!("CRM assistant starting...");

    let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_owned());
    let provider = Arc::new(
        GeminiProvider::new(
            GeminiConfig::from_env(model).with_system_instruction(SYSTEM_INSTRUCTION),
        )
        .context("GEMINI_API_KEY must be set")?,
    );
    info!("provider ready");

    let registry = Arc::new(ToolRegistry::new());

    let crm_base = env::var("CRM_BASE_URL").context("CRM_BASE_URL must be set")?;
    let crm_token = env::var("CRM_TOKEN").context("CRM_TOKEN must be set")?;
    let connector = Arc::new(HttpCrmConnector::new(HttpCrmConfig::new(
        crm_base, crm_token,
    )?));
    registry.register(crm_query_tool(Arc::clone(&connector) as _)?);
    registry.register(crm_api_request_tool(connector as _)?);

    // Generated code runs through the interpreter with no isolation; only
    // enable this against a CRM you are willing to let the model touch.
    let synthesizer = Arc::new(Synthesizer::new(
        Arc::new(InterpreterSandbox::unsandboxed("python3")),
        Arc::clone(&registry),
    ));
    registry.register(synthesizer.define_tool()?);
    info!(tools = registry.len(), "registry ready");

    let orchestrator = Arc::new(Orchestrator::new(provider, Arc::clone(&registry)));
    let service = ToolService::new(registry);
    let scheduler = QueryScheduler::default();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let query = line.trim();
        if query.is_empty() {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            continue;
        }
        if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
            break;
        }

        let reply = if query.starts_with('{') {
            service.handle_json(query).await
        } else {
            let orchestrator = Arc::clone(&orchestrator);
            let query = query.to_owned();
            scheduler
                .spawn(async move { orchestrator.process_query(&query).await })?
                .await?
        };

        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;
    }

    scheduler.close();
    info!("CRM assistant shutting down");
    Ok(())
}
