//! dropdesk — operator CLI for the Dropdesk agent API
//!
//! Drives connection controllers against a running `dropdesk-server`.
//!
//! # Subcommands
//! - `status`                              — show server health
//! - `agents [--json]`                     — list agent sessions
//! - `connect <agent>`                     — lock an agent and leave it held
//! - `disconnect <agent>`                  — release an agent (idempotent)
//! - `send <agent> <message> [--context]`  — connect, send one message, release
//! - `chat <agent>`                        — interactive session on stdin

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dropdesk_core::api::AgentDetail;
use dropdesk_core::{
    AgentSession, AgentTransport, AgentType, ConnectionController, ConnectionState, ControllerSet,
    ControllerSnapshot, HttpTransport, RetryPolicy,
};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8790";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "dropdesk", version, about = "Dropdesk agent sessions from the command line")]
struct Cli {
    /// Dropdesk HTTP server URL (overrides DROPDESK_HTTP_URL env var)
    #[arg(long, env = "DROPDESK_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Initial backoff between connection attempts, in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show Dropdesk server status
    Status,

    /// List agent sessions
    Agents {
        /// Print the raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one agent with its metrics
    Show {
        /// Agent type, e.g. customer-service
        agent: AgentType,
    },

    /// Lock an agent (AVAILABLE → BUSY) and leave it held
    Connect { agent: AgentType },

    /// Release an agent regardless of who holds it
    Disconnect { agent: AgentType },

    /// Connect, send one message, then release
    Send {
        agent: AgentType,

        message: String,

        /// JSON object passed to the agent as context
        #[arg(long)]
        context: Option<String>,
    },

    /// Interactive session; /retry, /history and /quit are commands
    Chat { agent: AgentType },
}

#[derive(Debug, Deserialize)]
struct AgentList {
    agents: Vec<AgentSession>,
}

// ============================================================================
// Formatting
// ============================================================================

pub fn format_agent_row(agent: &AgentSession) -> String {
    format!(
        "{:<22} {:<10} {:<10} {}",
        agent.agent_type.as_str(),
        agent.department.as_str(),
        agent.status.as_str(),
        agent.last_active.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn format_snapshot(snap: &ControllerSnapshot) -> String {
    match &snap.state {
        ConnectionState::Error(e) => format!("{}: ERROR ({})", snap.agent_type, e),
        state => format!("{}: {}", snap.agent_type, state),
    }
}

/// Parse a `--context` argument. Must be a JSON object.
pub fn parse_context(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        anyhow::bail!("--context must be a JSON object");
    }
    Ok(Some(value))
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

async fn get_json(server: &str, path: &str) -> anyhow::Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = format!("{}{}", server, path);
    let resp = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("dropdesk: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    if !status.is_success() {
        eprintln!(
            "dropdesk: server returned {}: {}",
            status,
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
    Ok(body)
}

async fn do_status(server: &str) -> anyhow::Result<()> {
    let body = get_json(server, "/health").await?;
    println!("Dropdesk server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:           {}", body["store"].as_str().unwrap_or("?"));
    println!("Detail:          {}", body["detail"].as_str().unwrap_or("?"));
    Ok(())
}

async fn do_agents(server: &str, json: bool) -> anyhow::Result<()> {
    let body = get_json(server, "/agents").await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let list: AgentList = serde_json::from_value(body)?;
    println!("{:<22} {:<10} {:<10} LAST ACTIVE", "AGENT", "DEPT", "STATUS");
    for agent in &list.agents {
        println!("{}", format_agent_row(agent));
    }
    Ok(())
}

async fn do_show(server: &str, agent: AgentType) -> anyhow::Result<()> {
    let body = get_json(server, &format!("/agents/{}", agent.as_str())).await?;
    let detail: AgentDetail = serde_json::from_value(body)?;
    println!("{}", format_agent_row(&detail.agent));
    println!("Capabilities: {}", detail.agent.capabilities.join(", "));
    println!("Interactions: {}", detail.metrics.interaction_count);
    println!("Avg latency:  {:.0} ms", detail.average_latency_ms);
    println!("Error rate:   {:.1}%", detail.error_rate * 100.0);
    Ok(())
}

// ============================================================================
// Controller-driven commands
// ============================================================================

/// Connect and report; exits non-zero when the controller ends in Error.
async fn connect_or_exit(ctl: &ConnectionController) -> ConnectionState {
    let state = ctl.connect().await;
    if let ConnectionState::Error(e) = &state {
        eprintln!("dropdesk: connect {} failed: {}", ctl.agent_type(), e);
        std::process::exit(1);
    }
    state
}

async fn do_connect(set: &ControllerSet, agent: AgentType) -> anyhow::Result<()> {
    let ctl = set.get(agent);
    connect_or_exit(&ctl).await;
    println!("{}", format_snapshot(&ctl.snapshot()));
    Ok(())
}

async fn do_disconnect(transport: &dyn AgentTransport, agent: AgentType) -> anyhow::Result<()> {
    // A fresh process has no controller state to disconnect from, so this
    // goes straight to the transport.
    transport.disconnect(agent).await?;
    println!("{}: released", agent);
    Ok(())
}

async fn do_send(
    set: &ControllerSet,
    agent: AgentType,
    message: &str,
    context: Option<serde_json::Value>,
) -> anyhow::Result<()> {
    let ctl = set.get(agent);
    connect_or_exit(&ctl).await;

    let result = ctl.send_message(message, context).await;
    ctl.disconnect().await;

    let reply = result?;
    println!("{}", reply.response);
    tracing::debug!(latency_ms = reply.metadata.latency_ms, model = %reply.metadata.model, "Reply received");
    Ok(())
}

async fn do_chat(set: &ControllerSet, agent: AgentType) -> anyhow::Result<()> {
    let ctl = set.get(agent);
    connect_or_exit(&ctl).await;
    eprintln!("Connected to {}. /retry, /history, /quit", agent.display_name());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" => break,
            "/history" => {
                for record in ctl.history() {
                    println!("> {}\n{}\n", record.message, record.response);
                }
            }
            "/retry" => {
                let state = ctl.retry().await;
                eprintln!("{}", format_snapshot(&ctl.snapshot()));
                if !state.is_connected() {
                    break;
                }
            }
            message => match ctl.send_message(message, None).await {
                Ok(reply) => println!("{}\n", reply.response),
                Err(e) => eprintln!("dropdesk: {} (use /retry)", e),
            },
        }
    }

    ctl.disconnect().await;
    eprintln!("{}", format_snapshot(&ctl.snapshot()));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let server = cli.server.trim_end_matches('/').to_string();
    let policy = RetryPolicy {
        max_attempts: cli.attempts,
        base_delay_ms: cli.base_delay_ms,
        ..RetryPolicy::default()
    };

    let transport: Arc<dyn AgentTransport> =
        match HttpTransport::new(server.clone(), Duration::from_secs(60)) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                eprintln!("dropdesk: {}", e);
                std::process::exit(1);
            }
        };
    let set = ControllerSet::new(transport.clone(), policy);

    let result = match cli.command {
        Commands::Status => do_status(&server).await,
        Commands::Agents { json } => do_agents(&server, json).await,
        Commands::Show { agent } => do_show(&server, agent).await,
        Commands::Connect { agent } => do_connect(&set, agent).await,
        Commands::Disconnect { agent } => do_disconnect(transport.as_ref(), agent).await,
        Commands::Send {
            agent,
            message,
            context,
        } => match parse_context(context.as_deref()) {
            Ok(ctx) => do_send(&set, agent, &message, ctx).await,
            Err(e) => Err(e),
        },
        Commands::Chat { agent } => do_chat(&set, agent).await,
    };

    set.shutdown_all();

    if let Err(e) = result {
        eprintln!("dropdesk: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropdesk_core::{AgentError, SessionStatus};

    fn session(agent_type: AgentType, status: SessionStatus) -> AgentSession {
        let mut s = AgentSession::new(agent_type, agent_type.display_name(), vec![]);
        s.status = status;
        s
    }

    // ========================================================================
    // TEST 1: agent rows are column-aligned
    // ========================================================================
    #[test]
    fn test_agent_row_columns() {
        let row = format_agent_row(&session(AgentType::CustomerService, SessionStatus::Busy));
        assert!(row.starts_with("CUSTOMER_SERVICE       OPERATIONS BUSY"));

        let other = format_agent_row(&session(AgentType::Marketing, SessionStatus::Available));
        assert_eq!(row.find("BUSY"), other.find("AVAILABLE"), "status column must line up");
    }

    // ========================================================================
    // TEST 2: snapshot formatting includes the error text
    // ========================================================================
    #[test]
    fn test_snapshot_format_shows_error() {
        let snap = ControllerSnapshot {
            agent_type: AgentType::Marketing,
            state: ConnectionState::Error(AgentError::not_found(AgentType::Marketing)),
            session: None,
            retry_count: 0,
            last_error: None,
            last_active: None,
        };
        assert_eq!(
            format_snapshot(&snap),
            "MARKETING: ERROR (No agent session for MARKETING)"
        );
    }

    // ========================================================================
    // TEST 3: --context must be a JSON object
    // ========================================================================
    #[test]
    fn test_parse_context() {
        assert!(parse_context(None).unwrap().is_none());
        let ctx = parse_context(Some(r#"{"orderId": "A-1001"}"#)).unwrap().unwrap();
        assert_eq!(ctx["orderId"], "A-1001");
        assert!(parse_context(Some("[1,2]")).is_err());
        assert!(parse_context(Some("not json")).is_err());
    }

    // ========================================================================
    // TEST 4: agent arguments accept kebab case
    // ========================================================================
    #[test]
    fn test_cli_parses_agent_type() {
        let cli = Cli::try_parse_from(["dropdesk", "send", "customer-service", "hi"]).unwrap();
        match cli.command {
            Commands::Send { agent, message, context } => {
                assert_eq!(agent, AgentType::CustomerService);
                assert_eq!(message, "hi");
                assert!(context.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["dropdesk", "connect", "janitor"]).is_err());
    }
}
