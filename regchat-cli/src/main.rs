//! regchat-cli — terminal client for the Regchat HTTP API
//!
//! # Subcommands
//! - `chat <message> [--session <id>]` — ask a question; a new session id is
//!   generated and printed when none is given
//! - `clear --session <id>`             — forget a session's history
//! - `status`                           — show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "regchat-cli",
    version,
    about = "Ask the Turkish fintech regulation assistant from the terminal"
)]
struct Cli {
    /// Regchat HTTP server URL (overrides REGCHAT_HTTP_URL env var)
    #[arg(long, env = "REGCHAT_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send one message and print the reply
    Chat {
        /// Question to ask
        message: String,

        /// Session to continue (a fresh one is created if omitted)
        #[arg(short, long, env = "REGCHAT_SESSION")]
        session: Option<String>,
    },

    /// Clear the stored history of a session
    Clear {
        #[arg(short, long, env = "REGCHAT_SESSION")]
        session: String,
    },

    /// Show Regchat server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// Body of `/chat` and `/clear_memory`: `{response}` on success, `{error}` otherwise.
#[derive(Debug, Deserialize, Default)]
pub struct ApiBody {
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Pick the user-facing text out of an API reply.
pub fn reply_text(status: u16, body: &ApiBody) -> Result<String, String> {
    match (&body.response, &body.error) {
        (Some(response), _) if (200..300).contains(&status) => Ok(response.clone()),
        (_, Some(error)) => Err(format!("server returned {}: {}", status, error)),
        (Some(response), None) => Err(format!("server returned {}: {}", status, response)),
        (None, None) => Err(format!("server returned {} with no message", status)),
    }
}

pub fn chat_body(message: &str, session: &str) -> serde_json::Value {
    serde_json::json!({
        "message": message,
        "session_id": session,
    })
}

pub fn status_lines(body: &serde_json::Value) -> Vec<String> {
    vec![
        format!("Regchat server: {}", body["status"].as_str().unwrap_or("unknown")),
        format!("Version:        {}", body["version"].as_str().unwrap_or("?")),
        format!("Store:          {}", body["store"].as_str().unwrap_or("?")),
    ]
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn post(server: &str, path: &str, body: serde_json::Value) -> anyhow::Result<String> {
    let url = format!("{}{}", server, path);
    let resp = match client(120)?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("regchat-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status().as_u16();
    let body: ApiBody = resp.json().unwrap_or_default();
    reply_text(status, &body).map_err(anyhow::Error::msg)
}

fn do_chat(server: &str, message: &str, session: Option<String>) -> anyhow::Result<()> {
    let session = session.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().to_string();
        eprintln!("Session: {} (pass --session {} to continue)", id, id);
        id
    });

    let reply = post(server, "/chat", chat_body(message, &session))?;
    println!("{}", reply);
    Ok(())
}

fn do_clear(server: &str, session: &str) -> anyhow::Result<()> {
    let reply = post(
        server,
        "/clear_memory",
        serde_json::json!({ "session_id": session }),
    )?;
    println!("{}", reply);
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);

    match client(10)?.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            for line in status_lines(&body) {
                println!("{}", line);
            }
        }
        Ok(r) => {
            let status = r.status();
            let body: serde_json::Value = r.json().unwrap_or_default();
            eprintln!(
                "regchat-cli: server unhealthy (HTTP {}): {}",
                status,
                body["error"].as_str().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("regchat-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Chat { message, session } => do_chat(&server, &message, session),
        Commands::Clear { session } => do_clear(&server, &session),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("regchat-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
