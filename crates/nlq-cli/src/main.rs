//! nlq command line
//!
//! Exit codes: 0 success, 1 configuration error, 2 transient failure,
//! 3 safety-refused.

use clap::{Parser, Subcommand};
use nlq_core::GatewayConfig;
use nlq_core::error::ErrorKind;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_CONFIG: u8 = 1;
const EXIT_TRANSIENT: u8 = 2;
const EXIT_REFUSED: u8 = 3;

#[derive(Parser)]
#[command(name = "nlq", about = "Natural-language query gateway", version)]
struct Cli {
    /// Path to nlq.toml (searched upward from the cwd when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the gateway server
    Run,

    /// Register a database with a running gateway
    RegisterDb {
        #[arg(long)]
        name: String,

        #[arg(long)]
        uri: String,

        #[arg(long, default_value = "postgres")]
        dialect: String,

        /// Base URL of the running gateway
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },

    /// Validate and execute SQL against a running gateway
    Query {
        #[arg(long)]
        db: Option<String>,

        #[arg(long)]
        sql: String,

        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => run(cli.config).await,
        Command::RegisterDb {
            name,
            uri,
            dialect,
            server,
        } => register_db(&server, &name, &uri, &dialect).await,
        Command::Query { db, sql, server } => query(&server, db.as_deref(), &sql).await,
    }
}

async fn run(config_path: Option<PathBuf>) -> ExitCode {
    let config = match GatewayConfig::load_from(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    nlq_telemetry::init_telemetry(&config.observability);

    let gateway = match nlq_server::Gateway::from_config(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match nlq_server::serve(gateway).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("server error: {e}");
            ExitCode::from(EXIT_TRANSIENT)
        }
    }
}

async fn register_db(server: &str, name: &str, uri: &str, dialect: &str) -> ExitCode {
    let body = serde_json::json!({
        "name": name,
        "dialect": dialect,
        "uri": uri,
    });

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/databases", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await;

    match response {
        Ok(response) if response.status().is_success() => {
            println!("registered database '{name}'");
            ExitCode::SUCCESS
        }
        Ok(response) => {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            eprintln!("registration failed ({status}): {text}");
            if status.is_client_error() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_TRANSIENT)
            }
        }
        Err(e) => {
            eprintln!("could not reach gateway: {}", e.without_url());
            ExitCode::from(EXIT_TRANSIENT)
        }
    }
}

async fn query(server: &str, db: Option<&str>, sql: &str) -> ExitCode {
    let body = serde_json::json!({
        "database": db,
        "sql": sql,
    });

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/sql", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            eprintln!("could not reach gateway: {}", e.without_url());
            return ExitCode::from(EXIT_TRANSIENT);
        }
    };

    let payload: serde_json::Value = match response.json().await {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("malformed gateway response: {e}");
            return ExitCode::from(EXIT_TRANSIENT);
        }
    };

    println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());

    if payload["success"].as_bool().unwrap_or(false) {
        return ExitCode::SUCCESS;
    }

    let kind = payload["error"]["kind"].as_str().unwrap_or("internal_error");
    ExitCode::from(exit_code_for(kind))
}

fn exit_code_for(kind: &str) -> u8 {
    let safety = [
        ErrorKind::ParseError,
        ErrorKind::NotReadonly,
        ErrorKind::BlockedFunction,
        ErrorKind::DisallowedIdentifier,
        ErrorKind::MultipleStatements,
        ErrorKind::EmptyStatement,
        ErrorKind::UnsafeSql,
    ];
    if safety.iter().any(|k| k.as_str() == kind) {
        return EXIT_REFUSED;
    }

    match kind {
        "config_error" | "invalid_request" | "unknown_db" => EXIT_CONFIG,
        _ => EXIT_TRANSIENT,
    }
}
