use std::process::ExitCode;

use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;

use synergysphere_client::api::auth::{
    token_subject, KeychainTokenStore, MemoryTokenStore, TokenStore,
};
use synergysphere_client::{ApiRequest, AppState, Config, FormPayload};

#[derive(Parser, Debug)]
#[command(name = "synergysphere", version, about = "SynergySphere API client")]
struct Cli {
    /// Keep tokens in memory for this run instead of the system keychain
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Access token to seed the in-memory store (implies --ephemeral)
    #[arg(long, global = true, env = "SYNERGYSPHERE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a request and print the JSON response
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Server-relative endpoint, e.g. /projects
        endpoint: String,
        /// JSON request body
        #[arg(long, conflicts_with = "form")]
        json: Option<String>,
        /// Multipart field as NAME=VALUE, or NAME=@PATH to attach a file
        #[arg(long, value_name = "NAME=VALUE")]
        form: Vec<String>,
        /// Loading key to report while the request is in flight
        #[arg(long)]
        loading_key: Option<String>,
    },
    /// Manage stored credentials
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Print the subject of the stored access token
    Whoami,
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store an access token (and optionally a refresh token)
    Set {
        access: String,
        #[arg(long)]
        refresh: Option<String>,
    },
    /// Remove stored tokens
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(ref url) = cli.api_url {
        config = config.with_base_url(url);
    }
    log::info!(
        "SynergySphere client ({} environment, {})",
        config.environment,
        config.base_url
    );

    let result = if cli.ephemeral || cli.token.is_some() {
        let store = MemoryTokenStore::with_tokens(cli.token.as_deref(), None);
        run(AppState::new(config, store), cli.command).await
    } else {
        run(AppState::new(config, KeychainTokenStore::default()), cli.command).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run<S: TokenStore>(
    state: AppState<S>,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Request {
            method,
            endpoint,
            json,
            form,
            loading_key,
        } => {
            let mut request = build_request(&method, endpoint)?;
            if let Some(raw) = json {
                let body: Value = serde_json::from_str(&raw)?;
                request = request.with_json(body);
            } else if !form.is_empty() {
                request = request.with_form(parse_form(&form)?);
            }
            let subscription = loading_key.map(|key| {
                let label = key.clone();
                let sub = state
                    .loading
                    .subscribe(&key, move |loading| log::debug!("loading[{}] -> {}", label, loading));
                request.loading_key = Some(key);
                sub
            });

            let response = state.api.request(&request).await;
            if let Some(sub) = subscription {
                sub.unsubscribe();
            }
            if !state.connectivity.is_online() {
                log::warn!("Server unreachable at {}", state.config.base_url);
            }
            println!("{}", serde_json::to_string_pretty(&response?)?);
        }
        Command::Token { action } => match action {
            TokenAction::Set { access, refresh } => {
                state.tokens.store_access_token(&access)?;
                if let Some(ref r) = refresh {
                    state.tokens.store_refresh_token(r)?;
                }
                log::info!("Tokens stored");
            }
            TokenAction::Clear => {
                state.clear_session()?;
                log::info!("Tokens cleared");
            }
        },
        Command::Whoami => {
            let token = state
                .tokens
                .access_token()?
                .ok_or("No access token stored")?;
            println!("{}", token_subject(&token)?);
        }
    }
    Ok(())
}

/// Map a method name to a request; names are case-insensitive.
fn build_request(method: &str, endpoint: String) -> Result<ApiRequest, Box<dyn std::error::Error>> {
    let request = match method.to_ascii_uppercase().as_str() {
        "GET" => ApiRequest::get(endpoint),
        "POST" => ApiRequest::post(endpoint),
        "PUT" => ApiRequest::put(endpoint),
        "PATCH" => ApiRequest::patch(endpoint),
        "DELETE" => ApiRequest::delete(endpoint),
        other => ApiRequest::new(other.parse::<Method>()?, endpoint),
    };
    Ok(request)
}

/// Parse `NAME=VALUE` / `NAME=@PATH` pairs into a multipart payload.
fn parse_form(fields: &[String]) -> Result<FormPayload, Box<dyn std::error::Error>> {
    let mut form = FormPayload::new();
    for field in fields {
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| format!("Form field '{}' must be NAME=VALUE", field))?;
        form = match value.strip_prefix('@') {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
                let file_name = std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                form.file(name, bytes, file_name, None)
            }
            None => form.text(name, value),
        };
    }
    Ok(form)
}
