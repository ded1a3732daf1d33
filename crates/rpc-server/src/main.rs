use cardtrust::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

mod rpc;

use rpc::{create_error_response, RpcRequest, RpcResponse, ServerState, PARSE_ERROR, SERVER_ERROR};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ENV_FILE_VAR: &str = "CARDTRUST_ENV_FILE";

fn load_config() -> VerifierConfig {
    let loaded = match std::env::var(ENV_FILE_VAR) {
        Ok(path) if !path.trim().is_empty() => VerifierConfig::from_env_file(path.trim()),
        _ => VerifierConfig::from_env(),
    };
    match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, suggestion = ?e.suggestion(), "invalid configuration, using defaults");
            VerifierConfig::default()
        }
    }
}

fn build_state(config: &VerifierConfig) -> ServerState {
    let connectivity = Arc::new(ConnectivityFlag::new(true));
    match VerificationOrchestrator::from_config(config, connectivity.clone()) {
        Ok(orchestrator) => {
            info!(backend = %config.backend_base_url, "backend verification enabled");
            ServerState::new(orchestrator, connectivity, config.scan_page_limit)
        }
        Err(e) => {
            warn!(error = %e, "backend unavailable, running offline only");
            ServerState::offline(config)
        }
    }
}

async fn send(stdout: &mut Stdout, response: &RpcResponse) {
    let resp_str = serde_json::to_string(response).unwrap_or_else(|e| {
        error!(id = ?response.id, "Failed to serialize response: {}", e);
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"Internal Server Error"}}"#
            .to_string()
    });
    if let Err(e) = stdout.write_all(format!("{}\r\n", resp_str).as_bytes()).await {
        error!("Failed to write response for ID {:?}: {}", response.id, e);
    } else if let Err(e) = stdout.flush().await {
        error!("Failed to flush stdout for ID {:?}: {}", response.id, e);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting cardtrust RPC server on stdio...");
    let config = load_config();
    let state = build_state(&config);

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line_buffer = String::new();

    let ready_msg =
        json!({"jsonrpc": "2.0", "method": "server/ready", "params": {"status": "ready"}});
    info!("Sending server/ready notification.");
    if let Err(e) = stdout
        .write_all(format!("{}\r\n", ready_msg).as_bytes())
        .await
    {
        error!("Fatal: Failed to write ready message: {}", e);
        return;
    }
    if let Err(e) = stdout.flush().await {
        error!("Fatal: Failed to flush after ready message: {}", e);
        return;
    }

    loop {
        line_buffer.clear();
        match reader.read_line(&mut line_buffer).await {
            Ok(0) => {
                info!("Stdin closed (EOF). Exiting server.");
                break;
            }
            Ok(_) => {
                let trimmed_line = line_buffer.trim();
                if trimmed_line.is_empty() || !trimmed_line.starts_with('{') {
                    if !trimmed_line.is_empty() {
                        warn!("Received non-JSON input line, ignoring.");
                    }
                    continue;
                }
                debug!("<<< Received raw line ({} bytes)", trimmed_line.len());

                let parsed_json: Value = match serde_json::from_str(trimmed_line) {
                    Ok(v) => v,
                    Err(e) => {
                        let resp = create_error_response(
                            Value::Null,
                            PARSE_ERROR,
                            format!("Parse error: {}", e),
                        );
                        send(&mut stdout, &resp).await;
                        continue;
                    }
                };

                // Notifications get no response
                if parsed_json.get("id").map_or(true, Value::is_null) {
                    match parsed_json.get("method").and_then(Value::as_str) {
                        Some(method) => info!("Received notification: {}", method),
                        None => warn!("Received notification without method field"),
                    }
                    continue;
                }

                let id = parsed_json.get("id").cloned().unwrap_or(Value::Null);
                let req: RpcRequest = match serde_json::from_value(parsed_json) {
                    Ok(r) => r,
                    Err(e) => {
                        let resp =
                            create_error_response(id, PARSE_ERROR, format!("Parse error: {}", e));
                        send(&mut stdout, &resp).await;
                        continue;
                    }
                };

                let request_id = req.id.clone();
                let request_method = req.method.clone();
                match tokio::time::timeout(REQUEST_TIMEOUT, state.process_request(req)).await {
                    Ok(response) => send(&mut stdout, &response).await,
                    Err(_) => {
                        error!(
                            "Request processing timed out after {:?} for Method '{}', ID {:?}",
                            REQUEST_TIMEOUT, request_method, request_id
                        );
                        let resp = create_error_response(
                            request_id,
                            SERVER_ERROR,
                            format!("Request timed out for method '{}'", request_method),
                        );
                        send(&mut stdout, &resp).await;
                    }
                }
            }
            Err(e) => {
                error!("Error reading from stdin: {}. Exiting.", e);
                break;
            }
        }
    }
    info!("cardtrust RPC server shutting down.");
}
