/// HTTP API: health checks, Prometheus metrics and read-only prayer data
/// (`/times`, `/next`, `/night`) for dashboards and home automation.

use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::format::describe_night_status;
use crate::state::{AppState, RefreshStatus};

/// Timeout for reading HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const NOT_LOADED: &str = r#"{"error":"prayer times not loaded"}"#;

/// Status line, content type and body of one response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    fn serialized<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::json(200, body),
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                Self::json(500, r#"{"error":"internal error"}"#.to_string())
            }
        }
    }

    fn not_loaded() -> Self {
        Self::json(503, NOT_LOADED.to_string())
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// Bind on all interfaces and serve until cancelled
pub async fn run_server(port: u16, state: Arc<AppState>, cancel_token: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind HTTP API on port {}: {}", port, e);
            return;
        }
    };

    info!("HTTP API listening on http://0.0.0.0:{}/", port);
    serve(listener, state, cancel_token).await;
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>, cancel_token: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&mut socket, &state).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("HTTP API shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(socket: &mut TcpStream, state: &AppState) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];

    let n = match timeout(REQUEST_TIMEOUT, socket.read(&mut buf)).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let response = route(path, state);
    socket.write_all(response.to_http().as_bytes()).await?;
    socket.flush().await?;

    Ok(())
}

/// Dispatch on the request path; query strings are ignored
pub fn route(path: &str, state: &AppState) -> Response {
    let path = path.split('?').next().unwrap_or(path);
    let now = Utc::now();

    match path.trim_end_matches('/') {
        "/health" | "/healthz" => Response::json(200, health_body(&state.status())),
        "/ready" | "/readyz" => {
            if state.is_ready() {
                Response::json(200, r#"{"ready":true}"#.to_string())
            } else {
                Response::json(503, r#"{"ready":false}"#.to_string())
            }
        }
        "/metrics" => Response {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body: metrics_body(&state.status(), state.loaded_date().is_some()),
        },
        "/times" => match state.today() {
            Some(today) => Response::serialized(&today),
            None => Response::not_loaded(),
        },
        "/next" => match state.overview(now) {
            Some(view) => Response::serialized(&view),
            None => Response::not_loaded(),
        },
        "/night" => match state.night_status(now) {
            Some(status) => Response::serialized(&serde_json::json!({
                "status": status,
                "description": describe_night_status(&status),
            })),
            None => Response::not_loaded(),
        },
        _ => Response::json(404, r#"{"error":"Not Found"}"#.to_string()),
    }
}

fn health_body(status: &RefreshStatus) -> String {
    format!(
        r#"{{"status":"healthy","refreshes_successful":{},"refreshes_failed":{},"last_refresh_time":{},"last_refresh_ok":{},"reminders_sent":{}}}"#,
        status.refreshes_successful,
        status.refreshes_failed,
        status.last_refresh_time,
        status.last_refresh_ok,
        status.reminders_sent
    )
}

fn metrics_body(status: &RefreshStatus, loaded: bool) -> String {
    // Prometheus text exposition format
    format!(
        "# HELP iqamah_refreshes_total Schedule refreshes attempted\n\
         # TYPE iqamah_refreshes_total counter\n\
         iqamah_refreshes_total{{result=\"success\"}} {}\n\
         iqamah_refreshes_total{{result=\"failure\"}} {}\n\
         # HELP iqamah_last_refresh_timestamp Unix timestamp of last refresh\n\
         # TYPE iqamah_last_refresh_timestamp gauge\n\
         iqamah_last_refresh_timestamp {}\n\
         # HELP iqamah_last_refresh_ok Whether the last refresh succeeded (1) or failed (0)\n\
         # TYPE iqamah_last_refresh_ok gauge\n\
         iqamah_last_refresh_ok {}\n\
         # HELP iqamah_schedule_loaded Whether today's schedule is loaded\n\
         # TYPE iqamah_schedule_loaded gauge\n\
         iqamah_schedule_loaded {}\n\
         # HELP iqamah_reminders_sent_total Reminders delivered\n\
         # TYPE iqamah_reminders_sent_total counter\n\
         iqamah_reminders_sent_total {}\n",
        status.refreshes_successful,
        status.refreshes_failed,
        status.last_refresh_time,
        u8::from(status.last_refresh_ok),
        u8::from(loaded),
        status.reminders_sent
    )
}
