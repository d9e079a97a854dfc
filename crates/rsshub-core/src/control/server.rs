//! Control server
//!
//! Listens on a TCP address and translates requests into aggregator calls.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::*;
use crate::aggregator::Aggregator;
use crate::duration::{format_duration, parse_duration};
use crate::{Error, Result};

/// Control endpoint bound to one address
pub struct ControlServer {
    listener: TcpListener,
    start_time: Instant,
}

impl ControlServer {
    /// Bind the control address.
    ///
    /// An address that is already taken means another instance is serving it,
    /// reported as [`Error::AlreadyRunning`].
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::AlreadyRunning(format!(
                    "control address {} is already in use; is another fetcher running?",
                    addr
                ))
            } else {
                Error::Io(e)
            }
        })?;

        Ok(Self {
            listener,
            start_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests against `aggregator` until `shutdown` is cancelled
    pub async fn run(self, aggregator: Aggregator, shutdown: CancellationToken) -> Result<()> {
        info!("Control server listening on: {}", self.local_addr()?);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Control server shutting down");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("Control connection from {}", peer);
                            let aggregator = aggregator.clone();
                            let start_time = self.start_time;
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, aggregator, start_time, shutdown).await {
                                    warn!("Error handling control connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept control connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    aggregator: Aggregator,
    start_time: Instant,
    shutdown: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read_line(&mut line) => read?,
        };
        if bytes_read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Received request: {} (id: {})", request.method, request.id);
                handle_request(request, &aggregator, start_time)
            }
            Err(e) => {
                warn!("Failed to parse control request: {}", e);
                Response::error(Uuid::nil(), ERR_PARSE, format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

fn handle_request(request: Request, aggregator: &Aggregator, start_time: Instant) -> Response {
    let id = request.id;

    match request.method.as_str() {
        methods::PING => Response::success(id, serde_json::json!({"ok": true})),

        methods::STATUS => {
            let status = aggregator.status();
            reply(
                id,
                &StatusResponse {
                    running: status.running,
                    uptime_secs: start_time.elapsed().as_secs(),
                    interval: format_duration(status.interval),
                    workers: status.workers,
                    live_workers: status.live_workers,
                },
            )
        }

        methods::INTERVAL_GET => reply(
            id,
            &IntervalResponse {
                interval: format_duration(aggregator.current_interval()),
            },
        ),

        methods::INTERVAL_SET => {
            let params = match serde_json::from_value::<SetIntervalParams>(request.params) {
                Ok(params) => params,
                Err(e) => return Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            };
            let interval = match parse_duration(&params.duration) {
                Ok(interval) => interval,
                Err(e) => return Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            };

            match aggregator.set_interval(interval) {
                Ok(previous) => reply(
                    id,
                    &Change {
                        old: format_duration(previous),
                        new: format_duration(interval),
                    },
                ),
                Err(e) => error_response(id, e),
            }
        }

        methods::WORKERS_GET => reply(
            id,
            &WorkersResponse {
                workers: aggregator.current_workers(),
            },
        ),

        methods::WORKERS_SET => {
            let params = match serde_json::from_value::<SetWorkersParams>(request.params) {
                Ok(params) => params,
                Err(e) => return Response::error(id, ERR_INVALID_PARAMS, e.to_string()),
            };
            let workers = match usize::try_from(params.workers) {
                Ok(workers) if workers > 0 => workers,
                _ => {
                    return Response::error(
                        id,
                        ERR_INVALID_PARAMS,
                        format!("worker count must be greater than zero, got {}", params.workers),
                    )
                }
            };

            match aggregator.resize(workers) {
                Ok(previous) => reply(
                    id,
                    &Change {
                        old: previous,
                        new: workers,
                    },
                ),
                Err(e) => error_response(id, e),
            }
        }

        _ => Response::error(
            id,
            ERR_METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}

fn reply<T: serde::Serialize>(id: Uuid, result: &T) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::error(id, ERR_INTERNAL, e.to_string()),
    }
}

fn error_response(id: Uuid, err: Error) -> Response {
    match err {
        Error::InvalidArgument(message) => Response::error(id, ERR_INVALID_PARAMS, message),
        other => Response::error(id, ERR_INTERNAL, other.to_string()),
    }
}
