//! Control client
//!
//! Typed access to a running fetcher's control endpoint.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::*;
use crate::{Error, Result};

/// Client for the control endpoint
#[derive(Clone)]
pub struct ControlClient {
    addr: String,
    timeout: Duration,
}

impl ControlClient {
    /// `timeout` bounds each call, from connect to response
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Check if a fetcher is reachable
    pub async fn ping(&self) -> Result<bool> {
        match self.call(methods::PING, serde_json::Value::Null).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let result = self.call(methods::STATUS, serde_json::Value::Null).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Current interval as duration text
    pub async fn current_interval(&self) -> Result<String> {
        let result = self.call(methods::INTERVAL_GET, serde_json::Value::Null).await?;
        let response: IntervalResponse = serde_json::from_value(result)?;
        Ok(response.interval)
    }

    /// Send `duration` as given; the server validates it
    pub async fn set_interval(&self, duration: &str) -> Result<Change<String>> {
        let params = serde_json::to_value(SetIntervalParams {
            duration: duration.to_string(),
        })?;
        let result = self.call(methods::INTERVAL_SET, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn current_workers(&self) -> Result<usize> {
        let result = self.call(methods::WORKERS_GET, serde_json::Value::Null).await?;
        let response: WorkersResponse = serde_json::from_value(result)?;
        Ok(response.workers)
    }

    pub async fn set_workers(&self, workers: i64) -> Result<Change<usize>> {
        let params = serde_json::to_value(SetWorkersParams { workers })?;
        let result = self.call(methods::WORKERS_SET, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        tokio::time::timeout(self.timeout, self.exchange(method, params))
            .await
            .map_err(|_| {
                Error::Other(format!(
                    "Timed out after {:?} waiting for '{}' from {}",
                    self.timeout, method, self.addr
                ))
            })?
    }

    /// Send a request and receive a response
    async fn exchange(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            Error::Other(format!(
                "Failed to connect to control endpoint at {}: {}. Is the fetcher running?",
                self.addr, e
            ))
        })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request = Request::new(method).with_params(params);
        let request_json = serde_json::to_string(&request)?;

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(Error::Other(
                "Control endpoint closed the connection".to_string(),
            ));
        }

        let response: Response = serde_json::from_str(&response_line)?;

        if let Some(error) = response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        response.result.ok_or_else(|| Error::Other("Empty response".to_string()))
    }
}
