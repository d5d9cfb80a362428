use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use crate::core::DeviceAddr;
use super::transport::{ControlCommand, ControlTransport, RemoteEvent, TransportError};

/// Control protocol spoken over HTTP at `http://<ip>:<port>`
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(addr: DeviceAddr, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: addr.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path_and_query: &str) -> Result<Response, TransportError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        log::debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl ControlTransport for HttpTransport {
    async fn ping(&self) -> Result<(), TransportError> {
        let response = self.client.get(&self.base_url).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn fetch_config(&self) -> Result<Value, TransportError> {
        Ok(self.get("/config").await?.json().await?)
    }

    async fn control(&self, command: ControlCommand) -> Result<(), TransportError> {
        self.get(&format!("/control?cmd={}", command.as_str())).await?;
        Ok(())
    }

    async fn fetch_timeline(&self) -> Result<Vec<RemoteEvent>, TransportError> {
        Ok(self.get("/time").await?.json().await?)
    }

    async fn fetch_values(&self, channels: &[String]) -> Result<Value, TransportError> {
        Ok(self.get(&format!("/get?{}", channels.join("&"))).await?.json().await?)
    }
}
