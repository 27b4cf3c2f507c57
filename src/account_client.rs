use crate::{
    config::ApiConfig,
    http_client::{HttpMethod, https_client, send_json},
    models::AccountBinding,
};
use anyhow::Result;
use log::warn;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use reqwest::{Client, StatusCode};
use trait_variant::make;

/// Calls the device makes against the BotaniClock server.
///
/// Both report `true` only for an HTTP 200 answer; any other status, 2xx
/// included, counts as failure.
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait AccountService: Send + Sync {
    /// Report a watering event for the bound plant.
    async fn update(&self, binding: &AccountBinding) -> Result<bool>;
    /// Check that a binding submitted during registration is known.
    async fn verify(&self, binding: &AccountBinding) -> Result<bool>;
}

#[derive(Clone)]
pub struct BotaniClockClient {
    client: Client,
    devices_url: String,
}

impl BotaniClockClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            client: https_client(config.accept_invalid_certs)?,
            devices_url: config.devices_url.clone(),
        })
    }

    async fn send(&self, binding: &AccountBinding, method: HttpMethod) -> Result<bool> {
        let status = send_json(&self.client, binding, &self.devices_url, method).await?;

        if status != StatusCode::OK {
            warn!("{method} {} rejected with {status}", self.devices_url);
            return Ok(false);
        }

        Ok(true)
    }
}

impl AccountService for BotaniClockClient {
    async fn update(&self, binding: &AccountBinding) -> Result<bool> {
        self.send(binding, HttpMethod::Put).await
    }

    async fn verify(&self, binding: &AccountBinding) -> Result<bool> {
        self.send(binding, HttpMethod::Post).await
    }
}
