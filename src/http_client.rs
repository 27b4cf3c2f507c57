use anyhow::{Context, Result};
use log::info;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::fmt::{self, Debug};

/// Request methods the device issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Method::from(*self))
    }
}

/// Create an HTTPS client for the BotaniClock server.
///
/// The server may run with a self-signed certificate, in which case
/// `accept_invalid_certs` has to be set.
pub fn https_client(accept_invalid_certs: bool) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .context("failed to create HTTPS client")
}

/// Send `body` as JSON and return the response status.
pub async fn send_json(
    client: &Client,
    body: &(impl Debug + Serialize),
    url: &str,
    method: HttpMethod,
) -> Result<StatusCode> {
    info!("{method} {url} with body: {body:?}");

    let res = client
        .request(method.into(), url)
        .json(body)
        .send()
        .await
        .context(format!("failed to send {method} request to {url}"))?;

    let status = res.status();
    info!("{method} {url} returned {status}");

    Ok(status)
}
