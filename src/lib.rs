pub mod account_client;
pub mod button;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod hal;
pub mod http_client;
pub mod models;
pub mod orchestrator;
pub mod power;
pub mod provisioning;
pub mod signal;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;
