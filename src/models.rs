use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::fmt;

/// Top-level behaviour selected once per boot cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceMode {
    /// Report a watering event for the bound plant.
    Update,
    /// Bind the device to a plant of a BotaniClock account.
    Registration,
    /// Collect router credentials over a local access point.
    Router,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMode::Update => write!(f, "update mode"),
            DeviceMode::Registration => write!(f, "registration mode"),
            DeviceMode::Router => write!(f, "router mode"),
        }
    }
}

/// Router credentials as submitted by the router page.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq, Validate)]
pub struct WifiCredentials {
    #[validate(min_length = 1)]
    #[validate(max_length = 32)]
    pub ssid: String,
    #[serde(rename = "routerPassword")]
    #[validate(min_length = 1)]
    #[validate(max_length = 64)]
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

// keep the password out of logs
impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

/// Link between the device and a plant of a BotaniClock account.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountBinding {
    #[serde(rename = "registrationID")]
    pub registration_id: String,
    pub account_email: String,
}

impl AccountBinding {
    pub fn new(registration_id: impl Into<String>, account_email: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            account_email: account_email.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registration_id.is_empty() && self.account_email.is_empty()
    }
}
