use anyhow::{Context, Result};
use std::{env, net::Ipv4Addr, path::PathBuf, str::FromStr, time::Duration};

/// Device configuration loaded at startup
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    /// BotaniClock server API
    pub api: ApiConfig,

    /// Local provisioning server and access point
    pub provisioning: ProvisioningConfig,

    /// Boot sequence timing
    pub timing: BootTiming,

    /// Path configuration
    pub paths: PathConfig,

    /// Simulated hardware used by the host binary
    pub simulation: SimulationConfig,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub devices_url: String,
    pub accept_invalid_certs: bool,
}

#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    pub bind_address: Ipv4Addr,
    pub port: u16,
    pub web_root: PathBuf,
    pub hostname: String,
    pub ap_name: String,
    pub ap_password: String,
    /// Delay between accepting a submission and ending the session
    pub release_grace: Duration,
}

#[derive(Clone, Debug)]
pub struct BootTiming {
    pub connect_timeout: Duration,
    pub reset_hold: Duration,
    pub button_poll_interval: Duration,
    pub release_settle: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub store_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub button_marker: PathBuf,
    pub network_ssid: Option<String>,
    pub network_password: Option<String>,
}

impl AppConfig {
    /// Load all configuration from environment variables
    pub fn load() -> Result<Self> {
        Ok(Self {
            api: ApiConfig::load()?,
            provisioning: ProvisioningConfig::load()?,
            timing: BootTiming::load()?,
            paths: PathConfig::load()?,
            simulation: SimulationConfig::load()?,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .context(format!("failed to parse {name}: invalid format")),
        Err(_) => Ok(default),
    }
}

fn path_var(name: &str, default: PathBuf) -> PathBuf {
    env::var_os(name).map(PathBuf::from).unwrap_or(default)
}

fn millis_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(_) => parse_var(name, 0u64).map(Duration::from_millis),
        Err(_) => Ok(default),
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            devices_url: "https://192.168.1.153:8080/api/v1/devices".to_string(),
            accept_invalid_certs: false,
        }
    }
}

impl ApiConfig {
    fn load() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            devices_url: var_or("BOTANICLOCK_API_URL", &defaults.devices_url),
            accept_invalid_certs: parse_var(
                "BOTANICLOCK_API_ACCEPT_INVALID_CERTS",
                defaults.accept_invalid_certs,
            )?,
        })
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            port: 80,
            web_root: PathBuf::from("/store"),
            hostname: "botaniclock".to_string(),
            ap_name: "botaniclock".to_string(),
            ap_password: "botaniclock".to_string(),
            release_grace: Duration::from_millis(1000),
        }
    }
}

impl ProvisioningConfig {
    fn load() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            port: parse_var("PROVISIONING_PORT", defaults.port)?,
            web_root: path_var("WEB_ROOT", defaults.web_root.clone()),
            hostname: var_or("MDNS_HOSTNAME", &defaults.hostname),
            ap_name: var_or("AP_NAME", &defaults.ap_name),
            ap_password: var_or("AP_PASSWORD", &defaults.ap_password),
            ..defaults
        })
    }

    pub fn router_root(&self) -> PathBuf {
        self.web_root.join("router")
    }

    pub fn registration_root(&self) -> PathBuf {
        self.web_root.join("register")
    }
}

impl Default for BootTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10000),
            reset_hold: Duration::from_millis(5000),
            button_poll_interval: Duration::from_millis(100),
            release_settle: Duration::from_millis(20),
        }
    }
}

impl BootTiming {
    fn load() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            connect_timeout: millis_var("CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            reset_hold: millis_var("RESET_HOLD_MS", defaults.reset_hold)?,
            ..defaults
        })
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("/data/store.json"),
        }
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        Ok(Self {
            store_path: path_var("STORE_PATH", Self::default().store_path),
        })
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            button_marker: PathBuf::from("/tmp/botaniclock_button_pressed"),
            network_ssid: None,
            network_password: None,
        }
    }
}

impl SimulationConfig {
    fn load() -> Result<Self> {
        Ok(Self {
            button_marker: path_var("SIM_BUTTON_MARKER", Self::default().button_marker),
            network_ssid: env::var("SIM_NETWORK_SSID").ok(),
            network_password: env::var("SIM_NETWORK_PASSWORD").ok(),
        })
    }
}
