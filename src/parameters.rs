use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Args, Error, Subcommand};
use http::Uri;
use serde_json::{Map, Value, json};
use url::Url;

use crate::api::{ApiSettings, DEFAULT_API_URL};
use crate::authenticator::DEFAULT_TOKEN_URL;
use crate::http::config::{HttpConfig, ProxyConfig, ProxyError};
use crate::node::NodeKind;
use crate::token_manager::{AuthSettings, DEFAULT_SCOPE};

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Options shared by every command: where the credential lives and how to reach the
/// identity provider and the IoT API.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// JSON file holding the credential. Rotated tokens are written back to it.
    ///
    /// EXAMPLE:
    /// {"clientId": "...", "accessToken": "...", "refreshToken": "...", "tokenExpiry": "2025-06-04T19:25:00Z"}
    #[arg(long, short, required = true)]
    pub credentials: PathBuf,

    /// Token endpoint of the identity provider
    #[arg(long, default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Base URL of the IoT API
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Scope requested with the client-credentials grant. Empty to request none.
    #[arg(long, default_value = DEFAULT_SCOPE)]
    pub scope: String,

    /// Request and connect timeout, in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Proxy URL. Falls back to HTTPS_PROXY and HTTP_PROXY.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Log lifecycle details (token masked)
    #[arg(long)]
    pub debug: bool,
}

impl ConnectionArgs {
    pub fn http_config(&self) -> Result<HttpConfig, ProxyError> {
        let proxy = ProxyConfig::new(self.proxy.as_deref().unwrap_or_default())?
            .try_with_url_from_env()?;
        let timeout = Duration::from_secs(self.timeout);
        Ok(HttpConfig::new(timeout, timeout, proxy))
    }

    pub fn token_url(&self) -> Result<Uri, Error> {
        Uri::from_str(&self.token_url)
            .map_err(|e| Error::raw(ErrorKind::Format, format!("Invalid token URI: {}", e)))
    }

    pub fn api_settings(&self) -> Result<ApiSettings, Error> {
        let base_url = Url::parse(&self.api_url)
            .map_err(|e| Error::raw(ErrorKind::Format, format!("Invalid API URL: {}", e)))?;
        Ok(ApiSettings::new(base_url))
    }

    pub fn auth_settings(&self) -> AuthSettings {
        let scope = self.scope.trim();
        AuthSettings {
            scope: (!scope.is_empty()).then(|| scope.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    /// ID of the installation
    #[arg(long, short, required = true)]
    installation_id: String,

    /// Serial number of the gateway
    #[arg(long, short, required = true)]
    gateway_serial: String,
}

#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    #[command(flatten)]
    gateway: GatewayArgs,

    /// ID of the device under the gateway, usually "0" for the boiler
    #[arg(long, short, required = true)]
    device_id: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Lists the installations the credential has access to.
    Installations,
    /// Lists the gateways of an installation.
    Gateways {
        /// ID of the installation
        #[arg(long, short, required = true)]
        installation_id: String,
    },
    /// Lists the devices behind a gateway.
    Devices {
        #[command(flatten)]
        gateway: GatewayArgs,
    },
    /// Lists the features of a device.
    Features {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Reads one feature of a device, or all of them when no feature is given.
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        /// Feature name, e.g. heating.sensors.temperature.outside
        #[arg(long, short, alias = "datapoint")]
        feature: Option<String>,
    },
    /// Executes a command of a device feature.
    ///
    /// EXAMPLE:
    /// write -i 123 -g 7571381681420106 -d 0 --feature heating.circuits.0.operating.programs.normal
    /// --command setTemperature --params '{"targetTemperature": 21}'
    Write {
        #[command(flatten)]
        device: DeviceArgs,

        /// Feature name
        #[arg(long, short, alias = "datapoint", required = true)]
        feature: String,

        /// Command name, e.g. setTemperature
        #[arg(long, required = true)]
        command: String,

        /// Command parameters as a JSON object
        #[arg(long, short, value_parser = parse_json, default_value = "{}")]
        params: Value,
    },
}

impl Commands {
    pub fn node_kind(&self) -> NodeKind {
        match self {
            Commands::Installations => NodeKind::InstallationList,
            Commands::Gateways { .. } => NodeKind::GatewayList,
            Commands::Devices { .. } => NodeKind::GatewayDevices,
            Commands::Features { .. } => NodeKind::DeviceFeatures,
            Commands::Read { .. } => NodeKind::Read,
            Commands::Write { .. } => NodeKind::Write,
        }
    }

    /// The inbound message handed to the node.
    pub fn message(&self) -> Value {
        let mut msg = Map::new();
        match self {
            Commands::Installations => {}
            Commands::Gateways { installation_id } => {
                msg.insert("installationId".into(), json!(installation_id));
            }
            Commands::Devices { gateway } => gateway.extend_message(&mut msg),
            Commands::Features { device } => device.extend_message(&mut msg),
            Commands::Read { device, feature } => {
                device.extend_message(&mut msg);
                if let Some(feature) = feature {
                    msg.insert("feature".into(), json!(feature));
                }
            }
            Commands::Write {
                device,
                feature,
                command,
                params,
            } => {
                device.extend_message(&mut msg);
                msg.insert("feature".into(), json!(feature));
                msg.insert("command".into(), json!(command));
                msg.insert("params".into(), params.clone());
            }
        }
        Value::Object(msg)
    }
}

impl GatewayArgs {
    fn extend_message(&self, msg: &mut Map<String, Value>) {
        msg.insert("installationId".into(), json!(self.installation_id));
        msg.insert("gatewaySerial".into(), json!(self.gateway_serial));
    }
}

impl DeviceArgs {
    fn extend_message(&self, msg: &mut Map<String, Value>) {
        self.gateway.extend_message(msg);
        msg.insert("deviceId".into(), json!(self.device_id));
    }
}

fn parse_json(value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|e| format!("invalid JSON: {e}"))
}
