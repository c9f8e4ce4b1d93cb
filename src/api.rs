//! Typed access to the Viessmann IoT API: installations, gateways, devices, features and
//! feature commands.
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::TokenProvider;
use crate::executor::{AuthenticatedExecutor, RequestError};
use crate::http_client::HttpClient;

mod endpoints;
pub mod params;

pub use endpoints::Endpoints;
pub use params::{CommandRequest, DeviceAddress, Field, GatewayAddress, ValidationError};

pub const DEFAULT_API_URL: &str = "https://api.viessmann-climatesolutions.com";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: Url,
}

impl ApiSettings {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

/// Payload reported after a command was accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    pub installation_id: u64,
    pub gateway_serial: String,
    pub device_id: String,
    pub feature: String,
    pub command: String,
    pub params: Value,
}

pub struct ViessmannApi<T, C> {
    endpoints: Endpoints,
    executor: AuthenticatedExecutor<T, C>,
}

impl<T, C> ViessmannApi<T, C>
where
    T: TokenProvider,
    C: HttpClient,
{
    pub fn new(settings: ApiSettings, executor: AuthenticatedExecutor<T, C>) -> Self {
        Self {
            endpoints: Endpoints::new(settings.base_url),
            executor,
        }
    }

    pub fn installations(&self) -> Result<Value, RequestError> {
        self.list(self.endpoints.installations()?)
    }

    pub fn gateways(&self, installation_id: u64) -> Result<Value, RequestError> {
        self.list(self.endpoints.gateways(installation_id)?)
    }

    pub fn devices(&self, gateway: &GatewayAddress) -> Result<Value, RequestError> {
        self.list(self.endpoints.devices(gateway)?)
    }

    pub fn features(&self, device: &DeviceAddress) -> Result<Value, RequestError> {
        self.list(self.endpoints.features(device)?)
    }

    /// Every feature of the device as read by a read node: the `data` member when present,
    /// otherwise the whole body.
    pub fn read_features(&self, device: &DeviceAddress) -> Result<Value, RequestError> {
        let url = self.endpoints.features(device)?;
        debug!(%url, "reading features");
        Ok(single_payload(self.executor.execute_get(&url)?))
    }

    /// A single feature. The `data` member is unwrapped when the envelope has one.
    pub fn feature(&self, device: &DeviceAddress, feature: &str) -> Result<Value, RequestError> {
        let url = self.endpoints.feature(device, feature)?;
        debug!(%url, "reading feature");
        Ok(single_payload(self.executor.execute_get(&url)?))
    }

    /// Executes `request.command` on the feature. The response body is discarded.
    pub fn execute_command(&self, request: CommandRequest) -> Result<CommandOutcome, RequestError> {
        let url = self
            .endpoints
            .command(&request.device, &request.feature, &request.command)?;
        debug!(%url, "executing command");
        self.executor.execute_post(&url, &request.params)?;

        let CommandRequest {
            device,
            feature,
            command,
            params,
        } = request;
        Ok(CommandOutcome {
            success: true,
            installation_id: device.gateway.installation_id,
            gateway_serial: device.gateway.gateway_serial,
            device_id: device.device_id,
            feature,
            command,
            params,
        })
    }

    fn list(&self, url: Url) -> Result<Value, RequestError> {
        debug!(%url, "fetching list");
        Ok(list_payload(self.executor.execute_get(&url)?))
    }
}

/// The `data` array of a list envelope, or an empty list.
fn list_payload(mut body: Value) -> Value {
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => data,
        _ => Value::Array(Vec::new()),
    }
}

fn single_payload(mut body: Value) -> Value {
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => data,
        _ => body,
    }
}
