//! Consumer nodes: the units that turn an inbound message into one API call and report the
//! outcome through their status indicator.
//!
//! A node bound to a credential registers its indicator as a dependent of the credential
//! owner for as long as the binding lives, so authentication state changes show up on every
//! node sharing that credential.
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::TokenProvider;
use crate::api::params::{self, CommandRequest, DeviceAddress, GatewayAddress, ValidationError};
use crate::api::{ApiSettings, ViessmannApi};
use crate::executor::{AuthenticatedExecutor, RequestError};
use crate::http_client::HttpClient;
use crate::observer::{Registration, StatusObserver, StatusSource};

mod status;

pub use status::{
    Fill, NodeStatus, STATUS_TEXT_MAX_LEN, Shape, StatusIndicator, truncate_for_status,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    InstallationList,
    GatewayList,
    GatewayDevices,
    DeviceFeatures,
    Read,
    Write,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::InstallationList => "installation-list",
            NodeKind::GatewayList => "gateway-list",
            NodeKind::GatewayDevices => "gateway-devices",
            NodeKind::DeviceFeatures => "device-features",
            NodeKind::Read => "read",
            NodeKind::Write => "write",
        }
    }

    fn pending_text(&self) -> &'static str {
        match self {
            NodeKind::Read => "reading...",
            NodeKind::Write => "writing...",
            _ => "fetching...",
        }
    }

    fn failure_context(&self) -> &'static str {
        match self {
            NodeKind::InstallationList => "Failed to fetch installations",
            NodeKind::GatewayList => "Failed to fetch gateways",
            NodeKind::GatewayDevices => "Failed to fetch gateway devices",
            NodeKind::DeviceFeatures => "Failed to fetch device features",
            NodeKind::Read => "Failed to read data",
            NodeKind::Write => "Failed to write data",
        }
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("No credential configured. Please configure the Viessmann credential for this node.")]
    ConfigurationMissing,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{context}: {source}")]
    Request {
        context: &'static str,
        #[source]
        source: RequestError,
    },
}

impl NodeError {
    /// Text shown by the node's status indicator for this failure.
    pub fn status_text(&self) -> String {
        match self {
            NodeError::ConfigurationMissing => NodeStatus::no_config().text,
            NodeError::Validation(e) => e.status_text(),
            NodeError::Request { source, .. } => {
                truncate_for_status(&source.to_string(), STATUS_TEXT_MAX_LEN)
            }
        }
    }
}

/// One API call, with its parameters already validated.
#[derive(Debug, Clone, PartialEq)]
enum Operation {
    Installations,
    Gateways(u64),
    Devices(GatewayAddress),
    Features(DeviceAddress),
    Read(DeviceAddress, Option<String>),
    Write(CommandRequest),
}

impl Operation {
    fn parse(kind: NodeKind, msg: &Value) -> Result<Self, ValidationError> {
        Ok(match kind {
            NodeKind::InstallationList => Operation::Installations,
            NodeKind::GatewayList => Operation::Gateways(params::installation_id(msg)?),
            NodeKind::GatewayDevices => Operation::Devices(params::gateway_address(msg)?),
            NodeKind::DeviceFeatures => Operation::Features(params::device_address(msg)?),
            NodeKind::Read => Operation::Read(params::device_address(msg)?, params::feature(msg)),
            NodeKind::Write => Operation::Write(params::command_request(msg)?),
        })
    }

    fn run<T, C>(self, api: &ViessmannApi<T, C>) -> Result<Value, RequestError>
    where
        T: TokenProvider,
        C: HttpClient,
    {
        match self {
            Operation::Installations => api.installations(),
            Operation::Gateways(installation_id) => api.gateways(installation_id),
            Operation::Devices(gateway) => api.devices(&gateway),
            Operation::Features(device) => api.features(&device),
            Operation::Read(device, Some(feature)) => api.feature(&device, &feature),
            Operation::Read(device, None) => api.read_features(&device),
            Operation::Write(request) => serde_json::to_value(api.execute_command(request)?)
                .map_err(|e| RequestError::InvalidRequest(e.to_string())),
        }
    }
}

struct Binding<M, C> {
    api: ViessmannApi<Arc<M>, C>,
    // Unregisters the indicator when the binding is dropped.
    _registration: Registration,
}

/// A consumer node of the given [`NodeKind`].
///
/// `M` is the credential owner, usually an `Arc`-shared
/// [`TokenManager`](crate::token_manager::TokenManager).
pub struct ApiNode<M, C> {
    kind: NodeKind,
    binding: Option<Binding<M, C>>,
    indicator: Arc<StatusIndicator>,
}

impl<M, C> ApiNode<M, C>
where
    M: TokenProvider + StatusSource + 'static,
    C: HttpClient,
{
    pub fn new(
        kind: NodeKind,
        manager: Option<Arc<M>>,
        settings: ApiSettings,
        http_client: C,
    ) -> Self {
        let mut node = Self {
            kind,
            binding: None,
            indicator: Arc::new(StatusIndicator::new(NodeStatus::no_config())),
        };
        node.reconfigure(manager, settings, http_client);
        node
    }

    /// Rebinds the node to another credential. The previous registration ends before the new
    /// one starts.
    pub fn reconfigure(&mut self, manager: Option<Arc<M>>, settings: ApiSettings, http_client: C) {
        self.binding = None;

        let Some(manager) = manager else {
            debug!(node = self.kind.name(), "node has no credential");
            self.indicator.set(NodeStatus::no_config());
            return;
        };

        let source: Arc<dyn StatusSource> = manager.clone();
        let observer: Arc<dyn StatusObserver> = self.indicator.clone();
        self.binding = Some(Binding {
            api: ViessmannApi::new(settings, AuthenticatedExecutor::new(manager, http_client)),
            _registration: Registration::new(source, observer),
        });
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn status(&self) -> NodeStatus {
        self.indicator.current()
    }

    /// Handles one inbound message and returns the outbound one: the same message with its
    /// `payload` replaced by the API result.
    ///
    /// Configuration and validation problems are reported before any network activity. Every
    /// failure is logged with its full message while the status shows a truncated text.
    pub fn handle(&self, msg: Value) -> Result<Value, NodeError> {
        let payload = self.process(&msg).inspect_err(|e| {
            error!(node = self.kind.name(), "{e}");
            self.indicator.set(NodeStatus::error(&e.status_text()));
        })?;

        let mut out = match msg {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        out.insert("payload".to_string(), payload);
        Ok(Value::Object(out))
    }

    fn process(&self, msg: &Value) -> Result<Value, NodeError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or(NodeError::ConfigurationMissing)?;
        let operation = Operation::parse(self.kind, msg)?;

        self.indicator
            .set(NodeStatus::pending(self.kind.pending_text()));
        let payload = operation
            .run(&binding.api)
            .map_err(|source| NodeError::Request {
                context: self.kind.failure_context(),
                source,
            })?;

        self.indicator.set(NodeStatus::success());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::{TimeDelta, Utc};
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use rstest::rstest;
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::auth_state::AuthState;
    use crate::authenticator::test::MockAuthenticatorMock;
    use crate::authenticator::{AuthenticateError, HttpAuthenticator, ProviderError};
    use crate::credential_store::{MemoryCredentialStore, StoredCredentials};
    use crate::http::client::HttpClient as ReqwestHttpClient;
    use crate::http::config::{HttpConfig, ProxyConfig};
    use crate::http_client::tests::{MockHttpClient, json_response};
    use crate::token_manager::{AuthSettings, TokenManager};

    type Manager = TokenManager<MockAuthenticatorMock, MemoryCredentialStore>;

    fn settings() -> ApiSettings {
        ApiSettings::new(Url::parse("https://api.viessmann-climatesolutions.com").unwrap())
    }

    fn manager(authenticator: MockAuthenticatorMock, expires_in: TimeDelta) -> Arc<Manager> {
        let store = MemoryCredentialStore::new(StoredCredentials {
            client_id: "test-client-id".into(),
            access_token: Some("test-access-token".into()),
            refresh_token: Some("test-refresh-token".into()),
            token_expiry: Some(Utc::now() + expires_in),
            ..Default::default()
        });
        Arc::new(TokenManager::try_new(AuthSettings::default(), authenticator, store).unwrap())
    }

    fn fresh_manager() -> Arc<Manager> {
        let mut authenticator = MockAuthenticatorMock::new();
        authenticator.expect_authenticate().never();
        manager(authenticator, TimeDelta::hours(1))
    }

    fn node(kind: NodeKind, manager: &Arc<Manager>, http_client: MockHttpClient) -> ApiNode<Manager, MockHttpClient> {
        ApiNode::new(kind, Some(manager.clone()), settings(), http_client)
    }

    fn device_msg() -> Value {
        json!({"installationId": 123, "gatewaySerial": "7571381681420106", "deviceId": "0"})
    }

    #[test]
    fn node_without_credential_reports_no_config() {
        let mut http_client = MockHttpClient::new();
        http_client.expect_send().never();
        let node: ApiNode<Manager, _> =
            ApiNode::new(NodeKind::InstallationList, None, settings(), http_client);

        assert_eq!(node.status(), NodeStatus::no_config());
        let err = node.handle(json!({})).unwrap_err();

        assert_matches!(err, NodeError::ConfigurationMissing);
        assert_eq!(node.status(), NodeStatus::no_config());
    }

    #[test]
    fn binding_mirrors_the_credential_state() {
        let manager = fresh_manager();

        let node = node(NodeKind::InstallationList, &manager, MockHttpClient::new());

        assert_eq!(manager.dependent_count(), 1);
        assert_eq!(node.status(), NodeStatus::from_auth_state(&AuthState::Authenticated));
        assert_eq!(node.status().text, "connected");
    }

    #[test]
    fn dropping_or_reconfiguring_unregisters() {
        let manager = fresh_manager();
        let other = fresh_manager();

        let mut first = node(NodeKind::Read, &manager, MockHttpClient::new());
        let second = node(NodeKind::Write, &manager, MockHttpClient::new());
        assert_eq!(manager.dependent_count(), 2);

        first.reconfigure(Some(other.clone()), settings(), MockHttpClient::new());
        assert_eq!(manager.dependent_count(), 1);
        assert_eq!(other.dependent_count(), 1);

        drop(second);
        first.reconfigure(None, settings(), MockHttpClient::new());
        assert_eq!(manager.dependent_count(), 0);
        assert_eq!(other.dependent_count(), 0);
        assert_eq!(first.status(), NodeStatus::no_config());
    }

    #[rstest]
    #[case::gateway_list(NodeKind::GatewayList, json!({}), "no installationId")]
    #[case::gateway_list_invalid(NodeKind::GatewayList, json!({"installationId": "abc"}), "invalid installationId")]
    #[case::gateway_devices(NodeKind::GatewayDevices, json!({"installationId": 1}), "no gatewaySerial")]
    #[case::device_features(NodeKind::DeviceFeatures, json!({"installationId": 1, "gatewaySerial": "g", "deviceId": " "}), "invalid deviceId")]
    #[case::read(NodeKind::Read, json!({"installationId": -1}), "invalid installationId")]
    #[case::write(NodeKind::Write, device_msg(), "no feature")]
    fn validation_fails_before_any_request(
        #[case] kind: NodeKind,
        #[case] msg: Value,
        #[case] status_text: &str,
    ) {
        let mut http_client = MockHttpClient::new();
        http_client.expect_send().never();
        let node = node(kind, &fresh_manager(), http_client);

        let err = node.handle(msg).unwrap_err();

        assert_matches!(err, NodeError::Validation(_));
        assert_eq!(node.status(), NodeStatus::new(Fill::Red, Shape::Dot, status_text));
    }

    #[test]
    fn read_all_features_keeps_the_message() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .withf(|req| req.uri().path().ends_with("/devices/0/features"))
            .returning(|_| Ok(json_response(200, json!({"data": [{"feature": "heating.sensors"}]}))));
        let node = node(NodeKind::Read, &fresh_manager(), http_client);
        let mut msg = device_msg();
        msg["topic"] = json!("boiler");

        let out = node.handle(msg).unwrap();

        assert_eq!(out["payload"], json!([{"feature": "heating.sensors"}]));
        assert_eq!(out["topic"], "boiler");
        assert_eq!(node.status(), NodeStatus::success());
    }

    #[test]
    fn read_all_features_without_data_returns_the_body() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .withf(|req| req.uri().path().ends_with("/devices/0/features"))
            .returning(|_| Ok(json_response(200, json!({"features": [1, 2]}))));
        let node = node(NodeKind::Read, &fresh_manager(), http_client);

        let out = node.handle(device_msg()).unwrap();

        assert_eq!(out["payload"], json!({"features": [1, 2]}));
        assert_eq!(node.status(), NodeStatus::success());
    }

    #[test]
    fn read_single_feature_by_datapoint() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .withf(|req| req.uri().path().ends_with("/features/heating.boiler.temperature"))
            .returning(|_| Ok(json_response(200, json!({"data": {"feature": "heating.boiler.temperature"}}))));
        let node = node(NodeKind::Read, &fresh_manager(), http_client);
        let mut msg = device_msg();
        msg["datapoint"] = json!("heating.boiler.temperature");

        let out = node.handle(msg).unwrap();

        assert_eq!(out["payload"]["feature"], "heating.boiler.temperature");
    }

    #[test]
    fn request_failure_is_reported_with_context() {
        let mut http_client = MockHttpClient::new();
        http_client.expect_send().once().returning(|_| {
            Ok(json_response(
                500,
                json!({"error": "INTERNAL_SERVER_ERROR", "message": "Something went wrong"}),
            ))
        });
        let node = node(NodeKind::DeviceFeatures, &fresh_manager(), http_client);

        let err = node.handle(device_msg()).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to fetch device features: INTERNAL_SERVER_ERROR: Something went wrong"
        );
        assert_eq!(
            node.status(),
            NodeStatus::new(Fill::Red, Shape::Dot, "INTERNAL_SERVER_ERROR: Some...")
        );
    }

    #[test]
    fn write_reports_the_command() {
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .withf(|req| req.uri().path().ends_with("/commands/setMode"))
            .returning(|_| Ok(json_response(202, json!({}))));
        let node = node(NodeKind::Write, &fresh_manager(), http_client);
        let mut msg = device_msg();
        msg["feature"] = json!("heating.circuits.0.operating.modes.active");
        msg["command"] = json!("setMode");
        msg["params"] = json!({"mode": "heating"});

        let out = node.handle(msg).unwrap();

        assert_eq!(out["payload"]["success"], true);
        assert_eq!(out["payload"]["command"], "setMode");
        assert_eq!(out["payload"]["params"], json!({"mode": "heating"}));
        assert_eq!(out["payload"]["installationId"], 123);
    }

    #[test]
    fn failed_refresh_after_unauthorized_is_shown_on_every_node() {
        let mut authenticator = MockAuthenticatorMock::new();
        authenticator.expect_authenticate().once().returning(|_| {
            Err(AuthenticateError::ProviderError {
                status: 400,
                error: ProviderError::new("invalid_grant", Some("Token expired".into())),
            })
        });
        let manager = manager(authenticator, TimeDelta::hours(1));
        let mut http_client = MockHttpClient::new();
        http_client
            .expect_send()
            .once()
            .returning(|_| Ok(json_response(401, json!({"error": "invalid_token"}))));
        let reader = node(NodeKind::Read, &manager, http_client);
        let writer = node(NodeKind::Write, &manager, MockHttpClient::new());

        let err = reader.handle(device_msg()).unwrap_err();

        assert_matches!(&err, NodeError::Request { source: RequestError::Unauthorized(message), .. } => {
            assert_eq!(message, "invalid_token");
        });
        assert_matches!(manager.auth_state(), AuthState::Error(_));
        assert_eq!(reader.status().text, "invalid_token");
        assert_eq!(writer.status().fill, Fill::Red);
        assert!(writer.status().text.starts_with("Token refresh failed"));
    }

    #[test]
    fn expired_token_is_refreshed_against_servers() {
        let server = MockServer::start();
        let token_mock = server.mock(|when, then| {
            when.method(POST).path("/idp/v3/token");
            then.status(200).json_body(json!({
                "access_token": "new-access-token",
                "refresh_token": "new-refresh-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            }));
        });
        let api_mock = server.mock(|when, then| {
            when.method(GET).path("/iot/v2/equipment/installations");
            then.status(200)
                .json_body(json!({"data": [{"id": 123, "description": "Home"}]}));
        });

        let timeout = Duration::from_millis(500);
        let http_client =
            ReqwestHttpClient::new(&HttpConfig::new(timeout, timeout, ProxyConfig::default()))
                .unwrap();
        let store = Arc::new(MemoryCredentialStore::new(StoredCredentials {
            client_id: "test-client-id".into(),
            access_token: Some("expired-access-token".into()),
            refresh_token: Some("test-refresh-token".into()),
            token_expiry: Some(Utc::now() - TimeDelta::minutes(1)),
            ..Default::default()
        }));
        let manager = Arc::new(
            TokenManager::try_new(
                AuthSettings::default(),
                HttpAuthenticator::new(
                    http_client.clone(),
                    server.url("/idp/v3/token").parse().unwrap(),
                ),
                store.clone(),
            )
            .unwrap(),
        );
        let node = ApiNode::new(
            NodeKind::InstallationList,
            Some(manager.clone()),
            ApiSettings::new(Url::parse(&server.base_url()).unwrap()),
            http_client,
        );

        let out = node.handle(json!({})).unwrap();

        assert_eq!(out["payload"], json!([{"id": 123, "description": "Home"}]));
        assert_eq!(node.status(), NodeStatus::success());
        assert_eq!(
            store.snapshot().unwrap().access_token.as_deref(),
            Some("new-access-token")
        );
        token_mock.assert();
        api_mock.assert();
    }
}
