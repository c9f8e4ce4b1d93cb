//! Validation of the parameters carried by an inbound message.
//!
//! Messages are JSON objects; every check runs before any network activity.
use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    InstallationId,
    GatewaySerial,
    DeviceId,
    Feature,
    Command,
    Params,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::InstallationId => "installationId",
            Field::GatewaySerial => "gatewaySerial",
            Field::DeviceId => "deviceId",
            Field::Feature => "feature",
            Field::Command => "command",
            Field::Params => "params",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No {0} provided")]
    Missing(Field),
    #[error("Invalid {0}. {1}")]
    Invalid(Field, String),
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            ValidationError::Missing(field) | ValidationError::Invalid(field, _) => *field,
        }
    }

    /// Short text for the status indicator, e.g. `no deviceId` or `invalid installationId`.
    pub fn status_text(&self) -> String {
        match self {
            ValidationError::Missing(field) => format!("no {field}"),
            ValidationError::Invalid(field, _) => format!("invalid {field}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayAddress {
    pub installation_id: u64,
    pub gateway_serial: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAddress {
    pub gateway: GatewayAddress,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub device: DeviceAddress,
    pub feature: String,
    pub command: String,
    pub params: Value,
}

/// Accepts a positive integer given either as a JSON number or a numeric string.
pub fn installation_id(msg: &Value) -> Result<u64, ValidationError> {
    let id = match present(msg, Field::InstallationId)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole_number)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_number))
        }
        _ => None,
    };

    id.filter(|id| *id > 0).ok_or_else(|| {
        ValidationError::Invalid(
            Field::InstallationId,
            "Must be a positive integer.".to_string(),
        )
    })
}

pub fn gateway_address(msg: &Value) -> Result<GatewayAddress, ValidationError> {
    Ok(GatewayAddress {
        installation_id: installation_id(msg)?,
        gateway_serial: trimmed_string(msg, Field::GatewaySerial)?,
    })
}

pub fn device_address(msg: &Value) -> Result<DeviceAddress, ValidationError> {
    Ok(DeviceAddress {
        gateway: gateway_address(msg)?,
        device_id: trimmed_string(msg, Field::DeviceId)?,
    })
}

/// The feature name, also accepted under the `datapoint` alias.
pub fn feature(msg: &Value) -> Option<String> {
    ["feature", "datapoint"]
        .iter()
        .filter_map(|key| msg.get(key).and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

pub fn command_request(msg: &Value) -> Result<CommandRequest, ValidationError> {
    let device = device_address(msg)?;
    let feature = feature(msg).ok_or(ValidationError::Missing(Field::Feature))?;

    let command = match present(msg, Field::Command)? {
        Value::String(command) if command.is_empty() => {
            return Err(ValidationError::Missing(Field::Command));
        }
        Value::String(command) => command.to_owned(),
        _ => {
            return Err(ValidationError::Invalid(
                Field::Command,
                "Must be a string.".to_string(),
            ));
        }
    };

    let params = present(msg, Field::Params)?.to_owned();

    Ok(CommandRequest {
        device,
        feature,
        command,
        params,
    })
}

fn present(msg: &Value, field: Field) -> Result<&Value, ValidationError> {
    match msg.get(field.as_str()) {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(value) => Ok(value),
    }
}

fn trimmed_string(msg: &Value, field: Field) -> Result<String, ValidationError> {
    let Value::String(value) = present(msg, field)? else {
        return Err(ValidationError::Invalid(
            field,
            "Must be a string.".to_string(),
        ));
    };

    match value.trim() {
        "" => Err(ValidationError::Invalid(
            field,
            "Must be a non-empty string.".to_string(),
        )),
        trimmed => Ok(trimmed.to_string()),
    }
}

fn whole_number(value: f64) -> Option<u64> {
    (value.is_finite() && value.fract() == 0.0 && value > 0.0 && value <= u64::MAX as f64)
        .then_some(value as u64)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case::number(json!({"installationId": 123}), 123)]
    #[case::numeric_string(json!({"installationId": "123"}), 123)]
    #[case::padded_string(json!({"installationId": " 42 "}), 42)]
    #[case::whole_float(json!({"installationId": 7.0}), 7)]
    fn valid_installation_ids(#[case] msg: Value, #[case] expected: u64) {
        assert_eq!(installation_id(&msg), Ok(expected));
    }

    #[rstest]
    #[case::missing(json!({}), "no installationId")]
    #[case::null(json!({"installationId": null}), "no installationId")]
    #[case::zero(json!({"installationId": 0}), "invalid installationId")]
    #[case::negative(json!({"installationId": -5}), "invalid installationId")]
    #[case::fraction(json!({"installationId": 1.5}), "invalid installationId")]
    #[case::not_a_number(json!({"installationId": "abc"}), "invalid installationId")]
    #[case::empty_string(json!({"installationId": ""}), "invalid installationId")]
    #[case::boolean(json!({"installationId": true}), "invalid installationId")]
    fn invalid_installation_ids(#[case] msg: Value, #[case] status: &str) {
        let err = installation_id(&msg).unwrap_err();
        assert_eq!(err.status_text(), status);
        assert_eq!(err.field(), Field::InstallationId);
    }

    #[rstest]
    #[case::missing_serial(json!({"installationId": 1}), "no gatewaySerial")]
    #[case::numeric_serial(json!({"installationId": 1, "gatewaySerial": 123}), "invalid gatewaySerial")]
    #[case::blank_serial(json!({"installationId": 1, "gatewaySerial": "   "}), "invalid gatewaySerial")]
    #[case::missing_device(json!({"installationId": 1, "gatewaySerial": "g"}), "no deviceId")]
    #[case::blank_device(json!({"installationId": 1, "gatewaySerial": "g", "deviceId": ""}), "invalid deviceId")]
    #[case::object_device(json!({"installationId": 1, "gatewaySerial": "g", "deviceId": {}}), "invalid deviceId")]
    fn invalid_device_addresses(#[case] msg: Value, #[case] status: &str) {
        assert_eq!(device_address(&msg).unwrap_err().status_text(), status);
    }

    #[test]
    fn device_address_is_trimmed() {
        let msg = json!({"installationId": "123", "gatewaySerial": " 7571381681420106 ", "deviceId": "0 "});

        let address = device_address(&msg).unwrap();

        assert_eq!(address.gateway.installation_id, 123);
        assert_eq!(address.gateway.gateway_serial, "7571381681420106");
        assert_eq!(address.device_id, "0");
    }

    #[rstest]
    #[case(json!({"feature": "heating.sensors"}), Some("heating.sensors"))]
    #[case(json!({"datapoint": "heating.sensors"}), Some("heating.sensors"))]
    #[case(json!({"feature": "a", "datapoint": "b"}), Some("a"))]
    #[case(json!({"feature": "", "datapoint": "b"}), Some("b"))]
    #[case(json!({}), None)]
    fn feature_or_datapoint(#[case] msg: Value, #[case] expected: Option<&str>) {
        assert_eq!(feature(&msg).as_deref(), expected);
    }

    fn write_msg() -> Value {
        json!({
            "installationId": 123,
            "gatewaySerial": "7571381681420106",
            "deviceId": "0",
            "feature": "heating.circuits.0.operating.programs.normal",
            "command": "setTemperature",
            "params": {"targetTemperature": 21}
        })
    }

    #[test]
    fn command_request_from_message() {
        let request = command_request(&write_msg()).unwrap();

        assert_eq!(request.feature, "heating.circuits.0.operating.programs.normal");
        assert_eq!(request.command, "setTemperature");
        assert_eq!(request.params, json!({"targetTemperature": 21}));
        assert_eq!(request.device.device_id, "0");
    }

    #[rstest]
    #[case::feature("feature", "no feature")]
    #[case::command("command", "no command")]
    #[case::params("params", "no params")]
    fn command_request_requires(#[case] removed: &str, #[case] status: &str) {
        let mut msg = write_msg();
        msg.as_object_mut().unwrap().remove(removed);

        assert_eq!(command_request(&msg).unwrap_err().status_text(), status);
    }

    #[test]
    fn empty_command_is_missing() {
        let mut msg = write_msg();
        msg["command"] = json!("");

        assert_matches!(
            command_request(&msg),
            Err(ValidationError::Missing(Field::Command))
        );
    }

    #[test]
    fn validation_messages() {
        assert_eq!(
            ValidationError::Missing(Field::DeviceId).to_string(),
            "No deviceId provided"
        );
        assert_eq!(
            installation_id(&json!({"installationId": 0}))
                .unwrap_err()
                .to_string(),
            "Invalid installationId. Must be a positive integer."
        );
    }
}
