use url::Url;

use super::params::{DeviceAddress, GatewayAddress};
use crate::executor::RequestError;

const EQUIPMENT: &[&str] = &["iot", "v2", "equipment"];
const FEATURES: &[&str] = &["iot", "v2", "features"];

/// URL templates of the resource and command endpoints, rooted at the API base URL.
///
/// Path parameters are appended as percent-encoded segments.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base_url: Url,
}

impl Endpoints {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn installations(&self) -> Result<Url, RequestError> {
        let mut url = self.base_url.clone();
        push(&mut url, EQUIPMENT)?;
        push(&mut url, &["installations"])?;
        Ok(url)
    }

    pub fn gateways(&self, installation_id: u64) -> Result<Url, RequestError> {
        let mut url = self.installation(EQUIPMENT, installation_id)?;
        push(&mut url, &["gateways"])?;
        Ok(url)
    }

    pub fn devices(&self, gateway: &GatewayAddress) -> Result<Url, RequestError> {
        let mut url = self.installation(EQUIPMENT, gateway.installation_id)?;
        push(&mut url, &["gateways", &gateway.gateway_serial, "devices"])?;
        Ok(url)
    }

    pub fn features(&self, device: &DeviceAddress) -> Result<Url, RequestError> {
        let mut url = self.device(EQUIPMENT, device)?;
        push(&mut url, &["features"])?;
        Ok(url)
    }

    pub fn feature(&self, device: &DeviceAddress, feature: &str) -> Result<Url, RequestError> {
        let mut url = self.device(EQUIPMENT, device)?;
        push(&mut url, &["features", feature])?;
        Ok(url)
    }

    /// Command endpoint of IoT API v2, rooted at `/iot/v2/features` rather than the
    /// `/iot/v2/equipment` tree the reads use.
    pub fn command(
        &self,
        device: &DeviceAddress,
        feature: &str,
        command: &str,
    ) -> Result<Url, RequestError> {
        let mut url = self.device(FEATURES, device)?;
        push(&mut url, &["features", feature, "commands", command])?;
        Ok(url)
    }

    fn installation(&self, root: &[&str], installation_id: u64) -> Result<Url, RequestError> {
        let mut url = self.base_url.clone();
        push(&mut url, root)?;
        push(&mut url, &["installations", &installation_id.to_string()])?;
        Ok(url)
    }

    fn device(&self, root: &[&str], device: &DeviceAddress) -> Result<Url, RequestError> {
        let gateway = &device.gateway;
        let mut url = self.installation(root, gateway.installation_id)?;
        push(
            &mut url,
            &[
                "gateways",
                &gateway.gateway_serial,
                "devices",
                &device.device_id,
            ],
        )?;
        Ok(url)
    }
}

fn push(url: &mut Url, segments: &[&str]) -> Result<(), RequestError> {
    let invalid = RequestError::InvalidRequest(format!("{url} cannot be a base URL"));
    url.path_segments_mut()
        .map_err(|_| invalid)?
        .pop_if_empty()
        .extend(segments);
    Ok(())
}
