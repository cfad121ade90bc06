use platform_http_client::{AccessToken, Device, DeviceId, Template, TemplateAttr};
use tracing::debug;

use super::{Step, StepError, StepFailure};
use crate::services::ResourceProvisioning;

pub(crate) const ATTR_LABEL: &str = "attr-1";
const TEMPLATE_LABEL: &str = "sample-template";
const DEVICE_LABEL: &str = "device-1";

/// Creates the single-attribute template and a device instantiating it,
/// returning the device identifier.
pub(crate) async fn sample_device(
    provisioning: &dyn ResourceProvisioning,
    token: &AccessToken,
) -> Result<DeviceId, StepError> {
    let template = Template {
        label: TEMPLATE_LABEL.to_owned(),
        attrs: vec![TemplateAttr::dynamic(ATTR_LABEL, "string")],
        id: None,
    };
    let created = provisioning
        .create_schema(&template, token)
        .await
        .map_err(|error| StepError::new(Step::CreateSchema, StepFailure::Provisioning(error)))?;
    let template_id = created.id.ok_or_else(|| {
        StepError::new(
            Step::CreateSchema,
            StepFailure::Provisioning("could not create a template".into()),
        )
    })?;
    debug!(%template_id, "template created");

    let device = Device {
        label: DEVICE_LABEL.to_owned(),
        templates: vec![template_id],
        attrs: None,
        id: None,
    };
    let created = provisioning
        .create_resource(&device, token)
        .await
        .map_err(|error| StepError::new(Step::CreateResource, StepFailure::Provisioning(error)))?;
    let device_id = created.id.ok_or_else(|| {
        StepError::new(
            Step::CreateResource,
            StepFailure::Provisioning("could not create the device".into()),
        )
    })?;
    debug!(%device_id, "device created");
    Ok(device_id)
}
