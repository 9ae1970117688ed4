//! Account endpoint lookups.
//!
//! IoT endpoints are assigned per account and region. They are resolved once
//! by a create-only external call; later convergence runs keep the cached
//! address because the call has no update action.

use serde_json::{json, Value};

use crate::aws::custom::{AwsCustomResource, AwsCustomResourceProps, ExternalCall, OnDelete, PhysicalResourceId};
use crate::aws::iam::PolicyStatement;
use crate::error::Result;
use crate::template::{Scope, Stack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// MQTT and shadow data plane (`iot:data-ats`)
    Data,
    /// Credentials provider used by role aliases (`iot:credentialProvider`)
    Credentials,
}

impl EndpointType {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointType::Data => "iot:data-ats",
            EndpointType::Credentials => "iot:credentialProvider",
        }
    }
}

/// A resolved IoT endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct IotEndpoint {
    pub endpoint_type: EndpointType,
    /// Hostname, resolved at convergence time
    pub address: Value,
}

impl IotEndpoint {
    /// Declares the lookup at `<scope><id>Address`.
    pub fn new(stack: &mut Stack, scope: &Scope, id: &str, endpoint_type: EndpointType) -> Result<Self> {
        let call = ExternalCall::new(
            "Iot",
            "describeEndpoint",
            PhysicalResourceId::of(format!("iot{}", id)),
        )
        .parameters(json!({ "endpointType": endpoint_type.as_str() }));

        let lookup = AwsCustomResource::new(
            stack,
            &scope.child(id).child("Address"),
            AwsCustomResourceProps::new(OnDelete::NoOp)
                .on_create(call)
                .statement(PolicyStatement::allow().action("iot:DescribeEndpoint").resource("*")),
        )?;

        Ok(Self {
            endpoint_type,
            address: lookup.get_response_field("endpointAddress"),
        })
    }

    pub fn data(stack: &mut Stack, scope: &Scope) -> Result<Self> {
        Self::new(stack, scope, "DataEndpoint", EndpointType::Data)
    }

    pub fn credentials(stack: &mut Stack, scope: &Scope) -> Result<Self> {
        Self::new(stack, scope, "CredentialEndpoint", EndpointType::Credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::intrinsic::get_att;
    use crate::testing::fixture_stack;

    #[test]
    fn test_data_endpoint() {
        let (mut stack, _assets) = fixture_stack("Test");
        let endpoint = IotEndpoint::data(&mut stack, &Scope::new("Device")).unwrap();

        assert_eq!(
            endpoint.address,
            get_att("DeviceDataEndpointAddress", "endpointAddress")
        );
        let lookup = stack.resource("DeviceDataEndpointAddress").unwrap();
        let create = lookup.properties["Create"].as_str().unwrap();
        assert!(create.contains("\"endpointType\":\"iot:data-ats\""));
        assert!(create.contains("\"physicalResourceId\":{\"id\":\"iotDataEndpoint\"}"));
        assert!(lookup.properties.get("Update").is_none());
        assert!(lookup.properties.get("Delete").is_none());
    }

    #[test]
    fn test_both_endpoints_share_provider() {
        let (mut stack, _assets) = fixture_stack("Test");
        let scope = Scope::new("Device");
        let data = IotEndpoint::data(&mut stack, &scope).unwrap();
        let credentials = IotEndpoint::credentials(&mut stack, &scope).unwrap();

        assert_ne!(data.address, credentials.address);
        assert_eq!(credentials.endpoint_type.as_str(), "iot:credentialProvider");
        assert_eq!(stack.resources_of_type("AWS::Lambda::Function").count(), 1);
        stack.validate().unwrap();
    }
}
