//! Hosted zones, certificates and DNS records.
//!
//! Zones and certificates are owned outside this project and referenced by
//! identifier; records are declared here.

use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::template::{Arn, Resource, Scope, Stack};

/// Default record TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1800);

/// An existing public hosted zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZone {
    pub zone_id: String,
    pub zone_name: String,
}

impl HostedZone {
    pub fn from_attributes(zone_id: impl Into<String>, zone_name: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            zone_name: zone_name.into(),
        }
    }

    /// Fully qualified name for a record in this zone.
    ///
    /// `api` becomes `api.<zone>.`; names already under the zone are only
    /// given the trailing dot.
    pub fn qualify(&self, record_name: &str) -> String {
        let record_name = record_name.trim_end_matches('.');
        let zone = self.zone_name.trim_end_matches('.');
        if record_name.is_empty() {
            format!("{}.", zone)
        } else if record_name == zone || record_name.ends_with(&format!(".{}", zone)) {
            format!("{}.", record_name)
        } else {
            format!("{}.{}.", record_name, zone)
        }
    }
}

/// An existing ACM certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct Certificate {
    pub arn: Value,
}

impl Certificate {
    /// Certificate in the deploying account and region.
    pub fn from_id(certificate_id: &str) -> Self {
        Self {
            arn: Arn::new("acm", "certificate").resource_name(certificate_id).build(),
        }
    }

    pub fn from_arn(arn: impl Into<Value>) -> Self {
        Self { arn: arn.into() }
    }
}

/// Declares a `CNAME` record pointing `record_name` at `target`.
pub fn cname_record(
    stack: &mut Stack,
    scope: &Scope,
    zone: &HostedZone,
    record_name: &str,
    target: Value,
    ttl: Duration,
) -> Result<String> {
    record(stack, scope, zone, "CNAME", zone.qualify(record_name), vec![target], ttl)
}

/// Declares an `A` record. An empty `record_name` targets the zone apex.
pub fn a_record(
    stack: &mut Stack,
    scope: &Scope,
    zone: &HostedZone,
    record_name: &str,
    addresses: &[&str],
    ttl: Duration,
) -> Result<String> {
    let targets = addresses.iter().map(|a| Value::from(*a)).collect();
    record(stack, scope, zone, "A", zone.qualify(record_name), targets, ttl)
}

fn record(
    stack: &mut Stack,
    scope: &Scope,
    zone: &HostedZone,
    record_type: &str,
    name: String,
    targets: Vec<Value>,
    ttl: Duration,
) -> Result<String> {
    let resource = Resource::new("AWS::Route53::RecordSet")
        .property("HostedZoneId", zone.zone_id.clone())
        .property("Name", name)
        .property("ResourceRecords", targets)
        .property("TTL", ttl.as_secs().to_string())
        .property("Type", record_type);
    stack.declare(scope, resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::intrinsic::get_att;
    use serde_json::json;

    fn zone() -> HostedZone {
        HostedZone::from_attributes("Z0039617ZTGC84RIQHA5", "pits.philcali.me")
    }

    #[test]
    fn test_qualify() {
        let zone = zone();
        assert_eq!(zone.qualify("api"), "api.pits.philcali.me.");
        assert_eq!(zone.qualify("api.pits.philcali.me"), "api.pits.philcali.me.");
        assert_eq!(zone.qualify(""), "pits.philcali.me.");
        assert_eq!(zone.qualify("pits.philcali.me."), "pits.philcali.me.");
    }

    #[test]
    fn test_cname_record() {
        let mut stack = Stack::new("Test");
        let id = cname_record(
            &mut stack,
            &Scope::new("Console").child("DistributionCNAME1"),
            &zone(),
            "console.pits.philcali.me",
            get_att("Distribution", "DomainName"),
            Duration::from_secs(300),
        )
        .unwrap();

        let record = stack.resource(&id).unwrap();
        assert_eq!(record.properties["Type"], "CNAME");
        assert_eq!(record.properties["TTL"], "300");
        assert_eq!(record.properties["Name"], "console.pits.philcali.me.");
        assert_eq!(
            record.properties["ResourceRecords"],
            json!([get_att("Distribution", "DomainName")])
        );
    }

    #[test]
    fn test_apex_a_record() {
        let mut stack = Stack::new("Test");
        let id = a_record(&mut stack, &Scope::new("Apex"), &zone(), "", &["198.51.100.1"], DEFAULT_TTL).unwrap();
        let record = stack.resource(&id).unwrap();
        assert_eq!(record.properties["Name"], "pits.philcali.me.");
        assert_eq!(record.properties["TTL"], "1800");
    }

    #[test]
    fn test_certificate_arn() {
        let certificate = Certificate::from_id("a8492ec1-ec0e-42e2-b782-2491a6e8c5f1");
        let parts = certificate.arn["Fn::Join"][1].as_array().unwrap();
        assert_eq!(
            parts.last().unwrap(),
            &json!(":certificate/a8492ec1-ec0e-42e2-b782-2491a6e8c5f1")
        );
    }
}
