/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the Rust data structures that correspond to the Custom
* Resource Definitions served by the CDN operator. By using the
* `kube::CustomResource` derive macro, we create a strongly-typed
* representation of the `cdn.redcoat.dev` API.
*
* Architecture:
* - `Distribution` is the primary resource. Its `spec` describes the desired
*   CDN-fronted origin; its `status` is owned by the distribution controller
*   and records the external ids and endpoints of every provider.
* - `DistributionClass` (namespaced) and `ClusterDistributionClass`
*   (cluster-scoped) hold reusable provider configuration. They share one
*   provider list; the cluster variant converts into the namespaced spec so
*   that the rest of the operator only ever deals with `DistributionClassSpec`.
* - Provider-specific configuration lives in the `cloudfront` submodule.
* - `serde` attributes map between Rust `snake_case` and Kubernetes
*   `camelCase`; `schemars` generates the OpenAPI v3 schema.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod cloudfront;

pub use cloudfront::{AwsAuth, AwsJwtAuth, CloudFrontClassSpec, NamespacedName, SslMode};

// --- Shared reference types ---

/// Reference to another object by kind and name.
///
/// For origin targets and namespaced classes the object lives in the same
/// namespace as the Distribution.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
}

impl ObjectReference {
    pub fn new(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

// --- Distribution Custom Resource Definition ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "cdn.redcoat.dev",
    version = "v1alpha1",
    kind = "Distribution",
    namespaced,
    status = "DistributionStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".status.endpoints[0].host"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "distro"
)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSpec {
    /// The (Cluster)DistributionClass providing the CDN configuration.
    pub distribution_class: ObjectReference,
    /// Where uncached requests are forwarded to.
    pub origin: Origin,
    /// The hostnames the distribution answers for.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
    /// HTTP methods to support. CDN providers only offer fixed subsets, so
    /// more methods than requested may end up being allowed.
    #[serde(default)]
    pub supported_methods: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    /// A Service or Ingress in the same namespace whose load balancer is
    /// used as the origin host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<ObjectReference>,
    /// Explicit origin host. Always wins over a discovered one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<ServicePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<ServicePort>,
}

/// A port given either by number or by the name of a Service port.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub mode: TlsMode,
    /// Name of a `kubernetes.io/tls` Secret in the Distribution's namespace.
    pub secret_name: String,
}

/// How plain HTTP viewers are treated once TLS is configured.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Redirect HTTP to HTTPS.
    #[default]
    Redirect,
    /// Drop HTTP requests.
    Only,
    /// Serve both HTTP and HTTPS.
    Both,
}

/// The observed state of a Distribution.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStatus {
    #[serde(default)]
    pub ready: bool,
    /// One endpoint per provider.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_certificate_id: Option<String>,
    /// Provider state as reported by the remote API (eg "Deployed").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_status: Option<String>,
    /// Why the Distribution is not ready, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Where a provider serves the distribution from. A host, an ip or both,
/// always naming the same resource.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl DistributionStatus {
    pub fn endpoint_for(&self, provider: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.provider == provider)
    }

    /// Replaces the endpoint owned by `provider`, keeping every other
    /// provider's entry in place.
    pub fn set_endpoint(&mut self, provider: &str, endpoint: Option<Endpoint>) {
        self.endpoints.retain(|e| e.provider != provider);
        if let Some(endpoint) = endpoint {
            self.endpoints.push(endpoint);
        }
    }
}

// --- DistributionClass / ClusterDistributionClass ---

/// Per-provider settings. At least one provider should be present.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudfront: Option<CloudFrontClassSpec>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[kube(
    group = "cdn.redcoat.dev",
    version = "v1alpha1",
    kind = "DistributionClass",
    namespaced,
    shortname = "distroclass"
)]
#[serde(rename_all = "camelCase")]
pub struct DistributionClassSpec {
    pub providers: ProviderList,
}

/// Cluster-wide variant of `DistributionClass`; referencable from any
/// namespace.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[kube(
    group = "cdn.redcoat.dev",
    version = "v1alpha1",
    kind = "ClusterDistributionClass",
    shortname = "cdistroclass"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDistributionClassSpec {
    pub providers: ProviderList,
}

impl From<ClusterDistributionClassSpec> for DistributionClassSpec {
    fn from(spec: ClusterDistributionClassSpec) -> Self {
        Self {
            providers: spec.providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_endpoint_replaces_only_the_named_provider() {
        let mut status = DistributionStatus {
            endpoints: vec![
                Endpoint {
                    provider: "cloudfront".into(),
                    host: Some("old.cloudfront.net".into()),
                    ip: None,
                },
                Endpoint {
                    provider: "other".into(),
                    host: None,
                    ip: Some("10.0.0.1".into()),
                },
            ],
            ..Default::default()
        };

        status.set_endpoint(
            "cloudfront",
            Some(Endpoint {
                provider: "cloudfront".into(),
                host: Some("new.cloudfront.net".into()),
                ip: None,
            }),
        );

        assert_eq!(status.endpoints.len(), 2);
        assert_eq!(
            status.endpoint_for("cloudfront").and_then(|e| e.host.as_deref()),
            Some("new.cloudfront.net")
        );
        assert!(status.endpoint_for("other").is_some());

        status.set_endpoint("cloudfront", None);
        assert!(status.endpoint_for("cloudfront").is_none());
        assert_eq!(status.endpoints.len(), 1);
    }

    #[test]
    fn spec_deserializes_from_camel_case() {
        let spec: DistributionSpec = serde_json::from_value(serde_json::json!({
            "distributionClass": {"kind": "ClusterDistributionClass", "name": "default"},
            "origin": {
                "targetRef": {"kind": "Service", "name": "web"},
                "httpPort": {"name": "http"},
                "httpsPort": {"number": 8443}
            },
            "hosts": ["www.example.com"],
            "tls": {"secretName": "www-tls"},
            "supportedMethods": ["GET", "OPTIONS"]
        }))
        .unwrap();

        assert_eq!(spec.distribution_class.kind, "ClusterDistributionClass");
        assert_eq!(spec.origin.https_port.unwrap().number, Some(8443));
        let tls = spec.tls.unwrap();
        assert_eq!(tls.mode, TlsMode::Redirect);
        assert_eq!(tls.secret_name, "www-tls");
    }
}
