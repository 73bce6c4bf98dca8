/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/config.rs
*
* The CloudFront distribution configuration this operator manages, as a
* plain comparable value, and the rules for deriving it from a Distribution.
*
* Only fields the operator derives are modelled. The live configuration is
* mapped into the same shape before comparison, so settings changed outside
* the operator on unmodelled fields never register as drift.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::ResourceExt;

use crate::config::MANAGED_BY_COMMENT;
use crate::crds::{CloudFrontClassSpec, Distribution, TlsMode};
use crate::resolvers::ResolvedOrigin;

pub const HTTP_VERSION: &str = "http2";
pub const PRICE_CLASS: &str = "PriceClass_All";
pub const ORIGIN_PROTOCOL_POLICY: &str = "match-viewer";
pub const ORIGIN_SSL_PROTOCOL: &str = "TLSv1.2";
pub const ORIGIN_CONNECTION_ATTEMPTS: i32 = 3;
pub const ORIGIN_CONNECTION_TIMEOUT: i32 = 10;
pub const ORIGIN_READ_TIMEOUT: i32 = 30;
pub const ORIGIN_KEEPALIVE_TIMEOUT: i32 = 30;

pub const ACM_MINIMUM_PROTOCOL: &str = "TLSv1.2_2021";
pub const DEFAULT_MINIMUM_PROTOCOL: &str = "TLSv1";

pub const FORWARDED_HOST_HEADER: &str = "Host";
pub const COOKIES_NONE: &str = "none";
pub const MIN_TTL: i64 = 0;
pub const DEFAULT_TTL: i64 = 86_400;
pub const MAX_TTL: i64 = 31_536_000;

const BASE_METHODS: [&str; 2] = ["HEAD", "GET"];
const ALL_METHODS: [&str; 6] = ["HEAD", "GET", "OPTIONS", "POST", "PUT", "DELETE"];
const CACHEABLE_METHODS: [&str; 3] = ["HEAD", "GET", "OPTIONS"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionConfig {
    pub caller_reference: String,
    pub comment: String,
    pub enabled: bool,
    pub aliases: Vec<String>,
    pub ipv6_enabled: bool,
    pub http_version: String,
    pub price_class: String,
    pub origin: OriginConfig,
    pub default_cache_behavior: CacheBehavior,
    pub viewer_certificate: ViewerCertificate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginConfig {
    pub id: String,
    pub domain_name: String,
    pub http_port: i32,
    pub https_port: i32,
    pub protocol_policy: String,
    pub ssl_protocols: Vec<String>,
    pub read_timeout: i32,
    pub keepalive_timeout: i32,
    pub connection_attempts: i32,
    pub connection_timeout: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheBehavior {
    pub target_origin_id: String,
    pub viewer_protocol_policy: String,
    pub allowed_methods: Vec<String>,
    pub cached_methods: Vec<String>,
    pub compress: bool,
    pub cache_policy_id: Option<String>,
    pub origin_request_policy_id: Option<String>,
    /// Legacy cache settings; only present without a cache policy.
    pub forwarding: Option<Forwarding>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forwarding {
    pub headers: Vec<String>,
    pub query_string: bool,
    pub cookies: String,
    pub min_ttl: i64,
    pub default_ttl: i64,
    pub max_ttl: i64,
}

impl Default for Forwarding {
    fn default() -> Self {
        Self {
            headers: vec![FORWARDED_HOST_HEADER.to_string()],
            query_string: true,
            cookies: COOKIES_NONE.to_string(),
            min_ttl: MIN_TTL,
            default_ttl: DEFAULT_TTL,
            max_ttl: MAX_TTL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateSource {
    CloudFrontDefault,
    Acm {
        certificate_arn: String,
        ssl_support_method: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewerCertificate {
    pub source: CertificateSource,
    pub minimum_protocol_version: String,
}

/// Allowed and cached methods. CloudFront only accepts three fixed sets,
/// so the request is widened to the smallest one covering it.
pub fn methods(requested: &[String]) -> (Vec<String>, Vec<String>) {
    let to_vec = |m: &[&str]| m.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut methods = to_vec(&BASE_METHODS);
    for method in requested {
        match method.to_ascii_uppercase().as_str() {
            "OPTIONS" => {
                if !methods.iter().any(|m| m == "OPTIONS") {
                    methods.push("OPTIONS".to_string());
                }
            }
            "POST" | "PUT" | "DELETE" => {
                return (to_vec(&ALL_METHODS), to_vec(&CACHEABLE_METHODS));
            }
            _ => {}
        }
    }

    (methods.clone(), methods)
}

pub fn viewer_protocol_policy(distribution: &Distribution) -> &'static str {
    match distribution.spec.tls.as_ref().map(|tls| tls.mode) {
        None | Some(TlsMode::Both) => "allow-all",
        Some(TlsMode::Only) => "https-only",
        Some(TlsMode::Redirect) => "redirect-to-https",
    }
}

pub fn viewer_certificate(class: &CloudFrontClassSpec, certificate_arn: Option<&str>) -> ViewerCertificate {
    match certificate_arn {
        Some(arn) => ViewerCertificate {
            source: CertificateSource::Acm {
                certificate_arn: arn.to_string(),
                ssl_support_method: class.ssl_mode.as_str().to_string(),
            },
            minimum_protocol_version: ACM_MINIMUM_PROTOCOL.to_string(),
        },
        None => ViewerCertificate {
            source: CertificateSource::CloudFrontDefault,
            minimum_protocol_version: DEFAULT_MINIMUM_PROTOCOL.to_string(),
        },
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Builds the configuration CloudFront should hold for `distribution`.
///
/// `certificate_arn` is the imported certificate to serve, if any.
pub fn desired_config(
    class: &CloudFrontClassSpec,
    distribution: &Distribution,
    origin: &ResolvedOrigin,
    certificate_arn: Option<&str>,
    enabled: bool,
) -> DistributionConfig {
    let requested = if class.supported_methods.is_empty() {
        &distribution.spec.supported_methods
    } else {
        &class.supported_methods
    };
    let (allowed_methods, cached_methods) = methods(requested);

    let cache_policy_id = non_empty(&class.cache_policy_id);
    let forwarding = match cache_policy_id {
        Some(_) => None,
        None => Some(Forwarding::default()),
    };

    DistributionConfig {
        caller_reference: distribution.uid().unwrap_or_default(),
        comment: MANAGED_BY_COMMENT.to_string(),
        enabled,
        aliases: distribution.spec.hosts.clone(),
        ipv6_enabled: true,
        http_version: HTTP_VERSION.to_string(),
        price_class: PRICE_CLASS.to_string(),
        origin: OriginConfig {
            id: origin.host.clone(),
            domain_name: origin.host.clone(),
            http_port: origin.http_port,
            https_port: origin.https_port,
            protocol_policy: ORIGIN_PROTOCOL_POLICY.to_string(),
            ssl_protocols: vec![ORIGIN_SSL_PROTOCOL.to_string()],
            read_timeout: ORIGIN_READ_TIMEOUT,
            keepalive_timeout: ORIGIN_KEEPALIVE_TIMEOUT,
            connection_attempts: ORIGIN_CONNECTION_ATTEMPTS,
            connection_timeout: ORIGIN_CONNECTION_TIMEOUT,
        },
        default_cache_behavior: CacheBehavior {
            target_origin_id: origin.host.clone(),
            viewer_protocol_policy: viewer_protocol_policy(distribution).to_string(),
            allowed_methods,
            cached_methods,
            compress: true,
            cache_policy_id,
            origin_request_policy_id: non_empty(&class.origin_request_policy_id),
            forwarding,
        },
        viewer_certificate: viewer_certificate(class, certificate_arn),
    }
}
