/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/client.rs
*
* The narrow slice of the CloudFront and ACM APIs the sub-providers use,
* expressed in this crate's own types, plus the AWS SDK implementations.
*
* SDK errors are classified here so the sub-providers only ever see the
* crate `Error`: a missing object becomes `NotFound`, a caller-reference
* collision becomes `Conflict` carrying the id of the existing
* distribution, anything else is a `Provider` error.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::fmt::Debug;

use async_trait::async_trait;
use aws_sdk_acm::primitives::Blob;
use aws_sdk_cloudfront::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudfront::types as cf;
use lazy_static::lazy_static;
use regex::Regex;

use super::config::{
    CacheBehavior, CertificateSource, DistributionConfig, Forwarding, OriginConfig,
    ViewerCertificate,
};
use crate::config::CLOUDFRONT_PROVIDER;
use crate::error::Error;
use crate::metrics::REMOTE_CALLS;
use crate::resolvers::Certificate;

lazy_static! {
    static ref DISTRIBUTION_ID: Regex = Regex::new(r"[A-Z0-9]{14}").unwrap();
}

/// A distribution as CloudFront currently holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveDistribution {
    pub id: String,
    pub domain_name: String,
    /// "Deployed" or "InProgress".
    pub status: String,
    /// Concurrency token for conditional updates and deletes.
    pub etag: String,
    pub config: DistributionConfig,
}

#[async_trait]
pub trait DistributionApi: Send + Sync {
    async fn get_distribution(&self, id: &str) -> Result<LiveDistribution, Error>;

    async fn create_distribution(&self, config: &DistributionConfig) -> Result<LiveDistribution, Error>;

    async fn update_distribution(
        &self,
        id: &str,
        if_match: &str,
        config: &DistributionConfig,
    ) -> Result<LiveDistribution, Error>;

    async fn delete_distribution(&self, id: &str, if_match: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait CertificateApi: Send + Sync {
    /// Returns the PEM of the leaf certificate stored under `arn`.
    async fn get_certificate(&self, arn: &str) -> Result<String, Error>;

    /// Imports `certificate`, replacing the object at `arn` when given.
    /// Returns the ARN of the imported certificate.
    async fn import_certificate(
        &self,
        certificate: &Certificate,
        arn: Option<&str>,
    ) -> Result<String, Error>;

    async fn delete_certificate(&self, arn: &str) -> Result<(), Error>;
}

fn record(operation: &str) {
    REMOTE_CALLS
        .with_label_values(&[CLOUDFRONT_PROVIDER, operation])
        .inc();
}

fn remote_error<E, R>(operation: &str, err: &SdkError<E, R>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    Error::provider(
        CLOUDFRONT_PROVIDER,
        format!("{} failed: {}", operation, DisplayErrorContext(err)),
    )
}

fn not_found(id: &str) -> Error {
    Error::NotFound {
        provider: CLOUDFRONT_PROVIDER,
        id: id.to_string(),
    }
}

/// Picks the id of the existing distribution out of a
/// DistributionAlreadyExists message.
pub fn conflicting_id(message: &str) -> Option<&str> {
    DISTRIBUTION_ID.find(message).map(|m| m.as_str())
}

// --- CloudFront ---

pub struct SdkDistributionApi {
    client: aws_sdk_cloudfront::Client,
}

impl SdkDistributionApi {
    pub fn new(client: aws_sdk_cloudfront::Client) -> Self {
        Self { client }
    }
}

fn live(distribution: Option<&cf::Distribution>, etag: Option<&str>) -> Result<LiveDistribution, Error> {
    let distribution = distribution
        .ok_or_else(|| Error::provider(CLOUDFRONT_PROVIDER, "response carried no distribution"))?;
    let config = distribution.distribution_config().ok_or_else(|| {
        Error::provider(
            CLOUDFRONT_PROVIDER,
            format!("distribution {} has no configuration", distribution.id()),
        )
    })?;

    Ok(LiveDistribution {
        id: distribution.id().to_string(),
        domain_name: distribution.domain_name().to_string(),
        status: distribution.status().to_string(),
        etag: etag.unwrap_or_default().to_string(),
        config: from_sdk(config),
    })
}

#[async_trait]
impl DistributionApi for SdkDistributionApi {
    async fn get_distribution(&self, id: &str) -> Result<LiveDistribution, Error> {
        record("get_distribution");
        let output = self
            .client
            .get_distribution()
            .id(id)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_distribution() => not_found(id),
                _ => remote_error("GetDistribution", &err),
            })?;

        live(output.distribution(), output.e_tag())
    }

    async fn create_distribution(&self, config: &DistributionConfig) -> Result<LiveDistribution, Error> {
        record("create_distribution");
        let output = self
            .client
            .create_distribution()
            .distribution_config(to_sdk(config)?)
            .send()
            .await
            .map_err(|err| {
                if let Some(e) = err.as_service_error() {
                    if e.is_distribution_already_exists() {
                        let message = e.message().unwrap_or_default();
                        if let Some(id) = conflicting_id(message) {
                            return Error::Conflict {
                                provider: CLOUDFRONT_PROVIDER,
                                id: id.to_string(),
                                message: message.to_string(),
                            };
                        }
                    }
                }
                remote_error("CreateDistribution", &err)
            })?;

        live(output.distribution(), output.e_tag())
    }

    async fn update_distribution(
        &self,
        id: &str,
        if_match: &str,
        config: &DistributionConfig,
    ) -> Result<LiveDistribution, Error> {
        record("update_distribution");
        let output = self
            .client
            .update_distribution()
            .id(id)
            .if_match(if_match)
            .distribution_config(to_sdk(config)?)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_distribution() => not_found(id),
                _ => remote_error("UpdateDistribution", &err),
            })?;

        live(output.distribution(), output.e_tag())
    }

    async fn delete_distribution(&self, id: &str, if_match: &str) -> Result<(), Error> {
        record("delete_distribution");
        self.client
            .delete_distribution()
            .id(id)
            .if_match(if_match)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_no_such_distribution() => not_found(id),
                _ => remote_error("DeleteDistribution", &err),
            })?;
        Ok(())
    }
}

fn build<T>(result: Result<T, BuildError>) -> Result<T, Error> {
    result.map_err(|e| {
        Error::provider(
            CLOUDFRONT_PROVIDER,
            format!("invalid distribution config: {}", e),
        )
    })
}

fn methods(items: &[String]) -> Vec<cf::Method> {
    items.iter().map(|m| cf::Method::from(m.as_str())).collect()
}

fn to_sdk(config: &DistributionConfig) -> Result<cf::DistributionConfig, Error> {
    let origin = &config.origin;
    let ssl_protocols = build(
        cf::OriginSslProtocols::builder()
            .quantity(origin.ssl_protocols.len() as i32)
            .set_items(Some(
                origin
                    .ssl_protocols
                    .iter()
                    .map(|p| cf::SslProtocol::from(p.as_str()))
                    .collect(),
            ))
            .build(),
    )?;
    let custom_origin = build(
        cf::CustomOriginConfig::builder()
            .http_port(origin.http_port)
            .https_port(origin.https_port)
            .origin_protocol_policy(cf::OriginProtocolPolicy::from(origin.protocol_policy.as_str()))
            .origin_ssl_protocols(ssl_protocols)
            .origin_read_timeout(origin.read_timeout)
            .origin_keepalive_timeout(origin.keepalive_timeout)
            .build(),
    )?;
    let origins = build(
        cf::Origins::builder()
            .quantity(1)
            .items(build(
                cf::Origin::builder()
                    .id(&origin.id)
                    .domain_name(&origin.domain_name)
                    .origin_path("")
                    .custom_origin_config(custom_origin)
                    .connection_attempts(origin.connection_attempts)
                    .connection_timeout(origin.connection_timeout)
                    .build(),
            )?)
            .build(),
    )?;

    let behavior = &config.default_cache_behavior;
    let cached_methods = build(
        cf::CachedMethods::builder()
            .quantity(behavior.cached_methods.len() as i32)
            .set_items(Some(methods(&behavior.cached_methods)))
            .build(),
    )?;
    let allowed_methods = build(
        cf::AllowedMethods::builder()
            .quantity(behavior.allowed_methods.len() as i32)
            .set_items(Some(methods(&behavior.allowed_methods)))
            .cached_methods(cached_methods)
            .build(),
    )?;

    let mut cache_behavior = cf::DefaultCacheBehavior::builder()
        .target_origin_id(&behavior.target_origin_id)
        .viewer_protocol_policy(cf::ViewerProtocolPolicy::from(
            behavior.viewer_protocol_policy.as_str(),
        ))
        .allowed_methods(allowed_methods)
        .compress(behavior.compress)
        .set_cache_policy_id(behavior.cache_policy_id.clone())
        .set_origin_request_policy_id(behavior.origin_request_policy_id.clone());
    if let Some(forwarding) = &behavior.forwarding {
        cache_behavior = cache_behavior
            .forwarded_values(forwarded_values(forwarding)?)
            .min_ttl(forwarding.min_ttl)
            .default_ttl(forwarding.default_ttl)
            .max_ttl(forwarding.max_ttl);
    }

    let aliases = build(
        cf::Aliases::builder()
            .quantity(config.aliases.len() as i32)
            .set_items(Some(config.aliases.clone()).filter(|a| !a.is_empty()))
            .build(),
    )?;

    build(
        cf::DistributionConfig::builder()
            .caller_reference(&config.caller_reference)
            .comment(&config.comment)
            .enabled(config.enabled)
            .aliases(aliases)
            .is_ipv6_enabled(config.ipv6_enabled)
            .http_version(cf::HttpVersion::from(config.http_version.as_str()))
            .price_class(cf::PriceClass::from(config.price_class.as_str()))
            .origins(origins)
            .default_cache_behavior(build(cache_behavior.build())?)
            .viewer_certificate(viewer_certificate(&config.viewer_certificate))
            .build(),
    )
}

fn forwarded_values(forwarding: &Forwarding) -> Result<cf::ForwardedValues, Error> {
    build(
        cf::ForwardedValues::builder()
            .query_string(forwarding.query_string)
            .cookies(build(
                cf::CookiePreference::builder()
                    .forward(cf::ItemSelection::from(forwarding.cookies.as_str()))
                    .build(),
            )?)
            .headers(build(
                cf::Headers::builder()
                    .quantity(forwarding.headers.len() as i32)
                    .set_items(Some(forwarding.headers.clone()))
                    .build(),
            )?)
            .query_string_cache_keys(build(cf::QueryStringCacheKeys::builder().quantity(0).build())?)
            .build(),
    )
}

fn viewer_certificate(certificate: &ViewerCertificate) -> cf::ViewerCertificate {
    let builder = cf::ViewerCertificate::builder().minimum_protocol_version(
        cf::MinimumProtocolVersion::from(certificate.minimum_protocol_version.as_str()),
    );
    match &certificate.source {
        CertificateSource::Acm {
            certificate_arn,
            ssl_support_method,
        } => builder
            .cloud_front_default_certificate(false)
            .acm_certificate_arn(certificate_arn)
            .ssl_support_method(cf::SslSupportMethod::from(ssl_support_method.as_str())),
        CertificateSource::CloudFrontDefault => builder.cloud_front_default_certificate(true),
    }
    .build()
}

/// Maps a live configuration onto the managed fields only.
fn from_sdk(config: &cf::DistributionConfig) -> DistributionConfig {
    let origin = config.origins().and_then(|o| o.items().first());
    let custom = origin.and_then(|o| o.custom_origin_config());
    let behavior = config.default_cache_behavior();
    let allowed = behavior.and_then(|b| b.allowed_methods());
    let viewer = config.viewer_certificate();

    let method_names = |items: &[cf::Method]| -> Vec<String> {
        items.iter().map(|m| m.as_str().to_string()).collect()
    };

    let forwarding = behavior.and_then(|b| {
        b.forwarded_values().map(|f| Forwarding {
            headers: f.headers().map(|h| h.items().to_vec()).unwrap_or_default(),
            query_string: f.query_string(),
            cookies: f
                .cookies()
                .map(|c| c.forward().as_str().to_string())
                .unwrap_or_default(),
            min_ttl: b.min_ttl().unwrap_or_default(),
            default_ttl: b.default_ttl().unwrap_or_default(),
            max_ttl: b.max_ttl().unwrap_or_default(),
        })
    });

    let source = match viewer.and_then(|v| v.acm_certificate_arn()) {
        Some(arn) if !viewer.and_then(|v| v.cloud_front_default_certificate()).unwrap_or(false) => {
            CertificateSource::Acm {
                certificate_arn: arn.to_string(),
                ssl_support_method: viewer
                    .and_then(|v| v.ssl_support_method())
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            }
        }
        _ => CertificateSource::CloudFrontDefault,
    };

    DistributionConfig {
        caller_reference: config.caller_reference().to_string(),
        comment: config.comment().to_string(),
        enabled: config.enabled(),
        aliases: config
            .aliases()
            .map(|a| a.items().to_vec())
            .unwrap_or_default(),
        ipv6_enabled: config.is_ipv6_enabled().unwrap_or(false),
        http_version: config
            .http_version()
            .map(|v| v.as_str().to_string())
            .unwrap_or_default(),
        price_class: config
            .price_class()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default(),
        origin: OriginConfig {
            id: origin.map(|o| o.id().to_string()).unwrap_or_default(),
            domain_name: origin.map(|o| o.domain_name().to_string()).unwrap_or_default(),
            http_port: custom.map(|c| c.http_port()).unwrap_or_default(),
            https_port: custom.map(|c| c.https_port()).unwrap_or_default(),
            protocol_policy: custom
                .map(|c| c.origin_protocol_policy().as_str().to_string())
                .unwrap_or_default(),
            ssl_protocols: custom
                .and_then(|c| c.origin_ssl_protocols())
                .map(|p| p.items().iter().map(|s| s.as_str().to_string()).collect())
                .unwrap_or_default(),
            read_timeout: custom.and_then(|c| c.origin_read_timeout()).unwrap_or_default(),
            keepalive_timeout: custom
                .and_then(|c| c.origin_keepalive_timeout())
                .unwrap_or_default(),
            connection_attempts: origin.and_then(|o| o.connection_attempts()).unwrap_or_default(),
            connection_timeout: origin.and_then(|o| o.connection_timeout()).unwrap_or_default(),
        },
        default_cache_behavior: CacheBehavior {
            target_origin_id: behavior
                .map(|b| b.target_origin_id().to_string())
                .unwrap_or_default(),
            viewer_protocol_policy: behavior
                .map(|b| b.viewer_protocol_policy().as_str().to_string())
                .unwrap_or_default(),
            allowed_methods: allowed.map(|a| method_names(a.items())).unwrap_or_default(),
            cached_methods: allowed
                .and_then(|a| a.cached_methods())
                .map(|c| method_names(c.items()))
                .unwrap_or_default(),
            compress: behavior.and_then(|b| b.compress()).unwrap_or(false),
            cache_policy_id: behavior
                .and_then(|b| b.cache_policy_id())
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            origin_request_policy_id: behavior
                .and_then(|b| b.origin_request_policy_id())
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            forwarding,
        },
        viewer_certificate: ViewerCertificate {
            source,
            minimum_protocol_version: viewer
                .and_then(|v| v.minimum_protocol_version())
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        },
    }
}

// --- ACM ---

pub struct SdkCertificateApi {
    client: aws_sdk_acm::Client,
}

impl SdkCertificateApi {
    pub fn new(client: aws_sdk_acm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CertificateApi for SdkCertificateApi {
    async fn get_certificate(&self, arn: &str) -> Result<String, Error> {
        record("get_certificate");
        let output = self
            .client
            .get_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_resource_not_found_exception() => not_found(arn),
                _ => remote_error("GetCertificate", &err),
            })?;

        output
            .certificate()
            .map(str::to_string)
            .ok_or_else(|| Error::provider(CLOUDFRONT_PROVIDER, format!("certificate {} has no body", arn)))
    }

    async fn import_certificate(
        &self,
        certificate: &Certificate,
        arn: Option<&str>,
    ) -> Result<String, Error> {
        record("import_certificate");
        let output = self
            .client
            .import_certificate()
            .set_certificate_arn(arn.map(str::to_string))
            .certificate(Blob::new(certificate.leaf.encoded.as_bytes()))
            .private_key(Blob::new(certificate.key.encoded.as_bytes()))
            .set_certificate_chain(certificate.chain.as_ref().map(|c| Blob::new(c.as_bytes())))
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_resource_not_found_exception() => {
                    not_found(arn.unwrap_or_default())
                }
                _ => remote_error("ImportCertificate", &err),
            })?;

        output
            .certificate_arn()
            .map(str::to_string)
            .ok_or_else(|| Error::provider(CLOUDFRONT_PROVIDER, "import returned no certificate ARN"))
    }

    async fn delete_certificate(&self, arn: &str) -> Result<(), Error> {
        record("delete_certificate");
        self.client
            .delete_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(e) if e.is_resource_not_found_exception() => not_found(arn),
                _ => remote_error("DeleteCertificate", &err),
            })?;
        Ok(())
    }
}
