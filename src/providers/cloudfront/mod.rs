/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/mod.rs
*
* The CloudFront back-end. One Distribution maps to one CloudFront
* distribution and, when TLS is requested, one certificate imported into
* ACM (us-east-1). The certificate is reconciled first so its ARN can be
* written into the distribution's viewer certificate. On deletion the order
* is reversed: ACM refuses to delete a certificate that is still attached.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod auth;
pub mod certificate;
pub mod client;
pub mod config;
pub mod distribution;
#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use self::auth::ClientFactory;
use self::certificate::CertificateProvider;
use self::distribution::{DistributionProvider, STATE_DEPLOYED};
use super::{CdnProvider, Outcome, ProviderStatus};
use crate::config::{CLOUDFRONT_PROVIDER, KIND_CLUSTER_DISTRIBUTION_CLASS};
use crate::crds::{CloudFrontClassSpec, Distribution, DistributionClassSpec, DistributionStatus};
use crate::error::Error;
use crate::resolvers::{Certificate, ResolvedOrigin};

pub struct CloudFrontProvider {
    factory: Arc<dyn ClientFactory>,
}

impl CloudFrontProvider {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    fn class_spec(class: &DistributionClassSpec) -> Result<&CloudFrontClassSpec, Error> {
        class.providers.cloudfront.as_ref().ok_or_else(|| {
            Error::Validation("distribution class has no cloudfront configuration".to_string())
        })
    }

    /// Namespace that auth references resolve in; cluster classes carry
    /// their own.
    fn auth_namespace(distribution: &Distribution) -> Option<String> {
        if distribution.spec.distribution_class.kind == KIND_CLUSTER_DISTRIBUTION_CLASS {
            None
        } else {
            distribution.namespace()
        }
    }

    async fn converge(
        &self,
        spec: &CloudFrontClassSpec,
        distribution: &Distribution,
        origin: &ResolvedOrigin,
        certificate: Option<&Certificate>,
        delta: &mut ProviderStatus,
    ) -> Result<bool, Error> {
        let namespace = Self::auth_namespace(distribution);
        let clients = self
            .factory
            .clients(spec.auth.as_ref(), namespace.as_deref())
            .await?;

        if let Some(certificate) = certificate {
            CertificateProvider::new(clients.certificates.as_ref())
                .reconcile(certificate, delta)
                .await?;
        }

        // A recorded ARN is only served while the Distribution asks for TLS.
        let certificate_arn = certificate.and(delta.external_certificate_id.as_deref());
        let desired = config::desired_config(spec, distribution, origin, certificate_arn, true);

        DistributionProvider::new(clients.distributions.as_ref())
            .reconcile(&desired, delta)
            .await?;

        Ok(delta.external_status.as_deref() == Some(STATE_DEPLOYED))
    }

    async fn tear_down(
        &self,
        spec: &CloudFrontClassSpec,
        distribution: &Distribution,
        delta: &mut ProviderStatus,
    ) -> Result<bool, Error> {
        let namespace = Self::auth_namespace(distribution);
        let clients = self
            .factory
            .clients(spec.auth.as_ref(), namespace.as_deref())
            .await?;

        DistributionProvider::new(clients.distributions.as_ref())
            .delete(delta)
            .await?;

        if delta.external_id.is_some() {
            debug!("Distribution still exists; certificate cleanup deferred");
            return Ok(false);
        }

        CertificateProvider::new(clients.certificates.as_ref())
            .delete(delta)
            .await?;

        Ok(delta.external_certificate_id.is_none())
    }
}

#[async_trait]
impl CdnProvider for CloudFrontProvider {
    fn name(&self) -> &'static str {
        CLOUDFRONT_PROVIDER
    }

    fn wants(&self, class: &DistributionClassSpec) -> bool {
        class.providers.cloudfront.is_some()
    }

    fn has(&self, status: &DistributionStatus) -> bool {
        status.external_id.is_some() || status.external_certificate_id.is_some()
    }

    async fn reconcile(
        &self,
        class: &DistributionClassSpec,
        distribution: &Distribution,
        origin: &ResolvedOrigin,
        certificate: Option<&Certificate>,
        status: &DistributionStatus,
    ) -> Outcome {
        let mut delta = ProviderStatus::from_status(status, CLOUDFRONT_PROVIDER);
        let result = match Self::class_spec(class) {
            Ok(spec) => {
                self.converge(spec, distribution, origin, certificate, &mut delta)
                    .await
            }
            Err(e) => Err(e),
        };
        Outcome::from_result(delta, result)
    }

    async fn delete(
        &self,
        class: &DistributionClassSpec,
        distribution: &Distribution,
        status: &DistributionStatus,
    ) -> Outcome {
        let mut delta = ProviderStatus::from_status(status, CLOUDFRONT_PROVIDER);
        // A class that lost its cloudfront block still has to clean up what
        // was created under it; ambient credentials are the only option left.
        let fallback = CloudFrontClassSpec::default();
        let spec = class.providers.cloudfront.as_ref().unwrap_or(&fallback);
        let result = self.tear_down(spec, distribution, &mut delta).await;
        Outcome::from_result(delta, result)
    }
}
