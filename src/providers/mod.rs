/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/mod.rs
*
* The contract every CDN back-end implements.
*
* Providers never mutate a Distribution's status directly. They are handed
* the status as it currently stands and return a `ProviderStatus` holding
* the fields they own; the distribution controller merges it back. This
* keeps ownership of the status with the controller while letting each
* provider report partial progress alongside an error.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod cloudfront;

use async_trait::async_trait;

use crate::crds::{Distribution, DistributionClassSpec, DistributionStatus, Endpoint};
use crate::error::Error;
use crate::resolvers::{Certificate, ResolvedOrigin};

/// The slice of `DistributionStatus` owned by one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderStatus {
    pub external_id: Option<String>,
    pub external_certificate_id: Option<String>,
    pub external_status: Option<String>,
    pub endpoint: Option<Endpoint>,
}

impl ProviderStatus {
    pub fn from_status(status: &DistributionStatus, provider: &str) -> Self {
        Self {
            external_id: status.external_id.clone(),
            external_certificate_id: status.external_certificate_id.clone(),
            external_status: status.external_status.clone(),
            endpoint: status.endpoint_for(provider).cloned(),
        }
    }

    /// Writes this provider's fields back, replacing its endpoint entry.
    pub fn merge_into(self, status: &mut DistributionStatus, provider: &str) {
        status.external_id = self.external_id;
        status.external_certificate_id = self.external_certificate_id;
        status.external_status = self.external_status;
        status.set_endpoint(provider, self.endpoint);
    }
}

/// What a provider pass achieved. `status` is always meaningful, even
/// when `error` is set.
#[derive(Debug)]
pub struct Outcome {
    pub status: ProviderStatus,
    /// Whether the remote side has converged.
    pub ready: bool,
    pub error: Option<Error>,
}

impl Outcome {
    pub fn done(status: ProviderStatus, ready: bool) -> Self {
        Self {
            status,
            ready,
            error: None,
        }
    }

    pub fn failed(status: ProviderStatus, error: Error) -> Self {
        Self {
            status,
            ready: false,
            error: Some(error),
        }
    }

    pub fn from_result(status: ProviderStatus, result: Result<bool, Error>) -> Self {
        match result {
            Ok(ready) => Self::done(status, ready),
            Err(err) => Self::failed(status, err),
        }
    }
}

/// A CDN back-end. Adding one means implementing this trait and
/// registering it with the controller context.
#[async_trait]
pub trait CdnProvider: Send + Sync {
    /// Identifier written into `Endpoint::provider`.
    fn name(&self) -> &'static str;

    /// True if the class carries configuration for this provider.
    fn wants(&self, class: &DistributionClassSpec) -> bool;

    /// True while this provider may still hold external state.
    fn has(&self, status: &DistributionStatus) -> bool;

    async fn reconcile(
        &self,
        class: &DistributionClassSpec,
        distribution: &Distribution,
        origin: &ResolvedOrigin,
        certificate: Option<&Certificate>,
        status: &DistributionStatus,
    ) -> Outcome;

    /// Tears down external state. `Outcome::ready` is unused here;
    /// callers check `has` on the merged status instead.
    async fn delete(
        &self,
        class: &DistributionClassSpec,
        distribution: &Distribution,
        status: &DistributionStatus,
    ) -> Outcome;
}
