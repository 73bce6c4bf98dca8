/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/fake.rs
*
* An in-memory CloudFront and ACM used by the provider and controller
* tests. It enforces the parts of the real API the sub-providers depend on
* (caller-reference uniqueness, ETag matching, disable-before-delete) and
* counts every call so tests can assert on remote traffic.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::auth::{ClientFactory, CloudFrontClients};
use super::client::{CertificateApi, DistributionApi, LiveDistribution};
use super::config::DistributionConfig;
use super::distribution::{STATE_DEPLOYED, STATE_IN_PROGRESS};
use crate::config::CLOUDFRONT_PROVIDER;
use crate::crds::AwsAuth;
use crate::error::Error;
use crate::resolvers::Certificate;

#[derive(Default)]
struct State {
    distributions: BTreeMap<String, LiveDistribution>,
    certificates: BTreeMap<String, String>,
    calls: HashMap<String, usize>,
    failures: HashSet<String>,
    last_import_arn: Option<Option<String>>,
    sequence: u64,
}

#[derive(Clone, Default)]
pub struct FakeCloudFront {
    state: Arc<Mutex<State>>,
}

impl FakeCloudFront {
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or_default()
    }

    /// Makes the next call to `operation` fail with a provider error.
    pub fn fail_next(&self, operation: &str) {
        self.lock().failures.insert(operation.to_string());
    }

    /// Stores a distribution without recording a call; returns its id.
    pub fn seed(&self, config: &DistributionConfig) -> String {
        let mut state = self.lock();
        let id = next_id(&mut state);
        let live = LiveDistribution {
            domain_name: domain_for(&id),
            id: id.clone(),
            status: STATE_DEPLOYED.to_string(),
            etag: "E1".to_string(),
            config: config.clone(),
        };
        state.distributions.insert(id.clone(), live);
        id
    }

    /// Completes any in-flight change on `id`.
    pub fn deploy(&self, id: &str) {
        if let Some(live) = self.lock().distributions.get_mut(id) {
            live.status = STATE_DEPLOYED.to_string();
        }
    }

    pub fn config(&self, id: &str) -> Option<DistributionConfig> {
        self.lock().distributions.get(id).map(|d| d.config.clone())
    }

    pub fn domain_name(&self, id: &str) -> String {
        domain_for(id)
    }

    pub fn distribution_count(&self) -> usize {
        self.lock().distributions.len()
    }

    pub fn certificate_count(&self) -> usize {
        self.lock().certificates.len()
    }

    /// The ARN passed to the most recent import, if any was passed.
    pub fn last_import_arn(&self) -> Option<String> {
        self.lock().last_import_arn.clone().flatten()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn enter(&self, operation: &str) -> Result<std::sync::MutexGuard<'_, State>, Error> {
        let mut state = self.lock();
        *state.calls.entry(operation.to_string()).or_default() += 1;
        if state.failures.remove(operation) {
            return Err(Error::provider(CLOUDFRONT_PROVIDER, format!("{} throttled", operation)));
        }
        Ok(state)
    }
}

fn next_id(state: &mut State) -> String {
    state.sequence += 1;
    format!("E{:013X}", state.sequence)
}

fn domain_for(id: &str) -> String {
    format!("{}.cloudfront.net", id.to_lowercase())
}

fn not_found(id: &str) -> Error {
    Error::NotFound {
        provider: CLOUDFRONT_PROVIDER,
        id: id.to_string(),
    }
}

fn bump(etag: &str) -> String {
    format!("{}x", etag)
}

#[async_trait]
impl DistributionApi for FakeCloudFront {
    async fn get_distribution(&self, id: &str) -> Result<LiveDistribution, Error> {
        let state = self.enter("get_distribution")?;
        state.distributions.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn create_distribution(&self, config: &DistributionConfig) -> Result<LiveDistribution, Error> {
        let mut state = self.enter("create_distribution")?;
        if let Some(existing) = state
            .distributions
            .values()
            .find(|d| d.config.caller_reference == config.caller_reference)
        {
            return Err(Error::Conflict {
                provider: CLOUDFRONT_PROVIDER,
                id: existing.id.clone(),
                message: format!("caller reference already used by {}", existing.id),
            });
        }

        let id = next_id(&mut state);
        let live = LiveDistribution {
            domain_name: domain_for(&id),
            id: id.clone(),
            status: STATE_IN_PROGRESS.to_string(),
            etag: "E1".to_string(),
            config: config.clone(),
        };
        state.distributions.insert(id, live.clone());
        Ok(live)
    }

    async fn update_distribution(
        &self,
        id: &str,
        if_match: &str,
        config: &DistributionConfig,
    ) -> Result<LiveDistribution, Error> {
        let mut state = self.enter("update_distribution")?;
        let live = state.distributions.get_mut(id).ok_or_else(|| not_found(id))?;
        if live.etag != if_match {
            return Err(Error::provider(CLOUDFRONT_PROVIDER, "PreconditionFailed"));
        }
        live.config = config.clone();
        live.status = STATE_IN_PROGRESS.to_string();
        live.etag = bump(&live.etag);
        Ok(live.clone())
    }

    async fn delete_distribution(&self, id: &str, if_match: &str) -> Result<(), Error> {
        let mut state = self.enter("delete_distribution")?;
        let live = state.distributions.get(id).ok_or_else(|| not_found(id))?;
        if live.etag != if_match {
            return Err(Error::provider(CLOUDFRONT_PROVIDER, "PreconditionFailed"));
        }
        if live.config.enabled || live.status != STATE_DEPLOYED {
            return Err(Error::provider(CLOUDFRONT_PROVIDER, "DistributionNotDisabled"));
        }
        state.distributions.remove(id);
        Ok(())
    }
}

#[async_trait]
impl CertificateApi for FakeCloudFront {
    async fn get_certificate(&self, arn: &str) -> Result<String, Error> {
        let state = self.enter("get_certificate")?;
        state.certificates.get(arn).cloned().ok_or_else(|| not_found(arn))
    }

    async fn import_certificate(
        &self,
        certificate: &Certificate,
        arn: Option<&str>,
    ) -> Result<String, Error> {
        let mut state = self.enter("import_certificate")?;
        state.last_import_arn = Some(arn.map(str::to_string));

        let arn = match arn {
            Some(arn) if state.certificates.contains_key(arn) => arn.to_string(),
            Some(arn) => return Err(not_found(arn)),
            None => {
                state.sequence += 1;
                format!(
                    "arn:aws:acm:us-east-1:000000000000:certificate/{}",
                    state.sequence
                )
            }
        };
        state
            .certificates
            .insert(arn.clone(), certificate.leaf.encoded.clone());
        Ok(arn)
    }

    async fn delete_certificate(&self, arn: &str) -> Result<(), Error> {
        let mut state = self.enter("delete_certificate")?;
        state
            .certificates
            .remove(arn)
            .map(|_| ())
            .ok_or_else(|| not_found(arn))
    }
}

/// Hands out the same fake for every class.
pub struct FakeClientFactory {
    pub fake: FakeCloudFront,
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn clients(
        &self,
        _auth: Option<&AwsAuth>,
        _namespace: Option<&str>,
    ) -> Result<CloudFrontClients, Error> {
        Ok(CloudFrontClients {
            distributions: Arc::new(self.fake.clone()),
            certificates: Arc::new(self.fake.clone()),
        })
    }
}
