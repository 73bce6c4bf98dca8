/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/distribution.rs
*
* Converges one CloudFront distribution on its desired configuration.
*
* Each pass fetches the live distribution, compares its managed fields with
* the generated configuration and only calls UpdateDistribution when they
* differ. Creation is idempotent on the Distribution's UID (the caller
* reference); if CloudFront already holds a distribution for it, that id is
* adopted and the pass fails so the next one can check it properly.
*
* Deletion is a three step dance imposed by CloudFront: disable, wait for
* the change to deploy, then delete using the latest ETag.
*
* SPDX-License-Identifier: Apache-2.0
*/

use tracing::{debug, info, warn};

use super::client::{DistributionApi, LiveDistribution};
use super::config::DistributionConfig;
use crate::config::CLOUDFRONT_PROVIDER;
use crate::crds::Endpoint;
use crate::error::Error;
use crate::providers::ProviderStatus;

pub const STATE_DEPLOYED: &str = "Deployed";
pub const STATE_IN_PROGRESS: &str = "InProgress";
/// Recorded when an existing distribution is adopted without being read.
pub const STATE_UNKNOWN: &str = "Unknown";

pub struct DistributionProvider<'a> {
    api: &'a dyn DistributionApi,
}

fn record_live(status: &mut ProviderStatus, live: &LiveDistribution) {
    status.external_id = Some(live.id.clone());
    status.external_status = Some(live.status.clone());
    status.endpoint = Some(Endpoint {
        provider: CLOUDFRONT_PROVIDER.to_string(),
        host: Some(live.domain_name.clone()),
        ip: None,
    });
}

fn forget(status: &mut ProviderStatus) {
    status.external_id = None;
    status.external_status = None;
    status.endpoint = None;
}

impl<'a> DistributionProvider<'a> {
    pub fn new(api: &'a dyn DistributionApi) -> Self {
        Self { api }
    }

    pub async fn reconcile(&self, desired: &DistributionConfig, status: &mut ProviderStatus) -> Result<(), Error> {
        if let Some(id) = status.external_id.clone() {
            match self.api.get_distribution(&id).await {
                Ok(live) => return self.check(live, desired, status).await,
                Err(e) if e.is_not_found() => {
                    warn!(distribution_id = %id, "Distribution no longer exists; creating a new one");
                    forget(status);
                }
                Err(e) => return Err(e),
            }
        }

        self.create(desired, status).await
    }

    async fn check(
        &self,
        live: LiveDistribution,
        desired: &DistributionConfig,
        status: &mut ProviderStatus,
    ) -> Result<(), Error> {
        record_live(status, &live);

        if live.config == *desired {
            debug!(distribution_id = %live.id, "Distribution is up to date");
            return Ok(());
        }

        info!(distribution_id = %live.id, "Distribution configuration drifted; updating");
        let updated = self
            .api
            .update_distribution(&live.id, &live.etag, desired)
            .await?;
        record_live(status, &updated);
        Ok(())
    }

    async fn create(&self, desired: &DistributionConfig, status: &mut ProviderStatus) -> Result<(), Error> {
        match self.api.create_distribution(desired).await {
            Ok(live) => {
                info!(distribution_id = %live.id, domain = %live.domain_name, "Created distribution");
                record_live(status, &live);
                Ok(())
            }
            Err(Error::Conflict { provider, id, message }) => {
                warn!(distribution_id = %id, "Distribution already exists for this resource; adopting it");
                status.external_id = Some(id.clone());
                status.external_status = Some(STATE_UNKNOWN.to_string());
                Err(Error::Conflict { provider, id, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Advances deletion by one step. Returns with the id still recorded
    /// until the distribution is actually gone.
    pub async fn delete(&self, status: &mut ProviderStatus) -> Result<(), Error> {
        let Some(id) = status.external_id.clone() else {
            return Ok(());
        };

        let live = match self.api.get_distribution(&id).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                forget(status);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        record_live(status, &live);

        if live.config.enabled {
            info!(distribution_id = %id, "Disabling distribution before deletion");
            let mut disabled = live.config.clone();
            disabled.enabled = false;
            let updated = self
                .api
                .update_distribution(&live.id, &live.etag, &disabled)
                .await?;
            record_live(status, &updated);
            return Ok(());
        }

        if live.status == STATE_IN_PROGRESS {
            debug!(distribution_id = %id, "Waiting for distribution to finish disabling");
            return Ok(());
        }

        match self.api.delete_distribution(&live.id, &live.etag).await {
            Ok(()) => info!(distribution_id = %id, "Deleted distribution"),
            Err(e) if e.is_not_found() => debug!(distribution_id = %id, "Distribution already gone"),
            Err(e) => return Err(e),
        }
        forget(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::CloudFrontClassSpec;
    use crate::providers::cloudfront::config::desired_config;
    use crate::providers::cloudfront::config::tests::{distribution, origin};
    use crate::providers::cloudfront::fake::FakeCloudFront;

    fn desired(hosts: &[&str]) -> DistributionConfig {
        desired_config(
            &CloudFrontClassSpec::default(),
            &distribution(hosts, None),
            &origin(),
            None,
            true,
        )
    }

    #[tokio::test]
    async fn converges_with_a_single_create() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus::default();

        DistributionProvider::new(&fake)
            .reconcile(&desired(&["www.example.com"]), &mut status)
            .await
            .unwrap();

        assert_eq!(fake.calls("create_distribution"), 1);
        assert!(status.external_id.is_some());
        assert_eq!(
            status.endpoint.and_then(|e| e.host),
            Some(fake.domain_name(&status.external_id.clone().unwrap_or_default()))
        );
    }

    #[tokio::test]
    async fn second_pass_without_drift_is_a_no_op() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus::default();
        let provider = DistributionProvider::new(&fake);
        let config = desired(&["www.example.com"]);

        provider.reconcile(&config, &mut status).await.unwrap();
        provider.reconcile(&config, &mut status).await.unwrap();

        assert_eq!(fake.calls("create_distribution"), 1);
        assert_eq!(fake.calls("update_distribution"), 0);
    }

    #[tokio::test]
    async fn host_change_issues_exactly_one_update() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus::default();
        let provider = DistributionProvider::new(&fake);

        provider
            .reconcile(&desired(&["www.example.com"]), &mut status)
            .await
            .unwrap();
        let changed = desired(&["www.example.com", "cdn.example.com"]);
        provider.reconcile(&changed, &mut status).await.unwrap();
        provider.reconcile(&changed, &mut status).await.unwrap();

        assert_eq!(fake.calls("update_distribution"), 1);
        let id = status.external_id.unwrap();
        assert_eq!(fake.config(&id).unwrap().aliases, changed.aliases);
    }

    #[tokio::test]
    async fn vanished_distribution_is_recreated() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus {
            external_id: Some("EDFDVBD6EXAMPL".into()),
            ..Default::default()
        };

        DistributionProvider::new(&fake)
            .reconcile(&desired(&[]), &mut status)
            .await
            .unwrap();

        assert_eq!(fake.calls("create_distribution"), 1);
        assert_ne!(status.external_id.as_deref(), Some("EDFDVBD6EXAMPL"));
    }

    #[tokio::test]
    async fn caller_reference_conflict_adopts_the_existing_id() {
        let fake = FakeCloudFront::default();
        let config = desired(&[]);
        let existing = fake.seed(&config);
        let mut status = ProviderStatus::default();

        let err = DistributionProvider::new(&fake)
            .reconcile(&config, &mut status)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(status.external_id, Some(existing));
        assert_eq!(status.external_status.as_deref(), Some(STATE_UNKNOWN));
    }

    #[tokio::test]
    async fn transient_fetch_error_preserves_status() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus::default();
        let provider = DistributionProvider::new(&fake);
        provider.reconcile(&desired(&[]), &mut status).await.unwrap();
        let before = status.clone();

        fake.fail_next("get_distribution");
        assert!(provider.reconcile(&desired(&[]), &mut status).await.is_err());
        assert_eq!(status, before);
    }

    #[tokio::test]
    async fn delete_disables_then_waits_then_deletes() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus::default();
        let provider = DistributionProvider::new(&fake);
        provider.reconcile(&desired(&[]), &mut status).await.unwrap();
        let id = status.external_id.clone().unwrap();

        // Enabled: only disable.
        provider.delete(&mut status).await.unwrap();
        assert_eq!(fake.calls("update_distribution"), 1);
        assert_eq!(fake.calls("delete_distribution"), 0);
        assert!(!fake.config(&id).unwrap().enabled);
        assert_eq!(status.external_id.as_deref(), Some(id.as_str()));

        // Disabled but still deploying: wait.
        provider.delete(&mut status).await.unwrap();
        assert_eq!(fake.calls("delete_distribution"), 0);
        assert_eq!(status.external_status.as_deref(), Some(STATE_IN_PROGRESS));

        // Deployed: delete.
        fake.deploy(&id);
        provider.delete(&mut status).await.unwrap();
        assert_eq!(fake.calls("delete_distribution"), 1);
        assert!(status.external_id.is_none());
        assert!(status.endpoint.is_none());
    }

    #[tokio::test]
    async fn delete_of_missing_distribution_succeeds() {
        let fake = FakeCloudFront::default();
        let mut status = ProviderStatus {
            external_id: Some("EDFDVBD6EXAMPL".into()),
            ..Default::default()
        };

        DistributionProvider::new(&fake).delete(&mut status).await.unwrap();

        assert_eq!(fake.calls("delete_distribution"), 0);
        assert!(status.external_id.is_none());
    }
}
