/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/distribution_controller.rs
*
* The reconciliation engine for `Distribution` resources.
*
* Each pass re-reads the Distribution by key and runs one of two phases:
*
* - Active: make sure the finalizer is present, resolve the class, origin
*   and certificate, run every interested provider and merge what each
*   reports into the status.
* - Deleting: run `delete` on every provider that still holds external
*   state, and drop the finalizer once none do.
*
* Providers are always all attempted; a failure in one never hides progress
* made by another, and whatever partial status was produced is persisted
* before the pass returns. Status is written only when it differs from what
* was read.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[cfg(test)]
use mockall::automock;

use crate::config::{FINALIZER, IMMEDIATE_REQUEUE, RECHECK_INTERVAL};
use crate::crds::{Distribution, DistributionClassSpec, DistributionStatus};
use crate::error::Error;
use crate::metrics::{self, RECONCILES, RECONCILE_ERRORS};
use crate::providers::{CdnProvider, Outcome};
use crate::resolvers::{
    Certificate, CertificateResolver, DistributionClassResolver, OriginResolver, ResolvedOrigin,
};

/// Reads and writes of the Distribution itself.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DistributionStore: Send + Sync {
    async fn get_distribution(&self, namespace: &str, name: &str) -> Result<Option<Distribution>, Error>;

    async fn add_finalizer(&self, distribution: &Distribution) -> Result<(), Error>;

    async fn remove_finalizer(&self, distribution: &Distribution) -> Result<(), Error>;

    /// Returns the Distribution as written, carrying its new resourceVersion.
    async fn patch_status(
        &self,
        distribution: &Distribution,
        status: &DistributionStatus,
    ) -> Result<Distribution, Error>;
}

pub struct Context {
    pub store: Arc<dyn DistributionStore>,
    pub classes: DistributionClassResolver,
    pub origins: OriginResolver,
    pub certificates: CertificateResolver,
    pub providers: Vec<Arc<dyn CdnProvider>>,
}

/// When the key should be looked at again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next change to the Distribution or something it references.
    None,
    Immediate,
    After(Duration),
}

impl Requeue {
    /// An error takes priority over "not converged yet".
    fn after_pass(errors: &[Error], converged: bool) -> Self {
        if errors.iter().any(Error::requeue_immediately) {
            Requeue::Immediate
        } else if !errors.is_empty() || !converged {
            Requeue::After(RECHECK_INTERVAL)
        } else {
            Requeue::None
        }
    }

    pub fn into_action(self) -> Action {
        match self {
            Requeue::None => Action::await_change(),
            Requeue::Immediate => Action::requeue(IMMEDIATE_REQUEUE),
            Requeue::After(interval) => Action::requeue(interval),
        }
    }
}

fn record_error(err: &Error) {
    RECONCILE_ERRORS.with_label_values(&[err.kind()]).inc();
}

fn summarize(errors: &[Error]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    Some(
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn has_finalizer(distribution: &Distribution) -> bool {
    distribution.finalizers().iter().any(|f| f == FINALIZER)
}

/// Runs one pass for `key`.
pub async fn reconcile_key(ctx: &Context, key: &ObjectRef<Distribution>) -> Result<Requeue, Error> {
    let namespace = key.namespace.as_deref().unwrap_or_default();
    let Some(distribution) = ctx.store.get_distribution(namespace, &key.name).await? else {
        debug!("Distribution no longer exists");
        return Ok(Requeue::None);
    };

    if distribution.metadata.deletion_timestamp.is_none() {
        RECONCILES.with_label_values(&["active"]).inc();
        reconcile_active(ctx, &distribution).await
    } else if has_finalizer(&distribution) {
        RECONCILES.with_label_values(&["deleting"]).inc();
        reconcile_deleting(ctx, &distribution).await
    } else {
        Ok(Requeue::None)
    }
}

/// Writes `status` if it differs from what was read. Returns the updated
/// object when a write happened.
async fn persist(
    ctx: &Context,
    distribution: &Distribution,
    status: DistributionStatus,
) -> Result<Option<Distribution>, Error> {
    let before = distribution.status.clone().unwrap_or_default();
    if distribution.status.as_ref() == Some(&status) {
        debug!("Status unchanged");
        return Ok(None);
    }
    let updated = ctx.store.patch_status(distribution, &status).await?;
    metrics::observe_ready(before.ready, status.ready);
    Ok(Some(updated))
}

/// Records a resolution or validation failure as not-ready and waits for
/// a fix. Ids already recorded are kept.
async fn not_resolvable(ctx: &Context, distribution: &Distribution, err: Error) -> Result<Requeue, Error> {
    if !err.requeue_immediately() {
        warn!(error = %err, "Distribution cannot be reconciled yet");
    }
    record_error(&err);

    let mut status = distribution.status.clone().unwrap_or_default();
    status.ready = false;
    status.message = Some(err.to_string());
    persist(ctx, distribution, status).await?;

    Ok(Requeue::after_pass(&[err], false))
}

struct Inputs {
    class: DistributionClassSpec,
    origin: ResolvedOrigin,
    certificate: Option<Certificate>,
}

async fn resolve(ctx: &Context, distribution: &Distribution) -> Result<Inputs, Error> {
    let namespace = distribution.namespace().unwrap_or_default();

    let class = ctx
        .classes
        .get_spec(&distribution.spec.distribution_class, &namespace)
        .await?;
    let origin = ctx.origins.resolve(distribution).await?;
    let certificate = match &distribution.spec.tls {
        Some(tls) => Some(ctx.certificates.resolve(&namespace, &tls.secret_name).await?),
        None => None,
    };

    Ok(Inputs {
        class,
        origin,
        certificate,
    })
}

async fn reconcile_active(ctx: &Context, distribution: &Distribution) -> Result<Requeue, Error> {
    if !has_finalizer(distribution) {
        ctx.store.add_finalizer(distribution).await?;
        info!("Added finalizer");
    }

    let inputs = match resolve(ctx, distribution).await {
        Ok(inputs) => inputs,
        Err(e @ Error::KubeError(_)) => return Err(e),
        Err(e) => return not_resolvable(ctx, distribution, e).await,
    };

    let interested: Vec<_> = ctx
        .providers
        .iter()
        .filter(|p| p.wants(&inputs.class))
        .collect();
    if interested.is_empty() {
        let err = Error::Validation("distribution class configures no known provider".to_string());
        return not_resolvable(ctx, distribution, err).await;
    }

    let mut status = distribution.status.clone().unwrap_or_default();
    let mut converged = true;
    let mut errors = Vec::new();

    for provider in interested {
        let Outcome {
            status: delta,
            ready,
            error,
        } = provider
            .reconcile(
                &inputs.class,
                distribution,
                &inputs.origin,
                inputs.certificate.as_ref(),
                &status,
            )
            .await;
        delta.merge_into(&mut status, provider.name());
        converged &= ready;

        if let Some(err) = error {
            error!(provider = provider.name(), error = %err, "Provider reconcile failed");
            record_error(&err);
            errors.push(err);
        }
    }

    status.ready = converged && errors.is_empty();
    status.message = summarize(&errors);
    if status.ready && !distribution.status.as_ref().is_some_and(|s| s.ready) {
        info!("Distribution is ready");
    }
    persist(ctx, distribution, status).await?;

    let requeue = Requeue::after_pass(&errors, converged);
    if requeue == Requeue::After(RECHECK_INTERVAL) && errors.is_empty() {
        info!("Distribution has not converged yet; scheduling recheck");
    }
    Ok(requeue)
}

async fn reconcile_deleting(ctx: &Context, distribution: &Distribution) -> Result<Requeue, Error> {
    let namespace = distribution.namespace().unwrap_or_default();

    // The class may already be gone; providers still have to clean up.
    let class = match ctx
        .classes
        .get_spec(&distribution.spec.distribution_class, &namespace)
        .await
    {
        Ok(class) => class,
        Err(e @ Error::KubeError(_)) => return Err(e),
        Err(e) => {
            warn!(error = %e, "Distribution class unavailable during deletion");
            DistributionClassSpec::default()
        }
    };

    let mut status = distribution.status.clone().unwrap_or_default();
    status.ready = false;
    let mut errors = Vec::new();

    for provider in &ctx.providers {
        if !provider.has(&status) {
            continue;
        }
        let Outcome {
            status: delta, error, ..
        } = provider.delete(&class, distribution, &status).await;
        delta.merge_into(&mut status, provider.name());

        if let Some(err) = error {
            error!(provider = provider.name(), error = %err, "Provider delete failed");
            record_error(&err);
            errors.push(err);
        }
    }

    let all_deleted = ctx.providers.iter().all(|p| !p.has(&status));
    status.message = summarize(&errors);
    let updated = persist(ctx, distribution, status).await?;

    if all_deleted {
        info!("External state removed; releasing finalizer");
        // The status write bumped the resourceVersion.
        ctx.store
            .remove_finalizer(updated.as_ref().unwrap_or(distribution))
            .await?;
        return Ok(Requeue::None);
    }

    Ok(Requeue::after_pass(&errors, all_deleted))
}

/// `kube_runtime::Controller` entry point.
pub async fn reconcile(distribution: Arc<Distribution>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectRef::from_obj(distribution.as_ref());
    let span = info_span!("reconcile", distribution = %key);

    let requeue = reconcile_key(&ctx, &key).instrument(span).await?;
    Ok(requeue.into_action())
}

pub fn error_policy(distribution: Arc<Distribution>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        distribution = %ObjectRef::from_obj(distribution.as_ref()),
        error = %err,
        "Reconcile failed"
    );
    record_error(err);
    Action::requeue(IMMEDIATE_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{DistributionClass, Endpoint};
    use crate::providers::cloudfront::config::tests::distribution;
    use crate::providers::ProviderStatus;
    use crate::resolvers::certificate::MockSecretLookup;
    use crate::resolvers::distribution_class::MockClassLookup;
    use crate::resolvers::origin::MockOriginLookup;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records a fixed external id; `drains` controls whether delete
    /// finishes in one pass.
    #[derive(Default)]
    struct StubProvider {
        ready: bool,
        fail: bool,
        conflicts: bool,
        drains: bool,
        delete_fails: bool,
        reconciles: AtomicUsize,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl CdnProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn wants(&self, _class: &DistributionClassSpec) -> bool {
            true
        }

        fn has(&self, status: &DistributionStatus) -> bool {
            status.external_id.is_some()
        }

        async fn reconcile(
            &self,
            _class: &DistributionClassSpec,
            _distribution: &Distribution,
            _origin: &ResolvedOrigin,
            _certificate: Option<&Certificate>,
            status: &DistributionStatus,
        ) -> Outcome {
            self.reconciles.fetch_add(1, Ordering::SeqCst);
            let mut delta = ProviderStatus::from_status(status, "stub");
            delta.external_id = Some("E1".into());
            delta.endpoint = Some(Endpoint {
                provider: "stub".into(),
                host: Some("edge.stub.net".into()),
                ip: None,
            });
            if self.conflicts {
                delta.external_id = Some("E9".into());
                let err = Error::Conflict {
                    provider: "stub",
                    id: "E9".into(),
                    message: "caller reference in use".into(),
                };
                Outcome::failed(delta, err)
            } else if self.fail {
                Outcome::failed(delta, Error::provider("stub", "throttled"))
            } else {
                Outcome::done(delta, self.ready)
            }
        }

        async fn delete(
            &self,
            _class: &DistributionClassSpec,
            _distribution: &Distribution,
            status: &DistributionStatus,
        ) -> Outcome {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            let mut delta = ProviderStatus::from_status(status, "stub");
            if self.delete_fails {
                return Outcome::failed(delta, Error::provider("stub", "distribution still deploying"));
            }
            if self.drains {
                delta.external_id = None;
                delta.endpoint = None;
            }
            Outcome::done(delta, false)
        }
    }

    fn site(finalized: bool) -> Distribution {
        let mut d = distribution(&["www.example.com"], None);
        d.spec.origin.host = Some("lb.example.com".into());
        if finalized {
            d.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        }
        d
    }

    fn deleting(d: &mut Distribution) {
        d.metadata.deletion_timestamp =
            Some(serde_json::from_value::<Time>(serde_json::json!("2025-01-01T00:00:00Z")).unwrap());
    }

    fn class_lookup() -> MockClassLookup {
        let mut classes = MockClassLookup::new();
        classes
            .expect_get_distribution_class()
            .returning(|_, name| Ok(Some(DistributionClass::new(name, DistributionClassSpec::default()))));
        classes
    }

    fn context(store: MockDistributionStore, classes: MockClassLookup, provider: Arc<StubProvider>) -> Context {
        Context {
            store: Arc::new(store),
            classes: DistributionClassResolver::new(Arc::new(classes)),
            origins: OriginResolver::new(Arc::new(MockOriginLookup::new())),
            certificates: CertificateResolver::new(Arc::new(MockSecretLookup::new())),
            providers: vec![provider as Arc<dyn CdnProvider>],
        }
    }

    fn key() -> ObjectRef<Distribution> {
        ObjectRef::new("site").within("web")
    }

    fn store_returning(d: Distribution) -> MockDistributionStore {
        let mut store = MockDistributionStore::new();
        store
            .expect_get_distribution()
            .returning(move |_, _| Ok(Some(d.clone())));
        store
    }

    #[tokio::test]
    async fn missing_distribution_is_a_no_op() {
        let mut store = MockDistributionStore::new();
        store.expect_get_distribution().returning(|_, _| Ok(None));
        store.expect_patch_status().never();
        let provider = Arc::new(StubProvider::default());

        let ctx = context(store, MockClassLookup::new(), provider.clone());
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::None);
        assert_eq!(provider.reconciles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn converged_pass_adds_finalizer_and_records_status() {
        let mut store = store_returning(site(false));
        store.expect_add_finalizer().times(1).returning(|_| Ok(()));
        store
            .expect_patch_status()
            .withf(|_, s| {
                s.ready
                    && s.external_id.as_deref() == Some("E1")
                    && s.endpoints.len() == 1
                    && s.message.is_none()
            })
            .times(1)
            .returning(|d, _| Ok(d.clone()));
        let provider = Arc::new(StubProvider {
            ready: true,
            ..Default::default()
        });

        let ctx = context(store, class_lookup(), provider);
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::None);
    }

    #[tokio::test]
    async fn unconverged_provider_schedules_a_recheck() {
        let mut store = store_returning(site(true));
        store.expect_add_finalizer().never();
        store
            .expect_patch_status()
            .withf(|_, s| !s.ready)
            .returning(|d, _| Ok(d.clone()));

        let ctx = context(store, class_lookup(), Arc::new(StubProvider::default()));
        assert_eq!(
            reconcile_key(&ctx, &key()).await.unwrap(),
            Requeue::After(RECHECK_INTERVAL)
        );
    }

    #[tokio::test]
    async fn provider_error_requeues_immediately_and_keeps_partial_status() {
        let mut store = store_returning(site(true));
        store
            .expect_patch_status()
            .withf(|_, s| {
                !s.ready
                    && s.external_id.as_deref() == Some("E1")
                    && s.message.as_deref().is_some_and(|m| m.contains("throttled"))
            })
            .times(1)
            .returning(|d, _| Ok(d.clone()));
        let provider = Arc::new(StubProvider {
            ready: true,
            fail: true,
            ..Default::default()
        });

        let ctx = context(store, class_lookup(), provider);
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::Immediate);
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let mut d = site(true);
        d.status = Some(DistributionStatus {
            ready: true,
            external_id: Some("E1".into()),
            endpoints: vec![Endpoint {
                provider: "stub".into(),
                host: Some("edge.stub.net".into()),
                ip: None,
            }],
            ..Default::default()
        });
        let mut store = store_returning(d);
        store.expect_patch_status().never();
        let provider = Arc::new(StubProvider {
            ready: true,
            ..Default::default()
        });

        let ctx = context(store, class_lookup(), provider.clone());
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::None);
        assert_eq!(provider.reconciles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_class_surfaces_as_not_ready_without_provider_calls() {
        let mut store = store_returning(site(true));
        store
            .expect_patch_status()
            .withf(|_, s| !s.ready && s.message.is_some())
            .times(1)
            .returning(|d, _| Ok(d.clone()));
        let mut classes = MockClassLookup::new();
        classes
            .expect_get_distribution_class()
            .returning(|_, _| Ok(None));
        let provider = Arc::new(StubProvider::default());

        let ctx = context(store, classes, provider.clone());
        assert_eq!(
            reconcile_key(&ctx, &key()).await.unwrap(),
            Requeue::After(RECHECK_INTERVAL)
        );
        assert_eq!(provider.reconciles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drained_deletion_releases_the_finalizer() {
        let mut d = site(true);
        deleting(&mut d);
        d.status = Some(DistributionStatus {
            ready: true,
            external_id: Some("E1".into()),
            ..Default::default()
        });
        d.metadata.resource_version = Some("41".into());
        let mut store = store_returning(d);
        store
            .expect_patch_status()
            .withf(|_, s| !s.ready && s.external_id.is_none())
            .times(1)
            .returning(|d, _| {
                let mut written = d.clone();
                written.metadata.resource_version = Some("42".into());
                Ok(written)
            });
        store
            .expect_remove_finalizer()
            .withf(|d| d.metadata.resource_version.as_deref() == Some("42"))
            .times(1)
            .returning(|_| Ok(()));
        let provider = Arc::new(StubProvider {
            drains: true,
            ..Default::default()
        });

        let ctx = context(store, class_lookup(), provider.clone());
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::None);
        assert_eq!(provider.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_deletion_keeps_the_finalizer() {
        let mut d = site(true);
        deleting(&mut d);
        d.status = Some(DistributionStatus {
            external_id: Some("E1".into()),
            ..Default::default()
        });
        let mut store = store_returning(d);
        store.expect_patch_status().never();
        store.expect_remove_finalizer().never();
        let mut classes = MockClassLookup::new();
        classes
            .expect_get_distribution_class()
            .returning(|_, _| Ok(None));

        let ctx = context(store, classes, Arc::new(StubProvider::default()));
        assert_eq!(
            reconcile_key(&ctx, &key()).await.unwrap(),
            Requeue::After(RECHECK_INTERVAL)
        );
    }

    #[tokio::test]
    async fn failed_provider_delete_requeues_immediately_and_keeps_the_finalizer() {
        let mut d = site(true);
        deleting(&mut d);
        d.status = Some(DistributionStatus {
            ready: true,
            external_id: Some("E1".into()),
            ..Default::default()
        });
        let mut store = store_returning(d);
        store
            .expect_patch_status()
            .withf(|_, s| {
                !s.ready
                    && s.external_id.as_deref() == Some("E1")
                    && s.message.as_deref().is_some_and(|m| m.contains("still deploying"))
            })
            .times(1)
            .returning(|d, _| Ok(d.clone()));
        store.expect_remove_finalizer().never();
        let provider = Arc::new(StubProvider {
            delete_fails: true,
            ..Default::default()
        });

        let ctx = context(store, class_lookup(), provider.clone());
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::Immediate);
        assert_eq!(provider.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn conflict_records_the_existing_id_and_requeues_immediately() {
        let mut store = store_returning(site(true));
        store
            .expect_patch_status()
            .withf(|_, s| {
                !s.ready
                    && s.external_id.as_deref() == Some("E9")
                    && s.message.as_deref().is_some_and(|m| m.contains("already exists"))
            })
            .times(1)
            .returning(|d, _| Ok(d.clone()));
        let provider = Arc::new(StubProvider {
            ready: true,
            conflicts: true,
            ..Default::default()
        });

        let ctx = context(store, class_lookup(), provider);
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::Immediate);
    }

    #[tokio::test]
    async fn deleted_object_without_finalizer_is_left_alone() {
        let mut d = site(false);
        deleting(&mut d);
        let mut store = store_returning(d);
        store.expect_patch_status().never();
        store.expect_remove_finalizer().never();
        let provider = Arc::new(StubProvider::default());

        let ctx = context(store, MockClassLookup::new(), provider.clone());
        assert_eq!(reconcile_key(&ctx, &key()).await.unwrap(), Requeue::None);
        assert_eq!(provider.deletes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn requeue_maps_onto_controller_actions() {
        assert_eq!(Requeue::None.into_action(), Action::await_change());
        assert_eq!(
            Requeue::After(RECHECK_INTERVAL).into_action(),
            Action::requeue(RECHECK_INTERVAL)
        );
    }
}
