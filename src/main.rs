/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* Archive: src/main.rs
*
* Entry point for the CDN operator.
*
* 1.  Reads `OperatorConfig` from the environment and sets up `tracing`
*     (JSON or plain text, filtered by `RUST_LOG`).
* 2.  Builds one `KubeClientImpl` that backs every Kubernetes lookup, and the
*     CloudFront provider with clients derived from the ambient AWS config.
* 3.  Runs a `kube_runtime::Controller` for `Distribution`, which also watches
*     the objects a Distribution can reference (classes, TLS Secrets, origin
*     Services and Ingresses) and maps their changes back to Distribution
*     keys through the controller's own reflector store.
* 4.  Serves Prometheus metrics on `/metrics` alongside the controller.
*
* SPDX-License-Identifier: Apache-2.0 */

use std::sync::Arc;

use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::Config as WatcherConfig;
use kube_runtime::Controller;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod crds;
mod error;
mod kube_client;
mod metrics;
mod providers;
mod resolvers;
mod controllers {
    pub mod distribution_controller;
    pub mod watches;
}

use config::{
    LogFormat, OperatorConfig, KIND_CLUSTER_DISTRIBUTION_CLASS, KIND_DISTRIBUTION_CLASS, KIND_INGRESS,
    KIND_SERVICE,
};
use controllers::distribution_controller::{error_policy, reconcile, Context};
use controllers::watches;
use crds::{ClusterDistributionClass, Distribution, DistributionClass};
use kube_client::KubeClientImpl;
use providers::cloudfront::auth::AwsClientFactory;
use providers::cloudfront::CloudFrontProvider;
use providers::CdnProvider;
use resolvers::{CertificateResolver, DistributionClassResolver, OriginResolver};

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init()?,
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::from_env()?;
    init_tracing(config.log_format)?;

    let client = Client::try_default().await?;
    let kube = Arc::new(KubeClientImpl::new(client.clone()));

    let factory =
        AwsClientFactory::from_env(kube.clone(), kube.clone(), config.aws_session_name.clone()).await;
    let cloudfront: Arc<dyn CdnProvider> = Arc::new(CloudFrontProvider::new(Arc::new(factory)));

    let context = Arc::new(Context {
        store: kube.clone(),
        classes: DistributionClassResolver::new(kube.clone()),
        origins: OriginResolver::new(kube.clone()),
        certificates: CertificateResolver::new(kube.clone()),
        providers: vec![cloudfront],
    });

    let registry = Arc::new(metrics::create_and_register_metrics()?);

    let controller = Controller::new(Api::<Distribution>::all(client.clone()), WatcherConfig::default());
    let store = controller.store();

    let (classes, cluster_classes, secrets, services, ingresses) =
        (store.clone(), store.clone(), store.clone(), store.clone(), store);

    let controller = controller
        .watches(
            Api::<DistributionClass>::all(client.clone()),
            WatcherConfig::default(),
            move |class| {
                watches::by_class(
                    &classes.state(),
                    KIND_DISTRIBUTION_CLASS,
                    &class.name_any(),
                    class.namespace().as_deref(),
                )
            },
        )
        .watches(
            Api::<ClusterDistributionClass>::all(client.clone()),
            WatcherConfig::default(),
            move |class| {
                watches::by_class(
                    &cluster_classes.state(),
                    KIND_CLUSTER_DISTRIBUTION_CLASS,
                    &class.name_any(),
                    None,
                )
            },
        )
        .watches(
            Api::<Secret>::all(client.clone()),
            WatcherConfig::default(),
            move |secret| {
                watches::by_secret(&secrets.state(), &secret.name_any(), secret.namespace().as_deref())
            },
        )
        .watches(
            Api::<Service>::all(client.clone()),
            WatcherConfig::default(),
            move |service| {
                watches::by_origin_target(
                    &services.state(),
                    KIND_SERVICE,
                    &service.name_any(),
                    service.namespace().as_deref(),
                )
            },
        )
        .watches(
            Api::<Ingress>::all(client.clone()),
            WatcherConfig::default(),
            move |ingress| {
                watches::by_origin_target(
                    &ingresses.state(),
                    KIND_INGRESS,
                    &ingress.name_any(),
                    ingress.namespace().as_deref(),
                )
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((distribution, action)) => debug!(%distribution, ?action, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconcile failed"),
            }
        });

    info!(metrics_port = config.metrics_port, "CDN operator starting");

    tokio::select! {
        _ = controller => info!("Controller stopped"),
        _ = metrics::run_metrics_server(registry, config.metrics_port) => warn!("Metrics server stopped"),
    }

    Ok(())
}
