/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/kube_client.rs
*
* The Kubernetes side of every lookup and write the operator performs.
* One `KubeClientImpl` backs all the narrow traits the resolvers, the
* CloudFront auth and the distribution controller depend on.
*
* SPDX-License-Identifier: Apache-2.0
*/

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;

use crate::config::{FIELD_MANAGER, FINALIZER};
use crate::controllers::distribution_controller::DistributionStore;
use crate::crds::{ClusterDistributionClass, Distribution, DistributionClass, DistributionStatus};
use crate::error::Error;
use crate::providers::cloudfront::auth::ServiceAccountTokens;
use crate::resolvers::{ClassLookup, OriginLookup, SecretLookup};

/// Lifetime requested for web identity tokens.
const TOKEN_EXPIRATION_SECONDS: i64 = 3600;

#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn set_finalizers(&self, distribution: &Distribution, finalizers: Vec<String>) -> Result<(), Error> {
        let api: Api<Distribution> = self.namespaced(&distribution.namespace().unwrap_or_default());
        // resourceVersion makes this fail rather than clobber a concurrent edit.
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": distribution.resource_version(),
            }
        });
        api.patch(&distribution.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClassLookup for KubeClientImpl {
    async fn get_distribution_class(&self, namespace: &str, name: &str) -> Result<Option<DistributionClass>, Error> {
        Ok(self.namespaced::<DistributionClass>(namespace).get_opt(name).await?)
    }

    async fn get_cluster_distribution_class(&self, name: &str) -> Result<Option<ClusterDistributionClass>, Error> {
        let api: Api<ClusterDistributionClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }
}

#[async_trait]
impl OriginLookup for KubeClientImpl {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.namespaced::<Service>(namespace).get_opt(name).await?)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error> {
        Ok(self.namespaced::<Ingress>(namespace).get_opt(name).await?)
    }
}

#[async_trait]
impl SecretLookup for KubeClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.namespaced::<Secret>(namespace).get_opt(name).await?)
    }
}

#[async_trait]
impl ServiceAccountTokens for KubeClientImpl {
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>, Error> {
        Ok(self.namespaced::<ServiceAccount>(namespace).get_opt(name).await?)
    }

    async fn request_token(&self, namespace: &str, name: &str, audience: &str) -> Result<String, Error> {
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: vec![audience.to_string()],
                expiration_seconds: Some(TOKEN_EXPIRATION_SECONDS),
                ..Default::default()
            },
            ..Default::default()
        };

        let response = self
            .namespaced::<ServiceAccount>(namespace)
            .create_token_request(name, &PostParams::default(), &request)
            .await?;

        response
            .status
            .map(|s| s.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Resolution(format!(
                    "token request for ServiceAccount \"{}/{}\" returned no token",
                    namespace, name
                ))
            })
    }
}

#[async_trait]
impl DistributionStore for KubeClientImpl {
    async fn get_distribution(&self, namespace: &str, name: &str) -> Result<Option<Distribution>, Error> {
        Ok(self.namespaced::<Distribution>(namespace).get_opt(name).await?)
    }

    async fn add_finalizer(&self, distribution: &Distribution) -> Result<(), Error> {
        let mut finalizers = distribution.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        self.set_finalizers(distribution, finalizers).await
    }

    async fn remove_finalizer(&self, distribution: &Distribution) -> Result<(), Error> {
        let finalizers = distribution
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        self.set_finalizers(distribution, finalizers).await
    }

    async fn patch_status(
        &self,
        distribution: &Distribution,
        status: &DistributionStatus,
    ) -> Result<Distribution, Error> {
        let api: Api<Distribution> = self.namespaced(&distribution.namespace().unwrap_or_default());
        // A server-side apply of the whole status drops fields that are now unset.
        let patch = Patch::Apply(json!({
            "apiVersion": Distribution::api_version(&()),
            "kind": Distribution::kind(&()),
            "status": status,
        }));
        Ok(api
            .patch_status(
                &distribution.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &patch,
            )
            .await?)
    }
}
