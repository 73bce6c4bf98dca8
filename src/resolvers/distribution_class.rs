/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resolvers/distribution_class.rs
*
* Loads the class a Distribution points at. Both class kinds collapse into a
* `DistributionClassSpec`, so callers never care which scope it came from.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::config::{KIND_CLUSTER_DISTRIBUTION_CLASS, KIND_DISTRIBUTION_CLASS};
use crate::crds::{ClusterDistributionClass, DistributionClass, DistributionClassSpec, ObjectReference};
use crate::error::Error;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClassLookup: Send + Sync {
    async fn get_distribution_class(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DistributionClass>, Error>;

    async fn get_cluster_distribution_class(
        &self,
        name: &str,
    ) -> Result<Option<ClusterDistributionClass>, Error>;
}

pub struct DistributionClassResolver {
    lookup: Arc<dyn ClassLookup>,
}

impl DistributionClassResolver {
    pub fn new(lookup: Arc<dyn ClassLookup>) -> Self {
        Self { lookup }
    }

    /// Resolves `class_ref` as seen from an object in `namespace`.
    /// Namespaced classes are looked up alongside the caller; cluster
    /// classes by name only.
    pub async fn get_spec(
        &self,
        class_ref: &ObjectReference,
        namespace: &str,
    ) -> Result<DistributionClassSpec, Error> {
        match class_ref.kind.as_str() {
            KIND_CLUSTER_DISTRIBUTION_CLASS => self
                .lookup
                .get_cluster_distribution_class(&class_ref.name)
                .await?
                .map(|class| class.spec.into())
                .ok_or_else(|| {
                    Error::Resolution(format!(
                        "ClusterDistributionClass \"{}\" not found",
                        class_ref.name
                    ))
                }),
            KIND_DISTRIBUTION_CLASS => self
                .lookup
                .get_distribution_class(namespace, &class_ref.name)
                .await?
                .map(|class| class.spec)
                .ok_or_else(|| {
                    Error::Resolution(format!(
                        "DistributionClass \"{}\" not found in namespace \"{}\"",
                        class_ref.name, namespace
                    ))
                }),
            other => Err(Error::Validation(format!(
                "distributionClass kind \"{}\" is not supported; expected {} or {}",
                other, KIND_DISTRIBUTION_CLASS, KIND_CLUSTER_DISTRIBUTION_CLASS
            ))),
        }
    }
}
