/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/watches.rs
*
* Maps a change on a referenced object to the Distributions that need
* reconciling because of it. The candidates come from the controller's
* reflector store, so these functions never touch the API server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::sync::Arc;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use crate::config::KIND_CLUSTER_DISTRIBUTION_CLASS;
use crate::crds::Distribution;

fn keys<'a>(
    distributions: &'a [Arc<Distribution>],
    matches: impl Fn(&Distribution) -> bool + 'a,
) -> impl Iterator<Item = ObjectRef<Distribution>> + 'a {
    distributions
        .iter()
        .filter(move |d| matches(d.as_ref()))
        .map(|d| ObjectRef::from_obj(d.as_ref()))
}

fn in_namespace(distribution: &Distribution, namespace: Option<&str>) -> bool {
    distribution.namespace().as_deref() == namespace
}

/// Distributions whose class reference names `kind`/`name`.
///
/// `namespace` is the class's namespace; it is ignored for cluster classes.
pub fn by_class(
    distributions: &[Arc<Distribution>],
    kind: &str,
    name: &str,
    namespace: Option<&str>,
) -> Vec<ObjectRef<Distribution>> {
    keys(distributions, |d| {
        let class = &d.spec.distribution_class;
        class.kind == kind
            && class.name == name
            && (kind == KIND_CLUSTER_DISTRIBUTION_CLASS || in_namespace(d, namespace))
    })
    .collect()
}

/// Distributions serving the TLS Secret `namespace/name`.
pub fn by_secret(
    distributions: &[Arc<Distribution>],
    name: &str,
    namespace: Option<&str>,
) -> Vec<ObjectRef<Distribution>> {
    keys(distributions, |d| {
        in_namespace(d, namespace)
            && d.spec
                .tls
                .as_ref()
                .is_some_and(|tls| tls.secret_name == name)
    })
    .collect()
}

/// Distributions whose origin targets `kind` `namespace/name`.
pub fn by_origin_target(
    distributions: &[Arc<Distribution>],
    kind: &str,
    name: &str,
    namespace: Option<&str>,
) -> Vec<ObjectRef<Distribution>> {
    keys(distributions, |d| {
        in_namespace(d, namespace)
            && d.spec
                .origin
                .target_ref
                .as_ref()
                .is_some_and(|target| target.kind == kind && target.name == name)
    })
    .collect()
}
