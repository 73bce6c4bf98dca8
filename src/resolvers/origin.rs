/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resolvers/origin.rs
*
* Works out the concrete host and ports a CDN should forward to.
*
* A Distribution may name its origin outright, point at a Service or
* Ingress whose load balancer should be used, or mix the two. Values given
* explicitly always win; anything still missing is discovered from the
* target, and ports finally fall back to 80/443.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::config::{DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT, KIND_INGRESS, KIND_SERVICE};
use crate::crds::{Distribution, ServicePort};
use crate::error::Error;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OriginLookup: Send + Sync {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, Error>;
}

/// A fully specified origin. Never partially filled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedOrigin {
    pub host: String,
    pub http_port: i32,
    pub https_port: i32,
}

/// Working state while resolving; zero / empty means "not yet known".
#[derive(Default)]
struct Partial {
    host: String,
    http_port: i32,
    https_port: i32,
}

impl Partial {
    fn is_complete(&self) -> bool {
        !self.host.is_empty() && self.http_port != 0 && self.https_port != 0
    }

    /// Uses the first load balancer entry, preferring its hostname.
    fn fill_host<'a>(&mut self, mut entries: impl Iterator<Item = (Option<&'a str>, Option<&'a str>)>) {
        if !self.host.is_empty() {
            return;
        }
        if let Some((hostname, ip)) = entries.next() {
            let host = hostname
                .filter(|h| !h.is_empty())
                .or(ip)
                .unwrap_or_default();
            self.host = host.to_string();
        }
    }
}

fn explicit_port(port: Option<&ServicePort>) -> i32 {
    port.and_then(|p| p.number).unwrap_or(0)
}

fn port_name(port: Option<&ServicePort>) -> Option<&str> {
    port.and_then(|p| p.name.as_deref()).filter(|n| !n.is_empty())
}

pub struct OriginResolver {
    lookup: Arc<dyn OriginLookup>,
}

impl OriginResolver {
    pub fn new(lookup: Arc<dyn OriginLookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve(&self, distribution: &Distribution) -> Result<ResolvedOrigin, Error> {
        let origin = &distribution.spec.origin;
        let namespace = distribution.namespace().unwrap_or_default();

        let mut resolved = Partial {
            host: origin.host.clone().unwrap_or_default(),
            http_port: explicit_port(origin.http_port.as_ref()),
            https_port: explicit_port(origin.https_port.as_ref()),
        };

        if !resolved.is_complete() {
            if let Some(target) = &origin.target_ref {
                match target.kind.as_str() {
                    KIND_SERVICE => {
                        if let Some(service) =
                            self.lookup.get_service(&namespace, &target.name).await?
                        {
                            self.apply_service(&service, distribution, &mut resolved);
                        } else {
                            debug!(service = %target.name, "origin Service not found");
                        }
                    }
                    KIND_INGRESS => {
                        if let Some(ingress) =
                            self.lookup.get_ingress(&namespace, &target.name).await?
                        {
                            let entries = ingress
                                .status
                                .as_ref()
                                .and_then(|s| s.load_balancer.as_ref())
                                .and_then(|lb| lb.ingress.as_ref())
                                .into_iter()
                                .flatten()
                                .map(|i| (i.hostname.as_deref(), i.ip.as_deref()));
                            resolved.fill_host(entries);
                        } else {
                            debug!(ingress = %target.name, "origin Ingress not found");
                        }
                    }
                    other => {
                        return Err(Error::Validation(format!(
                            "origin targetRef kind \"{}\" is not supported; expected {} or {}",
                            other, KIND_SERVICE, KIND_INGRESS
                        )))
                    }
                }
            }
        }

        if resolved.http_port == 0 {
            resolved.http_port = DEFAULT_HTTP_PORT;
        }
        if resolved.https_port == 0 {
            resolved.https_port = DEFAULT_HTTPS_PORT;
        }

        if resolved.host.is_empty() {
            return Err(Error::Resolution(
                "origin host could not be determined".to_string(),
            ));
        }

        Ok(ResolvedOrigin {
            host: resolved.host,
            http_port: resolved.http_port,
            https_port: resolved.https_port,
        })
    }

    fn apply_service(&self, service: &Service, distribution: &Distribution, resolved: &mut Partial) {
        let entries = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .into_iter()
            .flatten()
            .map(|i| (i.hostname.as_deref(), i.ip.as_deref()));
        resolved.fill_host(entries);

        let origin = &distribution.spec.origin;
        let http_name = port_name(origin.http_port.as_ref());
        let https_name = port_name(origin.https_port.as_ref());

        let ports = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .into_iter()
            .flatten();
        for port in ports {
            let name = port.name.as_deref();
            if resolved.http_port == 0 && name.is_some() && name == http_name {
                resolved.http_port = port.port;
            }
            if resolved.https_port == 0 && name.is_some() && name == https_name {
                resolved.https_port = port.port;
            }
        }
    }
}
