/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/error.rs
*
* The error taxonomy shared by the resolvers, the CDN providers and the
* distribution controller. The controller decides how to requeue from the
* variant alone:
* - `Resolution` / `Validation`: the Distribution (or something it refers
*   to) needs fixing. Surfaced as not-ready and rechecked after a minute.
* - `Provider` / `Conflict` / `KubeError`: remote or API-server failures.
*   Requeued immediately.
* - `NotFound`: a tracked remote object vanished. Providers handle it by
*   re-creating, so it rarely reaches the controller.
*
* SPDX-License-Identifier: Apache-2.0
*/

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The origin or class could not be determined.
    #[error("{0}")]
    Resolution(String),

    /// A referenced object is malformed or of an unsupported kind.
    #[error("{0}")]
    Validation(String),

    #[error("{provider}: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// A remote create collided with an existing object, whose id is salvaged.
    #[error("{provider}: object {id} already exists for this distribution: {message}")]
    Conflict {
        provider: &'static str,
        id: String,
        message: String,
    },

    #[error("{provider}: object {id} not found")]
    NotFound { provider: &'static str, id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Error::Provider {
            provider,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Remote and API-server failures are retried straight away; anything
    /// that needs an operator to fix a resource waits for the recheck.
    pub fn requeue_immediately(&self) -> bool {
        !matches!(
            self,
            Error::Resolution(_) | Error::Validation(_) | Error::Config(_)
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Resolution(_) => "resolution",
            Error::Validation(_) => "validation",
            Error::Provider { .. } => "provider",
            Error::Conflict { .. } => "conflict",
            Error::NotFound { .. } => "not_found",
            Error::Config(_) => "config",
        }
    }
}
