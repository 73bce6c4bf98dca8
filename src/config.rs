/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/config.rs
*
* Well-known names shared across the operator, and the small amount of
* runtime configuration read from the environment at start-up.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::time::Duration;

use crate::error::Error;

/// Gates deletion of a Distribution until every provider has cleaned up.
pub const FINALIZER: &str = "cdn.redcoat.dev/finalizer";

/// Server-side apply field manager.
pub const FIELD_MANAGER: &str = "cdn-operator";

/// How long to wait before re-checking a resource that has not converged.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Delay used for an "immediate" requeue after a failed pass.
pub const IMMEDIATE_REQUEUE: Duration = Duration::from_secs(1);

pub const KIND_DISTRIBUTION_CLASS: &str = "DistributionClass";
pub const KIND_CLUSTER_DISTRIBUTION_CLASS: &str = "ClusterDistributionClass";
pub const KIND_SERVICE: &str = "Service";
pub const KIND_INGRESS: &str = "Ingress";

pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

pub const DEFAULT_HTTP_PORT: i32 = 80;
pub const DEFAULT_HTTPS_PORT: i32 = 443;

pub const CLOUDFRONT_PROVIDER: &str = "cloudfront";

/// Certificates used by CloudFront must live in us-east-1.
pub const ACM_REGION: &str = "us-east-1";

pub const MANAGED_BY_COMMENT: &str = "Managed By cdn.redcoat.dev";

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Runtime settings read once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    pub metrics_port: u16,
    pub log_format: LogFormat,
    /// Session name used when assuming roles through STS.
    pub aws_session_name: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            log_format: LogFormat::Json,
            aws_session_name: "cdn-operator".to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(port) = lookup("METRICS_PORT") {
            config.metrics_port = port
                .parse()
                .map_err(|_| Error::Config(format!("METRICS_PORT '{}' is not a port", port)))?;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = match format.as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(Error::Config(format!(
                        "LOG_FORMAT must be 'json' or 'text', got '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(name) = lookup("AWS_SESSION_NAME").filter(|n| !n.is_empty()) {
            config.aws_session_name = name;
        }

        Ok(config)
    }
}
