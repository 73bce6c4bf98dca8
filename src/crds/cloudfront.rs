/*
 * Copyright (C) 2025 Pedro Henrique / phkaiser13
 *
 * File: src/crds/cloudfront.rs
 *
 * This file defines the CloudFront section of a (Cluster)DistributionClass,
 * including the AWS authentication options.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CloudFront settings for a class. Its presence alone is enough for a
/// CloudFront distribution to be managed.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudFrontClassSpec {
    /// How to authenticate with AWS. Ambient credentials are used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AwsAuth>,

    /// How CloudFront serves HTTPS requests when a custom certificate is used.
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// A CloudFront Cache Policy. When set, the policy owns forwarding and TTLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_policy_id: Option<String>,

    /// A CloudFront Origin Request Policy. Requires `cachePolicyId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_request_policy_id: Option<String>,

    /// HTTP methods to allow. CloudFront only supports HEAD+GET,
    /// HEAD+GET+OPTIONS or all six of HEAD, GET, OPTIONS, POST, PUT, DELETE.
    #[serde(default)]
    pub supported_methods: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    #[serde(rename = "sni-only")]
    SniOnly,
    #[serde(rename = "vip")]
    Vip,
    #[serde(rename = "static-ip")]
    StaticIp,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::SniOnly => "sni-only",
            SslMode::Vip => "vip",
            SslMode::StaticIp => "static-ip",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AwsAuth {
    /// A Secret holding `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_secret: Option<NamespacedName>,

    /// Web identity federation using a projected service account token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<AwsJwtAuth>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsJwtAuth {
    pub service_account: NamespacedName,

    #[serde(default = "default_sts_audience")]
    pub sts_audience: String,

    /// Annotation on the service account carrying the role ARN.
    #[serde(default = "default_annotation_name")]
    pub annotation_name: String,
}

fn default_sts_audience() -> String {
    "sts.amazonaws.com".to_string()
}

fn default_annotation_name() -> String {
    "eks.amazonaws.com/role-arn".to_string()
}

/// A reference to an object, possibly in another namespace. The namespace
/// is only honoured (and then required) for cluster-scoped classes.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedName {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
