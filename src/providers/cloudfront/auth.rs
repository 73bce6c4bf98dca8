/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/auth.rs
*
* Builds CloudFront and ACM clients for a class's `auth` block.
*
* - No `auth`: the operator's ambient AWS credentials.
* - `accessKeySecret`: static keys read from a Secret.
* - `jwt`: a token is minted for a ServiceAccount and exchanged with STS
*   for the role named in one of that ServiceAccount's annotations.
*
* Referenced objects live in the Distribution's namespace for namespaced
* classes. Cluster classes must name the namespace themselves.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_cloudfront::config::{Credentials, Region};
use k8s_openapi::api::core::v1::ServiceAccount;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::client::{CertificateApi, DistributionApi, SdkCertificateApi, SdkDistributionApi};
use crate::config::{ACM_REGION, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, CLOUDFRONT_PROVIDER};
use crate::crds::{AwsAuth, AwsJwtAuth, NamespacedName};
use crate::error::Error;
use crate::resolvers::SecretLookup;

/// API handles for one reconcile.
pub struct CloudFrontClients {
    pub distributions: Arc<dyn DistributionApi>,
    pub certificates: Arc<dyn CertificateApi>,
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// `namespace` is the Distribution's namespace for a namespaced class
    /// and `None` for a cluster class.
    async fn clients(
        &self,
        auth: Option<&AwsAuth>,
        namespace: Option<&str>,
    ) -> Result<CloudFrontClients, Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceAccountTokens: Send + Sync {
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error>;

    /// Mints a token for the ServiceAccount bound to `audience`.
    async fn request_token(&self, namespace: &str, name: &str, audience: &str) -> Result<String, Error>;
}

/// Namespace to read `reference` from.
fn namespace_for<'a>(
    caller: Option<&'a str>,
    reference: &'a NamespacedName,
    what: &str,
) -> Result<&'a str, Error> {
    caller.or(reference.namespace.as_deref()).ok_or_else(|| {
        Error::Validation(format!(
            "{} \"{}\" has no namespace (required for cluster-scoped classes)",
            what, reference.name
        ))
    })
}

pub struct AwsClientFactory {
    sdk_config: SdkConfig,
    secrets: Arc<dyn SecretLookup>,
    accounts: Arc<dyn ServiceAccountTokens>,
    session_name: String,
}

impl AwsClientFactory {
    pub fn new(
        sdk_config: SdkConfig,
        secrets: Arc<dyn SecretLookup>,
        accounts: Arc<dyn ServiceAccountTokens>,
        session_name: String,
    ) -> Self {
        Self {
            sdk_config,
            secrets,
            accounts,
            session_name,
        }
    }

    /// Loads the ambient AWS configuration (environment, profile, IRSA).
    pub async fn from_env(
        secrets: Arc<dyn SecretLookup>,
        accounts: Arc<dyn ServiceAccountTokens>,
        session_name: String,
    ) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(sdk_config, secrets, accounts, session_name)
    }

    async fn access_key_credentials(
        &self,
        reference: &NamespacedName,
        namespace: Option<&str>,
    ) -> Result<Credentials, Error> {
        let namespace = namespace_for(namespace, reference, "Secret")?;
        let secret = self
            .secrets
            .get_secret(namespace, &reference.name)
            .await?
            .ok_or_else(|| {
                Error::Validation(format!(
                    "AWS credentials Secret \"{}/{}\" not found",
                    namespace, reference.name
                ))
            })?;

        let read = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
                .filter(|v| !v.is_empty())
        };

        match (read(AWS_ACCESS_KEY_ID), read(AWS_SECRET_ACCESS_KEY)) {
            (Some(access_key), Some(secret_key)) => Ok(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "cdn-operator-secret",
            )),
            _ => Err(Error::Validation(format!(
                "Secret \"{}/{}\" must contain {} and {}",
                namespace, reference.name, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
            ))),
        }
    }

    /// Returns the role to assume and a fresh web identity token.
    async fn web_identity(
        &self,
        jwt: &AwsJwtAuth,
        namespace: Option<&str>,
    ) -> Result<(String, String), Error> {
        let account = &jwt.service_account;
        let namespace = namespace_for(namespace, account, "ServiceAccount")?;

        let service_account = self
            .accounts
            .get_service_account(namespace, &account.name)
            .await?
            .ok_or_else(|| {
                Error::Validation(format!(
                    "ServiceAccount \"{}/{}\" not found",
                    namespace, account.name
                ))
            })?;

        let role_arn = service_account
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(&jwt.annotation_name))
            .filter(|arn| !arn.is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::Validation(format!(
                    "ServiceAccount \"{}/{}\" has no \"{}\" annotation",
                    namespace, account.name, jwt.annotation_name
                ))
            })?;

        let token = self
            .accounts
            .request_token(namespace, &account.name, &jwt.sts_audience)
            .await?;

        Ok((role_arn, token))
    }

    async fn assume_role(&self, role_arn: &str, token: String) -> Result<Credentials, Error> {
        debug!(role = %role_arn, "Assuming role with web identity");
        let output = aws_sdk_sts::Client::new(&self.sdk_config)
            .assume_role_with_web_identity()
            .role_arn(role_arn)
            .role_session_name(&self.session_name)
            .web_identity_token(token)
            .send()
            .await
            .map_err(|e| {
                Error::provider(
                    CLOUDFRONT_PROVIDER,
                    format!(
                        "AssumeRoleWithWebIdentity failed: {}",
                        aws_sdk_sts::error::DisplayErrorContext(&e)
                    ),
                )
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            Error::provider(CLOUDFRONT_PROVIDER, "STS returned no credentials")
        })?;

        Ok(Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_string()),
            SystemTime::try_from(*credentials.expiration()).ok(),
            "cdn-operator-web-identity",
        ))
    }

    fn build(&self, credentials: Option<Credentials>) -> CloudFrontClients {
        // CloudFront is global and signs in us-east-1, like ACM for CloudFront.
        let mut cloudfront =
            aws_sdk_cloudfront::config::Builder::from(&self.sdk_config).region(Region::new(ACM_REGION));
        let mut acm = aws_sdk_acm::config::Builder::from(&self.sdk_config)
            .region(aws_sdk_acm::config::Region::new(ACM_REGION));

        if let Some(credentials) = credentials {
            cloudfront = cloudfront.credentials_provider(credentials.clone());
            acm = acm.credentials_provider(credentials);
        }

        CloudFrontClients {
            distributions: Arc::new(SdkDistributionApi::new(
                aws_sdk_cloudfront::Client::from_conf(cloudfront.build()),
            )),
            certificates: Arc::new(SdkCertificateApi::new(aws_sdk_acm::Client::from_conf(
                acm.build(),
            ))),
        }
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn clients(
        &self,
        auth: Option<&AwsAuth>,
        namespace: Option<&str>,
    ) -> Result<CloudFrontClients, Error> {
        let credentials = match auth {
            Some(AwsAuth {
                jwt: Some(jwt), ..
            }) => {
                let (role_arn, token) = self.web_identity(jwt, namespace).await?;
                Some(self.assume_role(&role_arn, token).await?)
            }
            Some(AwsAuth {
                access_key_secret: Some(reference),
                ..
            }) => Some(self.access_key_credentials(reference, namespace).await?),
            _ => None,
        };

        Ok(self.build(credentials))
    }
}
