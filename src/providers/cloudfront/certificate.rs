/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/providers/cloudfront/certificate.rs
*
* Keeps the ACM copy of a Distribution's TLS certificate current.
*
* A certificate is imported once and its ARN recorded. On later passes the
* stored certificate's serial is compared to the one in the Secret; when
* they differ (a renewal) the new certificate is re-imported over the same
* ARN, so the distribution never has to be repointed.
*
* SPDX-License-Identifier: Apache-2.0
*/

use tracing::{debug, info, warn};

use super::client::CertificateApi;
use crate::error::Error;
use crate::providers::ProviderStatus;
use crate::resolvers::certificate::serial_number;
use crate::resolvers::Certificate;

pub struct CertificateProvider<'a> {
    api: &'a dyn CertificateApi,
}

impl<'a> CertificateProvider<'a> {
    pub fn new(api: &'a dyn CertificateApi) -> Self {
        Self { api }
    }

    pub async fn reconcile(&self, certificate: &Certificate, status: &mut ProviderStatus) -> Result<(), Error> {
        match status.external_certificate_id.clone() {
            Some(arn) => self.check(&arn, certificate, status).await,
            None => self.create(certificate, status).await,
        }
    }

    async fn check(&self, arn: &str, certificate: &Certificate, status: &mut ProviderStatus) -> Result<(), Error> {
        let stored = match self.api.get_certificate(arn).await {
            Ok(pem) => pem,
            Err(e) if e.is_not_found() => {
                warn!(certificate = %arn, "Imported certificate has disappeared; importing again");
                status.external_certificate_id = None;
                return self.create(certificate, status).await;
            }
            Err(e) => return Err(e),
        };

        // An unreadable stored certificate is treated like a stale one.
        if serial_number(stored.as_bytes()).ok().as_deref() == Some(certificate.leaf.serial.as_str()) {
            debug!(certificate = %arn, "Imported certificate is current");
            return Ok(());
        }

        info!(
            certificate = %arn,
            serial = %certificate.leaf.serial,
            "Certificate serial changed; re-importing in place"
        );
        self.create(certificate, status).await
    }

    /// Imports the certificate, over the recorded ARN if there is one.
    async fn create(&self, certificate: &Certificate, status: &mut ProviderStatus) -> Result<(), Error> {
        let arn = self
            .api
            .import_certificate(certificate, status.external_certificate_id.as_deref())
            .await?;

        if status.external_certificate_id.as_deref() != Some(arn.as_str()) {
            info!(certificate = %arn, "Imported certificate");
        }
        status.external_certificate_id = Some(arn);
        Ok(())
    }

    pub async fn delete(&self, status: &mut ProviderStatus) -> Result<(), Error> {
        let Some(arn) = status.external_certificate_id.clone() else {
            return Ok(());
        };

        match self.api.delete_certificate(&arn).await {
            Ok(()) => info!(certificate = %arn, "Deleted certificate"),
            Err(e) if e.is_not_found() => debug!(certificate = %arn, "Certificate already gone"),
            Err(e) => return Err(e),
        }

        status.external_certificate_id = None;
        Ok(())
    }
}
