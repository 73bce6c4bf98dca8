/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resolvers/certificate.rs
*
* Loads a `kubernetes.io/tls` Secret and splits it into the leaf
* certificate, its chain and the private key, in the shape certificate
* services expect to import.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, PrivateKeyInfo};
use rsa::RsaPrivateKey;
use x509_parser::der_parser::parse_der;

#[cfg(test)]
use mockall::automock;

use crate::config::{TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE};
use crate::error::Error;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretLookup: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;
}

/// The first certificate of `tls.crt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafCertificate {
    /// PEM, exactly one block.
    pub encoded: String,
    /// Colon separated hex, as printed by most tooling.
    pub serial: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivateKeyKind {
    /// PKCS#1, `RSA PRIVATE KEY`.
    Rsa,
    /// SEC1, `EC PRIVATE KEY`.
    Ec,
    /// PKCS#8, `PRIVATE KEY`.
    Pkcs8,
}

impl PrivateKeyKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "RSA PRIVATE KEY" => Some(Self::Rsa),
            "EC PRIVATE KEY" => Some(Self::Ec),
            "PRIVATE KEY" => Some(Self::Pkcs8),
            _ => None,
        }
    }
}

const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";
const EC_PUBLIC_KEY_OID: &str = "1.2.840.10045.2.1";

/// The decoded key material. Only algorithms certificate services accept
/// are recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedKey {
    Rsa(RsaPrivateKey),
    /// A SEC1 `ECPrivateKey`, bare or wrapped in PKCS#8.
    Ec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKey {
    pub encoded: String,
    pub kind: PrivateKeyKind,
    pub parsed: ParsedKey,
}

/// A parsed TLS secret. Recomputed on every reconcile, never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub leaf: LeafCertificate,
    /// Remaining certificates, PEM encoded, or None when the secret only
    /// holds the leaf.
    pub chain: Option<String>,
    pub key: PrivateKey,
}

/// Returns the serial number of the first certificate in `pem_data`.
pub fn serial_number(pem_data: &[u8]) -> Result<String, String> {
    let block = pem::parse(pem_data).map_err(|e| format!("failed to parse PEM: {}", e))?;
    parse_serial(block.contents())
}

fn parse_serial(der: &[u8]) -> Result<String, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| format!("failed to parse certificate: {}", e))?;
    Ok(cert.raw_serial_as_string())
}

pub struct CertificateResolver {
    lookup: Arc<dyn SecretLookup>,
}

impl CertificateResolver {
    pub fn new(lookup: Arc<dyn SecretLookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve(&self, namespace: &str, name: &str) -> Result<Certificate, Error> {
        let secret = self
            .lookup
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| Error::Validation(format!("could not find the TLS secret \"{}\"", name)))?;

        let kind = secret.type_.as_deref().unwrap_or_default();
        if kind != TLS_SECRET_TYPE {
            return Err(Error::Validation(format!(
                "TLS secret \"{}\" has an invalid type: expected {}, got {}",
                name, TLS_SECRET_TYPE, kind
            )));
        }

        let invalid = |what: String| Error::Validation(format!("TLS secret \"{}\" {}", name, what));

        let crt = data(&secret, TLS_CERT_KEY).ok_or_else(|| invalid(format!("has no {}", TLS_CERT_KEY)))?;
        let key = data(&secret, TLS_PRIVATE_KEY_KEY)
            .ok_or_else(|| invalid(format!("has no {}", TLS_PRIVATE_KEY_KEY)))?;

        let (leaf, chain) = parse_certificates(crt).map_err(invalid)?;
        let key = parse_key(key).map_err(invalid)?;

        Ok(Certificate { leaf, chain, key })
    }
}

fn data<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|b| b.0.as_slice())
        .filter(|b| !b.is_empty())
}

fn parse_certificates(raw: &[u8]) -> Result<(LeafCertificate, Option<String>), String> {
    let blocks = pem::parse_many(raw).map_err(|e| format!("has an unreadable certificate: {}", e))?;
    let mut blocks = blocks.into_iter();

    let first = blocks
        .next()
        .ok_or_else(|| "has an empty certificate".to_string())?;
    let leaf = LeafCertificate {
        serial: certificate_serial(&first)?,
        encoded: encode(&first),
    };

    let mut chain = String::new();
    for block in blocks {
        certificate_serial(&block)?;
        chain.push_str(&encode(&block));
    }

    Ok((leaf, Some(chain).filter(|c| !c.is_empty())))
}

fn encode(block: &pem::Pem) -> String {
    pem::encode_config(block, pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF))
}

fn certificate_serial(block: &pem::Pem) -> Result<String, String> {
    if block.tag() != "CERTIFICATE" {
        return Err(format!("contains a {} block where a CERTIFICATE was expected", block.tag()));
    }
    parse_serial(block.contents()).map_err(|e| format!("has an invalid certificate: {}", e))
}

fn parse_key(raw: &[u8]) -> Result<PrivateKey, String> {
    let mut blocks = pem::parse_many(raw).map_err(|e| format!("has an unreadable private key: {}", e))?;
    if blocks.len() != 1 {
        return Err(format!("must hold exactly one private key, found {} blocks", blocks.len()));
    }
    let block = blocks.remove(0);
    let kind = PrivateKeyKind::from_tag(block.tag())
        .ok_or_else(|| format!("has an unsupported private key type {}", block.tag()))?;
    let parsed = decode_key(kind, block.contents())?;

    Ok(PrivateKey {
        encoded: encode(&block),
        kind,
        parsed,
    })
}

fn decode_key(kind: PrivateKeyKind, der: &[u8]) -> Result<ParsedKey, String> {
    match kind {
        PrivateKeyKind::Rsa => RsaPrivateKey::from_pkcs1_der(der)
            .map(ParsedKey::Rsa)
            .map_err(|e| format!("has an invalid RSA private key: {}", e)),
        PrivateKeyKind::Ec => decode_sec1(der),
        PrivateKeyKind::Pkcs8 => {
            let info = PrivateKeyInfo::try_from(der)
                .map_err(|e| format!("has an invalid PKCS#8 private key: {}", e))?;
            match info.algorithm.oid.to_string().as_str() {
                RSA_ENCRYPTION_OID => RsaPrivateKey::from_pkcs8_der(der)
                    .map(ParsedKey::Rsa)
                    .map_err(|e| format!("has an invalid RSA private key: {}", e)),
                EC_PUBLIC_KEY_OID => decode_sec1(info.private_key),
                other => Err(format!("has a private key with unsupported algorithm {}", other)),
            }
        }
    }
}

/// `ECPrivateKey ::= SEQUENCE { version INTEGER (1), privateKey OCTET STRING, ... }`
fn decode_sec1(der: &[u8]) -> Result<ParsedKey, String> {
    let invalid = || "has an invalid EC private key".to_string();

    let (rest, key) = parse_der(der).map_err(|_| invalid())?;
    if !rest.is_empty() {
        return Err(invalid());
    }
    let fields = key.as_sequence().map_err(|_| invalid())?;
    let version = fields.first().and_then(|v| v.as_u32().ok());
    let secret = fields.get(1).and_then(|s| s.as_slice().ok());

    match (version, secret) {
        (Some(1), Some(secret)) if !secret.is_empty() => Ok(ParsedKey::Ec),
        _ => Err(invalid()),
    }
}
