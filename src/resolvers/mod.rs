/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resolvers/mod.rs
*
* Resolvers turn the references held by a Distribution (its class, its
* origin target and its TLS secret) into concrete values the providers can
* act on. Each resolver reads the cluster through a narrow trait so that the
* controller tests can substitute mocks.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod certificate;
pub mod distribution_class;
pub mod origin;

pub use certificate::{Certificate, CertificateResolver, SecretLookup};
pub use distribution_class::{ClassLookup, DistributionClassResolver};
pub use origin::{OriginLookup, OriginResolver, ResolvedOrigin};
