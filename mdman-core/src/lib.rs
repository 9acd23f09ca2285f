//! Managed Domain core: configuration model, store and reconciliation.
//!
//! A "Managed Domain" is a named group of hostnames sharing one certificate
//! lifecycle. This crate parses declarative directive text into domain-group
//! descriptors, keeps a file-backed store of [`ManagedDomain`] records, and
//! merges descriptors into the store on every configuration load
//! ([`reconcile`]). A record's readiness state is derived from its
//! certificate coverage, never persisted as truth.

pub mod config;
pub mod domain;
pub mod error;
pub mod reconcile;
pub mod state;
pub mod store;

pub use config::{ConfigDescriptor, DomainGroup, GlobalDefaults};
pub use domain::{
    CaSettings, CertInfo, ChallengeType, ManagedDomain, MdState, PrivateKeySpec, RenewMode,
    RenewWindow, RequireHttps,
};
pub use error::{MdError, Result};
pub use reconcile::reconcile;
pub use state::derive_state;
pub use store::MdStore;

/// Directory URL applied to records created without an explicit
/// `MDCertificateAuthority`.
pub const DEFAULT_CA_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Protocol applied alongside [`DEFAULT_CA_URL`].
pub const DEFAULT_CA_PROTO: &str = "ACME";
