//! Readiness derivation for managed domains

use crate::domain::{ManagedDomain, MdState};
use chrono::{DateTime, Utc};

/// Compute the lifecycle state of a record at time `now`.
///
/// `Complete` requires a certificate valid at `now` whose covered names are a
/// superset of the declared hosts, plus account prerequisites (contacts and a
/// CA agreement). A covering certificate past its validity yields `Expired`;
/// anything else is `Incomplete`. Only declared hosts and the certificate
/// matter: changing the CA endpoint alone never changes state.
pub fn derive_state(md: &ManagedDomain, now: DateTime<Utc>) -> MdState {
    let Some(cert) = &md.cert else {
        return MdState::Incomplete;
    };
    if !cert.covers(md.domains.iter().map(String::as_str)) {
        return MdState::Incomplete;
    }
    if now > cert.valid_until {
        return MdState::Expired;
    }
    if now < cert.valid_from {
        return MdState::Incomplete;
    }
    if md.contacts.is_empty() || md.ca.agreement.is_none() {
        return MdState::Incomplete;
    }
    MdState::Complete
}
