//! Reconciliation: merging declared domain groups into the store
//!
//! Runs once per configuration load. Each incoming group is matched against
//! existing records by host-set overlap; overlapped records are consumed and
//! the survivor's host set becomes exactly the declared set. Field merging
//! follows a fixed per-field policy:
//!
//! | field                          | when omitted from config      |
//! |--------------------------------|-------------------------------|
//! | domains                        | n/a, always declared          |
//! | contacts, ca url/proto/agreement | sticky, prior value persists |
//! | renew-mode, renew-window, must-staple | reset to documented default |
//! | challenges, privkey, require-https | reset to unset              |
//!
//! Records not matched by any group are left untouched; removal is an
//! explicit operator action, never a side effect of a config pass.

use crate::config::{ConfigDescriptor, DomainGroup};
use crate::domain::{CaSettings, ManagedDomain, MdState};
use crate::error::Result;
use crate::state::derive_state;
use crate::store::MdStore;
use crate::{DEFAULT_CA_PROTO, DEFAULT_CA_URL};
use chrono::Utc;
use tracing::{debug, info};

/// Merge all groups of a parsed configuration into the store.
///
/// All-or-nothing: on a persistence failure the store keeps its
/// pre-reconciliation state and the error surfaces as a load failure.
pub fn reconcile(store: &MdStore, desc: &ConfigDescriptor) -> Result<()> {
    let existing = store.list();
    let mut consumed = vec![false; existing.len()];
    // survivor of a merge sits at the earliest consumed position
    let mut replaced: Vec<Option<ManagedDomain>> = vec![None; existing.len()];
    let mut appended: Vec<ManagedDomain> = Vec::new();

    for group in &desc.groups {
        let matches: Vec<usize> = existing
            .iter()
            .enumerate()
            .filter(|(i, md)| {
                !consumed[*i] && md.overlaps(group.domains.iter().map(String::as_str))
            })
            .map(|(i, _)| i)
            .collect();

        let matched: Vec<&ManagedDomain> = matches.iter().map(|&i| &existing[i]).collect();
        let merged = merge_group(group, &matched);

        match matches.first() {
            Some(&first) => {
                if matches.len() > 1 {
                    info!(
                        name = %merged.name,
                        merged = matches.len(),
                        "collapsing overlapping managed domains"
                    );
                }
                for &i in &matches {
                    consumed[i] = true;
                }
                replaced[first] = Some(merged);
            }
            None => {
                debug!(name = %merged.name, "new managed domain");
                appended.push(merged);
            }
        }
    }

    let mut result: Vec<ManagedDomain> = Vec::with_capacity(existing.len() + appended.len());
    for (i, md) in existing.into_iter().enumerate() {
        if consumed[i] {
            if let Some(merged) = replaced[i].take() {
                result.push(merged);
            }
        } else {
            result.push(md);
        }
    }
    result.extend(appended);

    store.replace_all(result)
}

/// Build the post-merge record for one group.
///
/// `matched` holds the overlapped existing records in store order; the one
/// whose primary equals the group's primary carries identity (cert info),
/// else the first overlapped one does.
fn merge_group(group: &DomainGroup, matched: &[&ManagedDomain]) -> ManagedDomain {
    let base = matched
        .iter()
        .find(|md| md.name == group.name)
        .or_else(|| matched.first())
        .copied();

    let prior_ca = base.map(|md| md.ca.clone()).unwrap_or_default();

    let mut md = ManagedDomain {
        name: group.name.clone(),
        // set-overwrite: exactly the declared hosts, stale ones drop out
        domains: group.domains.clone(),
        // sticky: omitted config keeps the prior value
        contacts: group
            .contacts
            .clone()
            .or_else(|| base.map(|md| md.contacts.clone()))
            .unwrap_or_default(),
        ca: CaSettings {
            url: group
                .ca_url
                .clone()
                .or(prior_ca.url)
                .or_else(|| Some(DEFAULT_CA_URL.to_string())),
            proto: group
                .ca_proto
                .clone()
                .or(prior_ca.proto)
                .or_else(|| Some(DEFAULT_CA_PROTO.to_string())),
            agreement: group.ca_agreement.clone().or(prior_ca.agreement),
            // resets to unset when omitted
            challenges: group.challenges.clone(),
        },
        // reset to documented defaults when omitted
        renew_mode: group.renew_mode.unwrap_or_default(),
        renew_window: group.renew_window.unwrap_or_default(),
        must_staple: group.must_staple.unwrap_or(false),
        // reset to unset when omitted
        privkey: group.privkey.clone(),
        require_https: group.require_https,
        // carried through reconciliation, owned by the external driver
        cert: base.and_then(|md| md.cert.clone()),
        state: MdState::Unknown,
    };
    md.state = derive_state(&md, Utc::now());
    md
}
