//! CLI command implementations
//!
//! Each command opens the store, performs one operation and returns the
//! `output` value for the JSON envelope printed by `main`.

use anyhow::{Context, Result};
use chrono::Utc;
use mdman_core::{
    config::ConfigDescriptor,
    domain::{normalize_contact, normalize_host_list},
    derive_state, reconcile, ManagedDomain, MdError, MdStore,
};
use std::path::Path;
use tracing::info;

/// List records, deriving state fresh for each.
pub fn list(store_dir: &Path, names: &[String]) -> Result<serde_json::Value> {
    let store = MdStore::open(store_dir)?;
    let records: Vec<ManagedDomain> = if names.is_empty() {
        store.list()
    } else {
        names
            .iter()
            .map(|n| store.get(n))
            .collect::<mdman_core::Result<_>>()?
    };
    let now = Utc::now();
    let listed: Vec<serde_json::Value> = records
        .into_iter()
        .map(|mut md| {
            md.state = derive_state(&md, now);
            serde_json::to_value(md)
        })
        .collect::<std::result::Result<_, _>>()?;
    Ok(serde_json::Value::Array(listed))
}

/// Create a record with documented defaults.
pub fn add(store_dir: &Path, domains: &[String]) -> Result<serde_json::Value> {
    let store = MdStore::open(store_dir)?;
    let md = ManagedDomain::new(domains.iter().map(String::as_str))?;
    if let Ok(existing) = store.get(&md.name) {
        anyhow::bail!(MdError::ConfigError(format!(
            "managed domain '{}' already exists",
            existing.name
        )));
    }
    info!(name = %md.name, "adding managed domain");
    store.upsert(md.clone())?;
    Ok(serde_json::json!([md]))
}

/// Update one aspect of a record, then re-derive its state.
pub fn update(
    store_dir: &Path,
    name: &str,
    aspect: &str,
    values: &[String],
) -> Result<serde_json::Value> {
    let store = MdStore::open(store_dir)?;
    let mut md = store.get(name)?;
    match aspect {
        "domains" => {
            let domains = normalize_host_list(values);
            match domains.first() {
                Some(first) if *first == md.name => md.domains = domains,
                Some(_) => anyhow::bail!(MdError::ConfigError(format!(
                    "updated domain list must start with the primary name '{}'",
                    md.name
                ))),
                None => anyhow::bail!(MdError::ConfigError(
                    "domains update needs at least one hostname".to_string()
                )),
            }
        }
        "contacts" => {
            md.contacts = values.iter().map(|v| normalize_contact(v)).collect();
        }
        "agreement" => {
            let [value] = values else {
                anyhow::bail!(MdError::ConfigError(
                    "agreement update expects exactly one URL".to_string()
                ));
            };
            md.ca.agreement = Some(value.clone());
        }
        "ca" => {
            let [value] = values else {
                anyhow::bail!(MdError::ConfigError(
                    "ca update expects exactly one URL".to_string()
                ));
            };
            md.ca.url = Some(value.clone());
        }
        other => anyhow::bail!(MdError::ConfigError(format!("unknown aspect '{other}'"))),
    }
    md.state = derive_state(&md, Utc::now());
    store.upsert(md.clone())?;
    Ok(serde_json::json!([md]))
}

/// Remove a record from the store.
pub fn remove(store_dir: &Path, name: &str) -> Result<serde_json::Value> {
    let store = MdStore::open(store_dir)?;
    store.remove(name)?;
    info!(name, "removed managed domain");
    Ok(serde_json::json!([]))
}

/// Parse directive text and run a reconciliation pass.
///
/// An `MDStoreDir` in the config overrides the CLI store directory, exactly
/// as it would for the host process. A relative `MDStoreDir` is resolved
/// against the config file's directory, not the process cwd.
pub fn sync(store_dir: &Path, config: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(config)
        .with_context(|| format!("Failed to read config {}", config.display()))?;
    let desc = ConfigDescriptor::parse(&text)?;
    let root = match desc.defaults.store_dir.clone() {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => match config.parent() {
            Some(base) => base.join(dir),
            None => dir,
        },
        None => store_dir.to_path_buf(),
    };
    let store = MdStore::open(root)?;
    reconcile(&store, &desc)?;
    info!(groups = desc.groups.len(), "configuration reconciled");
    list(store.root(), &[])
}
