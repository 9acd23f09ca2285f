//! Shared helpers for the end-to-end tests

use chrono::Utc;
use mdman_core::{derive_state, reconcile, ConfigDescriptor, ManagedDomain, MdStore};
use std::path::PathBuf;
use tempfile::TempDir;

/// Initialize logging once for a test run, quiet unless RUST_LOG is set.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A scratch server root with a switchable store directory, standing in for
/// the host process that loads config and restarts.
pub struct TestEnv {
    root: TempDir,
    store_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        setup_test_logging();
        let root = TempDir::new().expect("tempdir");
        let store_dir = root.path().join("md");
        TestEnv { root, store_dir }
    }

    /// Open the currently active store.
    pub fn store(&self) -> MdStore {
        MdStore::open(&self.store_dir).expect("open store")
    }

    /// Switch the active store directory, as `MDStoreDir` does for the host.
    pub fn set_store_dir(&mut self, name: &str) {
        self.store_dir = self.root.path().join(name);
    }

    /// Parse directive text and reconcile it, honoring `MDStoreDir` relative
    /// to the server root. Equivalent to install-config-and-restart in the
    /// original suite.
    pub fn sync(&self, text: &str) -> mdman_core::Result<()> {
        let desc = ConfigDescriptor::parse(text)?;
        let store_root = match &desc.defaults.store_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.path().join(dir),
            None => self.store_dir.clone(),
        };
        let store = MdStore::open(store_root)?;
        reconcile(&store, &desc)
    }

    /// The listing a `mdman list` would print: records in creation order with
    /// freshly derived state, optional fields absent when unset.
    pub fn listing(&self) -> Vec<serde_json::Value> {
        let now = Utc::now();
        self.store()
            .list()
            .into_iter()
            .map(|mut md| {
                md.state = derive_state(&md, now);
                serde_json::to_value(md).expect("serialize record")
            })
            .collect()
    }

    /// Listing entry for one record by primary name.
    pub fn listed(&self, name: &str) -> serde_json::Value {
        self.listing()
            .into_iter()
            .find(|v| v["name"] == name)
            .unwrap_or_else(|| panic!("no record named '{name}' in listing"))
    }

    /// Assert a record exists whose domain set and state match.
    pub fn check_md(&self, domains: &[&str], state: u8) {
        let name = domains[0];
        let entry = self.listed(name);
        let listed: Vec<String> = entry["domains"]
            .as_array()
            .expect("domains array")
            .iter()
            .map(|v| v.as_str().expect("domain string").to_string())
            .collect();
        assert_eq!(listed, domains, "domain set of '{name}'");
        assert_eq!(entry["state"], state, "state of '{name}'");
    }

    /// Create a record directly in the store, as `mdman add` would.
    pub fn add(&self, domains: &[&str]) -> ManagedDomain {
        let md = ManagedDomain::new(domains.iter().copied()).expect("record");
        self.store().upsert(md.clone()).expect("upsert");
        md
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
