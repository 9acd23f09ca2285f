//! Configuration-to-store reconciliation, end to end.
//!
//! Each test plays the role of the host process: write directive text,
//! reconcile it, inspect the resulting listing.

use crate::common::TestEnv;
use assert_matches::assert_matches;
use mdman_core::{MdError, DEFAULT_CA_URL};

const INCOMPLETE: u8 = 1;

#[test]
fn test_empty_config_leaves_store_empty() {
    let env = TestEnv::new();
    env.sync("").unwrap();
    assert!(env.listing().is_empty());
}

#[test]
fn test_add_domains_on_empty_store() {
    let env = TestEnv::new();
    env.sync(
        "MDomain testdomain.org www.testdomain.org mail.testdomain.org\n\
         MDomain testdomain2.org www.testdomain2.org mail.testdomain2.org",
    )
    .unwrap();
    env.check_md(
        &["testdomain.org", "www.testdomain.org", "mail.testdomain.org"],
        INCOMPLETE,
    );
    env.check_md(
        &[
            "testdomain2.org",
            "www.testdomain2.org",
            "mail.testdomain2.org",
        ],
        INCOMPLETE,
    );
    assert_eq!(env.listing().len(), 2);
}

#[test]
fn test_domains_added_in_separate_passes() {
    let env = TestEnv::new();
    env.sync("MDomain testdomain.org www.testdomain.org").unwrap();
    env.sync(
        "MDomain testdomain.org www.testdomain.org\n\
         MDomain testdomain2.org www.testdomain2.org",
    )
    .unwrap();
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
    env.check_md(&["testdomain2.org", "www.testdomain2.org"], INCOMPLETE);
}

#[test]
fn test_config_extends_previously_added_record() {
    let env = TestEnv::new();
    env.add(&["testdomain.org", "www.testdomain.org"]);
    env.sync("MDomain testdomain.org www.testdomain.org mail.testdomain.org")
        .unwrap();
    env.check_md(
        &["testdomain.org", "www.testdomain.org", "mail.testdomain.org"],
        INCOMPLETE,
    );
}

#[test]
fn test_ca_settings_from_config() {
    let env = TestEnv::new();
    env.sync(
        "MDCertificateAuthority http://acme.test.org:4000/directory\n\
         MDCertificateProtocol ACME\n\
         MDCertificateAgreement http://acme.test.org:4000/terms/v1\n\
         MDomain testdomain.org www.testdomain.org",
    )
    .unwrap();
    let entry = env.listed("testdomain.org");
    assert_eq!(entry["ca"]["url"], "http://acme.test.org:4000/directory");
    assert_eq!(entry["ca"]["proto"], "ACME");
    assert_eq!(entry["ca"]["agreement"], "http://acme.test.org:4000/terms/v1");
}

#[test]
fn test_default_ca_applied_to_fresh_record() {
    let env = TestEnv::new();
    env.sync("MDomain testdomain.org www.testdomain.org").unwrap();
    let entry = env.listed("testdomain.org");
    assert_eq!(entry["ca"]["url"], DEFAULT_CA_URL);
    assert_eq!(entry["ca"]["proto"], "ACME");
}

#[test]
fn test_server_admin_becomes_contact() {
    let env = TestEnv::new();
    env.sync(
        "ServerAdmin mailto:admin@testdomain.org\n\
         MDomain testdomain.org www.testdomain.org",
    )
    .unwrap();
    let entry = env.listed("testdomain.org");
    assert_eq!(
        entry["contacts"],
        serde_json::json!(["mailto:admin@testdomain.org"])
    );
}

#[test]
fn test_vhost_admin_assigned_per_domain() {
    let env = TestEnv::new();
    env.sync(
        "MDomain testdomain.org www.testdomain.org\n\
         MDomain testdomain2.org www.testdomain2.org\n\
         <VirtualHost *:12346>\n\
         ServerName testdomain.org\n\
         ServerAlias www.testdomain.org\n\
         ServerAdmin mailto:admin@testdomain.org\n\
         </VirtualHost>\n\
         <VirtualHost *:12346>\n\
         ServerName testdomain2.org\n\
         ServerAlias www.testdomain2.org\n\
         ServerAdmin mailto:admin@testdomain2.org\n\
         </VirtualHost>",
    )
    .unwrap();
    assert_eq!(
        env.listed("testdomain.org")["contacts"],
        serde_json::json!(["mailto:admin@testdomain.org"])
    );
    assert_eq!(
        env.listed("testdomain2.org")["contacts"],
        serde_json::json!(["mailto:admin@testdomain2.org"])
    );
}

#[test]
fn test_hostnames_are_lowercased() {
    let env = TestEnv::new();
    env.sync("MDomain testdomain.org WWW.testdomain.org MAIL.testdomain.org")
        .unwrap();
    env.check_md(
        &["testdomain.org", "www.testdomain.org", "mail.testdomain.org"],
        INCOMPLETE,
    );
}

#[test]
fn test_renew_mode_values() {
    let env = TestEnv::new();
    for (mode, code) in [("manual", 0), ("auto", 1), ("always", 2)] {
        env.sync(&format!("MDRenewMode {mode}\nMDomain testdomain.org"))
            .unwrap();
        assert_eq!(env.listed("testdomain.org")["renew-mode"], code);
    }
}

#[test]
fn test_renew_window_values_and_normalization() {
    let env = TestEnv::new();
    env.sync("MDRenewWindow 14d\nMDomain testdomain.org").unwrap();
    assert_eq!(env.listed("testdomain.org")["renew-window"], "14d");
    // bare number normalizes to days
    env.sync("MDRenewWindow 10\nMDomain testdomain.org").unwrap();
    assert_eq!(env.listed("testdomain.org")["renew-window"], "10d");
    env.sync("MDRenewWindow 10%\nMDomain testdomain.org").unwrap();
    assert_eq!(env.listed("testdomain.org")["renew-window"], "10%");
}

#[test]
fn test_challenge_type_values() {
    let env = TestEnv::new();
    env.sync("MDCAChallenges http-01\nMDomain testdomain.org").unwrap();
    assert_eq!(
        env.listed("testdomain.org")["ca"]["challenges"],
        serde_json::json!(["http-01"])
    );
    env.sync("MDCAChallenges tls-alpn-01\nMDomain testdomain.org")
        .unwrap();
    assert_eq!(
        env.listed("testdomain.org")["ca"]["challenges"],
        serde_json::json!(["tls-alpn-01"])
    );
    env.sync("MDCAChallenges http-01 tls-alpn-01\nMDomain testdomain.org")
        .unwrap();
    assert_eq!(
        env.listed("testdomain.org")["ca"]["challenges"],
        serde_json::json!(["http-01", "tls-alpn-01"])
    );
}

#[test]
fn test_private_key_spec_listed() {
    let env = TestEnv::new();
    for bits in [2048, 4096] {
        env.sync(&format!("MDPrivateKeys RSA {bits}\nMDomain testdomain.org"))
            .unwrap();
        assert_eq!(
            env.listed("testdomain.org")["privkey"],
            serde_json::json!({"type": "RSA", "bits": bits})
        );
    }
}

#[test]
fn test_require_https_and_must_staple_listed() {
    let env = TestEnv::new();
    env.sync(
        "MDomain testdomain.org\n\
         MDRequireHttps temporary\n\
         MDMustStaple on",
    )
    .unwrap();
    let entry = env.listed("testdomain.org");
    assert_eq!(entry["require-https"], "temporary");
    assert_eq!(entry["must-staple"], true);
}

#[test]
fn test_auto_members_from_vhost() {
    let env = TestEnv::new();
    env.sync(
        "MDMember auto\n\
         MDomain testdomain.org\n\
         <VirtualHost *:12346>\n\
         ServerName testdomain.org\n\
         ServerAlias test.testdomain.org mail.testdomain.org\n\
         </VirtualHost>",
    )
    .unwrap();
    assert_eq!(
        env.listed("testdomain.org")["domains"],
        serde_json::json!(["testdomain.org", "test.testdomain.org", "mail.testdomain.org"])
    );
}

#[test]
fn test_record_survives_removal_from_config() {
    let env = TestEnv::new();
    env.add(&["testdomain.org", "www.testdomain.org"]);
    env.sync("").unwrap();
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
}

#[test]
fn test_alias_removed_from_config_is_dropped() {
    let env = TestEnv::new();
    env.add(&[
        "testdomain.org",
        "test.testdomain.org",
        "www.testdomain.org",
    ]);
    env.sync("MDomain testdomain.org www.testdomain.org").unwrap();
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
}

#[test]
fn test_primary_removed_renames_record() {
    let env = TestEnv::new();
    env.add(&["name.testdomain.org", "testdomain.org", "www.testdomain.org"]);
    env.sync("MDomain testdomain.org www.testdomain.org").unwrap();
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
    assert_eq!(env.listing().len(), 1);
}

#[test]
fn test_unrelated_record_untouched_by_pass() {
    let env = TestEnv::new();
    env.add(&["greenbytes2.de", "www.greenbytes2.de"]);
    env.add(&["testdomain.org", "www.testdomain.org"]);
    env.sync("MDomain testdomain.org www.testdomain.org").unwrap();
    env.check_md(&["greenbytes2.de", "www.greenbytes2.de"], INCOMPLETE);
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
}

#[test]
fn test_contacts_sticky_across_passes() {
    let env = TestEnv::new();
    env.sync(
        "ServerAdmin mailto:admin@testdomain.org\n\
         MDomain testdomain.org www.testdomain.org",
    )
    .unwrap();
    env.sync("MDomain testdomain.org www.testdomain.org").unwrap();
    assert_eq!(
        env.listed("testdomain.org")["contacts"],
        serde_json::json!(["mailto:admin@testdomain.org"])
    );
}

#[test]
fn test_ca_sticky_across_passes() {
    let env = TestEnv::new();
    env.sync(
        "MDCertificateAuthority http://acme.test.org:4000/directory\n\
         MDCertificateAgreement http://acme.test.org:4000/terms/v1\n\
         MDomain testdomain.org",
    )
    .unwrap();
    env.sync("MDomain testdomain.org").unwrap();
    let entry = env.listed("testdomain.org");
    assert_eq!(entry["ca"]["url"], "http://acme.test.org:4000/directory");
    assert_eq!(entry["ca"]["agreement"], "http://acme.test.org:4000/terms/v1");
}

#[test]
fn test_contact_change_overwrites() {
    let env = TestEnv::new();
    env.sync("ServerAdmin mailto:admin@testdomain.org\nMDomain testdomain.org")
        .unwrap();
    env.sync("ServerAdmin mailto:webmaster@testdomain.org\nMDomain testdomain.org")
        .unwrap();
    assert_eq!(
        env.listed("testdomain.org")["contacts"],
        serde_json::json!(["mailto:webmaster@testdomain.org"])
    );
}

#[test]
fn test_omitted_fields_reset_and_vanish_from_listing() {
    let env = TestEnv::new();
    env.sync(
        "MDRenewWindow 14d\n\
         MDCAChallenges http-01\n\
         MDPrivateKeys RSA 4096\n\
         MDomain testdomain.org\n\
         MDRequireHttps temporary\n\
         MDMustStaple on",
    )
    .unwrap();
    env.sync("MDomain testdomain.org").unwrap();
    let entry = env.listed("testdomain.org");
    assert_eq!(entry["renew-window"], "33%");
    assert_eq!(entry["renew-mode"], 1);
    assert_eq!(entry["must-staple"], false);
    // omitted optional fields are absent, not null
    assert!(entry.get("privkey").is_none());
    assert!(entry.get("require-https").is_none());
    assert!(entry["ca"].get("challenges").is_none());
}

#[test]
fn test_require_https_in_domain_block() {
    let env = TestEnv::new();
    for mode in ["temporary", "permanent"] {
        env.sync(&format!(
            "<MDomainSet testdomain.org>\n\
             MDMember www.testdomain.org mail.testdomain.org\n\
             MDRequireHttps {mode}\n\
             </MDomainSet>"
        ))
        .unwrap();
        assert_eq!(env.listed("testdomain.org")["require-https"], mode);
    }
}

#[test]
fn test_host_moves_to_other_group() {
    let env = TestEnv::new();
    env.add(&[
        "testdomain.org",
        "www.testdomain.org",
        "mail.testdomain2.org",
    ]);
    env.add(&["testdomain2.org", "www.testdomain2.org"]);
    env.sync(
        "MDomain testdomain.org www.testdomain.org\n\
         MDomain testdomain2.org www.testdomain2.org mail.testdomain2.org",
    )
    .unwrap();
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
    env.check_md(
        &[
            "testdomain2.org",
            "www.testdomain2.org",
            "mail.testdomain2.org",
        ],
        INCOMPLETE,
    );
    let holders = env
        .listing()
        .iter()
        .filter(|e| {
            e["domains"]
                .as_array()
                .unwrap()
                .contains(&serde_json::json!("mail.testdomain2.org"))
        })
        .count();
    assert_eq!(holders, 1);
}

#[test]
fn test_invalid_renew_mode_fails_pass_and_keeps_store() {
    let env = TestEnv::new();
    env.sync("MDRenewWindow 14d\nMDomain testdomain.org").unwrap();
    let before = env.listing();
    let r = env.sync("MDRenewMode often\nMDomain testdomain.org");
    assert_matches!(r, Err(MdError::ConfigError(_)));
    assert_eq!(env.listing(), before);
}

#[test]
fn test_store_dir_switch_isolates_records() {
    let mut env = TestEnv::new();
    env.sync(
        "MDStoreDir md-other\n\
         MDomain testdomain.org www.testdomain.org",
    )
    .unwrap();
    // default store untouched
    assert!(env.listing().is_empty());
    env.set_store_dir("md-other");
    env.check_md(&["testdomain.org", "www.testdomain.org"], INCOMPLETE);
}

#[test]
fn test_startup_survives_foreign_store_entry() {
    let env = TestEnv::new();
    env.sync("ServerAdmin admin@testdomain.org\nMDomain testdomain.org")
        .unwrap();
    let domains_dir = env.store().root().join("domains");
    std::fs::write(domains_dir.join("wrong.com"), "this does not belong here\n").unwrap();
    // reload still works and the foreign entry is not a record
    env.sync("ServerAdmin admin@testdomain.org\nMDomain testdomain.org")
        .unwrap();
    assert_eq!(env.listing().len(), 1);
}
