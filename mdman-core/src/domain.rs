//! Managed Domain records and their value types
//!
//! Field names on the wire match the store/listing format of the original
//! module: `renew-mode` is a numeric code, `renew-window` a string such as
//! `"14d"` or `"33%"`, and optional fields are absent when unset.

use crate::error::{MdError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Lower-case a hostname for storage and comparison.
///
/// Idempotent: normalizing an already-normalized name is a no-op.
pub fn normalize_hostname(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}

/// Normalize a contact address to a URI.
///
/// Bare mail addresses get a `mailto:` scheme; anything that already carries
/// a scheme is kept as given.
pub fn normalize_contact(contact: &str) -> String {
    let c = contact.trim();
    if c.contains(':') {
        c.to_string()
    } else {
        format!("mailto:{c}")
    }
}

/// Deduplicate hostnames, preserving first occurrence, normalizing each.
pub fn normalize_host_list<I, S>(hosts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for h in hosts {
        let n = normalize_hostname(h.as_ref());
        if !n.is_empty() && seen.insert(n.clone()) {
            out.push(n);
        }
    }
    out
}

/// When certificate renewal is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RenewMode {
    /// Never renewed by the module itself
    Manual,
    /// Renewed when the renew window opens
    #[default]
    Auto,
    /// Renewed on every opportunity
    Always,
}

impl From<RenewMode> for u8 {
    fn from(m: RenewMode) -> u8 {
        match m {
            RenewMode::Manual => 0,
            RenewMode::Auto => 1,
            RenewMode::Always => 2,
        }
    }
}

impl TryFrom<u8> for RenewMode {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, String> {
        match v {
            0 => Ok(RenewMode::Manual),
            1 => Ok(RenewMode::Auto),
            2 => Ok(RenewMode::Always),
            other => Err(format!("invalid renew mode code: {other}")),
        }
    }
}

impl FromStr for RenewMode {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(RenewMode::Manual),
            "auto" => Ok(RenewMode::Auto),
            "always" => Ok(RenewMode::Always),
            other => Err(MdError::ConfigError(format!(
                "unknown renew mode '{other}', expected manual, auto or always"
            ))),
        }
    }
}

/// Lead time before expiry at which renewal starts, as a day count or a
/// percentage of the certificate's validity period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RenewWindow {
    Days(u32),
    Percent(u8),
}

impl Default for RenewWindow {
    fn default() -> Self {
        RenewWindow::Percent(33)
    }
}

impl fmt::Display for RenewWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewWindow::Days(d) => write!(f, "{d}d"),
            RenewWindow::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl From<RenewWindow> for String {
    fn from(w: RenewWindow) -> String {
        w.to_string()
    }
}

impl TryFrom<String> for RenewWindow {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, String> {
        s.parse::<RenewWindow>().map_err(|e| e.to_string())
    }
}

impl FromStr for RenewWindow {
    type Err = MdError;

    /// Accepts `"14d"`, `"10%"` and bare day counts: `"10"` becomes 10 days.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parse_num = |digits: &str| -> Result<u32> {
            digits.parse().map_err(|_| {
                MdError::ConfigError(format!("invalid renew window value '{s}'"))
            })
        };
        if let Some(p) = s.strip_suffix('%') {
            let pct = parse_num(p)?;
            if pct > 100 {
                return Err(MdError::ConfigError(format!(
                    "renew window percentage out of range: '{s}'"
                )));
            }
            Ok(RenewWindow::Percent(pct as u8))
        } else if let Some(d) = s.strip_suffix('d') {
            Ok(RenewWindow::Days(parse_num(d)?))
        } else {
            Ok(RenewWindow::Days(parse_num(s)?))
        }
    }
}

/// ACME challenge types the CA may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeType::Http01 => f.write_str("http-01"),
            ChallengeType::TlsAlpn01 => f.write_str("tls-alpn-01"),
        }
    }
}

impl FromStr for ChallengeType {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http-01" => Ok(ChallengeType::Http01),
            "tls-alpn-01" => Ok(ChallengeType::TlsAlpn01),
            other => Err(MdError::ConfigError(format!(
                "unknown challenge type '{other}'"
            ))),
        }
    }
}

/// Private key parameters for issued certificates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeySpec {
    /// Key algorithm, currently only "RSA"
    #[serde(rename = "type")]
    pub key_type: String,
    /// Modulus length in bits
    pub bits: u32,
}

impl PrivateKeySpec {
    /// Parse the value tokens of an `MDPrivateKeys` directive.
    pub fn parse(tokens: &[&str]) -> Result<Self> {
        match tokens {
            [kind, bits] if kind.eq_ignore_ascii_case("rsa") => {
                let bits: u32 = bits.parse().map_err(|_| {
                    MdError::ConfigError(format!("invalid RSA key size '{bits}'"))
                })?;
                if bits < 2048 {
                    return Err(MdError::ConfigError(format!(
                        "RSA key size {bits} below minimum of 2048"
                    )));
                }
                Ok(PrivateKeySpec {
                    key_type: "RSA".to_string(),
                    bits,
                })
            }
            [kind, ..] => Err(MdError::ConfigError(format!(
                "unknown private key type '{kind}'"
            ))),
            [] => Err(MdError::ConfigError(
                "MDPrivateKeys needs a key type".to_string(),
            )),
        }
    }
}

/// HTTPS enforcement for a domain's plain-HTTP traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequireHttps {
    /// 302 redirect, revocable
    Temporary,
    /// 301 redirect plus HSTS
    Permanent,
}

impl fmt::Display for RequireHttps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequireHttps::Temporary => f.write_str("temporary"),
            RequireHttps::Permanent => f.write_str("permanent"),
        }
    }
}

impl FromStr for RequireHttps {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "temporary" => Ok(RequireHttps::Temporary),
            "permanent" => Ok(RequireHttps::Permanent),
            other => Err(MdError::ConfigError(format!(
                "unknown require-https mode '{other}', expected temporary or permanent"
            ))),
        }
    }
}

/// Certificate authority settings of a record.
///
/// All fields optional; the whole object is omitted from listings when empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenges: Option<Vec<ChallengeType>>,
}

impl CaSettings {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.proto.is_none()
            && self.agreement.is_none()
            && self.challenges.is_none()
    }
}

/// Summary of the currently installed certificate, recorded by the external
/// driver. Reconciliation carries it along unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertInfo {
    /// Hostnames the certificate covers (SAN entries)
    pub names: Vec<String>,
    #[serde(rename = "valid-from")]
    pub valid_from: DateTime<Utc>,
    #[serde(rename = "valid-until")]
    pub valid_until: DateTime<Utc>,
}

impl CertInfo {
    /// True when every host in `hosts` appears in the covered names.
    pub fn covers<'a, I: IntoIterator<Item = &'a str>>(&self, hosts: I) -> bool {
        let covered: HashSet<String> =
            self.names.iter().map(|n| normalize_hostname(n)).collect();
        hosts.into_iter().all(|h| covered.contains(&normalize_hostname(h)))
    }
}

/// Derived readiness of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MdState {
    /// Not yet derived
    #[default]
    Unknown,
    /// Declared hosts not fully covered, or prerequisites missing
    Incomplete,
    /// Valid certificate covering all declared hosts
    Complete,
    /// Covering certificate past its validity
    Expired,
}

impl From<MdState> for u8 {
    fn from(s: MdState) -> u8 {
        match s {
            MdState::Unknown => 0,
            MdState::Incomplete => 1,
            MdState::Complete => 2,
            MdState::Expired => 3,
        }
    }
}

impl TryFrom<u8> for MdState {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, String> {
        match v {
            0 => Ok(MdState::Unknown),
            1 => Ok(MdState::Incomplete),
            2 => Ok(MdState::Complete),
            3 => Ok(MdState::Expired),
            other => Err(format!("invalid state code: {other}")),
        }
    }
}

/// One managed domain: a host group sharing a certificate lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedDomain {
    /// Primary name, equal to `domains[0]`; the record key in the store
    pub name: String,
    /// All hostnames in declared order, primary first
    pub domains: Vec<String>,
    /// Contact URIs for the CA account
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,
    #[serde(default, skip_serializing_if = "CaSettings::is_empty")]
    pub ca: CaSettings,
    #[serde(rename = "renew-mode", default)]
    pub renew_mode: RenewMode,
    #[serde(rename = "renew-window", default)]
    pub renew_window: RenewWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privkey: Option<PrivateKeySpec>,
    #[serde(rename = "require-https", default, skip_serializing_if = "Option::is_none")]
    pub require_https: Option<RequireHttps>,
    #[serde(rename = "must-staple", default)]
    pub must_staple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<CertInfo>,
    /// Derived on load/list, persisted only as a hint
    #[serde(default)]
    pub state: MdState,
}

impl ManagedDomain {
    /// Create a record from a host list. The first host becomes the primary
    /// name; hosts are normalized and deduplicated, order preserved.
    pub fn new<I, S>(hosts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = normalize_host_list(hosts);
        let name = domains
            .first()
            .cloned()
            .ok_or_else(|| MdError::ConfigError("managed domain needs at least one name".into()))?;
        Ok(ManagedDomain {
            name,
            domains,
            contacts: Vec::new(),
            ca: CaSettings::default(),
            renew_mode: RenewMode::default(),
            renew_window: RenewWindow::default(),
            privkey: None,
            require_https: None,
            must_staple: false,
            cert: None,
            state: MdState::Unknown,
        })
    }

    /// True when `host` (normalized) is one of this record's domains.
    pub fn contains(&self, host: &str) -> bool {
        let n = normalize_hostname(host);
        self.domains.iter().any(|d| *d == n)
    }

    /// True when this record shares at least one host with `hosts`.
    pub fn overlaps<'a, I: IntoIterator<Item = &'a str>>(&self, hosts: I) -> bool {
        hosts.into_iter().any(|h| self.contains(h))
    }
}
