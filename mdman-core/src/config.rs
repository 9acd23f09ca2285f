//! Configuration model: directive text to domain-group descriptors
//!
//! Consumes Apache-style directive text (`MDomain`, `<MDomainSet>` blocks,
//! ambient CA/admin settings, `<VirtualHost>` blocks for auto-member
//! discovery) and produces a [`ConfigDescriptor`]: one [`DomainGroup`] per
//! declared group plus the [`GlobalDefaults`] in effect. Directives this
//! module does not know are ignored; they belong to the surrounding host
//! process.

use crate::domain::{
    normalize_contact, normalize_host_list, normalize_hostname, ChallengeType, PrivateKeySpec,
    RenewMode, RenewWindow, RequireHttps,
};
use crate::error::{MdError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// One declared domain group. `Option` fields distinguish "explicitly
/// configured (possibly via ambient defaults)" from "not mentioned".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainGroup {
    /// Primary name, first declared host, normalized
    pub name: String,
    /// All hosts in declared order, primary first
    pub domains: Vec<String>,
    pub contacts: Option<Vec<String>>,
    pub ca_url: Option<String>,
    pub ca_proto: Option<String>,
    pub ca_agreement: Option<String>,
    pub renew_mode: Option<RenewMode>,
    pub renew_window: Option<RenewWindow>,
    pub challenges: Option<Vec<ChallengeType>>,
    pub privkey: Option<PrivateKeySpec>,
    pub require_https: Option<RequireHttps>,
    pub must_staple: Option<bool>,
    /// Per-group auto-member override (`MDMember auto|manual` inside a block)
    pub auto_members: Option<bool>,
}

/// Settings declared outside any domain block; ambient defaults for every
/// group of this pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalDefaults {
    pub admin: Option<String>,
    pub store_dir: Option<PathBuf>,
    pub ca_url: Option<String>,
    pub ca_proto: Option<String>,
    pub ca_agreement: Option<String>,
    pub renew_mode: Option<RenewMode>,
    pub renew_window: Option<RenewWindow>,
    pub challenges: Option<Vec<ChallengeType>>,
    pub privkey: Option<PrivateKeySpec>,
    pub require_https: Option<RequireHttps>,
    pub must_staple: Option<bool>,
    pub auto_members: bool,
}

/// A `<VirtualHost>` declaration, as far as this module cares
#[derive(Debug, Clone, Default)]
struct VirtualHost {
    hosts: Vec<String>,
    admin: Option<String>,
}

/// Parsed configuration: groups ready for reconciliation plus the global
/// defaults in effect.
#[derive(Debug, Clone, Default)]
pub struct ConfigDescriptor {
    pub groups: Vec<DomainGroup>,
    pub defaults: GlobalDefaults,
}

impl ConfigDescriptor {
    /// Parse directive text into a descriptor set.
    ///
    /// Fails with [`MdError::ConfigError`] on unknown enum tokens, malformed
    /// or unterminated blocks, and hosts claimed by more than one group.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<Line> = text
            .lines()
            .map(Line::parse)
            .collect::<Result<Vec<_>>>()?;
        let mut parser = Parser {
            lines: &lines,
            pos: 0,
            groups: Vec::new(),
            defaults: GlobalDefaults::default(),
            vhosts: Vec::new(),
        };
        parser.run()?;
        let mut desc = ConfigDescriptor {
            groups: parser.groups,
            defaults: parser.defaults,
        };
        desc.finalize(&parser.vhosts)?;
        Ok(desc)
    }

    /// Apply auto-member discovery, vhost/global contact assignment and
    /// ambient inheritance, then check host uniqueness across groups.
    fn finalize(&mut self, vhosts: &[VirtualHost]) -> Result<()> {
        let d = self.defaults.clone();
        for group in &mut self.groups {
            if group.auto_members.unwrap_or(d.auto_members) {
                // declared names first, then hosts discovered from vhosts
                let mut hosts = group.domains.clone();
                for vh in vhosts {
                    if vh.hosts.iter().any(|h| hosts.contains(h)) {
                        hosts.extend(vh.hosts.iter().cloned());
                    }
                }
                group.domains = normalize_host_list(hosts);
            }

            if group.contacts.is_none() {
                let vhost_admin = vhosts
                    .iter()
                    .find(|vh| {
                        vh.admin.is_some() && vh.hosts.iter().any(|h| group.domains.contains(h))
                    })
                    .and_then(|vh| vh.admin.clone());
                if let Some(admin) = vhost_admin.or_else(|| d.admin.clone()) {
                    group.contacts = Some(vec![admin]);
                }
            }

            group.ca_url = group.ca_url.take().or_else(|| d.ca_url.clone());
            group.ca_proto = group.ca_proto.take().or_else(|| d.ca_proto.clone());
            group.ca_agreement = group.ca_agreement.take().or_else(|| d.ca_agreement.clone());
            group.renew_mode = group.renew_mode.or(d.renew_mode);
            group.renew_window = group.renew_window.or(d.renew_window);
            group.challenges = group.challenges.take().or_else(|| d.challenges.clone());
            group.privkey = group.privkey.take().or_else(|| d.privkey.clone());
            group.require_https = group.require_https.or(d.require_https);
            group.must_staple = group.must_staple.or(d.must_staple);
        }

        let mut claimed = HashSet::new();
        for group in &self.groups {
            for host in &group.domains {
                if !claimed.insert(host.clone()) {
                    return Err(MdError::ConfigError(format!(
                        "host '{host}' is claimed by more than one managed domain"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One significant config line
#[derive(Debug, Clone, PartialEq)]
enum Line {
    Empty,
    /// `key value...`
    Directive(String, Vec<String>),
    /// `<Tag args...>`
    BlockStart(String, Vec<String>),
    /// `</Tag>`
    BlockEnd(String),
}

impl Line {
    fn parse(raw: &str) -> Result<Line> {
        let s = match raw.find('#') {
            Some(i) => &raw[..i],
            None => raw,
        }
        .trim();
        if s.is_empty() {
            return Ok(Line::Empty);
        }
        if let Some(inner) = s.strip_prefix("</") {
            let tag = inner.strip_suffix('>').ok_or_else(|| {
                MdError::ConfigError(format!("malformed block end: '{s}'"))
            })?;
            return Ok(Line::BlockEnd(tag.trim().to_ascii_lowercase()));
        }
        if let Some(inner) = s.strip_prefix('<') {
            let inner = inner.strip_suffix('>').ok_or_else(|| {
                MdError::ConfigError(format!("malformed block start: '{s}'"))
            })?;
            let mut parts = inner.split_whitespace();
            let tag = parts
                .next()
                .ok_or_else(|| MdError::ConfigError(format!("empty block tag: '{s}'")))?;
            return Ok(Line::BlockStart(
                tag.to_ascii_lowercase(),
                parts.map(str::to_string).collect(),
            ));
        }
        let mut parts = s.split_whitespace();
        let key = parts.next().unwrap_or_default().to_ascii_lowercase();
        Ok(Line::Directive(key, parts.map(str::to_string).collect()))
    }
}

struct Parser<'a> {
    lines: &'a [Line],
    pos: usize,
    groups: Vec<DomainGroup>,
    defaults: GlobalDefaults,
    vhosts: Vec<VirtualHost>,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Option<&'a Line> {
        let line = self.lines.get(self.pos);
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    fn run(&mut self) -> Result<()> {
        while let Some(line) = self.next() {
            match line {
                Line::Empty => {}
                Line::Directive(key, values) => self.global_directive(key, values)?,
                Line::BlockStart(tag, args) => match tag.as_str() {
                    "mdomainset" => self.domain_block(args)?,
                    "virtualhost" => self.vhost_block()?,
                    other => self.skip_block(other)?,
                },
                Line::BlockEnd(tag) => {
                    return Err(MdError::ConfigError(format!(
                        "unexpected block end '</{tag}>'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn global_directive(&mut self, key: &str, values: &[String]) -> Result<()> {
        match key {
            "mdomain" => {
                let domains = normalize_host_list(values);
                if domains.is_empty() {
                    return Err(MdError::ConfigError(
                        "MDomain needs at least one hostname".to_string(),
                    ));
                }
                self.groups.push(DomainGroup {
                    name: domains[0].clone(),
                    domains,
                    ..DomainGroup::default()
                });
            }
            "mdmember" => match single(key, values)?.to_ascii_lowercase().as_str() {
                "auto" => self.defaults.auto_members = true,
                "manual" => self.defaults.auto_members = false,
                other => {
                    return Err(MdError::ConfigError(format!(
                        "MDMember outside a domain block expects auto or manual, got '{other}'"
                    )));
                }
            },
            "serveradmin" => {
                self.defaults.admin = Some(normalize_contact(single(key, values)?));
            }
            "mdstoredir" => {
                self.defaults.store_dir = Some(PathBuf::from(single(key, values)?));
            }
            "mdcertificateauthority" => {
                self.defaults.ca_url = Some(parse_url(single(key, values)?)?);
            }
            "mdcertificateprotocol" => {
                self.defaults.ca_proto = Some(single(key, values)?.to_string());
            }
            "mdcertificateagreement" => {
                self.defaults.ca_agreement = Some(single(key, values)?.to_string());
            }
            "mdrenewmode" => {
                self.defaults.renew_mode = Some(single(key, values)?.parse()?);
            }
            "mdrenewwindow" => {
                self.defaults.renew_window = Some(single(key, values)?.parse()?);
            }
            "mdcachallenges" => {
                self.defaults.challenges = Some(parse_challenges(values)?);
            }
            "mdprivatekeys" => {
                let tokens: Vec<&str> = values.iter().map(String::as_str).collect();
                self.defaults.privkey = Some(PrivateKeySpec::parse(&tokens)?);
            }
            "mdrequirehttps" => {
                self.defaults.require_https = Some(single(key, values)?.parse()?);
            }
            "mdmuststaple" => {
                self.defaults.must_staple = Some(parse_on_off(single(key, values)?)?);
            }
            other => {
                debug!(directive = other, "ignoring foreign directive");
            }
        }
        Ok(())
    }

    fn domain_block(&mut self, args: &[String]) -> Result<()> {
        let domains = normalize_host_list(args);
        if domains.is_empty() {
            return Err(MdError::ConfigError(
                "<MDomainSet> needs a domain name".to_string(),
            ));
        }
        let mut group = DomainGroup {
            name: domains[0].clone(),
            domains,
            ..DomainGroup::default()
        };
        loop {
            let Some(line) = self.next() else {
                return Err(MdError::ConfigError(
                    "unterminated <MDomainSet> block".to_string(),
                ));
            };
            match line {
                Line::Empty => {}
                Line::BlockEnd(tag) if tag == "mdomainset" => break,
                Line::BlockEnd(tag) => {
                    return Err(MdError::ConfigError(format!(
                        "unexpected '</{tag}>' inside <MDomainSet>"
                    )));
                }
                Line::BlockStart(tag, _) => {
                    return Err(MdError::ConfigError(format!(
                        "unexpected '<{tag}>' block inside <MDomainSet>"
                    )));
                }
                Line::Directive(key, values) => match key.as_str() {
                    "mdmember" => {
                        if values.len() == 1 && values[0].eq_ignore_ascii_case("auto") {
                            group.auto_members = Some(true);
                        } else if values.len() == 1 && values[0].eq_ignore_ascii_case("manual") {
                            group.auto_members = Some(false);
                        } else {
                            let mut hosts = group.domains.clone();
                            hosts.extend(values.iter().cloned());
                            group.domains = normalize_host_list(hosts);
                        }
                    }
                    "serveradmin" => {
                        group.contacts =
                            Some(vec![normalize_contact(single(key, values)?)]);
                    }
                    "mdcertificateauthority" => {
                        group.ca_url = Some(parse_url(single(key, values)?)?);
                    }
                    "mdcertificateprotocol" => {
                        group.ca_proto = Some(single(key, values)?.to_string());
                    }
                    "mdcertificateagreement" => {
                        group.ca_agreement = Some(single(key, values)?.to_string());
                    }
                    "mdrenewmode" => {
                        group.renew_mode = Some(single(key, values)?.parse()?);
                    }
                    "mdrenewwindow" => {
                        group.renew_window = Some(single(key, values)?.parse()?);
                    }
                    "mdcachallenges" => {
                        group.challenges = Some(parse_challenges(values)?);
                    }
                    "mdprivatekeys" => {
                        let tokens: Vec<&str> = values.iter().map(String::as_str).collect();
                        group.privkey = Some(PrivateKeySpec::parse(&tokens)?);
                    }
                    "mdrequirehttps" => {
                        group.require_https = Some(single(key, values)?.parse()?);
                    }
                    "mdmuststaple" => {
                        group.must_staple = Some(parse_on_off(single(key, values)?)?);
                    }
                    other => {
                        debug!(directive = other, "ignoring foreign directive in domain block");
                    }
                },
            }
        }
        self.groups.push(group);
        Ok(())
    }

    fn vhost_block(&mut self) -> Result<()> {
        let mut vhost = VirtualHost::default();
        loop {
            let Some(line) = self.next() else {
                return Err(MdError::ConfigError(
                    "unterminated <VirtualHost> block".to_string(),
                ));
            };
            match line {
                Line::Empty => {}
                Line::BlockEnd(tag) if tag == "virtualhost" => break,
                Line::BlockEnd(_) => {}
                Line::BlockStart(tag, _) => self.skip_block(tag)?,
                Line::Directive(key, values) => match key.as_str() {
                    "servername" => {
                        vhost.hosts.insert(0, normalize_hostname(single(key, values)?));
                    }
                    "serveralias" => {
                        vhost
                            .hosts
                            .extend(values.iter().map(|v| normalize_hostname(v)));
                    }
                    "serveradmin" => {
                        vhost.admin = Some(normalize_contact(single(key, values)?));
                    }
                    _ => {}
                },
            }
        }
        vhost.hosts = normalize_host_list(vhost.hosts);
        self.vhosts.push(vhost);
        Ok(())
    }

    /// Skip a block we do not model, honoring nesting of the same tag.
    fn skip_block(&mut self, tag: &str) -> Result<()> {
        let mut depth = 1usize;
        while let Some(line) = self.next() {
            match line {
                Line::BlockStart(t, _) if t == tag => depth += 1,
                Line::BlockEnd(t) if t == tag => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(MdError::ConfigError(format!("unterminated <{tag}> block")))
    }
}

fn single<'v>(key: &str, values: &'v [String]) -> Result<&'v str> {
    match values {
        [v] => Ok(v.as_str()),
        _ => Err(MdError::ConfigError(format!(
            "directive '{key}' expects exactly one value"
        ))),
    }
}

fn parse_url(s: &str) -> Result<String> {
    let u = url::Url::parse(s)
        .map_err(|e| MdError::ConfigError(format!("invalid URL '{s}': {e}")))?;
    Ok(u.to_string())
}

fn parse_on_off(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(MdError::ConfigError(format!(
            "expected on or off, got '{other}'"
        ))),
    }
}

fn parse_challenges(values: &[String]) -> Result<Vec<ChallengeType>> {
    if values.is_empty() {
        return Err(MdError::ConfigError(
            "MDCAChallenges needs at least one challenge type".to_string(),
        ));
    }
    let mut out: Vec<ChallengeType> = Vec::new();
    for v in values {
        let c = ChallengeType::from_str(v)?;
        if !out.contains(&c) {
            out.push(c);
        }
    }
    Ok(out)
}
