//! Canonical host lookup for image services reachable under lookalike hostnames.
//!
//! Some image hosts are linked through obfuscated variants of their hostname
//! (`i1fh.cc`, `ibb.1co`, ...) so that the page's own link filters do not catch them.
//! Every variant seen so far is the canonical name with one run of digits inserted at a
//! single position. [`AliasTable`] recognises that neighbourhood plus any explicitly
//! listed alias, so supporting a new variant is a data change.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::utils::normalize_host;

pub const IFH_HOST: &str = "ifh.cc";
pub const IBB_HOST: &str = "ibb.co";

const CANONICAL_HOSTS: &[&str] = &[IFH_HOST, IBB_HOST];

/// Aliases that do not fit the digit-insertion neighbourhood.
const EXPLICIT_ALIASES: &[(&str, &str)] = &[("www.ifh.cc", IFH_HOST), ("www.ibb.co", IBB_HOST)];

static DEFAULT_TABLE: Lazy<AliasTable> =
    Lazy::new(|| AliasTable::new(CANONICAL_HOSTS, EXPLICIT_ALIASES));

#[derive(Debug, Clone)]
pub struct AliasTable {
    canonical: Vec<&'static str>,
    aliases: HashMap<String, &'static str>,
}

impl AliasTable {
    pub fn new(canonical: &[&'static str], aliases: &[(&str, &'static str)]) -> Self {
        Self {
            canonical: canonical.to_vec(),
            aliases: aliases
                .iter()
                .map(|(alias, target)| (normalize_host(alias), *target))
                .collect(),
        }
    }

    /// The process-wide table for the known image hosts.
    pub fn global() -> &'static AliasTable {
        &DEFAULT_TABLE
    }

    /// Maps `host` to its canonical name, or `None` when it belongs to no known family.
    pub fn canonicalize(&self, host: &str) -> Option<&'static str> {
        let host = normalize_host(host);

        if let Some(canonical) = self.canonical.iter().find(|c| **c == host) {
            return Some(*canonical);
        }
        if let Some(canonical) = self.aliases.get(&host) {
            return Some(*canonical);
        }

        let stripped = strip_single_digit_run(&host)?;
        self.canonical.iter().find(|c| **c == stripped).copied()
    }

    /// True when `host` is a lookalike rather than the canonical name itself.
    pub fn is_alias(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.canonicalize(&host)
            .map(|canonical| canonical != host)
            .unwrap_or(false)
    }
}

/// Removes the digits from `host` when they form exactly one contiguous run.
fn strip_single_digit_run(host: &str) -> Option<String> {
    let first = host.find(|c: char| c.is_ascii_digit())?;
    let run_len = host[first..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(host.len() - first);
    let rest = &host[first + run_len..];
    if rest.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}{}", &host[..first], rest))
}
