//! Declarative network rules that control script execution inside embedded frames.
//!
//! Three tiers, lowest priority first:
//!
//! 1. every sub-frame loaded by the primary site gets a CSP with `script-src 'none'`;
//! 2. whitelisted domains have that CSP removed again;
//! 3. blocked paths are refused outright, for every resource type and initiator.
//!
//! The output matches the browser's declarative rule format and is re-synced wholesale
//! on install or update.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::utils::{host_within, normalize_host};
use crate::PreviewError;

pub const FRAME_CSP_RULE_ID: u32 = 1;
pub const ALLOW_RULE_ID_BASE: u32 = 100;
pub const BLOCK_RULE_ID_BASE: u32 = 1000;

pub const FRAME_CSP_PRIORITY: u32 = 1;
pub const ALLOW_PRIORITY: u32 = 2;
pub const BLOCK_PRIORITY: u32 = 3;

const MAX_BLOCK_RULES: usize = 9000;

pub const DEFAULT_FRAME_CSP: &str = "default-src * data: blob:; script-src 'none'; \
    style-src * 'unsafe-inline'; font-src * data:; img-src * data:;";

const CSP_HEADER: &str = "Content-Security-Policy";

/// Domains whose frames may run scripts.
const DEFAULT_SCRIPT_DOMAINS: &[&str] = &[
    "bloupla.net",
    "playentry.org",
    "ncc.playentry.org",
    "ifh.cc",
    "i1fh.cc",
    "if1h.cc",
    "ifh1.cc",
    "ifh.1cc",
    "ifh.c1c",
    "i.postimg.cc",
    "postimg.cc",
    "baboboximg.onrender.com",
    "youtube.com",
    "youtu.be",
    "m.youtube.com",
    "naver.me",
    "tree.joody.day",
    "colormytree.me",
    "ibb.co",
    "i1bb.co",
    "ib1b.co",
    "ibb1.co",
    "ibb.1co",
    "ibb.c1o",
    "snowman.quizby.me",
    "www.miricanvas.com",
    "entrypancake.p-e.kr",
    "xn--hj2bx5ym4f.org",
    "imgnews.pstatic.net",
    "www.youtube-nocookie.com",
    "quizby.me",
    "streamable.com",
    "dutmoticon.tica.fun",
    "musiclab.chromeexperiments.com",
    "bbbi.onrender.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    Webtransport,
    Webbundle,
    Other,
}

impl ResourceType {
    pub const ALL: [ResourceType; 15] = [
        ResourceType::MainFrame,
        ResourceType::SubFrame,
        ResourceType::Stylesheet,
        ResourceType::Script,
        ResourceType::Image,
        ResourceType::Font,
        ResourceType::Object,
        ResourceType::Xmlhttprequest,
        ResourceType::Ping,
        ResourceType::CspReport,
        ResourceType::Media,
        ResourceType::Websocket,
        ResourceType::Webtransport,
        ResourceType::Webbundle,
        ResourceType::Other,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderOperation {
    Set,
    Append,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderModification {
    pub header: String,
    pub operation: HeaderOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    ModifyHeaders {
        #[serde(rename = "responseHeaders")]
        response_headers: Vec<HeaderModification>,
    },
    Block,
    Allow,
}

impl RuleAction {
    /// Tie-break between rules of equal priority.
    fn precedence(&self) -> u8 {
        match self {
            RuleAction::Allow => 3,
            RuleAction::Block => 2,
            RuleAction::ModifyHeaders { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_url_filter_case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<ResourceType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_domains: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarativeRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// What the rule engine should do for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Policy {
    /// Strip the frame CSP so scripts run.
    AllowScripts,
    /// Force the script-blocking CSP onto every frame this domain embeds.
    BlockAll,
    /// Refuse any request for this path prefix.
    BlockPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    pub domain: String,
    pub policy: Policy,
}

impl DomainPolicy {
    pub fn new(domain: impl Into<String>, policy: Policy) -> Self {
        Self {
            domain: domain.into(),
            policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_frame_csp")]
    pub frame_csp: String,
    pub domains: Vec<DomainPolicy>,
}

fn default_frame_csp() -> String {
    DEFAULT_FRAME_CSP.to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mut domains = vec![DomainPolicy::new("playentry.org", Policy::BlockAll)];
        domains.extend(
            DEFAULT_SCRIPT_DOMAINS
                .iter()
                .map(|domain| DomainPolicy::new(*domain, Policy::AllowScripts)),
        );
        domains.push(DomainPolicy::new(
            "playentry.org",
            Policy::BlockPath("signout".to_string()),
        ));

        Self {
            frame_csp: default_frame_csp(),
            domains,
        }
    }
}

impl PolicyConfig {
    pub fn from_json(json: &str) -> Result<Self, PreviewError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_domain(mut self, policy: DomainPolicy) -> Self {
        self.domains.push(policy);
        self
    }

    pub fn compile(&self) -> Result<CompiledRuleSet, PreviewError> {
        compile(self)
    }
}

fn validate_domain(domain: &str) -> Result<String, PreviewError> {
    let domain = normalize_host(domain.trim());
    if domain.is_empty() || domain.contains(['/', ':', '?', '#', '*']) || domain.contains(char::is_whitespace) {
        return Err(PreviewError::PolicyError(format!("invalid domain {domain:?}")));
    }
    Ok(domain)
}

/// `^https?://([^/]*\.)?<domain>` followed by `suffix`.
fn domain_pattern(domain: &str, suffix: &str) -> String {
    format!(r"^https?://([^/]*\.)?{}{suffix}", regex::escape(domain))
}

pub fn compile(config: &PolicyConfig) -> Result<CompiledRuleSet, PreviewError> {
    let mut initiators = Vec::new();
    let mut allowed = Vec::new();
    let mut blocked = Vec::new();

    for entry in &config.domains {
        let domain = validate_domain(&entry.domain)?;
        match &entry.policy {
            Policy::BlockAll => {
                if !initiators.contains(&domain) {
                    initiators.push(domain);
                }
            }
            Policy::AllowScripts => {
                if !allowed.contains(&domain) {
                    allowed.push(domain);
                }
            }
            Policy::BlockPath(path) => {
                let path = path.trim().trim_start_matches('/');
                if path.is_empty() {
                    return Err(PreviewError::PolicyError(format!(
                        "empty blocked path for {domain}"
                    )));
                }
                blocked.push((domain, path.to_string()));
            }
        }
    }

    if allowed.len() > (BLOCK_RULE_ID_BASE - ALLOW_RULE_ID_BASE) as usize {
        return Err(PreviewError::PolicyError(format!(
            "{} script domains exceed the {} available rule ids",
            allowed.len(),
            BLOCK_RULE_ID_BASE - ALLOW_RULE_ID_BASE
        )));
    }
    if blocked.len() > MAX_BLOCK_RULES {
        return Err(PreviewError::PolicyError(format!(
            "{} blocked paths exceed the limit of {MAX_BLOCK_RULES}",
            blocked.len()
        )));
    }

    let frame_initiators = (!initiators.is_empty()).then(|| initiators.clone());
    let mut rules = Vec::with_capacity(1 + allowed.len() + blocked.len());

    if !initiators.is_empty() {
        rules.push(DeclarativeRule {
            id: FRAME_CSP_RULE_ID,
            priority: FRAME_CSP_PRIORITY,
            action: RuleAction::ModifyHeaders {
                response_headers: vec![HeaderModification {
                    header: CSP_HEADER.to_string(),
                    operation: HeaderOperation::Set,
                    value: Some(config.frame_csp.clone()),
                }],
            },
            condition: RuleCondition {
                resource_types: Some(vec![ResourceType::SubFrame]),
                initiator_domains: frame_initiators.clone(),
                ..RuleCondition::default()
            },
        });
    }

    for (index, domain) in allowed.iter().enumerate() {
        rules.push(DeclarativeRule {
            id: ALLOW_RULE_ID_BASE + index as u32,
            priority: ALLOW_PRIORITY,
            action: RuleAction::ModifyHeaders {
                response_headers: vec![HeaderModification {
                    header: CSP_HEADER.to_string(),
                    operation: HeaderOperation::Remove,
                    value: None,
                }],
            },
            condition: RuleCondition {
                regex_filter: Some(domain_pattern(domain, "(/|$)")),
                resource_types: Some(vec![ResourceType::SubFrame]),
                initiator_domains: frame_initiators.clone(),
                ..RuleCondition::default()
            },
        });
    }

    for (index, (domain, path)) in blocked.iter().enumerate() {
        rules.push(DeclarativeRule {
            id: BLOCK_RULE_ID_BASE + index as u32,
            priority: BLOCK_PRIORITY,
            action: RuleAction::Block,
            condition: RuleCondition {
                regex_filter: Some(domain_pattern(
                    domain,
                    &format!("/+{}", regex::escape(path)),
                )),
                is_url_filter_case_sensitive: Some(false),
                resource_types: Some(ResourceType::ALL.to_vec()),
                initiator_domains: None,
            },
        });
    }

    let compiled = CompiledRuleSet::new(rules)?;
    info!(
        rules = compiled.rules.len(),
        allowed = allowed.len(),
        blocked = blocked.len(),
        "Compiled frame policy rules"
    );
    Ok(compiled)
}

/// A request as seen by the rule engine.
#[derive(Debug, Clone)]
pub struct RequestDetails {
    pub url: String,
    pub resource_type: ResourceType,
    pub initiator: Option<String>,
}

impl RequestDetails {
    pub fn new(url: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            url: url.into(),
            resource_type,
            initiator: None,
        }
    }

    pub fn initiated_by(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    fn initiator_host(&self) -> Option<String> {
        let initiator = self.initiator.as_deref()?;
        match Url::parse(initiator) {
            Ok(url) => url.host_str().map(normalize_host),
            Err(_) => Some(normalize_host(initiator)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetUpdate {
    #[serde(rename = "removeRuleIds")]
    pub remove_rule_ids: Vec<u32>,
    #[serde(rename = "addRules")]
    pub add_rules: Vec<DeclarativeRule>,
}

#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    rules: Vec<DeclarativeRule>,
    matchers: Vec<Option<Regex>>,
}

impl CompiledRuleSet {
    pub fn new(rules: Vec<DeclarativeRule>) -> Result<Self, PreviewError> {
        let matchers = rules
            .iter()
            .map(|rule| {
                rule.condition
                    .regex_filter
                    .as_deref()
                    .map(|pattern| {
                        RegexBuilder::new(pattern)
                            .case_insensitive(
                                !rule.condition.is_url_filter_case_sensitive.unwrap_or(false),
                            )
                            .build()
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules, matchers })
    }

    pub fn rules(&self) -> &[DeclarativeRule] {
        &self.rules
    }

    pub fn rule_ids(&self) -> Vec<u32> {
        self.rules.iter().map(|rule| rule.id).collect()
    }

    /// Removes every previously installed id and every id about to be added, then adds
    /// the whole set.
    pub fn to_update(&self, previous_ids: &[u32]) -> RuleSetUpdate {
        let mut remove_rule_ids: Vec<u32> = previous_ids.to_vec();
        remove_rule_ids.extend(self.rule_ids());
        remove_rule_ids.sort_unstable();
        remove_rule_ids.dedup();

        RuleSetUpdate {
            remove_rule_ids,
            add_rules: self.rules.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, PreviewError> {
        Ok(serde_json::to_string_pretty(&self.rules)?)
    }

    /// The rule the engine applies to `request`: highest priority, then
    /// allow over block over header modification.
    pub fn evaluate(&self, request: &RequestDetails) -> Option<&DeclarativeRule> {
        let initiator = request.initiator_host();
        let winner = self
            .rules
            .iter()
            .zip(&self.matchers)
            .filter(|&(rule, matcher)| {
                matches_condition(&rule.condition, matcher.as_ref(), request, initiator.as_deref())
            })
            .map(|(rule, _)| rule)
            .max_by_key(|rule| (rule.priority, rule.action.precedence()));

        debug!(url = %request.url, rule = ?winner.map(|r| r.id), "Evaluated request");
        winner
    }
}

fn matches_condition(
    condition: &RuleCondition,
    matcher: Option<&Regex>,
    request: &RequestDetails,
    initiator: Option<&str>,
) -> bool {
    let type_matches = match &condition.resource_types {
        Some(types) => types.contains(&request.resource_type),
        None => request.resource_type != ResourceType::MainFrame,
    };
    let initiator_matches = match &condition.initiator_domains {
        Some(domains) => initiator
            .map(|host| domains.iter().any(|domain| host_within(host, domain)))
            .unwrap_or(false),
        None => true,
    };
    let url_matches = matcher.map(|re| re.is_match(&request.url)).unwrap_or(true);

    type_matches && initiator_matches && url_matches
}
