//! Heuristic rule registry and matcher
//!
//! Rules are evaluated in a fixed priority order and the first hit wins.
//! The exclusion rule always runs first: object-protocol methods must stay
//! intact or the host object breaks in logging, hashing and collections.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::HeuristicConfig;
use crate::model::{MethodDescriptor, TypeDescriptor};

pub mod definitions;
pub mod exclusion;

/// Which heuristic fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleId {
    /// Return type mentions a domain keyword
    ReturnTypeKeyword,
    /// Method name mentions an action keyword
    NameKeyword,
    /// Static method named like a factory
    StaticFactory,
    /// Minified accessor returning an object or number
    ObfuscatedShortName,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::ReturnTypeKeyword => "RETURN_TYPE_KEYWORD",
            RuleId::NameKeyword => "NAME_KEYWORD",
            RuleId::StaticFactory => "STATIC_FACTORY",
            RuleId::ObfuscatedShortName => "OBFUSCATED_SHORT_NAME",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规则定义
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    pub id: RuleId,
    /// Lower runs first
    pub priority: u8,
    pub description: &'static str,
    /// Why the shape points at the networking engine
    pub rationale: &'static str,
}

/// 规则注册表
pub struct RuleRegistry {
    rules: HashMap<RuleId, RuleDefinition>,
    ordered: Vec<RuleId>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            rules: HashMap::new(),
            ordered: Vec::new(),
        };

        for rule in definitions::all_rules() {
            registry.register(rule);
        }
        registry
            .ordered
            .sort_by_key(|id| registry.rules.get(id).map(|r| r.priority).unwrap_or(u8::MAX));

        registry
    }

    fn register(&mut self, rule: RuleDefinition) {
        let id = rule.id;
        if self.rules.insert(id, rule).is_none() {
            self.ordered.push(id);
        }
    }

    pub fn get(&self, id: RuleId) -> Option<&RuleDefinition> {
        self.rules.get(&id)
    }

    /// Rules in evaluation order
    pub fn ordered(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.ordered.iter().filter_map(|id| self.rules.get(id))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局规则注册表 (延迟初始化)
pub static REGISTRY: Lazy<RuleRegistry> = Lazy::new(RuleRegistry::new);

pub fn registry() -> &'static RuleRegistry {
    &REGISTRY
}

// ============================================================================
// Matcher
// ============================================================================

/// Verdict for one method; immutable once produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchDecision {
    pub method: MethodDescriptor,
    pub rule: Option<RuleId>,
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        self.rule.is_some()
    }
}

/// Name/type heuristic matcher over a keyword configuration
#[derive(Debug, Clone)]
pub struct Matcher {
    config: HeuristicConfig,
    exclusions: exclusion::ExclusionSet,
}

impl Matcher {
    pub fn new(config: HeuristicConfig) -> Self {
        let config = config.normalized();
        let exclusions = exclusion::ExclusionSet::with_extra(&config.extra_exclusions);
        Self { config, exclusions }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    /// First matching rule for a method shape, or `None`
    pub fn matches(&self, name: &str, return_type_name: &str, is_static: bool) -> Option<RuleId> {
        if self.exclusions.is_excluded(name) {
            return None;
        }

        let ret_lower = return_type_name.to_lowercase();
        if contains_any(&ret_lower, &self.config.domain_keywords) {
            return Some(RuleId::ReturnTypeKeyword);
        }

        let name_lower = name.to_lowercase();
        if contains_any(&name_lower, &self.config.action_keywords) {
            return Some(RuleId::NameKeyword);
        }

        if is_static && contains_any(&name_lower, &self.config.static_factory_keywords) {
            return Some(RuleId::StaticFactory);
        }

        let ret = TypeDescriptor::parse(return_type_name);
        if name.chars().count() <= self.config.short_name_max_len
            && !ret.is_void()
            && !ret.is_boolean()
        {
            return Some(RuleId::ObfuscatedShortName);
        }

        None
    }

    pub fn decide(&self, method: &MethodDescriptor) -> MatchDecision {
        MatchDecision {
            method: method.clone(),
            rule: self.matches(&method.name, method.return_type.name(), method.is_static()),
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclusions.is_excluded(name)
    }

    /// Exactly one of the terminal builder names (`build`, `create`)
    pub fn is_builder_name(&self, name: &str) -> bool {
        self.config.builder_names.iter().any(|b| b == name)
    }

    /// Name of an entry-point static factory, any case
    pub fn is_static_factory_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        contains_any(&lower, &self.config.factory_name_keywords)
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(HeuristicConfig::default())
    }
}

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|kw| haystack.contains(kw.as_str()))
}
