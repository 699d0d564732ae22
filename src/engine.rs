// ============================================================================
// Neutralization engine
// ============================================================================
//
// Matcher -> classifier -> host install, one method at a time. Every
// per-method error is folded into an `Outcome` so a refused install never
// stops the rest of the class (or the hierarchy) from being processed.
//
// ============================================================================

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::audit::AuditLog;
use crate::classifier::{classify_method, Replacement, ReplacementPolicy};
use crate::error::NeutralizeError;
use crate::hierarchy::{self, HierarchyWalk};
use crate::host::{Host, InstallOutcome};
use crate::model::{CandidateClass, MethodDescriptor, MethodRef, PLATFORM_ROOT};
use crate::rules::{Matcher, RuleId};

/// Result of one install attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Installed,
    AlreadyInstalled,
    Failed(String),
}

impl Outcome {
    pub fn is_neutralized(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Installed => f.write_str("installed"),
            Outcome::AlreadyInstalled => f.write_str("already-installed"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl From<Result<InstallOutcome, NeutralizeError>> for Outcome {
    fn from(result: Result<InstallOutcome, NeutralizeError>) -> Self {
        match result {
            Ok(InstallOutcome::Installed) => Outcome::Installed,
            Ok(InstallOutcome::AlreadyInstalled(_)) => Outcome::AlreadyInstalled,
            Err(e) if e.is_idempotent_success() => Outcome::AlreadyInstalled,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

/// Never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeutralizationRecord {
    pub method: MethodRef,
    pub policy: ReplacementPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleId>,
    pub outcome: Outcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NeutralizationSummary {
    /// Neutralized methods (installed or already installed) per policy
    pub count_by_policy: BTreeMap<ReplacementPolicy, usize>,
    pub installed: usize,
    pub already_installed: usize,
    pub failed: usize,
    pub records: Vec<NeutralizationRecord>,
}

impl NeutralizationSummary {
    fn push(&mut self, record: NeutralizationRecord) {
        match &record.outcome {
            Outcome::Installed => self.installed += 1,
            Outcome::AlreadyInstalled => self.already_installed += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
        if record.outcome.is_neutralized() {
            *self.count_by_policy.entry(record.policy).or_default() += 1;
        }
        self.records.push(record);
    }

    pub fn merge(&mut self, other: NeutralizationSummary) {
        for record in other.records {
            self.push(record);
        }
    }

    pub fn count(&self, policy: ReplacementPolicy) -> usize {
        self.count_by_policy.get(&policy).copied().unwrap_or(0)
    }

    /// Installed or already installed
    pub fn neutralized(&self) -> usize {
        self.installed + self.already_installed
    }

    pub fn hooked_any(&self) -> bool {
        self.neutralized() > 0
    }

    pub fn outcome_of(&self, method: &MethodRef) -> Option<&Outcome> {
        self.records.iter().find(|r| &r.method == method).map(|r| &r.outcome)
    }
}

/// Ancestor pass over one class
#[derive(Debug, Clone, Serialize)]
pub struct HierarchySummary {
    pub class: String,
    pub ancestors: Vec<String>,
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_ancestor: Option<String>,
    pub summary: NeutralizationSummary,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Clone)]
pub struct NeutralizationEngine {
    host: Arc<dyn Host>,
    audit: Arc<AuditLog>,
    matcher: Matcher,
    marker_message: String,
    entry_points: HashSet<String>,
    platform_root: String,
    phase: String,
}

impl fmt::Debug for NeutralizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeutralizationEngine")
            .field("phase", &self.phase)
            .field("entry_points", &self.entry_points)
            .field("platform_root", &self.platform_root)
            .finish()
    }
}

impl NeutralizationEngine {
    pub fn new(host: Arc<dyn Host>, audit: Arc<AuditLog>, matcher: Matcher, marker_message: &str) -> Self {
        Self {
            host,
            audit,
            matcher,
            marker_message: marker_message.to_string(),
            entry_points: HashSet::new(),
            platform_root: PLATFORM_ROOT.to_string(),
            phase: "neutralize".to_string(),
        }
    }

    /// Classes whose `build`/`create` raise instead of returning a default
    pub fn with_entry_points<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_points.extend(classes.into_iter().map(Into::into));
        self
    }

    pub fn with_platform_root(mut self, root: &str) -> Self {
        self.platform_root = root.to_string();
        self
    }

    /// Same engine, audit records labelled with `phase`
    pub fn for_phase(&self, phase: &str) -> Self {
        let mut engine = self.clone();
        engine.phase = phase.to_string();
        engine
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn find_class(&self, name: &str, loader: &crate::model::LoaderContext) -> Option<CandidateClass> {
        self.host.find_class_if_present(name, loader)
    }

    fn is_entry_point(&self, class: &str) -> bool {
        self.entry_points.contains(class)
    }

    fn apply(
        &self,
        method: &MethodDescriptor,
        policy: ReplacementPolicy,
        rule: Option<RuleId>,
    ) -> NeutralizationRecord {
        let replacement = Replacement::new(method, policy, &self.marker_message);
        let result = self.host.install_replacement(method, replacement);
        // the first install wins; report what is actually in place
        let policy = match &result {
            Ok(InstallOutcome::AlreadyInstalled(existing)) => *existing,
            _ => policy,
        };
        let outcome = Outcome::from(result);

        let signature = method.signature();
        match (&outcome, rule) {
            (Outcome::Failed(_), _) => self.audit.record(
                &self.phase,
                &method.declaring_class,
                Some(&signature),
                format!("{outcome}"),
            ),
            (_, Some(rule)) => self.audit.record(
                &self.phase,
                &method.declaring_class,
                Some(&signature),
                format!("{policy} via {rule} ({outcome})"),
            ),
            (_, None) => self.audit.record(
                &self.phase,
                &method.declaring_class,
                Some(&signature),
                format!("{policy} ({outcome})"),
            ),
        }

        NeutralizationRecord {
            method: method.method_ref(),
            policy,
            rule,
            outcome,
            at: Utc::now(),
        }
    }

    fn run_matched(&self, class: &str, methods: &[MethodDescriptor]) -> NeutralizationSummary {
        let entry = self.is_entry_point(class);
        let mut summary = NeutralizationSummary::default();
        for method in methods {
            let decision = self.matcher.decide(method);
            let Some(rule) = decision.rule else { continue };
            let policy = classify_method(method, &self.matcher.config().builder_names, entry);
            summary.push(self.apply(method, policy, Some(rule)));
        }
        summary
    }

    /// Matcher-filtered neutralization of the methods `class` declares itself
    pub fn neutralize(&self, class: &CandidateClass) -> NeutralizationSummary {
        let methods = self.host.enumerate_declared_methods(class);
        self.run_matched(&class.name, &methods)
    }

    /// Blanket neutralization of a provider class
    ///
    /// Every declared method except the object protocol is replaced: zero-arg
    /// boolean probes answer `false`, everything else the type default.
    pub fn neutralize_provider(&self, class: &CandidateClass) -> NeutralizationSummary {
        let mut summary = NeutralizationSummary::default();
        for method in self.host.enumerate_declared_methods(class) {
            if self.matcher.is_excluded(&method.name) {
                continue;
            }
            let policy = classify_method(&method, &self.matcher.config().builder_names, false);
            summary.push(self.apply(&method, policy, None));
        }
        summary
    }

    /// Raise the marker error from `build`/`create` only
    ///
    /// Constructors and every other method keep working, so callers can still
    /// make the builder; failure shows up where the engine would be created.
    pub fn neutralize_builders_only(&self, class: &CandidateClass) -> NeutralizationSummary {
        let mut summary = NeutralizationSummary::default();
        for method in self.host.enumerate_declared_methods(class) {
            if !self.matcher.is_builder_name(&method.name) {
                continue;
            }
            summary.push(self.apply(&method, ReplacementPolicy::ThrowMarkerError, None));
        }
        summary
    }

    /// Raise the marker error from static factories
    pub fn neutralize_static_factories(&self, class: &CandidateClass) -> NeutralizationSummary {
        let mut summary = NeutralizationSummary::default();
        for method in self.host.enumerate_declared_methods(class) {
            if !method.is_static()
                || self.matcher.is_excluded(&method.name)
                || !self.matcher.is_static_factory_name(&method.name)
            {
                continue;
            }
            summary.push(self.apply(&method, ReplacementPolicy::ThrowMarkerError, Some(RuleId::StaticFactory)));
        }
        summary
    }

    /// Walk the ancestors of `class` and neutralize each level independently
    ///
    /// The class itself is not processed here; callers handle it with one of
    /// the class-level operations.
    pub fn neutralize_hierarchy(&self, class: &CandidateClass) -> HierarchySummary {
        let walk: HierarchyWalk = hierarchy::walk(self.host.as_ref(), class, &self.platform_root);
        let mut summary = NeutralizationSummary::default();
        let mut ancestors = Vec::new();

        for level in walk.ancestors() {
            self.audit.record(&self.phase, &class.name, None, format!("parent: {}", level.class));
            let listing: Vec<String> = level.methods.iter().map(|m| format!("\n  {}", m.render())).collect();
            self.audit.record(&self.phase, &level.class, None, format!("methods:{}", listing.concat()));

            summary.merge(self.run_matched(&level.class, &level.methods));
            ancestors.push(level.class.clone());
        }

        if let Some(missing) = &walk.missing_ancestor {
            self.audit.record(&self.phase, &class.name, None, format!("ancestor {missing} not found"));
        }
        for iface in &walk.interfaces {
            self.audit.record(&self.phase, &class.name, None, format!("implements: {iface}"));
        }

        HierarchySummary {
            class: class.name.clone(),
            ancestors,
            interfaces: walk.interfaces.clone(),
            missing_ancestor: walk.missing_ancestor.clone(),
            summary,
        }
    }

    /// `neutralize` over independent classes, in parallel
    ///
    /// Duplicate names are dropped first so each class runs in exactly one
    /// pipeline.
    pub fn neutralize_all(&self, classes: &[CandidateClass]) -> NeutralizationSummary {
        let mut seen = HashSet::new();
        let unique: Vec<&CandidateClass> = classes.iter().filter(|c| seen.insert(c.name.as_str())).collect();

        unique
            .par_iter()
            .map(|class| self.neutralize(class))
            .reduce(NeutralizationSummary::default, |mut acc, s| {
                acc.merge(s);
                acc
            })
    }

    /// Log every construction of `class`; constructors are never replaced
    pub fn observe_constructors(&self, class: &CandidateClass) -> Option<usize> {
        match self.host.observe_constructors(class) {
            Ok(count) => {
                self.audit.record(&self.phase, &class.name, Some("<init>"), format!("observing {count} constructor(s)"));
                Some(count)
            }
            Err(e) => {
                self.audit.record(&self.phase, &class.name, Some("<init>"), format!("not observed: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{DefaultValue, Invocation};
    use crate::host::SnapshotHost;
    use crate::model::{ClassSnapshot, LoaderContext, Modifiers};

    const MARKER: &str = "Cronet disabled by VendingCronetOff";

    fn provider_class() -> CandidateClass {
        CandidateClass::new("org.chromium.net.impl.NativeCronetProvider", LoaderContext::App)
            .extends("org.chromium.net.CronetProvider")
            .method(MethodDescriptor::new("", "isAvailable", "boolean", &[]))
            .method(MethodDescriptor::new("", "createBuilder", "org.chromium.net.CronetEngine$Builder", &[]))
            .method(MethodDescriptor::new("", "getName", "java.lang.String", &[]))
            .method(MethodDescriptor::new("", "hashCode", "int", &[]))
            .method(MethodDescriptor::new("", "b", "int", &[]))
    }

    fn setup(classes: Vec<CandidateClass>) -> (Arc<SnapshotHost>, NeutralizationEngine) {
        let host = Arc::new(SnapshotHost::new(ClassSnapshot::from_classes(classes)));
        let engine = NeutralizationEngine::new(
            host.clone(),
            Arc::new(AuditLog::new(false)),
            Matcher::default(),
            MARKER,
        );
        (host, engine)
    }

    fn mref(class: &str, sig: &str) -> MethodRef {
        MethodRef { class: class.to_string(), signature: sig.to_string() }
    }

    #[test]
    fn test_neutralize_uses_matcher() {
        let (host, engine) = setup(vec![provider_class()]);
        let class = host.snapshot().get("org.chromium.net.impl.NativeCronetProvider").unwrap().clone();
        let summary = engine.neutralize(&class);

        // createBuilder (return type + name) and b (short name)
        assert_eq!(summary.installed, 2);
        assert_eq!(summary.count(ReplacementPolicy::ReturnTypeDefault), 2);
        let created = summary.records.iter().find(|r| r.method.signature == "createBuilder()").unwrap();
        assert_eq!(created.rule, Some(RuleId::ReturnTypeKeyword));
        assert!(host.invoke(&mref(&class.name, "hashCode()")).is_none());
        assert!(host.invoke(&mref(&class.name, "getName()")).is_none());
    }

    #[test]
    fn test_provider_zero_arg_boolean_is_false() {
        let (host, engine) = setup(vec![provider_class()]);
        let class = host.snapshot().get("org.chromium.net.impl.NativeCronetProvider").unwrap().clone();
        let summary = engine.neutralize_provider(&class);

        assert_eq!(summary.count(ReplacementPolicy::ReturnConstantFalse), 1);
        assert_eq!(summary.count(ReplacementPolicy::ReturnTypeDefault), 3);
        assert_eq!(
            host.invoke(&mref(&class.name, "isAvailable()")),
            Some(Invocation::Returned(DefaultValue::Bool(false)))
        );
        assert_eq!(
            host.invoke(&mref(&class.name, "getName()")),
            Some(Invocation::Returned(DefaultValue::Null))
        );
        assert!(host.invoke(&mref(&class.name, "hashCode()")).is_none());
    }

    #[test]
    fn test_second_pass_is_already_installed() {
        let (host, engine) = setup(vec![provider_class()]);
        let class = host.snapshot().get("org.chromium.net.impl.NativeCronetProvider").unwrap().clone();

        let first = engine.neutralize_provider(&class);
        let second = engine.neutralize_provider(&class);
        let target = mref(&class.name, "isAvailable()");

        assert_eq!(first.outcome_of(&target), Some(&Outcome::Installed));
        assert_eq!(second.outcome_of(&target), Some(&Outcome::AlreadyInstalled));
        assert_eq!(second.installed, 0);
        assert_eq!(host.installed_count(), first.installed);
    }

    #[test]
    fn test_builders_only_throws_marker() {
        let builder = CandidateClass::new("android.net.http.HttpEngine$Builder", LoaderContext::Boot)
            .method(MethodDescriptor::new("", "build", "android.net.http.HttpEngine", &[]))
            .method(MethodDescriptor::new("", "setUserAgent", "android.net.http.HttpEngine$Builder", &["java.lang.String"]));
        let (host, engine) = setup(vec![builder.clone()]);
        let summary = engine.neutralize_builders_only(&builder);

        assert_eq!(summary.installed, 1);
        assert_eq!(summary.count(ReplacementPolicy::ThrowMarkerError), 1);
        assert_eq!(
            host.invoke(&mref(&builder.name, "build()")),
            Some(Invocation::Raised(MARKER.to_string()))
        );
        assert!(host.invoke(&mref(&builder.name, "setUserAgent(java.lang.String)")).is_none());
    }

    #[test]
    fn test_static_factories_only_static() {
        let engine_class = CandidateClass::new("org.chromium.net.CronetEngine", LoaderContext::App)
            .method(
                MethodDescriptor::new("", "getInstance", "org.chromium.net.CronetEngine", &[])
                    .with_modifiers(Modifiers::statik()),
            )
            .method(MethodDescriptor::new("", "newUrlRequestBuilder", "java.lang.Object", &[]))
            .method(
                MethodDescriptor::new("", "getVersionString", "java.lang.String", &[])
                    .with_modifiers(Modifiers::statik()),
            );
        let (_host, engine) = setup(vec![engine_class.clone()]);
        let summary = engine.neutralize_static_factories(&engine_class);

        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].method.signature, "getInstance()");
        assert_eq!(summary.records[0].policy, ReplacementPolicy::ThrowMarkerError);
    }

    #[test]
    fn test_entry_point_builder_via_classifier() {
        let builder = CandidateClass::new("a.Builder", LoaderContext::App)
            .method(MethodDescriptor::new("", "build", "a.Engine", &[]));
        let (_host, engine) = setup(vec![builder.clone()]);

        let plain = engine.neutralize(&builder);
        assert_eq!(plain.records[0].policy, ReplacementPolicy::ReturnTypeDefault);

        let (_host, engine) = setup(vec![builder.clone()]);
        let engine = engine.with_entry_points(["a.Builder"]);
        let entry = engine.neutralize(&builder);
        assert_eq!(entry.records[0].policy, ReplacementPolicy::ThrowMarkerError);
    }

    #[test]
    fn test_failure_does_not_stop_siblings() {
        let class = provider_class();
        let refused = mref(&class.name, "createBuilder()");
        let host = Arc::new(
            SnapshotHost::new(ClassSnapshot::from_classes(vec![class.clone()])).refuse(refused.clone(), "final method"),
        );
        let engine = NeutralizationEngine::new(host.clone(), Arc::new(AuditLog::new(false)), Matcher::default(), MARKER);
        let summary = engine.neutralize_provider(&class);

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.installed, 3);
        assert_eq!(summary.records.len(), 4);
        assert!(matches!(summary.outcome_of(&refused), Some(Outcome::Failed(_))));
        assert!(host.invoke(&mref(&class.name, "b()")).is_some());
        assert!(engine.audit().records().iter().any(|r| r.decision.starts_with("failed")));
    }

    #[test]
    fn test_hierarchy_neutralizes_ancestors_independently() {
        let parent = CandidateClass::new("org.chromium.net.CronetProvider", LoaderContext::App)
            .implements("java.lang.Comparable")
            .method(MethodDescriptor::new("", "createBuilder", "org.chromium.net.CronetEngine$Builder", &[]))
            .method(MethodDescriptor::new("", "getName", "java.lang.String", &[]));
        let child = provider_class().implements("org.chromium.net.Provider");
        let (host, engine) = setup(vec![parent, child.clone()]);
        let engine = engine.for_phase("Phase5");

        let report = engine.neutralize_hierarchy(&child);
        assert_eq!(report.ancestors, vec!["org.chromium.net.CronetProvider"]);
        assert_eq!(report.interfaces, vec!["org.chromium.net.Provider"]);
        assert_eq!(report.summary.installed, 1);

        let on_parent = mref("org.chromium.net.CronetProvider", "createBuilder()");
        let on_child = mref(&child.name, "createBuilder()");
        assert!(host.invoke(&on_parent).is_some());
        assert!(host.invoke(&on_child).is_none());

        let phase = engine.audit().phase("Phase5");
        assert!(phase.iter().any(|r| r.decision == "parent: org.chromium.net.CronetProvider"));
        assert!(phase.iter().any(|r| r.decision.contains("Builder createBuilder()")));
        assert!(phase.iter().any(|r| r.decision == "implements: org.chromium.net.Provider"));
    }

    #[test]
    fn test_already_installed_reports_policy_in_place() {
        let builder = CandidateClass::new("p.Builder", LoaderContext::App)
            .method(MethodDescriptor::new("", "build", "p.Engine", &[]));
        let (host, engine) = setup(vec![builder.clone()]);
        let build = mref("p.Builder", "build()");

        let first = engine.neutralize_provider(&builder);
        assert_eq!(first.records[0].policy, ReplacementPolicy::ReturnTypeDefault);

        let second = engine.neutralize_builders_only(&builder);
        assert_eq!(second.outcome_of(&build), Some(&Outcome::AlreadyInstalled));
        assert_eq!(second.records[0].policy, ReplacementPolicy::ReturnTypeDefault);
        assert_eq!(second.count(ReplacementPolicy::ThrowMarkerError), 0);
        assert_eq!(second.count(ReplacementPolicy::ReturnTypeDefault), 1);
        assert_eq!(host.invoke(&build), Some(Invocation::Returned(DefaultValue::Null)));
    }

    #[test]
    fn test_neutralize_all_dedups_classes() {
        let a = provider_class();
        let b = CandidateClass::new("x.Other", LoaderContext::App)
            .method(MethodDescriptor::new("", "buildEngine", "java.lang.Object", &[]));
        let (host, engine) = setup(vec![a.clone(), b.clone()]);

        let summary = engine.neutralize_all(&[a.clone(), b, a]);
        assert_eq!(summary.installed, 3);
        assert_eq!(summary.already_installed, 0);
        assert_eq!(host.installed_count(), 3);
    }

    #[test]
    fn test_observe_constructors_records_audit() {
        let class = provider_class();
        let (host, engine) = setup(vec![class.clone()]);
        assert_eq!(engine.observe_constructors(&class), Some(1));
        assert!(host.is_observed(&class.name));
        assert_eq!(engine.audit().len(), 1);
    }
}
