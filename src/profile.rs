//! Module-load pipeline
//!
//! Runs the phases of a `TargetProfile` once the target module loads:
//!
//! 1. platform entry points (boot loader): builders only + static factories
//! 2. providers: blanket neutralization, constructions observed (phase 3 is
//!    folded into this pass)
//! 4. app entry points: builders only + static factories
//! 5. hierarchy of each provider root
//!
//! A class missing from the process is a lookup miss: logged, never fatal.

use std::sync::Arc;

use serde::Serialize;

use crate::audit::AuditLog;
use crate::config::{Config, EntryPoints, TargetProfile};
use crate::engine::{HierarchySummary, NeutralizationEngine, NeutralizationSummary};
use crate::error::NeutralizeError;
use crate::host::Host;
use crate::model::{CandidateClass, LoaderContext};
use crate::rules::Matcher;

pub const PHASE_PLATFORM: &str = "Phase1";
pub const PHASE_PROVIDERS: &str = "Phase2";
pub const PHASE_APP: &str = "Phase4";
pub const PHASE_HIERARCHY: &str = "Phase5";

/// Outcome of one phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseReport {
    pub phase: String,
    /// Classes with at least one neutralized method
    pub hooked_classes: Vec<String>,
    pub missing_classes: Vec<String>,
    pub summary: NeutralizationSummary,
}

impl PhaseReport {
    fn new(phase: &str) -> Self {
        Self { phase: phase.to_string(), ..Self::default() }
    }

    fn absorb(&mut self, class: &str, summary: NeutralizationSummary) {
        if summary.hooked_any() && !self.hooked_classes.iter().any(|c| c == class) {
            self.hooked_classes.push(class.to_string());
        }
        self.summary.merge(summary);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub loader: String,
    pub phases: Vec<PhaseReport>,
    pub hierarchies: Vec<HierarchySummary>,
}

impl ModuleReport {
    pub fn phase(&self, phase: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Total neutralized methods across all phases and hierarchies
    pub fn neutralized(&self) -> usize {
        self.phases.iter().map(|p| p.summary.neutralized()).sum::<usize>()
            + self.hierarchies.iter().map(|h| h.summary.neutralized()).sum::<usize>()
    }

    pub fn failed(&self) -> usize {
        self.phases.iter().map(|p| p.summary.failed).sum::<usize>()
            + self.hierarchies.iter().map(|h| h.summary.failed).sum::<usize>()
    }
}

pub struct Pipeline {
    profile: TargetProfile,
    engine: NeutralizationEngine,
}

impl Pipeline {
    pub fn new(host: Arc<dyn Host>, config: Config) -> Self {
        let audit = Arc::new(AuditLog::new(config.profile.capture_stacks));
        Self::with_audit(host, config, audit)
    }

    pub fn with_audit(host: Arc<dyn Host>, config: Config, audit: Arc<AuditLog>) -> Self {
        let profile = config.profile;
        let entry_points: Vec<String> = profile
            .platform_entry_points
            .builders_only
            .iter()
            .chain(profile.app_entry_points.iter())
            .cloned()
            .collect();
        let engine = NeutralizationEngine::new(
            host,
            audit,
            Matcher::new(config.heuristics),
            &profile.marker_message,
        )
        .with_entry_points(entry_points);

        Self { profile, engine }
    }

    pub fn engine(&self) -> &NeutralizationEngine {
        &self.engine
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        self.engine.audit()
    }

    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    /// Trigger: a module finished loading. Other modules are ignored.
    pub fn on_module_load(&self, module: &str, loader: &LoaderContext) -> Option<ModuleReport> {
        if module != self.profile.target_module {
            tracing::debug!("ignoring module {}", module);
            return None;
        }

        tracing::info!("hooking {} ({} loader)", module, loader.label());
        self.engine.audit().record("load", module, None, format!("hooking {} ({})", module, loader.label()));

        let phases = vec![
            self.platform_phase(),
            self.provider_phase(loader),
            self.app_phase(loader),
        ];
        let hierarchies = self.hierarchy_phase(loader);

        Some(ModuleReport {
            module: module.to_string(),
            loader: loader.label().to_string(),
            phases,
            hierarchies,
        })
    }

    fn lookup(&self, phase: &str, name: &str, loader: &LoaderContext) -> Option<CandidateClass> {
        let found = self.engine.find_class(name, loader);
        if found.is_none() {
            let miss = NeutralizeError::LookupMiss(name.to_string());
            self.engine.audit().record(phase, name, None, format!("{} in {} loader", miss, loader.label()));
        }
        found
    }

    fn entry_point_pass(&self, phase: &str, entry: &EntryPoints, loader: &LoaderContext, report: &mut PhaseReport) {
        let engine = self.engine.for_phase(phase);
        for name in &entry.builders_only {
            match self.lookup(phase, name, loader) {
                Some(class) => report.absorb(name, engine.neutralize_builders_only(&class)),
                None => report.missing_classes.push(name.clone()),
            }
        }
        for name in &entry.static_factories {
            match self.lookup(phase, name, loader) {
                Some(class) => report.absorb(name, engine.neutralize_static_factories(&class)),
                None => {
                    if !report.missing_classes.contains(name) {
                        report.missing_classes.push(name.clone());
                    }
                }
            }
        }
    }

    fn platform_phase(&self) -> PhaseReport {
        let mut report = PhaseReport::new(PHASE_PLATFORM);
        self.entry_point_pass(PHASE_PLATFORM, &self.profile.platform_entry_points, &LoaderContext::Boot, &mut report);

        let decision = if report.summary.hooked_any() {
            "builders hooked (constructors left open for graceful fallback)"
        } else {
            "no platform entry point found on bootclasspath"
        };
        self.engine.audit().record(PHASE_PLATFORM, "platform", None, decision);
        report
    }

    fn provider_phase(&self, loader: &LoaderContext) -> PhaseReport {
        let mut report = PhaseReport::new(PHASE_PROVIDERS);
        let engine = self.engine.for_phase(PHASE_PROVIDERS);

        for name in &self.profile.providers {
            let Some(class) = self.lookup(PHASE_PROVIDERS, name, loader) else {
                report.missing_classes.push(name.clone());
                continue;
            };
            let summary = engine.neutralize_provider(&class);
            self.engine.audit().record(
                PHASE_PROVIDERS,
                name,
                None,
                format!(
                    "hooked: {} bool, {} other",
                    summary.count(crate::classifier::ReplacementPolicy::ReturnConstantFalse),
                    summary.count(crate::classifier::ReplacementPolicy::ReturnTypeDefault)
                ),
            );
            report.absorb(name, summary);

            if self.profile.observe_construction.contains(name) {
                engine.observe_constructors(&class);
            }
        }
        report
    }

    fn app_phase(&self, loader: &LoaderContext) -> PhaseReport {
        let mut report = PhaseReport::new(PHASE_APP);
        let entry = EntryPoints {
            builders_only: self.profile.app_entry_points.clone(),
            static_factories: self.profile.app_entry_points.clone(),
        };
        self.entry_point_pass(PHASE_APP, &entry, loader, &mut report);
        self.engine.audit().record(
            PHASE_APP,
            "app",
            None,
            format!("app-classloader classes hooked: {}", report.hooked_classes.len()),
        );
        report
    }

    fn hierarchy_phase(&self, loader: &LoaderContext) -> Vec<HierarchySummary> {
        let engine = self.engine.for_phase(PHASE_HIERARCHY);
        self.profile
            .hierarchy_roots
            .iter()
            .filter_map(|name| self.engine.find_class(name, loader))
            .map(|class| engine.neutralize_hierarchy(&class))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SnapshotHost;
    use crate::model::{ClassSnapshot, MethodDescriptor};

    fn config() -> Config {
        let mut config = Config::default();
        config.profile.capture_stacks = false;
        config
    }

    #[test]
    fn test_other_module_ignored() {
        let host = Arc::new(SnapshotHost::new(ClassSnapshot::new()));
        let pipeline = Pipeline::new(host.clone(), config());
        assert!(pipeline.on_module_load("com.example.other", &LoaderContext::App).is_none());
        assert!(pipeline.audit().is_empty());
    }

    #[test]
    fn test_empty_process_degrades_silently() {
        let host = Arc::new(SnapshotHost::new(ClassSnapshot::new()));
        let pipeline = Pipeline::new(host.clone(), config());
        let report = pipeline.on_module_load("com.android.vending", &LoaderContext::App).unwrap();

        assert_eq!(report.neutralized(), 0);
        assert_eq!(report.failed(), 0);
        assert!(report.hierarchies.is_empty());
        assert_eq!(report.phase(PHASE_PROVIDERS).unwrap().missing_classes.len(), 2);
        assert_eq!(report.phase(PHASE_APP).unwrap().missing_classes.len(), 7);
        assert_eq!(host.installed_count(), 0);
    }

    #[test]
    fn test_platform_builder_only() {
        let snapshot = ClassSnapshot::from_classes(vec![
            CandidateClass::new("android.net.http.HttpEngine$Builder", LoaderContext::Boot)
                .method(MethodDescriptor::new("", "build", "android.net.http.HttpEngine", &[]))
                .method(MethodDescriptor::new("", "setEnableQuic", "android.net.http.HttpEngine$Builder", &["boolean"])),
        ]);
        let host = Arc::new(SnapshotHost::new(snapshot));
        let pipeline = Pipeline::new(host.clone(), config());
        let report = pipeline.on_module_load("com.android.vending", &LoaderContext::App).unwrap();

        let phase1 = report.phase(PHASE_PLATFORM).unwrap();
        assert_eq!(phase1.hooked_classes, vec!["android.net.http.HttpEngine$Builder"]);
        assert_eq!(phase1.missing_classes, vec!["android.net.http.HttpEngine"]);
        assert_eq!(host.installed_count(), 1);
    }
}
