//! Host seam
//!
//! The interception primitive, class lookup and method enumeration are owned
//! by the process we run inside. `Host` is that boundary; `SnapshotHost`
//! implements it over a `ClassSnapshot` and simulates installs so a plan can
//! be replayed offline and tested.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::audit::AuditLog;
use crate::classifier::{Invocation, Replacement, ReplacementPolicy};
use crate::error::{NeutralizeError, Result};
use crate::model::{CandidateClass, ClassSnapshot, LoaderContext, MethodDescriptor, MethodRef};

/// Successful install results; both count as "neutralized"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstallOutcome {
    Installed,
    /// Carries the policy of the replacement already in place
    AlreadyInstalled(ReplacementPolicy),
}

pub trait Host: Send + Sync {
    /// Look a class up through `loader`; `None` is a normal outcome
    fn find_class_if_present(&self, name: &str, loader: &LoaderContext) -> Option<CandidateClass>;

    /// Methods declared directly on `class`, inherited ones excluded
    fn enumerate_declared_methods(&self, class: &CandidateClass) -> Vec<MethodDescriptor>;

    /// Replace the body of `method`. Must be atomic per method and must
    /// report a second install as `AlreadyInstalled`, leaving the first
    /// replacement in place.
    fn install_replacement(
        &self,
        method: &MethodDescriptor,
        replacement: Replacement,
    ) -> Result<InstallOutcome>;

    /// Attach an audit-only observer to every constructor of `class`.
    /// Returns the number of constructors observed.
    fn observe_constructors(&self, class: &CandidateClass) -> Result<usize> {
        Err(NeutralizeError::unsupported(
            MethodRef { class: class.name.clone(), signature: "<init>".to_string() },
            "constructor observation not supported by host",
        ))
    }
}

// ============================================================================
// SnapshotHost
// ============================================================================

/// In-memory host over a class snapshot
#[derive(Debug, Default)]
pub struct SnapshotHost {
    snapshot: ClassSnapshot,
    installed: Mutex<HashMap<MethodRef, Replacement>>,
    observed: Mutex<HashSet<String>>,
    refused: HashMap<MethodRef, String>,
    audit: Option<Arc<AuditLog>>,
}

impl SnapshotHost {
    pub fn new(snapshot: ClassSnapshot) -> Self {
        Self {
            snapshot,
            installed: Mutex::new(HashMap::new()),
            observed: Mutex::new(HashSet::new()),
            refused: HashMap::new(),
            audit: None,
        }
    }

    /// Record every call that hits a replacement
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Make the host refuse one install point, as a real runtime would for
    /// methods it cannot patch
    pub fn refuse(mut self, method: MethodRef, reason: &str) -> Self {
        self.refused.insert(method, reason.to_string());
        self
    }

    pub fn snapshot(&self) -> &ClassSnapshot {
        &self.snapshot
    }

    /// Replacement installed on `method`, if any
    pub fn replacement(&self, method: &MethodRef) -> Option<Replacement> {
        lock(&self.installed).get(method).cloned()
    }

    /// Call a method through the host; `None` when it was never neutralized
    pub fn invoke(&self, method: &MethodRef) -> Option<Invocation> {
        let replacement = self.replacement(method)?;
        let result = replacement.invoke();

        if let Some(audit) = &self.audit {
            match &result {
                Invocation::Raised(message) => audit.record_with_stack(
                    "BLOCKED",
                    &method.class,
                    Some(&method.signature),
                    format!("raised: {message}"),
                ),
                Invocation::Returned(_) => audit.record(
                    "blocked",
                    &method.class,
                    Some(&method.signature),
                    format!("ret={}", replacement.return_type),
                ),
            }
        }
        Some(result)
    }

    pub fn installed_count(&self) -> usize {
        lock(&self.installed).len()
    }

    /// Install points in stable order
    pub fn installed(&self) -> Vec<MethodRef> {
        let mut refs: Vec<MethodRef> = lock(&self.installed).keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn is_observed(&self, class: &str) -> bool {
        lock(&self.observed).contains(class)
    }

    /// Construct an instance of `class` through the host. Observed classes
    /// log the construction with a short stack; the constructor itself runs
    /// normally. Returns whether an observer fired.
    pub fn construct(&self, class: &str) -> bool {
        if !self.is_observed(class) {
            return false;
        }
        if let Some(audit) = &self.audit {
            let simple = class.rsplit(['.', '$']).next().unwrap_or(class);
            audit.record_with_stack("constructed", class, Some("<init>"), format!("{simple} constructed"));
        }
        true
    }
}

impl Host for SnapshotHost {
    fn find_class_if_present(&self, name: &str, loader: &LoaderContext) -> Option<CandidateClass> {
        self.snapshot.find(name, loader).cloned()
    }

    fn enumerate_declared_methods(&self, class: &CandidateClass) -> Vec<MethodDescriptor> {
        self.snapshot
            .get(&class.name)
            .map(|c| c.methods.clone())
            .unwrap_or_else(|| class.methods.clone())
    }

    fn install_replacement(
        &self,
        method: &MethodDescriptor,
        replacement: Replacement,
    ) -> Result<InstallOutcome> {
        let key = method.method_ref();

        if let Some(reason) = self.refused.get(&key) {
            return Err(NeutralizeError::unsupported(key, reason.clone()));
        }
        if method.modifiers.is_abstract {
            return Err(NeutralizeError::unsupported(key, "abstract method has no body"));
        }
        if method.modifiers.is_native {
            return Err(NeutralizeError::unsupported(key, "native method"));
        }

        // check-and-insert under one lock: the install is atomic per method
        let mut installed = lock(&self.installed);
        if let Some(existing) = installed.get(&key) {
            return Ok(InstallOutcome::AlreadyInstalled(existing.policy));
        }
        installed.insert(key, replacement);
        Ok(InstallOutcome::Installed)
    }

    fn observe_constructors(&self, class: &CandidateClass) -> Result<usize> {
        if class.constructors == 0 {
            return Err(NeutralizeError::LookupMiss(format!("{}#<init>", class.name)));
        }
        lock(&self.observed).insert(class.name.clone());
        Ok(class.constructors)
    }
}

/// A poisoned lock only means another pass panicked mid-insert; the map
/// itself is still consistent
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Modifiers;

    fn snapshot() -> ClassSnapshot {
        ClassSnapshot::from_classes(vec![
            CandidateClass::new("p.Provider", LoaderContext::App)
                .method(MethodDescriptor::new("", "isEnabled", "boolean", &[]))
                .method(
                    MethodDescriptor::new("", "nativeInit", "long", &[])
                        .with_modifiers(Modifiers { is_native: true, ..Modifiers::default() }),
                ),
        ])
    }

    #[test]
    fn test_install_is_idempotent() {
        let host = SnapshotHost::new(snapshot());
        let class = host.find_class_if_present("p.Provider", &LoaderContext::App).unwrap();
        let method = &class.methods[0];
        let replacement = Replacement::new(method, ReplacementPolicy::ReturnConstantFalse, "x");

        assert_eq!(host.install_replacement(method, replacement.clone()), Ok(InstallOutcome::Installed));
        assert_eq!(
            host.install_replacement(method, replacement),
            Ok(InstallOutcome::AlreadyInstalled(ReplacementPolicy::ReturnConstantFalse))
        );

        // a different policy never overwrites the first install
        let marker = Replacement::new(method, ReplacementPolicy::ThrowMarkerError, "x");
        assert_eq!(
            host.install_replacement(method, marker),
            Ok(InstallOutcome::AlreadyInstalled(ReplacementPolicy::ReturnConstantFalse))
        );
        assert_eq!(host.installed_count(), 1);
    }

    #[test]
    fn test_native_method_refused() {
        let host = SnapshotHost::new(snapshot());
        let class = host.find_class_if_present("p.Provider", &LoaderContext::App).unwrap();
        let method = &class.methods[1];
        let replacement = Replacement::new(method, ReplacementPolicy::ReturnTypeDefault, "x");

        let err = host.install_replacement(method, replacement).unwrap_err();
        assert!(matches!(err, NeutralizeError::InstallUnsupported { .. }));
        assert_eq!(host.installed_count(), 0);
    }

    #[test]
    fn test_refuse_injection() {
        let method = MethodDescriptor::new("p.Provider", "isEnabled", "boolean", &[]);
        let host = SnapshotHost::new(snapshot()).refuse(method.method_ref(), "final method");
        let replacement = Replacement::new(&method, ReplacementPolicy::ReturnConstantFalse, "x");

        let err = host.install_replacement(&method, replacement).unwrap_err();
        assert_eq!(err.to_string(), "cannot hook p.Provider#isEnabled(): final method");
    }

    #[test]
    fn test_invoke_unhooked_is_none() {
        let host = SnapshotHost::new(snapshot());
        let mref = MethodRef { class: "p.Provider".to_string(), signature: "isEnabled()".to_string() };
        assert!(host.invoke(&mref).is_none());
    }

    #[test]
    fn test_invoke_marker_is_audited_with_stack() {
        let audit = Arc::new(AuditLog::new(true));
        let host = SnapshotHost::new(snapshot()).with_audit(audit.clone());
        let class = host.find_class_if_present("p.Provider", &LoaderContext::App).unwrap();
        let method = &class.methods[0];
        let replacement = Replacement::new(method, ReplacementPolicy::ThrowMarkerError, "disabled");
        host.install_replacement(method, replacement).unwrap();

        let result = host.invoke(&method.method_ref());
        assert_eq!(result, Some(Invocation::Raised("disabled".to_string())));

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].phase, "BLOCKED");
        assert_eq!(records[0].decision, "raised: disabled");
        assert!(records[0].stack.is_some());
    }

    #[test]
    fn test_observe_constructors() {
        let host = SnapshotHost::new(snapshot());
        let class = host.find_class_if_present("p.Provider", &LoaderContext::App).unwrap();
        assert_eq!(host.observe_constructors(&class), Ok(1));
        assert!(host.is_observed("p.Provider"));
    }

    #[test]
    fn test_construct_logs_only_when_observed() {
        let audit = Arc::new(AuditLog::new(false));
        let host = SnapshotHost::new(snapshot()).with_audit(audit.clone());
        assert!(!host.construct("p.Provider"));
        assert!(audit.is_empty());

        let class = host.find_class_if_present("p.Provider", &LoaderContext::App).unwrap();
        host.observe_constructors(&class).unwrap();
        assert!(host.construct("p.Provider"));

        let records = audit.phase("constructed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].method.as_deref(), Some("<init>"));
        assert_eq!(records[0].decision, "Provider constructed");
    }
}
