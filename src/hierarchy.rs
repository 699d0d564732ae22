// ============================================================================
// Hierarchy walker - superclass chain of a candidate class
// ============================================================================

use std::collections::HashSet;

use serde::Serialize;

use crate::host::Host;
use crate::model::{CandidateClass, MethodDescriptor};

/// One visited class and the methods it declares itself
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyLevel {
    pub class: String,
    pub methods: Vec<MethodDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchyWalk {
    /// Most-derived first; the platform root is never included
    pub levels: Vec<HierarchyLevel>,
    /// Interfaces of the walked class, recorded for audit only
    pub interfaces: Vec<String>,
    /// First ancestor that could not be resolved, if the chain broke early
    pub missing_ancestor: Option<String>,
}

impl HierarchyWalk {
    /// Ancestors only, without the starting class
    pub fn ancestors(&self) -> &[HierarchyLevel] {
        self.levels.get(1..).unwrap_or(&[])
    }

    pub fn visits(&self, class: &str) -> bool {
        self.levels.iter().any(|l| l.class == class)
    }
}

/// Walk `class` up to, but not including, `platform_root`
///
/// Ancestors are resolved through the class's own loader. Each level keeps
/// its declared methods separately: a method redeclared on a descendant is
/// a different install point from the ancestor's.
pub fn walk(host: &dyn Host, class: &CandidateClass, platform_root: &str) -> HierarchyWalk {
    let mut walk = HierarchyWalk {
        interfaces: class.interfaces.clone(),
        ..HierarchyWalk::default()
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = Some(class.clone());

    while let Some(cls) = current.take() {
        if cls.name == platform_root || !seen.insert(cls.name.clone()) {
            break;
        }

        walk.levels.push(HierarchyLevel {
            class: cls.name.clone(),
            methods: host.enumerate_declared_methods(&cls),
        });

        let Some(parent) = cls.superclass.as_deref() else { break };
        if parent == platform_root {
            break;
        }
        current = host.find_class_if_present(parent, &class.loader);
        if current.is_none() {
            tracing::debug!("{}: ancestor {} not resolvable", class.name, parent);
            walk.missing_ancestor = Some(parent.to_string());
        }
    }

    walk
}
