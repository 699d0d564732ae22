//! Names the matcher must never touch
//!
//! The universal object protocol is always excluded. Configuration can only
//! add names on top of it.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Methods every object answers; replacing them breaks the host object
pub const OBJECT_PROTOCOL: &[&str] = &[
    "equals",
    "hashCode",
    "toString",
    "getClass",
    "notify",
    "notifyAll",
    "wait",
    "finalize",
    "clone",
];

static OBJECT_PROTOCOL_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| OBJECT_PROTOCOL.iter().copied().collect());

pub fn is_object_protocol(name: &str) -> bool {
    OBJECT_PROTOCOL_SET.contains(name)
}

#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    extra: HashSet<String>,
}

impl ExclusionSet {
    pub fn with_extra(names: &[String]) -> Self {
        Self {
            extra: names.iter().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()).collect(),
        }
    }

    /// Exact, case-sensitive: `Equals` is a different method from `equals`
    pub fn is_excluded(&self, name: &str) -> bool {
        is_object_protocol(name) || self.extra.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_protocol_always_excluded() {
        let set = ExclusionSet::default();
        for name in OBJECT_PROTOCOL {
            assert!(set.is_excluded(name), "{name} should be excluded");
        }
        assert!(!set.is_excluded("Equals"));
        assert!(!set.is_excluded("build"));
    }

    #[test]
    fn test_extra_names() {
        let set = ExclusionSet::with_extra(&["getLogger".to_string(), "  ".to_string()]);
        assert!(set.is_excluded("getLogger"));
        assert!(set.is_excluded("hashCode"));
        assert!(!set.is_excluded(""));
    }
}
