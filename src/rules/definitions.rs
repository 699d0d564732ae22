//! 规则定义
//!
//! All matcher rules in one place, in evaluation order

use super::{RuleDefinition, RuleId};

pub fn all_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition {
            id: RuleId::ReturnTypeKeyword,
            priority: 10,
            description: "Return type names the engine, its builder or its vendor namespace",
            rationale: "Anything handing out an engine object is an entry into the native stack, \
                        even when the method name itself is obfuscated.",
        },
        RuleDefinition {
            id: RuleId::NameKeyword,
            priority: 20,
            description: "Method name contains create/build/engine/builder",
            rationale: "Construction and lookup of the engine goes through these verbs.",
        },
        RuleDefinition {
            id: RuleId::StaticFactory,
            priority: 30,
            description: "Static method named new*/…Instance",
            rationale: "Singleton accessors and static factories bypass builder hooks.",
        },
        RuleDefinition {
            id: RuleId::ObfuscatedShortName,
            priority: 40,
            description: "One- or two-letter method returning a value",
            rationale: "Minified accessors on provider ancestors; void and boolean shapes are \
                        left alone since they carry no engine handle.",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_priorities_unique() {
        let rules = all_rules();
        let priorities: HashSet<u8> = rules.iter().map(|r| r.priority).collect();
        assert_eq!(priorities.len(), rules.len());
    }
}
