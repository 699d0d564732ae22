//! Configuration
//!
//! The keyword sets and the target plan are an empirical fit to one observed
//! build of the target application, so both live in data rather than code.
//! A single YAML file may carry either section; anything missing falls back
//! to the built-in defaults.
//!
//! ```yaml
//! heuristics:
//!   domain_keywords: [cronet, engine, builder, chromium]
//!   short_name_max_len: 2
//! profile:
//!   target_module: com.android.vending
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// HeuristicConfig
// ============================================================================

/// Keyword sets driving the matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Tokens looked for in the return type name
    pub domain_keywords: Vec<String>,
    /// Tokens looked for in the method name
    pub action_keywords: Vec<String>,
    /// Extra tokens that mark a static method as a factory
    pub static_factory_keywords: Vec<String>,
    /// Tokens a static method name needs to be hooked as an entry-point factory
    pub factory_name_keywords: Vec<String>,
    /// Exact names treated as terminal builder calls
    pub builder_names: Vec<String>,
    /// Names never matched, on top of the object-protocol set
    pub extra_exclusions: Vec<String>,
    /// Names up to this length are treated as obfuscated accessors
    pub short_name_max_len: usize,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            domain_keywords: strings(&["cronet", "engine", "builder", "chromium"]),
            action_keywords: strings(&["create", "build", "engine", "builder"]),
            static_factory_keywords: strings(&["new", "instance"]),
            factory_name_keywords: strings(&["builder", "create", "new", "engine", "instance"]),
            builder_names: strings(&["build", "create"]),
            extra_exclusions: Vec::new(),
            short_name_max_len: 2,
        }
    }
}

impl HeuristicConfig {
    /// Lower-case every substring keyword; exact builder names are kept as-is
    pub fn normalized(mut self) -> Self {
        for set in [
            &mut self.domain_keywords,
            &mut self.action_keywords,
            &mut self.static_factory_keywords,
            &mut self.factory_name_keywords,
        ] {
            for kw in set.iter_mut() {
                *kw = kw.trim().to_lowercase();
            }
            set.retain(|kw| !kw.is_empty());
        }
        self
    }
}

// ============================================================================
// TargetProfile
// ============================================================================

/// Classes treated as externally reachable entry points in one loader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPoints {
    /// Only `build` / `create` are replaced, constructors stay usable
    pub builders_only: Vec<String>,
    /// Static factory methods are replaced
    pub static_factories: Vec<String>,
}

impl EntryPoints {
    pub fn is_empty(&self) -> bool {
        self.builders_only.is_empty() && self.static_factories.is_empty()
    }
}

/// Deployment plan: what to do once the target module loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    /// Module identifier that triggers the pipeline
    pub target_module: String,
    /// Message carried by the marker error
    pub marker_message: String,
    /// Platform classes on the boot loader
    pub platform_entry_points: EntryPoints,
    /// Provider classes that get blanket neutralization
    pub providers: Vec<String>,
    /// Providers whose constructions are observed and logged
    pub observe_construction: Vec<String>,
    /// Entry points in the application loader
    pub app_entry_points: Vec<String>,
    /// Classes whose ancestors are walked and neutralized
    pub hierarchy_roots: Vec<String>,
    /// Attach a short call stack to blocked-call audit records
    pub capture_stacks: bool,
}

impl Default for TargetProfile {
    fn default() -> Self {
        let providers = strings(&[
            "org.chromium.net.impl.HttpEngineNativeProvider",
            "org.chromium.net.impl.NativeCronetProvider",
        ]);
        Self {
            target_module: "com.android.vending".to_string(),
            marker_message: "Cronet disabled by VendingCronetOff".to_string(),
            platform_entry_points: EntryPoints {
                builders_only: strings(&["android.net.http.HttpEngine$Builder"]),
                static_factories: strings(&["android.net.http.HttpEngine"]),
            },
            observe_construction: strings(&["org.chromium.net.impl.HttpEngineNativeProvider"]),
            hierarchy_roots: providers.clone(),
            providers,
            app_entry_points: strings(&[
                "org.chromium.net.CronetEngine$Builder",
                "org.chromium.net.ExperimentalCronetEngine$Builder",
                "org.chromium.net.impl.NativeCronetEngineBuilderImpl",
                "org.chromium.net.impl.CronetEngineBuilderImpl",
                "org.chromium.net.CronetEngine",
                "org.chromium.net.ExperimentalCronetEngine",
                "org.chromium.net.impl.NativeCronetEngine",
            ]),
            capture_stacks: true,
        }
    }
}

// ============================================================================
// Config file
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub heuristics: HeuristicConfig,
    pub profile: TargetProfile,
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).context("invalid YAML config")?;
        Ok(Config {
            heuristics: config.heuristics.normalized(),
            profile: config.profile,
        })
    }

    /// Load from file, or the built-in defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
