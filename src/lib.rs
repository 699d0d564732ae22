// ============================================================================
// Method Neutralizer - Library Interface
// ============================================================================
//
// Heuristic method-neutralization engine. Given the loaded classes of a
// process, finds methods that look like entry points into a networking
// engine and replaces them with policy-driven substitutes through the host's
// interception primitive. The binary (main.rs) replays that offline.

pub mod audit;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod host;
pub mod model;
pub mod profile;
pub mod rules;

pub use classifier::{classify, DefaultValue, Invocation, Replacement, ReplacementPolicy};
pub use engine::{NeutralizationEngine, NeutralizationRecord, NeutralizationSummary, Outcome};
pub use error::NeutralizeError;
pub use host::{Host, InstallOutcome, SnapshotHost};
pub use model::{CandidateClass, ClassSnapshot, LoaderContext, MethodDescriptor, MethodRef};
pub use profile::{ModuleReport, Pipeline};
pub use rules::{Matcher, RuleId};
