//! CLI 模式处理器
//!
//! Offline driver for the engine: replays a module-load trigger against a
//! class snapshot and prints what would be neutralized. Human-readable by
//! default, `--json` for machine output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{json, Value};

use crate::audit::AuditLog;
use crate::classifier::{classify, ReplacementPolicy};
use crate::config::Config;
use crate::hierarchy;
use crate::host::SnapshotHost;
use crate::model::{ClassSnapshot, LoaderContext, MethodRef, TypeDescriptor};
use crate::profile::{ModuleReport, Pipeline};
use crate::rules::{self, Matcher};

/// CLI Commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replay a module load against a class snapshot
    Replay {
        /// Snapshot JSON file or directory of JSON files
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Module identifier of the load event (defaults to the profile target)
        #[arg(short, long)]
        module: Option<String>,

        /// Calls to simulate afterwards, as `Class#name(Params)`
        #[arg(long, value_delimiter = ',')]
        probe: Vec<String>,

        /// Include the full audit log
        #[arg(long)]
        audit: bool,
    },

    /// Evaluate the matcher and classifier on one method shape
    Match {
        #[arg(short, long)]
        name: String,

        /// Return type, e.g. `boolean` or `org.chromium.net.CronetEngine`
        #[arg(short, long, default_value = "void")]
        returns: String,

        #[arg(long)]
        is_static: bool,

        #[arg(long, default_value = "0")]
        params: usize,

        /// Treat the declaring class as an entry point
        #[arg(long)]
        entry_point: bool,
    },

    /// Show the ancestor chain of a class in a snapshot
    Walk {
        #[arg(short, long)]
        snapshot: PathBuf,

        #[arg(short, long)]
        class: String,
    },

    /// Print the active rules and configuration
    Rules,
}

/// 处理 CLI 命令
pub fn handle_command(cmd: Command, config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let config = Config::load(config_path)?;

    let value = match cmd {
        Command::Replay { snapshot, module, probe, audit } => {
            replay(&snapshot, module.as_deref(), &probe, audit, config, json_output)?
        }
        Command::Match { name, returns, is_static, params, entry_point } => {
            match_method(&name, &returns, is_static, params, entry_point, config, json_output)
        }
        Command::Walk { snapshot, class } => walk_class(&snapshot, &class, json_output)?,
        Command::Rules => show_rules(&config, json_output)?,
    };

    if json_output {
        let output = json!({ "success": true, "data": value });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_value(&value);
    }
    Ok(())
}

/// 打印 Value，智能处理字符串和其他类型
fn print_value(value: &Value) {
    match value {
        Value::String(s) => println!("{s}"),
        _ => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}

fn replay(
    snapshot_path: &Path,
    module: Option<&str>,
    probes: &[String],
    include_audit: bool,
    config: Config,
    json_output: bool,
) -> Result<Value> {
    let snapshot = ClassSnapshot::load(snapshot_path)?;
    let audit = Arc::new(AuditLog::new(config.profile.capture_stacks));
    let host = Arc::new(SnapshotHost::new(snapshot).with_audit(audit.clone()));
    let module = module.unwrap_or(&config.profile.target_module).to_string();
    let pipeline = Pipeline::with_audit(host.clone(), config, audit.clone());

    let Some(report) = pipeline.on_module_load(&module, &LoaderContext::App) else {
        return Ok(if json_output {
            json!({ "module": module, "triggered": false })
        } else {
            json!(format!("{module}: not the target module, nothing to do"))
        });
    };

    let mut probe_results = Vec::new();
    for probe in probes {
        let (class, signature) = probe
            .split_once('#')
            .with_context(|| format!("probe `{probe}` is not Class#method(Params)"))?;
        let method = MethodRef { class: class.to_string(), signature: signature.to_string() };
        let result = host.invoke(&method);
        probe_results.push((method, result));
    }

    if json_output {
        let probes: Vec<Value> = probe_results
            .iter()
            .map(|(m, r)| json!({ "method": m.to_string(), "result": r }))
            .collect();
        let mut value = json!({
            "triggered": true,
            "report": report,
            "installed": host.installed(),
            "probes": probes,
        });
        if include_audit {
            value["audit"] = serde_json::to_value(audit.records())?;
        }
        return Ok(value);
    }

    let mut out = render_report(&report);
    for (method, result) in &probe_results {
        match result {
            Some(r) => out.push_str(&format!("probe {method}: {r:?}\n")),
            None => out.push_str(&format!("probe {method}: not neutralized\n")),
        }
    }
    if include_audit {
        out.push_str("----------------------------------------\n");
        for record in audit.records() {
            let method = record.method.as_deref().map(|m| format!("#{m}")).unwrap_or_default();
            out.push_str(&format!("[{}] {}{} {}\n", record.phase, record.class, method, record.decision));
        }
    }
    Ok(json!(out))
}

/// Plain-text rendering of a module report
pub fn render_report(report: &ModuleReport) -> String {
    let mut out = format!(
        "Module: {} ({} loader)\n----------------------------------------\n",
        report.module, report.loader
    );
    for phase in &report.phases {
        out.push_str(&format!(
            "{}: {} neutralized, {} failed, {} classes hooked, {} missing\n",
            phase.phase,
            phase.summary.neutralized(),
            phase.summary.failed,
            phase.hooked_classes.len(),
            phase.missing_classes.len(),
        ));
        for class in &phase.hooked_classes {
            out.push_str(&format!("  + {class}\n"));
        }
    }
    for h in &report.hierarchies {
        out.push_str(&format!(
            "Hierarchy {}: {} ancestors, {} neutralized\n",
            h.class,
            h.ancestors.len(),
            h.summary.neutralized()
        ));
    }
    out.push_str(&format!("Total: {} neutralized, {} failed\n", report.neutralized(), report.failed()));
    out
}

fn match_method(
    name: &str,
    returns: &str,
    is_static: bool,
    params: usize,
    entry_point: bool,
    config: Config,
    json_output: bool,
) -> Value {
    let matcher = Matcher::new(config.heuristics);
    let rule = matcher.matches(name, returns, is_static);
    let ret = TypeDescriptor::parse(returns);
    let policy: Option<ReplacementPolicy> = rule
        .map(|_| classify(&ret, params, name, &matcher.config().builder_names, entry_point));

    if json_output {
        return json!({ "name": name, "returns": returns, "rule": rule, "policy": policy });
    }
    match (rule, policy) {
        (Some(rule), Some(policy)) => json!(format!("{name}: {rule} -> {policy}")),
        _ => json!(format!("{name}: no match")),
    }
}

fn walk_class(snapshot_path: &Path, class: &str, json_output: bool) -> Result<Value> {
    let snapshot = ClassSnapshot::load(snapshot_path)?;
    let root = snapshot.platform_root.clone();
    let target = snapshot
        .get(class)
        .cloned()
        .with_context(|| format!("{class} not in snapshot"))?;
    let host = SnapshotHost::new(snapshot);
    let walk = hierarchy::walk(&host, &target, &root);

    if json_output {
        return Ok(serde_json::to_value(&walk)?);
    }

    let mut out = String::new();
    for level in &walk.levels {
        out.push_str(&format!("{}\n", level.class));
        for method in &level.methods {
            out.push_str(&format!("  {}\n", method.render()));
        }
    }
    if let Some(missing) = &walk.missing_ancestor {
        out.push_str(&format!("(ancestor {missing} not in snapshot)\n"));
    }
    for iface in &walk.interfaces {
        out.push_str(&format!("implements {iface}\n"));
    }
    Ok(json!(out))
}

fn show_rules(config: &Config, json_output: bool) -> Result<Value> {
    if json_output {
        let rules: Vec<Value> = rules::registry()
            .ordered()
            .map(|r| json!({ "id": r.id, "priority": r.priority, "description": r.description }))
            .collect();
        return Ok(json!({ "rules": rules, "config": config }));
    }

    let mut out = String::from("Rules (first match wins):\n");
    out.push_str("  0. OBJECT_PROTOCOL_EXCLUSION  never matched\n");
    for (i, rule) in rules::registry().ordered().enumerate() {
        out.push_str(&format!("  {}. {:<26} {}\n", i + 1, rule.id.as_str(), rule.description));
    }
    out.push_str("----------------------------------------\n");
    out.push_str(&config.to_yaml()?);
    Ok(json!(out))
}
