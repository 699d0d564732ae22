// ============================================================================
// Class model - read-only snapshot of loaded class metadata
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Universal root of every class hierarchy on the target platform
pub const PLATFORM_ROOT: &str = "java.lang.Object";

// ============================================================================
// TypeDescriptor
// ============================================================================

/// Return / parameter type of a method
///
/// Primitives are kept as distinct variants so the replacement default can be
/// chosen without string comparisons. Everything else is a reference type
/// identified by its qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference(String),
}

impl TypeDescriptor {
    /// Parse a JVM-style type name ("boolean", "int", "java.lang.String")
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "void" => TypeDescriptor::Void,
            "boolean" => TypeDescriptor::Boolean,
            "byte" => TypeDescriptor::Byte,
            "char" => TypeDescriptor::Char,
            "short" => TypeDescriptor::Short,
            "int" => TypeDescriptor::Int,
            "long" => TypeDescriptor::Long,
            "float" => TypeDescriptor::Float,
            "double" => TypeDescriptor::Double,
            other => TypeDescriptor::Reference(other.to_string()),
        }
    }

    /// Qualified name, as reflection would report it
    pub fn name(&self) -> &str {
        match self {
            TypeDescriptor::Void => "void",
            TypeDescriptor::Boolean => "boolean",
            TypeDescriptor::Byte => "byte",
            TypeDescriptor::Char => "char",
            TypeDescriptor::Short => "short",
            TypeDescriptor::Int => "int",
            TypeDescriptor::Long => "long",
            TypeDescriptor::Float => "float",
            TypeDescriptor::Double => "double",
            TypeDescriptor::Reference(name) => name,
        }
    }

    /// Last component of the qualified name, nested classes included
    /// ("org.chromium.net.CronetEngine$Builder" -> "Builder")
    pub fn simple_name(&self) -> &str {
        let name = self.name();
        let tail = name.rsplit('.').next().unwrap_or(name);
        tail.rsplit('$').next().unwrap_or(tail)
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, TypeDescriptor::Reference(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeDescriptor::Void)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, TypeDescriptor::Boolean)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for TypeDescriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for TypeDescriptor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(TypeDescriptor::parse(&name))
    }
}

// ============================================================================
// Modifiers
// ============================================================================

/// Method modifiers relevant to interception
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    #[serde(rename = "static")]
    pub is_static: bool,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(rename = "native")]
    pub is_native: bool,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
}

impl Modifiers {
    pub fn instance() -> Self {
        Self::default()
    }

    pub fn statik() -> Self {
        Self { is_static: true, ..Self::default() }
    }
}

impl fmt::Display for Modifiers {
    /// Java modifier order: abstract, static, final, native
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::new();
        if self.is_abstract {
            words.push("abstract");
        }
        if self.is_static {
            words.push("static");
        }
        if self.is_final {
            words.push("final");
        }
        if self.is_native {
            words.push("native");
        }
        f.write_str(&words.join(" "))
    }
}

// ============================================================================
// MethodDescriptor / MethodRef
// ============================================================================

/// A method declared on a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub return_type: TypeDescriptor,
    #[serde(default)]
    pub params: Vec<TypeDescriptor>,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Declaring class (back-reference by name, filled in when the class is loaded)
    #[serde(default)]
    pub declaring_class: String,
}

impl MethodDescriptor {
    pub fn new(declaring_class: &str, name: &str, return_type: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            return_type: TypeDescriptor::parse(return_type),
            params: params.iter().map(|p| TypeDescriptor::parse(p)).collect(),
            modifiers: Modifiers::instance(),
            declaring_class: declaring_class.to_string(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.is_static
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Overload-distinguishing signature: `name(T1,T2)`
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.name()).collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// Declaration line used in hierarchy dumps:
    /// `static Builder newBuilder(Context)`
    ///
    /// Visibility is not part of the snapshot, so none is printed.
    pub fn render(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.simple_name()).collect();
        let modifiers = self.modifiers.to_string();
        let prefix = if modifiers.is_empty() { String::new() } else { format!("{modifiers} ") };
        format!(
            "{}{} {}({})",
            prefix,
            self.return_type.simple_name(),
            self.name,
            params.join(", ")
        )
    }

    pub fn method_ref(&self) -> MethodRef {
        MethodRef {
            class: self.declaring_class.clone(),
            signature: self.signature(),
        }
    }
}

/// Identity of an install point
///
/// The same signature on two classes of one hierarchy is two install points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: String,
    pub signature: String,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.signature)
    }
}

// ============================================================================
// CandidateClass
// ============================================================================

/// Loader a class was found through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderContext {
    /// Platform classes (boot class path)
    Boot,
    /// The application's own class loader
    App,
    Named(String),
}

impl LoaderContext {
    pub fn label(&self) -> &str {
        match self {
            LoaderContext::Boot => "bootclasspath",
            LoaderContext::App => "app",
            LoaderContext::Named(name) => name,
        }
    }
}

impl Default for LoaderContext {
    fn default() -> Self {
        LoaderContext::App
    }
}

/// A class discovered in the running process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateClass {
    pub name: String,
    #[serde(default)]
    pub loader: LoaderContext,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Constructors are never replaced; only counted for observation
    #[serde(default)]
    pub constructors: usize,
}

impl CandidateClass {
    pub fn new(name: &str, loader: LoaderContext) -> Self {
        Self {
            name: name.to_string(),
            loader,
            methods: Vec::new(),
            superclass: Some(PLATFORM_ROOT.to_string()),
            interfaces: Vec::new(),
            constructors: 1,
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(superclass.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    /// Add a declared method; the declaring class is set to this class
    pub fn method(mut self, mut method: MethodDescriptor) -> Self {
        method.declaring_class = self.name.clone();
        self.methods.push(method);
        self
    }

    fn bind_methods(&mut self) {
        for method in &mut self.methods {
            method.declaring_class = self.name.clone();
        }
    }
}

// ============================================================================
// ClassSnapshot
// ============================================================================

/// Materialized class metadata for one process
///
/// Classes are keyed by `(loader, name)` lookups through `find`; a class on
/// the boot loader is visible from every loader, app classes only from `App`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSnapshot {
    #[serde(default = "default_root")]
    pub platform_root: String,
    #[serde(default)]
    pub classes: Vec<CandidateClass>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

fn default_root() -> String {
    PLATFORM_ROOT.to_string()
}

impl Default for ClassSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassSnapshot {
    pub fn new() -> Self {
        Self {
            platform_root: default_root(),
            classes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn from_classes(classes: Vec<CandidateClass>) -> Self {
        let mut snapshot = Self::new();
        for class in classes {
            snapshot.insert(class);
        }
        snapshot
    }

    /// Add or replace a class
    pub fn insert(&mut self, mut class: CandidateClass) {
        class.bind_methods();
        match self.index.get(&class.name) {
            Some(&pos) => self.classes[pos] = class,
            None => {
                self.index.insert(class.name.clone(), self.classes.len());
                self.classes.push(class);
            }
        }
    }

    /// Lookup by name regardless of loader
    pub fn get(&self, name: &str) -> Option<&CandidateClass> {
        self.index.get(name).map(|&pos| &self.classes[pos])
    }

    /// Lookup as seen from `loader`
    pub fn find(&self, name: &str, loader: &LoaderContext) -> Option<&CandidateClass> {
        let class = self.get(name)?;
        if class.loader == LoaderContext::Boot || &class.loader == loader {
            Some(class)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateClass> {
        self.classes.iter()
    }

    fn reindex(&mut self) {
        let classes = std::mem::take(&mut self.classes);
        self.index.clear();
        for class in classes {
            self.insert(class);
        }
    }

    /// Parse a snapshot from JSON
    ///
    /// Accepts either a full snapshot object or a bare array of classes.
    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .context("snapshot is not valid JSON")?;
        let mut snapshot = if value.is_array() {
            let classes: Vec<CandidateClass> = serde_json::from_value(value)
                .context("invalid class list")?;
            ClassSnapshot { classes, ..ClassSnapshot::new() }
        } else {
            serde_json::from_value(value).context("invalid class snapshot")?
        };
        snapshot.reindex();
        Ok(snapshot)
    }

    /// Load from a JSON file, or merge every `*.json` file under a directory
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Path not found: {}", path.display());
        }

        if path.is_file() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return Self::from_json(&content)
                .with_context(|| format!("parsing {}", path.display()));
        }

        let mut merged = Self::new();
        let mut files: Vec<_> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .map(|e| e.into_path())
            .collect();
        files.sort();

        for file in files {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let part = Self::from_json(&content)
                .with_context(|| format!("parsing {}", file.display()))?;
            // a part without its own root keeps the one already seen
            if part.platform_root != PLATFORM_ROOT {
                if merged.platform_root != PLATFORM_ROOT && merged.platform_root != part.platform_root {
                    anyhow::bail!(
                        "{}: platform root {} conflicts with {}",
                        file.display(),
                        part.platform_root,
                        merged.platform_root
                    );
                }
                merged.platform_root = part.platform_root;
            }
            for class in part.classes {
                merged.insert(class);
            }
        }

        tracing::debug!("loaded {} classes from {}", merged.len(), path.display());
        Ok(merged)
    }
}
