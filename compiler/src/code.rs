// code.rs — Generated code items and per-domain accumulators
//
// Declarations and instances are what atoms hand back to the driver; the
// dependency graph orders them and the driver renders them into domain
// buckets. Fragments carry per-domain processing text plus output tokens
// between neighbouring atoms.
//
// Preconditions: none (types only).
// Postconditions: merges preserve insertion order and never duplicate
//                 global group entries.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::ValueType;
use crate::diag::Location;
use crate::templates::Templates;

// ── Declarations and instances ─────────────────────────────────────────────

/// One-time header/type code (a module struct, a platform header block,
/// a rate counter). Unique by name within a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    /// Depth of the scope the declaration belongs to.
    pub stack_index: usize,
    pub domain: Option<String>,
    pub code: String,
    /// One-time initialization emitted alongside the declaration.
    pub init_code: String,
    /// Items whose code must follow this one.
    pub dependents: Vec<CodeItem>,
    pub location: Location,
}

impl Declaration {
    pub fn new(
        name: impl Into<String>,
        stack_index: usize,
        domain: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Declaration {
            name: name.into(),
            stack_index,
            domain,
            code: code.into(),
            init_code: String::new(),
            dependents: Vec::new(),
            location: Location::default(),
        }
    }

    pub fn with_init(mut self, init: impl Into<String>) -> Self {
        self.init_code = init.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceKind {
    Scalar(ValueType),
    Bundle { element: ValueType, size: usize },
    /// An instantiation of a generated struct; `constants` are the
    /// constructor arguments captured from the enclosing scope.
    Module { type_name: String, constants: Vec<String> },
}

/// Runtime storage required by an atom.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub stack_index: usize,
    pub domain: Option<String>,
    pub kind: InstanceKind,
    /// Platform spelling of the storage type, when a platform type supplies one.
    pub ctype: Option<String>,
    /// Rendered initial values: one for scalars, `size` for bundles.
    pub initial: Vec<String>,
    pub dependents: Vec<CodeItem>,
    pub location: Location,
}

impl Instance {
    pub fn scalar(
        name: impl Into<String>,
        stack_index: usize,
        domain: Option<String>,
        value_type: ValueType,
        initial: String,
    ) -> Self {
        Instance {
            name: name.into(),
            stack_index,
            domain,
            kind: InstanceKind::Scalar(value_type),
            ctype: None,
            initial: vec![initial],
            dependents: Vec::new(),
            location: Location::default(),
        }
    }

    /// The storage type as spelled in the target language.
    pub fn type_name(&self, templates: &dyn Templates) -> String {
        if let Some(t) = &self.ctype {
            return t.clone();
        }
        match &self.kind {
            InstanceKind::Scalar(t) => templates.scalar_type(*t).to_string(),
            InstanceKind::Bundle { element, .. } => templates.scalar_type(*element).to_string(),
            InstanceKind::Module { type_name, .. } => type_name.clone(),
        }
    }

    pub fn render(&self, templates: &dyn Templates) -> String {
        let ctype = self.type_name(templates);
        match &self.kind {
            InstanceKind::Scalar(_) => {
                templates.variable_declaration(&ctype, &self.name, self.initial.first().map(String::as_str))
            }
            InstanceKind::Bundle { .. } => {
                templates.bundle_declaration(&ctype, &self.name, &self.initial)
            }
            InstanceKind::Module { constants, .. } => {
                templates.instance_declaration(&ctype, &self.name, constants)
            }
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self.kind, InstanceKind::Module { .. })
    }
}

/// A node of the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeItem {
    Declaration(Declaration),
    Instance(Instance),
}

impl CodeItem {
    pub fn name(&self) -> &str {
        match self {
            CodeItem::Declaration(d) => &d.name,
            CodeItem::Instance(i) => &i.name,
        }
    }

    pub fn stack_index(&self) -> usize {
        match self {
            CodeItem::Declaration(d) => d.stack_index,
            CodeItem::Instance(i) => i.stack_index,
        }
    }

    pub fn domain(&self) -> Option<&str> {
        match self {
            CodeItem::Declaration(d) => d.domain.as_deref(),
            CodeItem::Instance(i) => i.domain.as_deref(),
        }
    }

    pub fn set_domain_if_unset(&mut self, domain: &str) {
        let slot = match self {
            CodeItem::Declaration(d) => &mut d.domain,
            CodeItem::Instance(i) => &mut i.domain,
        };
        if slot.is_none() {
            *slot = Some(domain.to_string());
        }
    }

    pub fn dependents(&self) -> &[CodeItem] {
        match self {
            CodeItem::Declaration(d) => &d.dependents,
            CodeItem::Instance(i) => &i.dependents,
        }
    }

    pub fn dependents_mut(&mut self) -> &mut Vec<CodeItem> {
        match self {
            CodeItem::Declaration(d) => &mut d.dependents,
            CodeItem::Instance(i) => &mut i.dependents,
        }
    }

    pub fn take_dependents(&mut self) -> Vec<CodeItem> {
        std::mem::take(self.dependents_mut())
    }

    pub fn add_dependent(&mut self, item: CodeItem) {
        self.dependents_mut().push(item);
    }

    pub fn location(&self) -> &Location {
        match self {
            CodeItem::Declaration(d) => &d.location,
            CodeItem::Instance(i) => &i.location,
        }
    }
}

// ── Reads and writes ────────────────────────────────────────────────────────

/// A storage access recorded while generating a stream. Reaction and loop
/// reference lists are computed from these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    pub name: String,
    pub stack_index: usize,
    pub domain: String,
}

pub fn push_access(list: &mut Vec<Access>, access: Access) {
    if !list.iter().any(|a| a.name == access.name) {
        list.push(access);
    }
}

// ── Processing fragments ────────────────────────────────────────────────────

/// Processing code one atom contributes to one domain, plus the tokens
/// its consumer reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub code: String,
    pub tokens: Vec<String>,
}

/// Per-domain processing fragments of one atom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragments {
    pub by_domain: BTreeMap<String, Fragment>,
}

impl Fragments {
    pub fn single(domain: &str, code: String, tokens: Vec<String>) -> Self {
        let mut f = Fragments::default();
        f.by_domain
            .insert(domain.to_string(), Fragment { code, tokens });
        f
    }

    pub fn append_code(&mut self, domain: &str, code: &str) {
        self.by_domain
            .entry(domain.to_string())
            .or_default()
            .code
            .push_str(code);
    }

    pub fn set_tokens(&mut self, domain: &str, tokens: Vec<String>) {
        self.by_domain.entry(domain.to_string()).or_default().tokens = tokens;
    }

    pub fn tokens(&self, domain: &str) -> Option<&[String]> {
        self.by_domain.get(domain).map(|f| f.tokens.as_slice())
    }

    pub fn code(&self, domain: &str) -> &str {
        self.by_domain
            .get(domain)
            .map(|f| f.code.as_str())
            .unwrap_or("")
    }

    /// Append another atom's code; tokens of `other` replace ours.
    pub fn merge(&mut self, other: Fragments) {
        for (domain, frag) in other.by_domain {
            let entry = self.by_domain.entry(domain).or_default();
            entry.code.push_str(&frag.code);
            if !frag.tokens.is_empty() {
                entry.tokens = frag.tokens;
            }
        }
    }
}

// ── Domain buckets ─────────────────────────────────────────────────────────

/// Accumulated code for one execution domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCode {
    pub header_code: String,
    pub init_code: String,
    pub processing_code: Vec<String>,
    pub preprocessing_code: String,
    pub postprocessing_code: String,
    /// Storage read by this domain's code.
    pub inputs: Vec<String>,
    /// Storage written by this domain's code.
    pub outputs: Vec<String>,
}

impl DomainCode {
    pub fn merge(&mut self, other: DomainCode) {
        self.header_code.push_str(&other.header_code);
        self.init_code.push_str(&other.init_code);
        self.processing_code.extend(other.processing_code);
        self.preprocessing_code.push_str(&other.preprocessing_code);
        self.postprocessing_code.push_str(&other.postprocessing_code);
        for i in other.inputs {
            push_unique(&mut self.inputs, i);
        }
        for o in other.outputs {
            push_unique(&mut self.outputs, o);
        }
    }

    pub fn processing_text(&self) -> String {
        self.processing_code.concat()
    }

    pub fn is_empty(&self) -> bool {
        self.header_code.is_empty()
            && self.init_code.is_empty()
            && self.processing_code.iter().all(String::is_empty)
            && self.preprocessing_code.is_empty()
            && self.postprocessing_code.is_empty()
    }
}

pub type DomainMap = BTreeMap<String, DomainCode>;

pub fn merge_domain_maps(into: &mut DomainMap, other: DomainMap) {
    for (domain, code) in other {
        into.entry(domain).or_default().merge(code);
    }
}

// ── Global resource groups ─────────────────────────────────────────────────

/// Program-wide resource lists consumed by the template layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalGroups {
    pub include: Vec<String>,
    pub include_dir: Vec<String>,
    pub initializations: Vec<String>,
    pub link_to: Vec<String>,
    pub link_dir: Vec<String>,
}

impl GlobalGroups {
    pub fn merge(&mut self, other: GlobalGroups) {
        for v in other.include {
            push_unique(&mut self.include, v);
        }
        for v in other.include_dir {
            push_unique(&mut self.include_dir, v);
        }
        for v in other.initializations {
            push_unique(&mut self.initializations, v);
        }
        for v in other.link_to {
            push_unique(&mut self.link_to, v);
        }
        for v in other.link_dir {
            push_unique(&mut self.link_dir, v);
        }
    }
}

pub fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
