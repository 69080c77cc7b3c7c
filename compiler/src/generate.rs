// generate.rs — Stream code generation driver
//
// Walks the streams of one scope, turns every stream into an atom chain,
// threads output tokens from atom to atom, multiplexes the resulting code
// by domain and rate, and orders the declarations and instances the atoms
// need. Module, reaction and loop atoms recurse into their bodies through
// `generate_code`, each body in a private scope.
//
// Preconditions: the program tree passed validation upstream; every name
//                a stream references has a declaration.
// Postconditions: `GenerateResult.generated` is `Some` iff no error was
//                 reported; output is byte-identical across runs.
// Failure modes: unresolved names, missing ports, cycles, unsupported
//                members → error diagnostics. Domain inconsistencies are
//                warnings and generation continues.
// Side effects: log output only.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use serde::Serialize;

use crate::ast::{
    Block, BlockKind, BundleRef, Expression, FunctionCall, Literal, Member, Node, PortDecl,
    PortDirection, PortPropertyRef, Program, StreamNode, SystemNode,
};
use crate::atom::*;
use crate::code::*;
use crate::depgraph::order_items;
use crate::diag::{codes, Diagnostic, Location};
use crate::id::NameAllocator;
use crate::rate::{RateMultiplexer, RateTracker, Transition};
use crate::scope::{ParentFrame, PortBinding, Resolved, ScopeStack};
use crate::templates::{FunctionDef, ModuleStruct, Param, PropertyMember, Templates};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOptions {
    pub platform: Option<String>,
    pub framework: Option<String>,
    /// Domain of streams whose members declare none.
    pub default_domain: String,
    /// Rate of the default domain when no `domain` block gives one.
    pub default_rate: Option<f64>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            platform: None,
            framework: None,
            default_domain: "AudioDomain".to_string(),
            default_rate: None,
        }
    }
}

impl GeneratorOptions {
    /// Options with the program's `system` node taking precedence.
    pub fn with_system(&self, system: Option<&SystemNode>) -> Self {
        let mut out = self.clone();
        if let Some(sys) = system {
            if sys.platform.is_some() {
                out.platform = sys.platform.clone();
            }
            if sys.framework.is_some() {
                out.framework = sys.framework.clone();
            }
            if let Some(d) = &sys.default_domain {
                out.default_domain = d.clone();
            }
        }
        out
    }

    /// Namespaces whose blocks are visible besides un-namespaced ones.
    pub fn namespaces(&self) -> Vec<String> {
        let mut out = Vec::new();
        for ns in [&self.platform, &self.framework].into_iter().flatten() {
            push_unique(&mut out, ns.clone());
        }
        out
    }
}

/// Generated code of a whole program, ready for stitching.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedProgram {
    pub domains: DomainMap,
    pub global_groups: GlobalGroups,
}

#[derive(Debug)]
pub struct GenerateResult {
    /// `None` when any error was reported.
    pub generated: Option<GeneratedProgram>,
    pub diagnostics: Vec<Diagnostic>,
}

impl GenerateResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// What one `generate_code` call hands back to its caller.
#[derive(Debug, Default)]
pub struct ScopeOutput {
    pub global_groups: GlobalGroups,
    pub domain_code: DomainMap,
    pub other_scope_instances: Vec<Instance>,
    pub other_scope_declarations: Vec<Declaration>,
    pub reads: Vec<Access>,
    pub writes: Vec<Access>,
    /// Local items in emission order, when header emission was deferred.
    pub deferred: Vec<CodeItem>,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn generate(
    program: &Program,
    templates: &dyn Templates,
    options: &GeneratorOptions,
) -> GenerateResult {
    let options = options.with_system(program.system());
    let mut gen = Generator::new(&program.nodes, templates, options);
    let outcome = gen.run(&program.nodes);
    let mut diagnostics = gen.into_warnings();
    match outcome {
        Ok(out) => GenerateResult {
            generated: Some(GeneratedProgram {
                domains: out.domain_code,
                global_groups: out.global_groups,
            }),
            diagnostics,
        },
        Err(err) => {
            diagnostics.push(err);
            GenerateResult {
                generated: None,
                diagnostics,
            }
        }
    }
}

// ── Generator context ───────────────────────────────────────────────────────

/// Ambient domain and rate of the body being generated.
#[derive(Debug, Clone)]
struct Frame {
    domain: String,
    rate: Option<f64>,
}

/// Stream neighbours seen by the member being built.
#[derive(Debug, Clone, Default)]
struct Link {
    has_input: bool,
    has_output: bool,
    next_is_list: bool,
    previous: Option<PortBinding>,
    next: Option<PortBinding>,
}

impl Link {
    /// Operands, indices and port bindings stand outside the stream flow.
    fn detached() -> Self {
        Link::default()
    }
}

/// Items and side products collected from atoms evaluated outside a
/// stream, such as port bindings.
#[derive(Debug, Default)]
struct Harvest {
    declarations: Vec<Declaration>,
    instances: Vec<Instance>,
    once: Vec<OnceCode>,
    groups: GlobalGroups,
    reads: Vec<Access>,
    writes: Vec<Access>,
}

impl Harvest {
    fn take(&mut self, atom: &Atom, domain: &str) {
        self.declarations.extend(atom.declarations());
        self.instances.extend(atom.instances());
        self.once.extend(atom.once_codes());
        self.groups.merge(atom.global_groups());
        let (reads, writes) = atom.accesses(domain);
        for r in reads {
            push_access(&mut self.reads, r);
        }
        for w in writes {
            push_access(&mut self.writes, w);
        }
    }
}

/// A property port bound at a call site.
#[derive(Debug)]
struct BoundProperty {
    port: PortDecl,
    domain: String,
    /// Code computing the value, for the binding's domain.
    code: String,
    token: String,
    /// Literal or constant: set once at initialization.
    at_init: bool,
}

/// One generated stream before it is merged into its scope.
#[derive(Debug, Default)]
struct StreamOutput {
    items: Vec<CodeItem>,
    domain_code: DomainMap,
    reads: Vec<Access>,
    writes: Vec<Access>,
    groups: GlobalGroups,
}

pub struct Generator<'a> {
    templates: &'a dyn Templates,
    options: GeneratorOptions,
    scopes: ScopeStack,
    names: NameAllocator,
    emitted: HashSet<(OnceKind, String)>,
    frames: Vec<Frame>,
    /// Callable blocks whose bodies are being generated, outermost first.
    active: Vec<String>,
    warnings: Vec<Diagnostic>,
}

impl<'a> Generator<'a> {
    pub fn new(root: &[Node], templates: &'a dyn Templates, options: GeneratorOptions) -> Self {
        let scopes = ScopeStack::new(root, options.namespaces());
        Generator {
            templates,
            options,
            scopes,
            names: NameAllocator::new(),
            emitted: HashSet::new(),
            frames: Vec::new(),
            active: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<Diagnostic> {
        self.warnings
    }

    /// Generate the program root.
    pub fn run(&mut self, nodes: &[Node]) -> Result<ScopeOutput, Diagnostic> {
        self.frames.push(Frame {
            domain: self.options.default_domain.clone(),
            rate: self.options.default_rate,
        });
        let result = self.generate_code(nodes, nodes, &[], None, false);
        self.frames.pop();
        result
    }

    /// Generate every stream of `tree` inside a new scope holding `scope`.
    /// Instances named in `instanced` are provided by the caller and are
    /// not emitted. With `defer_header` local items are returned in
    /// `deferred` instead of being rendered into domain headers.
    pub fn generate_code(
        &mut self,
        tree: &[Node],
        scope: &[Node],
        instanced: &[String],
        parent: Option<ParentFrame>,
        defer_header: bool,
    ) -> Result<ScopeOutput, Diagnostic> {
        self.scopes.push_scope(scope, parent);
        let result = self.generate_scope(tree, instanced, defer_header);
        let popped = self.scopes.pop_scope();
        let output = result?;
        popped?;
        Ok(output)
    }

    fn ambient_domain(&self) -> String {
        self.frames
            .last()
            .map(|f| f.domain.clone())
            .unwrap_or_else(|| self.options.default_domain.clone())
    }

    fn default_rate(&self, domain: &str) -> Option<f64> {
        if let Some(frame) = self.frames.last() {
            if frame.domain == domain && frame.rate.is_some() {
                return frame.rate;
            }
        }
        self.scopes.domain_rate(domain).or_else(|| {
            if domain == self.options.default_domain {
                self.options.default_rate
            } else {
                None
            }
        })
    }

    fn warn(&mut self, diag: Diagnostic) {
        log::warn!("{}", diag);
        self.warnings.push(diag);
    }

    // ── Scope ───────────────────────────────────────────────────────────

    fn generate_scope(
        &mut self,
        tree: &[Node],
        instanced: &[String],
        defer_header: bool,
    ) -> Result<ScopeOutput, Diagnostic> {
        let t = self.templates;
        let depth = self.scopes.depth();
        let mut output = ScopeOutput::default();
        let mut items = Vec::new();
        let mut stream_code = DomainMap::new();

        for node in tree {
            if let Node::Stream(stream) = node {
                let s = self.generate_stream(stream)?;
                items.extend(s.items);
                merge_domain_maps(&mut stream_code, s.domain_code);
                for r in s.reads {
                    push_access(&mut output.reads, r);
                }
                for w in s.writes {
                    push_access(&mut output.writes, w);
                }
                output.global_groups.merge(s.groups);
            }
        }

        let sorted = order_items(items, depth)?;
        let ambient = self.ambient_domain();
        for item in sorted.local {
            if let CodeItem::Instance(inst) = &item {
                if instanced.contains(&inst.name) {
                    continue;
                }
            }
            if defer_header {
                output.deferred.push(item);
                continue;
            }
            let domain = item.domain().unwrap_or(ambient.as_str()).to_string();
            let bucket = output.domain_code.entry(domain).or_default();
            match &item {
                CodeItem::Declaration(d) => {
                    bucket.header_code.push_str(&d.code);
                    bucket.init_code.push_str(&d.init_code);
                }
                CodeItem::Instance(i) => bucket.header_code.push_str(&i.render(t)),
            }
        }
        for item in sorted.escaped {
            match item {
                CodeItem::Declaration(d) => output.other_scope_declarations.push(d),
                CodeItem::Instance(i) => output.other_scope_instances.push(i),
            }
        }
        merge_domain_maps(&mut output.domain_code, stream_code);

        for r in &output.reads {
            let bucket = output.domain_code.entry(r.domain.clone()).or_default();
            push_unique(&mut bucket.inputs, r.name.clone());
        }
        for w in &output.writes {
            let bucket = output.domain_code.entry(w.domain.clone()).or_default();
            push_unique(&mut bucket.outputs, w.name.clone());
        }
        log::debug!(
            "scope depth {}: {} escaped declaration(s), {} escaped instance(s)",
            depth,
            output.other_scope_declarations.len(),
            output.other_scope_instances.len()
        );
        Ok(output)
    }

    // ── Streams ─────────────────────────────────────────────────────────

    fn generate_stream(&mut self, stream: &StreamNode) -> Result<StreamOutput, Diagnostic> {
        let t = self.templates;
        let members = &stream.members;
        let n = members.len();
        let infos: Vec<PortBinding> = members.iter().map(|m| self.member_info(m)).collect();

        let mut atoms = Vec::with_capacity(n);
        for (i, member) in members.iter().enumerate() {
            let link = Link {
                has_input: i > 0,
                has_output: i + 1 < n,
                next_is_list: matches!(members.get(i + 1), Some(Member::List(_))),
                previous: i.checked_sub(1).map(|p| infos[p].clone()),
                next: infos.get(i + 1).cloned(),
            };
            atoms.push(self.build_atom(member, &link)?);
        }

        // Domain each atom executes in: its own, else the flow's so far.
        let mut flow = atoms
            .iter()
            .find_map(|a| a.domain())
            .map(String::from)
            .unwrap_or_else(|| self.ambient_domain());
        let mut domains = Vec::with_capacity(n);
        for atom in &atoms {
            if let Some(d) = atom.domain() {
                flow = d.to_string();
            }
            domains.push(flow.clone());
        }

        // Boundaries force materialization on both sides.
        let mut tracker = RateTracker::new();
        let mut transitions: Vec<Option<Transition>> = vec![None; n];
        for i in 0..n {
            let domain = &domains[i];
            tracker.seed(domain, self.default_rate(domain));
            if i > 0 && domains[i - 1] != *domain {
                atoms[i - 1].set_inline(false);
            }
            if let Some(tr) = tracker.advance(domain, atoms[i].rate()) {
                if i > 0 {
                    atoms[i - 1].set_inline(false);
                }
                atoms[i].set_inline(false);
                transitions[i] = Some(tr);
            }
        }

        let depth = self.scopes.depth();
        let mut out = StreamOutput::default();
        let mut mux = RateMultiplexer::new();
        let mut previous: Option<(Fragments, String)> = None;
        for (i, atom) in atoms.iter().enumerate() {
            let domain = &domains[i];
            if let Some(tr) = &transitions[i] {
                let counter = self.names.counter(domain);
                out.items.push(CodeItem::Declaration(
                    tr.counter_declaration(t, &counter, depth),
                ));
                mux.open(tr, counter);
            }

            let in_tokens: Vec<String> = match &previous {
                None => Vec::new(),
                Some((frags, prev_domain)) => match frags.tokens(domain).filter(|ts| !ts.is_empty()) {
                    Some(ts) => ts.to_vec(),
                    None => {
                        let ts = frags
                            .tokens(prev_domain)
                            .map(<[String]>::to_vec)
                            .unwrap_or_default();
                        if prev_domain != domain && !ts.is_empty() && !atoms[i - 1].is_bridge() {
                            self.warn(
                                Diagnostic::warning(
                                    codes::W0303,
                                    atom.location().clone(),
                                    format!(
                                        "stream flows from {} into {} without a signal bridge; reading {} directly",
                                        prev_domain,
                                        domain,
                                        ts.join(", ")
                                    ),
                                )
                                .with_hint("insert a signalbridge between the two domains"),
                            );
                        }
                        ts
                    }
                },
            };
            let frags = atom.processing_code(t, &in_tokens, domain);
            for (d, frag) in &frags.by_domain {
                mux.emit(d, &frag.code);
            }

            for decl in atom.declarations() {
                let mut item = CodeItem::Declaration(decl);
                item.set_domain_if_unset(domain);
                out.items.push(item);
            }
            for inst in atom.instances() {
                let mut item = CodeItem::Instance(inst);
                item.set_domain_if_unset(domain);
                out.items.push(item);
            }
            for code in atom.once_codes() {
                self.claim_once(code, domain, &mut out.domain_code);
            }
            out.groups.merge(atom.global_groups());
            let (reads, writes) = atom.accesses(domain);
            for r in reads {
                push_access(&mut out.reads, r);
            }
            for w in writes {
                push_access(&mut out.writes, w);
            }
            previous = Some((frags, domain.clone()));
        }

        for (domain, code) in mux.finish(t) {
            if !code.is_empty() {
                out.domain_code
                    .entry(domain)
                    .or_default()
                    .processing_code
                    .push(code);
            }
        }
        log::debug!(
            "stream at {}: {} atom(s) across {:?}",
            stream.location(),
            n,
            out.domain_code.keys().collect::<Vec<_>>()
        );
        Ok(out)
    }

    /// Emit once-keyed code the first time its key is seen.
    fn claim_once(&mut self, code: OnceCode, domain: &str, into: &mut DomainMap) {
        if !self.emitted.insert((code.kind, code.key.clone())) {
            return;
        }
        let target = code.domain.unwrap_or_else(|| domain.to_string());
        let bucket = into.entry(target).or_default();
        match code.kind {
            OnceKind::Initialization => bucket.init_code.push_str(&code.code),
            OnceKind::Preprocessing => bucket.preprocessing_code.push_str(&code.code),
            OnceKind::Postprocessing => bucket.postprocessing_code.push_str(&code.code),
        }
    }

    /// Rate, size and domain of a member, without building it.
    fn member_info(&self, member: &Member) -> PortBinding {
        let from_block = |name: &str, size: Option<usize>| -> PortBinding {
            self.scopes
                .find_declaration(name)
                .map(|r| PortBinding {
                    rate: r.block.rate,
                    size: size.or_else(|| r.bundle_size()),
                    domain: storage_domain(&r.block),
                })
                .unwrap_or_default()
        };
        match member {
            Member::Name(n) => from_block(&n.name, None),
            Member::Bundle(b) => from_block(&b.name, Some(1)),
            Member::Function(f) => {
                let mut info = from_block(&f.name, None);
                info.size = None;
                info
            }
            Member::Expression(e) => e
                .left
                .as_ref()
                .or(e.value.as_ref())
                .map(|m| self.member_info(m))
                .unwrap_or_default(),
            Member::List(ms) => {
                let first = ms.first().map(|m| self.member_info(m)).unwrap_or_default();
                PortBinding {
                    size: Some(ms.len()),
                    ..first
                }
            }
            Member::Value(_) | Member::PortProperty(_) => PortBinding::default(),
        }
    }

    // ── Atom construction ───────────────────────────────────────────────

    fn build_atom(&mut self, member: &Member, link: &Link) -> Result<Atom, Diagnostic> {
        let location = member.location();
        match member {
            Member::Value(lit) => Ok(self.value_atom(lit, location)),
            Member::Name(n) => {
                let resolved = self.scopes.resolve(&n.name, &location)?;
                self.block_atom(resolved, None, link, location)
            }
            Member::Function(f) => {
                let resolved = self.scopes.resolve(&f.name, &location)?;
                self.block_atom(resolved, Some(f), link, location)
            }
            Member::Bundle(b) => self.bundle_atom(b, link, location),
            Member::Expression(e) => self.expression_atom(e, location),
            Member::List(ms) => self.list_atom(ms, link, location),
            Member::PortProperty(p) => self.port_property_atom(p, location),
        }
    }

    fn block_atom(
        &mut self,
        resolved: Resolved,
        call: Option<&FunctionCall>,
        link: &Link,
        location: Location,
    ) -> Result<Atom, Diagnostic> {
        let kind = resolved.block.kind;
        match kind {
            BlockKind::Module => self.module_atom(resolved, call, link, location),
            BlockKind::Reaction => self.reaction_atom(resolved, call, link, location, false),
            BlockKind::Loop => self.reaction_atom(resolved, call, link, location, true),
            BlockKind::PlatformType => self.platform_type_atom(resolved, call, link, location),
            _ if kind.is_storage() && call.is_none() => self.name_atom(resolved, link, location),
            _ => Err(Diagnostic::error(
                codes::E0400,
                location,
                format!(
                    "block '{}' of kind '{}' cannot appear here in a stream",
                    resolved.block.name, kind
                ),
            )),
        }
    }

    fn value_atom(&mut self, lit: &Literal, location: Location) -> Atom {
        let t = self.templates;
        let value_type = lit.value_type();
        let temp = Instance::scalar(
            self.names.temporary("val"),
            self.scopes.depth(),
            None,
            value_type,
            t.zero(value_type),
        );
        Atom::Value(ValueAtom {
            info: AtomInfo::new(RATE_DATALESS, None, true, location),
            literal: lit.clone(),
            temp,
        })
    }

    /// Storage description of a declared block, with its type and default
    /// resolved through any platform type it names.
    fn storage(&self, resolved: &Resolved) -> Result<Storage, Diagnostic> {
        let t = self.templates;
        let block = &resolved.block;
        let value_type = block.value_type();
        let mut ctype = None;
        let mut platform_default = None;
        let mut platform = None;
        if let Some(pt) = &block.platform_type {
            let p = self.platform_block(pt, &block.location())?;
            ctype = p.block.type_name.clone();
            platform_default = p.block.initial_value().cloned();
            platform = platform_declaration(&p);
        }
        let initial = block
            .initial_value()
            .or(platform_default.as_ref())
            .map(|lit| t.literal(lit))
            .unwrap_or_else(|| t.zero(value_type));
        Ok(Storage {
            name: block.name.clone(),
            stack_index: resolved.stack_index,
            domain: storage_domain(block),
            value_type,
            size: resolved.bundle_size(),
            ctype,
            initial,
            platform,
            location: block.location(),
        })
    }

    fn platform_block(&self, name: &str, location: &Location) -> Result<Resolved, Diagnostic> {
        match self.scopes.find_declaration(name) {
            Some(r) if r.block.kind == BlockKind::PlatformType => Ok(r),
            _ => Err(Diagnostic::error(
                codes::E0102,
                location.clone(),
                format!("platform type '{}' not found", name),
            )
            .with_hint("check the active platform namespace")),
        }
    }

    fn name_atom(&mut self, resolved: Resolved, link: &Link, location: Location) -> Result<Atom, Diagnostic> {
        let storage = self.storage(&resolved)?;
        let block = &resolved.block;
        let bridge = match (block.kind, &block.input_domain, &block.output_domain) {
            (BlockKind::SignalBridge, Some(input), Some(output)) => Some(Bridge {
                input_domain: input.clone(),
                output_domain: output.clone(),
            }),
            _ => None,
        };
        let domain = match &bridge {
            // Written at the end of a stream: still in the writer's domain.
            Some(b) if link.has_input && !link.has_output => Some(b.input_domain.clone()),
            Some(b) => Some(b.output_domain.clone()),
            None => block.domain.clone(),
        };
        Ok(Atom::Name(NameAtom {
            info: AtomInfo::new(block.rate.unwrap_or(RATE_INHERIT), domain, true, location),
            storage,
            has_input: link.has_input,
            bridge,
        }))
    }

    fn bundle_atom(&mut self, b: &BundleRef, link: &Link, location: Location) -> Result<Atom, Diagnostic> {
        let resolved = self.scopes.resolve(&b.name, &location)?;
        let storage = self.storage(&resolved)?;
        let size = storage.size.ok_or_else(|| {
            Diagnostic::error(
                codes::E0202,
                location.clone(),
                format!("'{}' is indexed but is not a bundle", b.name),
            )
        })?;
        let index = match b.index.as_ref() {
            Member::Value(Literal::Number(n)) => {
                let one_based = *n as usize;
                if n.fract() != 0.0 || *n < 1.0 || one_based > size {
                    return Err(Diagnostic::error(
                        codes::E0202,
                        location,
                        format!("index {} out of range for bundle '{}' of size {}", n, b.name, size),
                    ));
                }
                BundleIndex::Static(one_based - 1)
            }
            other => BundleIndex::Dynamic(Box::new(self.build_atom(other, &Link::detached())?)),
        };
        let block = &resolved.block;
        Ok(Atom::Bundle(BundleAtom {
            info: AtomInfo::new(
                block.rate.unwrap_or(RATE_INHERIT),
                block.domain.clone(),
                true,
                location,
            ),
            storage,
            index,
            has_input: link.has_input,
        }))
    }

    fn expression_atom(&mut self, e: &Expression, location: Location) -> Result<Atom, Diagnostic> {
        let t = self.templates;
        let members: Vec<&Member> = if e.op.is_unary() {
            e.value.iter().chain(e.left.iter()).take(1).collect()
        } else {
            e.left.iter().chain(e.right.iter()).collect()
        };
        let expected = if e.op.is_unary() { 1 } else { 2 };
        if members.len() != expected {
            return Err(Diagnostic::error(
                codes::E0401,
                location,
                format!(
                    "operator {:?} expects {} operand(s), found {}",
                    e.op,
                    expected,
                    members.len()
                ),
            ));
        }
        let mut operands = Vec::with_capacity(members.len());
        for m in members {
            operands.push(self.build_atom(m, &Link::detached())?);
        }

        let domains: Vec<&str> = operands.iter().filter_map(Atom::domain).collect();
        if let [first, second, ..] = domains.as_slice() {
            if first != second {
                self.warn(
                    Diagnostic::warning(
                        codes::W0300,
                        location.clone(),
                        format!(
                            "operands of {:?} are in different domains ({} and {}); using {}",
                            e.op, first, second, first
                        ),
                    )
                    .with_hint("route one operand through a signal bridge"),
                );
            }
        }
        let domain = domains.first().map(|d| d.to_string());
        let rate = operands
            .iter()
            .map(Atom::rate)
            .find(|r| *r > 0.0)
            .unwrap_or(if operands.iter().all(|o| o.rate() == RATE_DATALESS) {
                RATE_DATALESS
            } else {
                RATE_INHERIT
            });
        let inline = operands.iter().all(|o| {
            o.is_inline() && !matches!(o, Atom::Module(_) | Atom::Reaction(_) | Atom::Loop(_))
        });
        let value_type = if e.op.is_boolean() {
            crate::ast::ValueType::Bool
        } else {
            crate::ast::ValueType::Real
        };
        let temp = Instance::scalar(
            self.names.temporary("expr"),
            self.scopes.depth(),
            domain.clone(),
            value_type,
            t.zero(value_type),
        );
        Ok(Atom::Expression(ExpressionAtom {
            info: AtomInfo::new(rate, domain, inline, location),
            op: e.op,
            operands,
            temp,
        }))
    }

    fn list_atom(&mut self, members: &[Member], link: &Link, location: Location) -> Result<Atom, Diagnostic> {
        let member_link = Link {
            has_input: link.has_input,
            has_output: link.has_output,
            ..Link::default()
        };
        let mut atoms = Vec::with_capacity(members.len());
        for m in members {
            atoms.push(self.build_atom(m, &member_link)?);
        }
        let rate = atoms
            .iter()
            .map(Atom::rate)
            .find(|r| *r > 0.0)
            .unwrap_or(RATE_INHERIT);
        let domain = atoms.iter().find_map(Atom::domain).map(String::from);
        let inline = atoms.iter().all(Atom::is_inline);
        Ok(Atom::List(ListAtom {
            info: AtomInfo::new(rate, domain, inline, location),
            members: atoms,
        }))
    }

    fn port_property_atom(&mut self, p: &PortPropertyRef, location: Location) -> Result<Atom, Diagnostic> {
        let value = self
            .scopes
            .find_port_property(&p.portname, &p.name)
            .ok_or_else(|| {
                Diagnostic::error(
                    codes::E0101,
                    location.clone(),
                    format!(
                        "property '{}' of port '{}' is not bound by any enclosing call",
                        p.name, p.portname
                    ),
                )
                .with_hint(match self.scopes.current_callee() {
                    Some(callee) => format!("innermost call site is '{}'", callee),
                    None => "port properties are only available inside a body".to_string(),
                })
            })?;
        Ok(Atom::PortProperty(PortPropertyAtom {
            info: AtomInfo::new(RATE_DATALESS, None, true, location),
            port: p.portname.clone(),
            property: p.name.clone(),
            value,
        }))
    }

    fn platform_type_atom(
        &mut self,
        resolved: Resolved,
        call: Option<&FunctionCall>,
        link: &Link,
        location: Location,
    ) -> Result<Atom, Diagnostic> {
        let t = self.templates;
        let block = Rc::clone(&resolved.block);
        let ambient = self.ambient_domain();
        let domain = block.domain.clone().unwrap_or_else(|| ambient.clone());

        let mut harvest = Harvest::default();
        let mut prelude = Fragments::default();
        let mut bindings = Vec::new();
        if let Some(call) = call {
            for (port, member) in &call.ports {
                let atom = self.build_atom(member, &Link::detached())?;
                let d = atom.domain().unwrap_or(domain.as_str()).to_string();
                let frags = atom.processing_code(t, &[], &d);
                let token = first_token(&frags, &d);
                for (fd, frag) in &frags.by_domain {
                    prelude.append_code(fd, &frag.code);
                }
                harvest.take(&atom, &d);
                bindings.push((port.clone(), token));
            }
        }

        let mut declarations = platform_declaration(&resolved).into_iter().collect::<Vec<_>>();
        declarations.extend(harvest.declarations);

        let mut once = harvest.once;
        let key = block.name.clone();
        let mut groups = harvest.groups;
        if !block.initializations.is_empty() {
            match &block.domain {
                Some(d) => once.push(OnceCode {
                    kind: OnceKind::Initialization,
                    key: key.clone(),
                    domain: Some(d.clone()),
                    code: lines(&block.initializations),
                }),
                None => {
                    for init in &block.initializations {
                        push_unique(&mut groups.initializations, init.clone());
                    }
                }
            }
        }
        if !block.preprocessing.is_empty() {
            once.push(OnceCode {
                kind: OnceKind::Preprocessing,
                key: key.clone(),
                domain: block.domain.clone(),
                code: lines(&block.preprocessing),
            });
        }
        if !block.postprocessing.is_empty() {
            once.push(OnceCode {
                kind: OnceKind::Postprocessing,
                key,
                domain: block.domain.clone(),
                code: lines(&block.postprocessing),
            });
        }
        groups.merge(GlobalGroups {
            include: block.includes.clone(),
            include_dir: block.include_dirs.clone(),
            initializations: Vec::new(),
            link_to: block.link_to.clone(),
            link_dir: block.link_dirs.clone(),
        });

        let temp = block.read.as_ref().map(|_| {
            let value_type = block.value_type();
            let mut i = Instance::scalar(
                self.names.temporary("pt"),
                self.scopes.depth(),
                block.domain.clone(),
                value_type,
                block
                    .initial_value()
                    .map(|l| t.literal(l))
                    .unwrap_or_else(|| t.zero(value_type)),
            );
            i.ctype = block.type_name.clone();
            i
        });

        Ok(Atom::PlatformType(PlatformTypeAtom {
            info: AtomInfo::new(
                block.rate.unwrap_or(RATE_INHERIT),
                block.domain.clone(),
                true,
                location,
            ),
            name: block.name.clone(),
            write: block.write.clone(),
            read: block.read.clone(),
            declarations,
            instances: harvest.instances,
            once,
            groups,
            bindings,
            prelude,
            reads: harvest.reads,
            has_input: link.has_input,
            temp,
        }))
    }

    // ── Calls: shared pieces ────────────────────────────────────────────

    /// Internal block backing a port of a callable block.
    fn port_block(&self, block: &Block, port: &PortDecl) -> Result<Rc<Block>, Diagnostic> {
        block
            .blocks
            .iter()
            .find_map(|n| match n {
                Node::Block(b) | Node::BlockBundle(b) if b.name == port.block_name() => {
                    Some(Rc::clone(b))
                }
                _ => None,
            })
            .ok_or_else(|| {
                Diagnostic::error(
                    codes::E0103,
                    block.location(),
                    format!(
                        "'{}' has no internal block '{}' for port '{}'",
                        block.name,
                        port.block_name(),
                        port.name
                    ),
                )
            })
    }

    /// Target spelling of a block's storage type.
    fn storage_type(&self, block: &Block) -> String {
        block
            .platform_type
            .as_deref()
            .and_then(|pt| self.scopes.find_declaration(pt))
            .and_then(|r| r.block.type_name.clone())
            .unwrap_or_else(|| self.templates.scalar_type(block.value_type()).to_string())
    }

    /// Rendered default of a port: port default, block default, platform
    /// default, zero.
    fn port_default(&self, port: &PortDecl, internal: &Block) -> String {
        let t = self.templates;
        if let Some(lit) = port.default.as_ref().or(internal.initial_value()) {
            return t.literal(lit);
        }
        internal
            .platform_type
            .as_deref()
            .and_then(|pt| self.scopes.find_declaration(pt))
            .and_then(|r| r.block.initial_value().map(|l| t.literal(l)))
            .unwrap_or_else(|| t.zero(internal.value_type()))
    }

    /// Evaluate the property bindings of a call site in the caller's scope.
    fn bind_properties(
        &mut self,
        block: &Block,
        call: Option<&FunctionCall>,
        primary: &str,
    ) -> Result<(Vec<BoundProperty>, Harvest), Diagnostic> {
        let t = self.templates;
        let mut bound = Vec::new();
        let mut harvest = Harvest::default();
        let Some(call) = call else {
            return Ok((bound, harvest));
        };
        for (name, member) in &call.ports {
            let location = member.location();
            let port = block.port(name).ok_or_else(|| {
                Diagnostic::error(
                    codes::E0103,
                    location.clone(),
                    format!("'{}' has no port '{}'", block.name, name),
                )
            })?;
            if port.direction != PortDirection::Property {
                return Err(Diagnostic::error(
                    codes::E0103,
                    location,
                    format!("port '{}' of '{}' is not a property", name, block.name),
                )
                .with_hint("main input and output are bound by the stream"));
            }
            let at_init = match member {
                Member::Value(_) => true,
                Member::Name(n) => self
                    .scopes
                    .find_declaration(&n.name)
                    .map_or(false, |r| r.block.kind == BlockKind::Constant),
                _ => false,
            };
            let atom = self.build_atom(member, &Link::detached())?;
            let domain = atom.domain().unwrap_or(primary).to_string();
            let frags = atom.processing_code(t, &[], &domain);
            harvest.take(&atom, &domain);
            bound.push(BoundProperty {
                port: port.clone(),
                token: first_token(&frags, &domain),
                code: frags.code(&domain).to_string(),
                domain,
                at_init,
            });
        }
        Ok((bound, harvest))
    }

    /// Call-site frame seen by the callee body for port-property lookup.
    fn parent_frame(&self, block: &Block, link: &Link, bound: &[BoundProperty]) -> ParentFrame {
        let mut frame = ParentFrame {
            callee: block.name.clone(),
            ports: BTreeMap::new(),
        };
        if let Some(p) = block.main_input() {
            frame
                .ports
                .insert(p.name.clone(), link.previous.clone().unwrap_or_default());
        }
        if let Some(p) = block.main_output() {
            frame
                .ports
                .insert(p.name.clone(), link.next.clone().unwrap_or_default());
        }
        for b in bound {
            frame.ports.insert(
                b.port.name.clone(),
                PortBinding {
                    rate: None,
                    size: None,
                    domain: Some(b.domain.clone()),
                },
            );
        }
        frame
    }

    fn generate_body(
        &mut self,
        block: &Block,
        domain: &str,
        frame: ParentFrame,
        instanced: &[String],
        defer_header: bool,
    ) -> Result<ScopeOutput, Diagnostic> {
        if let Some(start) = self.active.iter().position(|n| *n == block.name) {
            let mut diag = Diagnostic::error(
                codes::E0200,
                block.location(),
                format!(
                    "'{}' instantiates itself through {} call(s)",
                    block.name,
                    self.active.len() - start
                ),
            )
            .with_hint("a module, reaction or loop body cannot call its own block");
            for name in &self.active[start..] {
                diag = diag.with_related(name.clone());
            }
            return Err(diag);
        }
        log::debug!("generating body of '{}' in {}", block.name, domain);
        self.active.push(block.name.clone());
        self.frames.push(Frame {
            domain: domain.to_string(),
            rate: block.rate.filter(|r| *r > 0.0),
        });
        let result = self.generate_code(&block.streams, &block.blocks, instanced, Some(frame), defer_header);
        self.frames.pop();
        self.active.pop();
        result
    }

    fn output_instance(
        &self,
        block: &Block,
        instance_name: &str,
        domain: &str,
        location: &Location,
    ) -> Result<Option<(Instance, String)>, Diagnostic> {
        let t = self.templates;
        let Some(port) = block.main_output() else {
            return Ok(None);
        };
        let internal = self.port_block(block, port)?;
        let value_type = internal.value_type();
        let mut out = Instance::scalar(
            format!("{}_out", instance_name),
            self.scopes.depth(),
            Some(domain.to_string()),
            value_type,
            t.zero(value_type),
        );
        out.ctype = Some(self.storage_type(&internal));
        out.location = location.clone();
        Ok(Some((out, internal.name.clone())))
    }

    fn input_param(&self, block: &Block) -> Result<Option<(Param, String)>, Diagnostic> {
        let Some(port) = block.main_input() else {
            return Ok(None);
        };
        let internal = self.port_block(block, port)?;
        let param = Param::value(self.storage_type(&internal), internal.name.clone())
            .with_array_size(internal.size);
        Ok(Some((param, self.port_default(port, &internal))))
    }

    // ── Modules ─────────────────────────────────────────────────────────

    fn module_atom(
        &mut self,
        resolved: Resolved,
        call: Option<&FunctionCall>,
        link: &Link,
        location: Location,
    ) -> Result<Atom, Diagnostic> {
        let t = self.templates;
        let block = Rc::clone(&resolved.block);
        let depth = self.scopes.depth();
        let primary = block.domain.clone().unwrap_or_else(|| self.ambient_domain());
        let instance_name = self.names.instance(&block.name);
        let type_name = format!("{}_Module", block.name);

        let (bound, mut harvest) = self.bind_properties(&block, call, &primary)?;
        let frame = self.parent_frame(&block, link, &bound);
        let body = self.generate_body(&block, &primary, frame, &instanced_blocks(&block), false)?;
        let (reads, writes) = escaping_accesses(&body, depth, harvest.reads, harvest.writes);

        // Struct.
        let references: Vec<Param> = body
            .other_scope_instances
            .iter()
            .filter(|i| !i.is_module())
            .map(|i| reference_param(t, i))
            .collect();
        let mut properties = Vec::new();
        for port in block.properties() {
            let internal = self.port_block(&block, port)?;
            properties.push(PropertyMember {
                ctype: self.storage_type(&internal),
                name: internal.name.clone(),
                initial: self.port_default(port, &internal),
            });
        }
        let input = self.input_param(&block)?;
        let output = self.output_instance(&block, &instance_name, &primary, &location)?;

        let mut members = String::new();
        let mut constructor_body = String::new();
        for code in body.domain_code.values() {
            members.push_str(&code.header_code);
            constructor_body.push_str(&code.init_code);
        }
        let mut methods = vec![FunctionDef {
            name: "process".to_string(),
            return_type: output.as_ref().and_then(|(o, _)| o.ctype.clone()),
            params: input.iter().map(|(p, _)| p.clone()).collect(),
            body: {
                let mut text = body
                    .domain_code
                    .get(&primary)
                    .map(cycle_text)
                    .unwrap_or_default();
                if let Some((_, internal)) = &output {
                    text.push_str(&t.return_statement(internal));
                }
                text
            },
        }];
        let mut other_domains = Vec::new();
        for (domain, code) in &body.domain_code {
            if *domain == primary || code.processing_code.iter().all(String::is_empty) {
                continue;
            }
            let method = format!("process_{}", domain);
            other_domains.push((
                domain.clone(),
                t.statement(&t.member_call(&instance_name, &method, &[])),
            ));
            methods.push(FunctionDef {
                name: method,
                return_type: None,
                params: Vec::new(),
                body: cycle_text(code),
            });
        }
        let strukt = ModuleStruct {
            type_name: type_name.clone(),
            references: references.clone(),
            properties,
            members,
            constructor_body,
            methods,
        };
        let mut struct_decl = Declaration::new(
            type_name.clone(),
            resolved.stack_index,
            Some(primary.clone()),
            t.module_declaration(&strukt),
        );
        struct_decl.location = block.location();

        // Call-site instance.
        let instance = Instance {
            name: instance_name.clone(),
            stack_index: depth,
            domain: Some(primary.clone()),
            kind: InstanceKind::Module {
                type_name: type_name.clone(),
                constants: references.iter().map(|r| r.name.clone()).collect(),
            },
            ctype: None,
            initial: Vec::new(),
            dependents: Vec::new(),
            location: location.clone(),
        };
        let bare_struct = struct_decl.clone();
        struct_decl
            .dependents
            .push(CodeItem::Instance(instance.clone()));

        let mut declarations = vec![struct_decl];
        for mut d in body.other_scope_declarations {
            d.domain.get_or_insert_with(|| primary.clone());
            d.dependents.push(CodeItem::Declaration(bare_struct.clone()));
            declarations.push(d);
        }
        declarations.append(&mut harvest.declarations);
        let mut instances = vec![instance.clone()];
        for mut i in body.other_scope_instances {
            i.domain.get_or_insert_with(|| primary.clone());
            i.dependents.push(CodeItem::Instance(instance.clone()));
            instances.push(i);
        }
        instances.append(&mut harvest.instances);

        // Property setters.
        let mut prelude = Fragments::default();
        let mut once = harvest.once;
        for b in &bound {
            let setter = t.member_call(
                &instance_name,
                &t.setter_name(b.port.block_name()),
                std::slice::from_ref(&b.token),
            );
            if b.at_init {
                once.push(OnceCode {
                    kind: OnceKind::Initialization,
                    key: format!("{}.{}", instance_name, b.port.name),
                    domain: Some(primary.clone()),
                    code: t.statement(&setter),
                });
            } else {
                prelude.append_code(&b.domain, &b.code);
                prelude.append_code(&b.domain, &t.statement(&setter));
            }
        }

        let mut groups = harvest.groups;
        groups.merge(body.global_groups);
        let inline = output.is_some() && link.has_output && !link.next_is_list;
        Ok(Atom::Module(ModuleAtom {
            info: AtomInfo::new(
                block.rate.unwrap_or(RATE_INHERIT),
                Some(primary.clone()),
                inline,
                location,
            ),
            call: CallSite {
                type_name,
                instance_name: instance_name.clone(),
                target: CallTarget::Method {
                    instance: instance_name,
                    method: "process".to_string(),
                },
                takes_input: input.is_some(),
                input_default: input.map(|(_, d)| d).unwrap_or_default(),
                args: Vec::new(),
                output: output.map(|(o, _)| o),
                declarations,
                instances,
                prelude,
                once,
                groups,
                reads,
                writes,
                other_domains,
            },
        }))
    }

    // ── Reactions and loops ─────────────────────────────────────────────

    fn reaction_atom(
        &mut self,
        resolved: Resolved,
        call: Option<&FunctionCall>,
        link: &Link,
        location: Location,
        looping: bool,
    ) -> Result<Atom, Diagnostic> {
        let t = self.templates;
        let block = Rc::clone(&resolved.block);
        let depth = self.scopes.depth();
        let primary = block.domain.clone().unwrap_or_else(|| self.ambient_domain());
        let instance_name = self.names.instance(&block.name);
        let function_name = format!(
            "{}_{}",
            block.name,
            if looping { "loop" } else { "reaction" }
        );

        let (bound, harvest) = self.bind_properties(&block, call, &primary)?;
        let frame = self.parent_frame(&block, link, &bound);
        let body = self.generate_body(&block, &primary, frame, &instanced_blocks(&block), true)?;
        let (reads, writes) = escaping_accesses(&body, depth, harvest.reads, harvest.writes);

        // Parameters: input, properties by value, externals by reference.
        let input = self.input_param(&block)?;
        let output = self.output_instance(&block, &instance_name, &primary, &location)?;
        let mut params: Vec<Param> = input.iter().map(|(p, _)| p.clone()).collect();
        let mut args = Vec::new();
        let mut prelude = Fragments::default();
        for port in block.properties() {
            let internal = self.port_block(&block, port)?;
            params.push(
                Param::value(self.storage_type(&internal), internal.name.clone())
                    .with_array_size(internal.size),
            );
            match bound.iter().find(|b| b.port.name == port.name) {
                Some(b) => {
                    prelude.append_code(&b.domain, &b.code);
                    args.push(b.token.clone());
                }
                None => args.push(self.port_default(port, &internal)),
            }
        }
        let body_depth = depth + 1;
        let mut externals: Vec<Access> = Vec::new();
        for a in body.reads.iter().chain(body.writes.iter()) {
            if a.stack_index < body_depth {
                push_access(&mut externals, a.clone());
            }
        }
        for ext in &externals {
            match body.other_scope_instances.iter().find(|i| i.name == ext.name) {
                Some(inst) => {
                    params.push(reference_param(t, inst));
                    args.push(ext.name.clone());
                }
                None => log::debug!("'{}' has no escaped instance; not passed", ext.name),
            }
        }

        // Body: locals, one-time code, cycle code.
        let mut locals = String::new();
        let mut local_names = Vec::new();
        let mut hoisted = Vec::new();
        for item in body.deferred {
            match item {
                CodeItem::Instance(i) => {
                    locals.push_str(&i.render(t));
                    local_names.push(i.name.clone());
                }
                CodeItem::Declaration(mut d) => {
                    d.stack_index = resolved.stack_index;
                    hoisted.push(d);
                }
            }
        }
        let flag = if looping {
            let flag = block.terminate_when.clone().ok_or_else(|| {
                Diagnostic::error(
                    codes::E0103,
                    block.location(),
                    format!("loop '{}' has no termination flag", block.name),
                )
                .with_hint("set 'terminateWhen' to a bool block of the loop")
            })?;
            if !local_names.contains(&flag) && !externals.iter().any(|e| e.name == flag) {
                if let Some(Node::Block(b)) = block
                    .blocks
                    .iter()
                    .find(|n| matches!(n, Node::Block(b) if b.name == flag))
                {
                    let zero = t.zero(b.value_type());
                    locals.push_str(&t.variable_declaration(
                        &self.storage_type(b),
                        &flag,
                        Some(zero.as_str()),
                    ));
                }
            }
            Some(flag)
        } else {
            None
        };

        let touched: Vec<&String> = body
            .domain_code
            .iter()
            .filter(|(_, c)| !c.processing_code.iter().all(String::is_empty))
            .map(|(d, _)| d)
            .collect();
        if touched.len() > 1 {
            let list = touched.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", ");
            self.warn(Diagnostic::warning(
                codes::W0301,
                location.clone(),
                format!(
                    "body of '{}' spans domains {}; generated as one function in {}",
                    block.name, list, primary
                ),
            ));
        }
        let mut init = String::new();
        let mut cycle = String::new();
        for code in body.domain_code.values() {
            init.push_str(&code.init_code);
            cycle.push_str(&cycle_text(code));
        }
        let mut text = locals;
        text.push_str(&init);
        match &flag {
            Some(flag) => text.push_str(&t.while_not(flag, &cycle)),
            None => text.push_str(&cycle),
        }
        if let Some((_, internal)) = &output {
            text.push_str(&t.return_statement(internal));
        }
        let def = FunctionDef {
            name: function_name.clone(),
            return_type: output.as_ref().and_then(|(o, _)| o.ctype.clone()),
            params,
            body: text,
        };
        let mut function_decl = Declaration::new(
            function_name.clone(),
            resolved.stack_index,
            Some(primary.clone()),
            t.function_definition(&def),
        );
        function_decl.location = block.location();

        let mut declarations = Vec::new();
        for mut d in hoisted.into_iter().chain(body.other_scope_declarations) {
            d.domain.get_or_insert_with(|| primary.clone());
            d.dependents.push(CodeItem::Declaration(function_decl.clone()));
            declarations.push(d);
        }
        declarations.insert(0, function_decl);
        declarations.extend(harvest.declarations);
        let mut instances = Vec::new();
        for mut i in body.other_scope_instances {
            i.domain.get_or_insert_with(|| primary.clone());
            instances.push(i);
        }
        instances.extend(harvest.instances);

        let mut groups = harvest.groups;
        groups.merge(body.global_groups);
        let call = CallSite {
            type_name: block.name.clone(),
            instance_name,
            target: CallTarget::Function(function_name),
            takes_input: input.is_some(),
            input_default: input.map(|(_, d)| d).unwrap_or_default(),
            args,
            output: output.map(|(o, _)| o),
            declarations,
            instances,
            prelude,
            once: harvest.once,
            groups,
            reads,
            writes,
            other_domains: Vec::new(),
        };
        let info = AtomInfo::new(
            block.rate.unwrap_or(RATE_INHERIT),
            Some(primary),
            false,
            location,
        );
        Ok(match flag {
            Some(terminate_when) => Atom::Loop(LoopAtom {
                info,
                call,
                terminate_when,
            }),
            None => Atom::Reaction(ReactionAtom { info, call }),
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Domain a storage block lives in. Bridges live where they are read.
fn storage_domain(block: &Block) -> Option<String> {
    match block.kind {
        BlockKind::SignalBridge => block.output_domain.clone().or_else(|| block.domain.clone()),
        _ => block.domain.clone(),
    }
}

/// Header declaration carried by a platform type block.
fn platform_declaration(resolved: &Resolved) -> Option<Declaration> {
    let block = &resolved.block;
    if block.declarations.is_empty() {
        return None;
    }
    let code = lines(&block.declarations);
    let mut decl = Declaration::new(
        block.name.clone(),
        resolved.stack_index,
        block.domain.clone(),
        code,
    );
    decl.location = block.location();
    Some(decl)
}

/// Internal blocks a call site provides: the main input and properties.
fn instanced_blocks(block: &Block) -> Vec<String> {
    block
        .ports
        .iter()
        .filter(|p| p.direction != PortDirection::Output)
        .map(|p| p.block_name().to_string())
        .collect()
}

fn reference_param(t: &dyn Templates, inst: &Instance) -> Param {
    let size = match inst.kind {
        InstanceKind::Bundle { size, .. } => Some(size),
        _ => None,
    };
    Param::reference(inst.type_name(t), inst.name.clone()).with_array_size(size)
}

fn first_token(frags: &Fragments, domain: &str) -> String {
    frags
        .tokens(domain)
        .and_then(|ts| ts.first())
        .cloned()
        .unwrap_or_default()
}

/// One cycle of a domain: preprocessing, processing, postprocessing.
fn cycle_text(code: &DomainCode) -> String {
    let mut text = code.preprocessing_code.clone();
    text.push_str(&code.processing_text());
    text.push_str(&code.postprocessing_code);
    text
}

/// Reads/writes of a body that refer to storage outside the call site's
/// body, merged with the call site's own binding accesses.
fn escaping_accesses(
    body: &ScopeOutput,
    depth: usize,
    mut reads: Vec<Access>,
    mut writes: Vec<Access>,
) -> (Vec<Access>, Vec<Access>) {
    for r in body.reads.iter().filter(|a| a.stack_index <= depth) {
        push_access(&mut reads, r.clone());
    }
    for w in body.writes.iter().filter(|a| a.stack_index <= depth) {
        push_access(&mut writes, w.clone());
    }
    (reads, writes)
}

fn lines(v: &[String]) -> String {
    v.iter().map(|l| format!("{}\n", l)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::load_program;
    use crate::templates::CppTemplates;

    fn run(json: &str) -> GenerateResult {
        let program = load_program(json).unwrap();
        generate(&program, &CppTemplates::new(), &GeneratorOptions::default())
    }

    fn domain<'a>(r: &'a GenerateResult, name: &str) -> &'a DomainCode {
        let generated = r.generated.as_ref().unwrap_or_else(|| panic!("{:?}", r.diagnostics));
        &generated.domains[name]
    }

    #[test]
    fn constant_flows_into_signal() {
        let r = run(r#"[
            {"block": {"name": "gain", "type": "constant", "default": 1.0}},
            {"block": {"name": "out", "type": "signal"}},
            {"stream": {"members": [{"name": {"name": "gain"}}, {"name": {"name": "out"}}]}}
        ]"#);
        let audio = domain(&r, "AudioDomain");
        assert_eq!(
            audio.header_code,
            "float gain = 1.00000000;\nfloat out = 0.00000000;\n"
        );
        assert_eq!(audio.processing_text(), "out = gain;\n");
        assert_eq!(audio.inputs, vec!["gain"]);
        assert_eq!(audio.outputs, vec!["out"]);
        assert!(r.diagnostics.is_empty());
    }

    #[test]
    fn lower_rate_opens_decimation_guard() {
        let r = run(r#"[
            {"block": {"name": "AudioDomain", "type": "domain", "rate": 44100}},
            {"block": {"name": "in", "type": "signal", "domain": "AudioDomain"}},
            {"block": {"name": "slow", "type": "signal", "domain": "AudioDomain", "rate": 22050}},
            {"stream": {"members": [{"name": {"name": "in"}}, {"name": {"name": "slow"}}]}}
        ]"#);
        let audio = domain(&r, "AudioDomain");
        assert_eq!(
            audio.processing_text(),
            "if (_AudioDomain_rc_0 >= 1.0) {\n    _AudioDomain_rc_0 -= 1.0;\n    slow = in;\n}\n_AudioDomain_rc_0 += 0.50000000;\n"
        );
        assert!(audio.header_code.contains("double _AudioDomain_rc_0;\n"));
        assert_eq!(audio.init_code, "_AudioDomain_rc_0 = 1.00000000;\n");
    }

    #[test]
    fn higher_rate_opens_interpolation_guard() {
        let r = run(r#"[
            {"block": {"name": "AudioDomain", "type": "domain", "rate": 100}},
            {"block": {"name": "in", "type": "signal"}},
            {"block": {"name": "fast", "type": "signal", "rate": 400}},
            {"stream": {"members": [{"name": {"name": "in"}}, {"name": {"name": "fast"}}]}}
        ]"#);
        let audio = domain(&r, "AudioDomain");
        assert_eq!(
            audio.processing_text(),
            "while (_AudioDomain_rc_0 < 1.0) {\n    fast = in;\n    _AudioDomain_rc_0 += 0.25000000;\n}\n_AudioDomain_rc_0 -= 1.0;\n"
        );
        assert_eq!(audio.init_code, "_AudioDomain_rc_0 = 0.00000000;\n");
    }

    #[test]
    fn module_call_builds_struct_and_instance() {
        let r = run(r#"[
            {"block": {"name": "scale", "type": "signal"}},
            {"block": {"name": "Gain", "type": "module",
                "ports": [
                    {"name": "input", "direction": "input"},
                    {"name": "output", "direction": "output"},
                    {"name": "amount", "direction": "property", "default": 0.5}
                ],
                "blocks": [
                    {"block": {"name": "input", "type": "signal"}},
                    {"block": {"name": "output", "type": "signal"}},
                    {"block": {"name": "amount", "type": "constant"}}
                ],
                "streams": [
                    {"stream": {"members": [
                        {"expression": {"type": "Multiply", "left": {"name": {"name": "input"}}, "right": {"name": {"name": "scale"}}}},
                        {"name": {"name": "output"}}
                    ]}}
                ]}},
            {"block": {"name": "src", "type": "signal"}},
            {"block": {"name": "dst", "type": "signal"}},
            {"stream": {"members": [
                {"name": {"name": "src"}},
                {"function": {"name": "Gain", "ports": {"amount": {"value": 2.0}}}},
                {"name": {"name": "dst"}}
            ]}}
        ]"#);
        let audio = domain(&r, "AudioDomain");
        let header = &audio.header_code;
        assert!(header.contains("struct Gain_Module {\n"));
        assert!(header.contains("    float &scale;\n"));
        assert!(header.contains("    float amount = 0.50000000;\n"));
        assert!(header.contains("Gain_Module(float &scale_) : scale(scale_) {"));
        assert!(header.contains("void set_amount(float value) {"));
        assert!(header.contains("float process(float input) {"));
        assert!(header.contains("output = (input * scale);"));
        assert!(header.contains("return output;"));

        let strukt = header.find("struct Gain_Module").unwrap();
        let scale = header.find("float scale = 0.00000000;").unwrap();
        let inst = header.find("Gain_Module Gain_0{scale};").unwrap();
        assert!(strukt < inst);
        assert!(scale < inst);

        assert_eq!(audio.processing_text(), "dst = Gain_0.process(src);\n");
        assert_eq!(audio.init_code, "Gain_0.set_amount(2.00000000);\n");
    }

    #[test]
    fn reaction_call_is_guarded_by_trigger() {
        let r = run(r#"[
            {"block": {"name": "trig", "type": "trigger"}},
            {"block": {"name": "count", "type": "signal"}},
            {"block": {"name": "Bump", "type": "reaction",
                "streams": [
                    {"stream": {"members": [
                        {"expression": {"type": "Add", "left": {"name": {"name": "count"}}, "right": {"value": 1}}},
                        {"name": {"name": "count"}}
                    ]}}
                ]}},
            {"stream": {"members": [{"name": {"name": "trig"}}, {"name": {"name": "Bump"}}]}}
        ]"#);
        let audio = domain(&r, "AudioDomain");
        assert_eq!(
            audio.processing_text(),
            "if (trig) {\n    Bump_reaction(count);\n}\n"
        );
        assert!(audio
            .header_code
            .contains("void Bump_reaction(float &count) {\n    count = (count + 1.00000000);\n}\n"));
        assert!(audio.header_code.starts_with("bool trig = false;\n"));
    }

    #[test]
    fn bridge_writes_in_input_domain_and_reads_in_output_domain() {
        let r = run(r#"[
            {"block": {"name": "x", "type": "signal", "domain": "AudioDomain"}},
            {"block": {"name": "y", "type": "signal", "domain": "ControlDomain"}},
            {"block": {"name": "b", "type": "signalbridge", "inputDomain": "AudioDomain", "outputDomain": "ControlDomain"}},
            {"stream": {"members": [{"name": {"name": "x"}}, {"name": {"name": "b"}}]}},
            {"stream": {"members": [{"name": {"name": "b"}}, {"name": {"name": "y"}}]}}
        ]"#);
        assert_eq!(domain(&r, "AudioDomain").processing_text(), "b = x;\n");
        let control = domain(&r, "ControlDomain");
        assert_eq!(control.processing_text(), "y = b;\n");
        assert!(control.header_code.contains("float b = 0.00000000;\n"));
    }

    #[test]
    fn platform_type_write_and_groups() {
        let r = run(r#"[
            {"block": {"name": "x", "type": "signal"}},
            {"block": {"name": "AudioOut", "type": "platformType", "typeName": "float",
                "write": "out_buf[0] = %%input%%;", "includes": ["<cmath>"],
                "initializations": ["audio_start();"]}},
            {"stream": {"members": [{"name": {"name": "x"}}, {"name": {"name": "AudioOut"}}]}}
        ]"#);
        assert_eq!(domain(&r, "AudioDomain").processing_text(), "out_buf[0] = x;\n");
        let groups = &r.generated.as_ref().unwrap().global_groups;
        assert_eq!(groups.include, vec!["<cmath>"]);
        assert_eq!(groups.initializations, vec!["audio_start();"]);
    }

    #[test]
    fn domain_mismatch_warns_and_continues() {
        let r = run(r#"[
            {"block": {"name": "a", "type": "signal", "domain": "AudioDomain"}},
            {"block": {"name": "k", "type": "signal", "domain": "ControlDomain"}},
            {"block": {"name": "out", "type": "signal"}},
            {"stream": {"members": [
                {"expression": {"type": "Add", "left": {"name": {"name": "a"}}, "right": {"name": {"name": "k"}}}},
                {"name": {"name": "out"}}
            ]}}
        ]"#);
        assert!(!r.has_errors());
        assert!(r.generated.is_some());
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].code, Some(codes::W0300));
        assert_eq!(domain(&r, "AudioDomain").processing_text(), "out = (a + k);\n");
    }

    #[test]
    fn unresolved_name_yields_no_code() {
        let r = run(r#"[{"stream": {"members": [{"name": {"name": "ghost", "line": 7}}]}}]"#);
        assert!(r.generated.is_none());
        assert!(r.has_errors());
        assert_eq!(r.diagnostics[0].code, Some(codes::E0100));
        assert_eq!(r.diagnostics[0].location.line, Some(7));
    }

    #[test]
    fn port_property_outside_body_is_fatal() {
        let r = run(r#"[
            {"block": {"name": "out", "type": "signal"}},
            {"stream": {"members": [
                {"portproperty": {"portname": "input", "name": "rate"}},
                {"name": {"name": "out"}}
            ]}}
        ]"#);
        assert!(r.generated.is_none());
        assert_eq!(r.diagnostics[0].code, Some(codes::E0101));
    }

    #[test]
    fn bundle_index_out_of_range() {
        let r = run(r#"[
            {"blockbundle": {"name": "buf", "type": "signal", "size": 2}},
            {"block": {"name": "out", "type": "signal"}},
            {"stream": {"members": [
                {"bundle": {"name": "buf", "index": {"value": 3}}},
                {"name": {"name": "out"}}
            ]}}
        ]"#);
        assert!(r.generated.is_none());
        assert_eq!(r.diagnostics[0].code, Some(codes::E0202));
    }

    #[test]
    fn system_node_overrides_default_domain() {
        let program = load_program(
            r#"[
                {"system": {"defaultDomain": "ControlDomain"}},
                {"block": {"name": "a", "type": "signal"}},
                {"block": {"name": "b", "type": "signal"}},
                {"stream": {"members": [{"name": {"name": "a"}}, {"name": {"name": "b"}}]}}
            ]"#,
        )
        .unwrap();
        let r = generate(&program, &CppTemplates::new(), &GeneratorOptions::default());
        let generated = r.generated.unwrap();
        assert!(generated.domains.contains_key("ControlDomain"));
        assert!(!generated.domains.contains_key("AudioDomain"));
    }
}
