// atom.rs — Stream members as code-producing atoms
//
// One atom per stream member. An atom knows its rate, its domain and
// whether it may be spliced inline into its consumer; it hands the driver
// the declarations and instances it needs, one-time code keyed for the
// once-registry, and per-domain processing fragments given the tokens of
// the previous atom.
//
// Preconditions: atoms are built by the generator against a live scope
//                stack; names inside them are already resolved.
// Postconditions: processing never allocates new names; every temporary
//                 was allocated at construction.
// Failure modes: none here (resolution errors surface during construction).
// Side effects: none.

use crate::ast::{Literal, Operator, ValueType};
use crate::code::{Access, CodeItem, Declaration, Fragments, GlobalGroups, Instance, InstanceKind};
use crate::diag::Location;
use crate::scope::PropertyValue;
use crate::templates::Templates;

/// The atom adopts the rate of the surrounding stream.
pub const RATE_INHERIT: f64 = -1.0;
/// The atom carries no data rate (literals).
pub const RATE_DATALESS: f64 = 0.0;

// ── Shared pieces ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AtomInfo {
    /// Positive rate, or one of `RATE_INHERIT` / `RATE_DATALESS`.
    pub rate: f64,
    pub domain: Option<String>,
    pub inline: bool,
    pub location: Location,
}

impl AtomInfo {
    pub fn new(rate: f64, domain: Option<String>, inline: bool, location: Location) -> Self {
        AtomInfo {
            rate,
            domain,
            inline,
            location,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OnceKind {
    Initialization,
    Preprocessing,
    Postprocessing,
}

/// Code that must be emitted at most once per program, whatever the number
/// of atoms contributing it.
#[derive(Debug, Clone, PartialEq)]
pub struct OnceCode {
    pub kind: OnceKind,
    pub key: String,
    /// `None` means the domain the atom is generated in.
    pub domain: Option<String>,
    pub code: String,
}

/// Named storage referenced by name and bundle atoms.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    pub name: String,
    pub stack_index: usize,
    pub domain: Option<String>,
    pub value_type: ValueType,
    /// Element count for bundles.
    pub size: Option<usize>,
    /// Platform spelling of the type, from a `platformType` reference.
    pub ctype: Option<String>,
    /// Rendered default value.
    pub initial: String,
    /// Declaration of the platform type this storage is typed with.
    pub platform: Option<Declaration>,
    pub location: Location,
}

impl Storage {
    pub fn instance(&self) -> Instance {
        let mut inst = Instance::scalar(
            self.name.clone(),
            self.stack_index,
            self.domain.clone(),
            self.value_type,
            self.initial.clone(),
        );
        if let Some(size) = self.size {
            inst.kind = InstanceKind::Bundle {
                element: self.value_type,
                size,
            };
            inst.initial = vec![self.initial.clone(); size];
        }
        inst.ctype = self.ctype.clone();
        inst.location = self.location.clone();
        inst
    }

    /// The platform declaration, ordered before this storage's instance.
    pub fn declarations(&self) -> Vec<Declaration> {
        self.platform
            .iter()
            .map(|d| {
                let mut d = d.clone();
                d.dependents.push(CodeItem::Instance(self.instance()));
                d
            })
            .collect()
    }

    /// Tokens a consumer reads: the name, or every element of a bundle.
    pub fn tokens(&self, t: &dyn Templates) -> Vec<String> {
        match self.size {
            Some(n) => (0..n).map(|i| t.bundle_index(&self.name, i)).collect(),
            None => vec![self.name.clone()],
        }
    }

    fn access(&self, domain: &str) -> Access {
        Access {
            name: self.name.clone(),
            stack_index: self.stack_index,
            domain: self.domain.clone().unwrap_or_else(|| domain.to_string()),
        }
    }
}

// ── Variants ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ValueAtom {
    pub info: AtomInfo,
    pub literal: Literal,
    /// Storage used when the value has to be materialized.
    pub temp: Instance,
}

/// Signal bridge: written in one domain, read in another.
#[derive(Debug, Clone, PartialEq)]
pub struct Bridge {
    pub input_domain: String,
    pub output_domain: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameAtom {
    pub info: AtomInfo,
    pub storage: Storage,
    /// A previous stream member writes into this storage.
    pub has_input: bool,
    pub bridge: Option<Bridge>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BundleIndex {
    /// Zero-based element index.
    Static(usize),
    /// Runtime index expression, one-based at the source level.
    Dynamic(Box<Atom>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleAtom {
    pub info: AtomInfo,
    pub storage: Storage,
    pub index: BundleIndex,
    pub has_input: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionAtom {
    pub info: AtomInfo,
    pub op: Operator,
    /// One operand for unary operators, two otherwise.
    pub operands: Vec<Atom>,
    pub temp: Instance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListAtom {
    pub info: AtomInfo,
    pub members: Vec<Atom>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// `instance.method(...)` on a module struct instance.
    Method { instance: String, method: String },
    /// A free reaction/loop function.
    Function(String),
}

/// Call-site payload shared by module, reaction and loop atoms. Everything
/// the nested body generation produced is stored here.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub type_name: String,
    pub instance_name: String,
    pub target: CallTarget,
    /// The callee has a main input port.
    pub takes_input: bool,
    /// Argument used for the main input when no upstream token exists.
    pub input_default: String,
    /// Trailing arguments: property values then external references.
    pub args: Vec<String>,
    /// Storage receiving the callee's output.
    pub output: Option<Instance>,
    pub declarations: Vec<Declaration>,
    pub instances: Vec<Instance>,
    /// Property binding code emitted before the call each cycle.
    pub prelude: Fragments,
    pub once: Vec<OnceCode>,
    pub groups: GlobalGroups,
    pub reads: Vec<Access>,
    pub writes: Vec<Access>,
    /// Per-cycle code the call site contributes to non-primary domains.
    pub other_domains: Vec<(String, String)>,
}

impl CallSite {
    fn call_expression(&self, t: &dyn Templates, in_tokens: &[String]) -> String {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        if self.takes_input {
            args.push(
                in_tokens
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.input_default.clone()),
            );
        }
        args.extend(self.args.iter().cloned());
        match &self.target {
            CallTarget::Method { instance, method } => t.member_call(instance, method, &args),
            CallTarget::Function(name) => t.call(name, &args),
        }
    }

    fn processing_code(
        &self,
        t: &dyn Templates,
        in_tokens: &[String],
        domain: &str,
        inline: bool,
        guarded: bool,
    ) -> Fragments {
        let mut frags = self.prelude.clone();
        let call = self.call_expression(t, in_tokens);
        let (code, tokens) = match &self.output {
            Some(_) if inline && !guarded => (String::new(), vec![call]),
            Some(out) => (t.assignment(&out.name, &call), vec![out.name.clone()]),
            None => (t.statement(&call), Vec::new()),
        };
        let code = if guarded {
            let trigger = in_tokens
                .first()
                .cloned()
                .unwrap_or_else(|| t.boolean(true));
            t.conditional(&trigger, &code)
        } else {
            code
        };
        frags.append_code(domain, &code);
        frags.set_tokens(domain, tokens);
        for (other, code) in &self.other_domains {
            frags.append_code(other, code);
        }
        frags
    }

    fn instances(&self, materialized: bool) -> Vec<Instance> {
        let mut out = self.instances.clone();
        if materialized {
            out.extend(self.output.iter().cloned());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleAtom {
    pub info: AtomInfo,
    pub call: CallSite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionAtom {
    pub info: AtomInfo,
    pub call: CallSite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopAtom {
    pub info: AtomInfo,
    pub call: CallSite,
    /// Flag whose truth ends the loop body.
    pub terminate_when: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformTypeAtom {
    pub info: AtomInfo,
    pub name: String,
    /// Statement template consuming `%%input%%`.
    pub write: Option<String>,
    /// Expression template producing the output token.
    pub read: Option<String>,
    /// Platform declarations plus whatever the port bindings need.
    pub declarations: Vec<Declaration>,
    pub instances: Vec<Instance>,
    pub once: Vec<OnceCode>,
    pub groups: GlobalGroups,
    /// Port name → token of the bound value.
    pub bindings: Vec<(String, String)>,
    pub prelude: Fragments,
    pub reads: Vec<Access>,
    pub has_input: bool,
    /// Storage used when the read expression has to be materialized.
    pub temp: Option<Instance>,
}

impl PlatformTypeAtom {
    fn substitutions<'a>(&'a self, in_tokens: &'a [String]) -> Vec<(&'a str, &'a str)> {
        let mut subs: Vec<(&str, &str)> = self
            .bindings
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(input) = in_tokens.first() {
            subs.push(("input", input.as_str()));
        }
        subs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortPropertyAtom {
    pub info: AtomInfo,
    pub port: String,
    pub property: String,
    pub value: PropertyValue,
}

// ── Atom ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Value(ValueAtom),
    Name(NameAtom),
    Bundle(BundleAtom),
    Expression(ExpressionAtom),
    List(ListAtom),
    Module(ModuleAtom),
    Reaction(ReactionAtom),
    Loop(LoopAtom),
    PlatformType(PlatformTypeAtom),
    PortProperty(PortPropertyAtom),
}

impl Atom {
    pub fn info(&self) -> &AtomInfo {
        match self {
            Atom::Value(a) => &a.info,
            Atom::Name(a) => &a.info,
            Atom::Bundle(a) => &a.info,
            Atom::Expression(a) => &a.info,
            Atom::List(a) => &a.info,
            Atom::Module(a) => &a.info,
            Atom::Reaction(a) => &a.info,
            Atom::Loop(a) => &a.info,
            Atom::PlatformType(a) => &a.info,
            Atom::PortProperty(a) => &a.info,
        }
    }

    fn info_mut(&mut self) -> &mut AtomInfo {
        match self {
            Atom::Value(a) => &mut a.info,
            Atom::Name(a) => &mut a.info,
            Atom::Bundle(a) => &mut a.info,
            Atom::Expression(a) => &mut a.info,
            Atom::List(a) => &mut a.info,
            Atom::Module(a) => &mut a.info,
            Atom::Reaction(a) => &mut a.info,
            Atom::Loop(a) => &mut a.info,
            Atom::PlatformType(a) => &mut a.info,
            Atom::PortProperty(a) => &mut a.info,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Atom::Value(_) => "value",
            Atom::Name(_) => "name",
            Atom::Bundle(_) => "bundle",
            Atom::Expression(_) => "expression",
            Atom::List(_) => "list",
            Atom::Module(_) => "module",
            Atom::Reaction(_) => "reaction",
            Atom::Loop(_) => "loop",
            Atom::PlatformType(_) => "platformType",
            Atom::PortProperty(_) => "portproperty",
        }
    }

    pub fn rate(&self) -> f64 {
        self.info().rate
    }

    pub fn domain(&self) -> Option<&str> {
        self.info().domain.as_deref()
    }

    pub fn is_inline(&self) -> bool {
        self.info().inline
    }

    /// A signal bridge hands its tokens to both of its domains.
    pub fn is_bridge(&self) -> bool {
        matches!(self, Atom::Name(NameAtom { bridge: Some(_), .. }))
    }

    /// Force (or allow) inlining. Materializing a list materializes its
    /// members.
    pub fn set_inline(&mut self, inline: bool) {
        if let Atom::List(list) = self {
            for m in &mut list.members {
                m.set_inline(inline);
            }
        }
        self.info_mut().inline = inline;
    }

    pub fn location(&self) -> &Location {
        &self.info().location
    }

    // ── Items ───────────────────────────────────────────────────────────

    pub fn declarations(&self) -> Vec<Declaration> {
        match self {
            Atom::Value(_) | Atom::PortProperty(_) => Vec::new(),
            Atom::Name(a) => a.storage.declarations(),
            Atom::Bundle(a) => {
                let mut out = a.storage.declarations();
                if let BundleIndex::Dynamic(index) = &a.index {
                    out.extend(index.declarations());
                }
                out
            }
            Atom::Expression(a) => a.operands.iter().flat_map(Atom::declarations).collect(),
            Atom::List(a) => a.members.iter().flat_map(Atom::declarations).collect(),
            Atom::Module(a) => a.call.declarations.clone(),
            Atom::Reaction(a) => a.call.declarations.clone(),
            Atom::Loop(a) => a.call.declarations.clone(),
            Atom::PlatformType(a) => a.declarations.clone(),
        }
    }

    /// Storage this atom needs. Checks the inline flag at call time, so
    /// call after every boundary has been flagged.
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            Atom::Value(a) => {
                if a.info.inline {
                    Vec::new()
                } else {
                    vec![a.temp.clone()]
                }
            }
            Atom::Name(a) => vec![a.storage.instance()],
            Atom::Bundle(a) => {
                let mut out = vec![a.storage.instance()];
                if let BundleIndex::Dynamic(index) = &a.index {
                    out.extend(index.instances());
                }
                out
            }
            Atom::Expression(a) => {
                let mut out: Vec<Instance> = a.operands.iter().flat_map(Atom::instances).collect();
                if !a.info.inline {
                    out.push(a.temp.clone());
                }
                out
            }
            Atom::List(a) => a.members.iter().flat_map(Atom::instances).collect(),
            Atom::Module(a) => a.call.instances(!a.info.inline),
            Atom::Reaction(a) => a.call.instances(true),
            Atom::Loop(a) => a.call.instances(true),
            Atom::PlatformType(a) => {
                let mut out = a.instances.clone();
                if !a.info.inline {
                    out.extend(a.temp.iter().cloned());
                }
                out
            }
            Atom::PortProperty(_) => Vec::new(),
        }
    }

    pub fn once_codes(&self) -> Vec<OnceCode> {
        match self {
            Atom::Value(_) | Atom::Name(_) | Atom::PortProperty(_) => Vec::new(),
            Atom::Bundle(a) => match &a.index {
                BundleIndex::Dynamic(index) => index.once_codes(),
                BundleIndex::Static(_) => Vec::new(),
            },
            Atom::Expression(a) => a.operands.iter().flat_map(Atom::once_codes).collect(),
            Atom::List(a) => a.members.iter().flat_map(Atom::once_codes).collect(),
            Atom::Module(a) => a.call.once.clone(),
            Atom::Reaction(a) => a.call.once.clone(),
            Atom::Loop(a) => a.call.once.clone(),
            Atom::PlatformType(a) => a.once.clone(),
        }
    }

    fn once_of(&self, kind: OnceKind) -> Vec<OnceCode> {
        self.once_codes()
            .into_iter()
            .filter(|c| c.kind == kind)
            .collect()
    }

    pub fn initialization_code(&self) -> Vec<OnceCode> {
        self.once_of(OnceKind::Initialization)
    }

    pub fn preprocessing_code(&self) -> Vec<OnceCode> {
        self.once_of(OnceKind::Preprocessing)
    }

    pub fn postprocessing_code(&self) -> Vec<OnceCode> {
        self.once_of(OnceKind::Postprocessing)
    }

    pub fn global_groups(&self) -> GlobalGroups {
        let mut groups = GlobalGroups::default();
        match self {
            Atom::Expression(a) => {
                for o in &a.operands {
                    groups.merge(o.global_groups());
                }
            }
            Atom::List(a) => {
                for m in &a.members {
                    groups.merge(m.global_groups());
                }
            }
            Atom::Bundle(BundleAtom {
                index: BundleIndex::Dynamic(index),
                ..
            }) => groups.merge(index.global_groups()),
            Atom::Module(a) => groups.merge(a.call.groups.clone()),
            Atom::Reaction(a) => groups.merge(a.call.groups.clone()),
            Atom::Loop(a) => groups.merge(a.call.groups.clone()),
            Atom::PlatformType(a) => groups.merge(a.groups.clone()),
            _ => {}
        }
        groups
    }

    /// Storage read and written by this atom, attributed to `domain` when
    /// the storage has none of its own.
    pub fn accesses(&self, domain: &str) -> (Vec<Access>, Vec<Access>) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        self.collect_accesses(domain, &mut reads, &mut writes);
        (reads, writes)
    }

    fn collect_accesses(&self, domain: &str, reads: &mut Vec<Access>, writes: &mut Vec<Access>) {
        use crate::code::push_access;
        match self {
            Atom::Name(a) => {
                if a.has_input {
                    let d = a.bridge.as_ref().map_or(domain, |b| b.input_domain.as_str());
                    push_access(writes, a.storage.access(d));
                } else {
                    push_access(reads, a.storage.access(domain));
                }
            }
            Atom::Bundle(a) => {
                if a.has_input {
                    push_access(writes, a.storage.access(domain));
                } else {
                    push_access(reads, a.storage.access(domain));
                }
                if let BundleIndex::Dynamic(index) = &a.index {
                    index.collect_accesses(domain, reads, writes);
                }
            }
            Atom::Expression(a) => {
                for o in &a.operands {
                    o.collect_accesses(o.domain().unwrap_or(domain), reads, writes);
                }
            }
            Atom::List(a) => {
                for m in &a.members {
                    m.collect_accesses(m.domain().unwrap_or(domain), reads, writes);
                }
            }
            Atom::Module(ModuleAtom { call, .. })
            | Atom::Reaction(ReactionAtom { call, .. })
            | Atom::Loop(LoopAtom { call, .. }) => {
                for r in &call.reads {
                    push_access(reads, r.clone());
                }
                for w in &call.writes {
                    push_access(writes, w.clone());
                }
            }
            Atom::PlatformType(a) => {
                for r in &a.reads {
                    push_access(reads, r.clone());
                }
            }
            Atom::Value(_) | Atom::PortProperty(_) => {}
        }
    }

    // ── Code ────────────────────────────────────────────────────────────

    /// Per-domain processing code given the previous atom's tokens.
    /// `domain` is the domain this atom executes in.
    pub fn processing_code(&self, t: &dyn Templates, in_tokens: &[String], domain: &str) -> Fragments {
        match self {
            Atom::Value(a) => {
                let lit = t.literal(&a.literal);
                if a.info.inline {
                    Fragments::single(domain, String::new(), vec![lit])
                } else {
                    Fragments::single(
                        domain,
                        t.assignment(&a.temp.name, &lit),
                        vec![a.temp.name.clone()],
                    )
                }
            }
            Atom::Name(a) => {
                let tokens = a.storage.tokens(t);
                let mut code = String::new();
                if !in_tokens.is_empty() {
                    for (i, target) in tokens.iter().enumerate() {
                        code.push_str(&t.assignment(target, &in_tokens[i % in_tokens.len()]));
                    }
                }
                match &a.bridge {
                    Some(bridge) => {
                        let mut frags = Fragments::default();
                        frags.append_code(&bridge.input_domain, &code);
                        frags.set_tokens(&bridge.input_domain, tokens.clone());
                        frags.set_tokens(&bridge.output_domain, tokens);
                        frags
                    }
                    None => Fragments::single(domain, code, tokens),
                }
            }
            Atom::Bundle(a) => {
                let mut frags = Fragments::default();
                let token = match &a.index {
                    BundleIndex::Static(i) => t.bundle_index(&a.storage.name, *i),
                    BundleIndex::Dynamic(index) => {
                        let index_token = operand_token(t, index, domain, &mut frags);
                        t.dynamic_bundle_index(&a.storage.name, &index_token)
                    }
                };
                if let Some(value) = in_tokens.first() {
                    frags.append_code(domain, &t.assignment(&token, value));
                }
                frags.set_tokens(domain, vec![token]);
                frags
            }
            Atom::Expression(a) => {
                let mut frags = Fragments::default();
                let tokens: Vec<String> = a
                    .operands
                    .iter()
                    .map(|o| operand_token(t, o, domain, &mut frags))
                    .collect();
                let text = render_expression(t, a.op, &tokens);
                if a.info.inline {
                    frags.set_tokens(domain, vec![text]);
                } else {
                    frags.append_code(domain, &t.assignment(&a.temp.name, &text));
                    frags.set_tokens(domain, vec![a.temp.name.clone()]);
                }
                frags
            }
            Atom::List(a) => {
                let mut frags = Fragments::default();
                let mut tokens = Vec::new();
                let n = a.members.len();
                for (i, member) in a.members.iter().enumerate() {
                    let member_domain = member.domain().unwrap_or(domain).to_string();
                    let member_in = distribute(in_tokens, i, n);
                    let f = member.processing_code(t, &member_in, &member_domain);
                    if let Some(ts) = f.tokens(&member_domain) {
                        tokens.extend(ts.iter().cloned());
                    }
                    frags.merge(f);
                }
                frags.set_tokens(domain, tokens);
                frags
            }
            Atom::Module(a) => a.call.processing_code(t, in_tokens, domain, a.info.inline, false),
            Atom::Reaction(a) => a.call.processing_code(t, in_tokens, domain, false, true),
            Atom::Loop(a) => a.call.processing_code(t, in_tokens, domain, false, true),
            Atom::PlatformType(a) => {
                let mut frags = a.prelude.clone();
                let subs = a.substitutions(in_tokens);
                if let (Some(write), true) = (&a.write, !in_tokens.is_empty()) {
                    let mut code = t.substitute(write, &subs);
                    if !code.ends_with('\n') {
                        code.push('\n');
                    }
                    frags.append_code(domain, &code);
                }
                let tokens = match (&a.read, &a.temp) {
                    (Some(read), Some(temp)) if !a.info.inline => {
                        frags.append_code(domain, &t.assignment(&temp.name, &t.substitute(read, &subs)));
                        vec![temp.name.clone()]
                    }
                    (Some(read), _) => vec![t.substitute(read, &subs)],
                    (None, _) => in_tokens.to_vec(),
                };
                frags.set_tokens(domain, tokens);
                frags
            }
            Atom::PortProperty(a) => {
                Fragments::single(domain, String::new(), vec![property_literal(t, &a.value)])
            }
        }
    }

    /// The atom as a single expression, for splicing into a consumer.
    pub fn inline_processing_code(&self, t: &dyn Templates, in_tokens: &[String]) -> String {
        match self {
            Atom::Value(a) => t.literal(&a.literal),
            Atom::Name(a) => a.storage.tokens(t).join(", "),
            Atom::Bundle(a) => match &a.index {
                BundleIndex::Static(i) => t.bundle_index(&a.storage.name, *i),
                BundleIndex::Dynamic(index) => {
                    t.dynamic_bundle_index(&a.storage.name, &index.inline_processing_code(t, &[]))
                }
            },
            Atom::Expression(a) => {
                let tokens: Vec<String> = a
                    .operands
                    .iter()
                    .map(|o| o.inline_processing_code(t, &[]))
                    .collect();
                render_expression(t, a.op, &tokens)
            }
            Atom::List(a) => a
                .members
                .iter()
                .enumerate()
                .map(|(i, m)| m.inline_processing_code(t, &distribute(in_tokens, i, a.members.len())))
                .collect::<Vec<_>>()
                .join(", "),
            Atom::Module(ModuleAtom { call, .. })
            | Atom::Reaction(ReactionAtom { call, .. })
            | Atom::Loop(LoopAtom { call, .. }) => call.call_expression(t, in_tokens),
            Atom::PlatformType(a) => match &a.read {
                Some(read) => t.substitute(read, &a.substitutions(in_tokens)),
                None => in_tokens.first().cloned().unwrap_or_default(),
            },
            Atom::PortProperty(a) => property_literal(t, &a.value),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Token of an operand, emitting its code into `frags` when it cannot be
/// spliced inline.
fn operand_token(t: &dyn Templates, operand: &Atom, domain: &str, frags: &mut Fragments) -> String {
    if operand.is_inline() {
        return operand.inline_processing_code(t, &[]);
    }
    let operand_domain = operand.domain().unwrap_or(domain).to_string();
    let f = operand.processing_code(t, &[], &operand_domain);
    let token = f
        .tokens(&operand_domain)
        .and_then(|ts| ts.first())
        .cloned()
        .unwrap_or_default();
    frags.merge(f);
    token
}

fn render_expression(t: &dyn Templates, op: Operator, tokens: &[String]) -> String {
    match tokens {
        [operand] => t.unary_expression(op, operand),
        [left, right, ..] => t.binary_expression(op, left, right),
        [] => String::new(),
    }
}

/// Input tokens for member `i` of an `n`-member list: one each when the
/// counts match, otherwise broadcast round-robin.
fn distribute(in_tokens: &[String], i: usize, n: usize) -> Vec<String> {
    if in_tokens.is_empty() {
        Vec::new()
    } else if in_tokens.len() == n {
        vec![in_tokens[i].clone()]
    } else {
        vec![in_tokens[i % in_tokens.len()].clone()]
    }
}

fn property_literal(t: &dyn Templates, value: &PropertyValue) -> String {
    match value {
        PropertyValue::Number(n) => t.number(*n),
        PropertyValue::Text(s) => t.string(s),
    }
}
