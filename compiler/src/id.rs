// id.rs — Deterministic names for generated storage and instances
//
// Every temporary, module instance and rate counter the generator invents
// gets its name here. Names are allocated in generation (source) order,
// so the same program always yields the same identifiers.

use std::collections::HashMap;

/// Allocator for generated names. Each prefix has its own counter starting
/// at zero, producing `<prefix>_<n>`.
#[derive(Debug, Default)]
pub struct NameAllocator {
    per_prefix: HashMap<String, u32>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.per_prefix.entry(prefix.to_string()).or_insert(0);
        let name = format!("{}_{}", prefix, n);
        *n += 1;
        name
    }

    /// Instance name of a module/reaction/loop call site: `Gain_0`.
    pub fn instance(&mut self, type_name: &str) -> String {
        self.fresh(type_name)
    }

    /// Materialization temporary: `_expr_3`, `_val_0`.
    pub fn temporary(&mut self, kind: &str) -> String {
        self.fresh(&format!("_{}", kind))
    }

    /// Rate counter of a domain: `_AudioDomain_rc_0`.
    pub fn counter(&mut self, domain: &str) -> String {
        self.fresh(&format!("_{}_rc", domain))
    }
}
