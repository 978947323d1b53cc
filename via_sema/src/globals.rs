//! The global table: ordered, index-addressable program-wide bindings

use crate::Ty;
use hashbrown::HashMap;
use serde::Serialize;

/// One global binding. Declaration order defines the index; the VM's global
/// array is indexed by the same position.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalBinding {
    pub name: String,
    pub ty: Ty,
    /// Prelude entries are const; assigning to them is rejected.
    pub is_const: bool,
}

/// Ordered global-name store with a hash index for lookup.
#[derive(Debug, Clone, Default)]
pub struct GlobalTable {
    entries: Vec<GlobalBinding>,
    index: HashMap<String, u16>,
}

/// Built-in names every program sees. The VM installs the matching values
/// at startup in the same order.
pub const PRELUDE: &[&str] = &[
    "print", "error", "exit", "type", "typeof", "assert", "len", "clone", "keys", "protect",
    "math", "string", "os",
];

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-seeded with the prelude.
    pub fn with_prelude() -> Self {
        let mut table = Self::new();
        for &name in PRELUDE {
            let ty = match name {
                "math" | "string" | "os" => Ty::Table,
                _ => Ty::Any,
            };
            table.push(name, ty, true);
        }
        table
    }

    fn push(&mut self, name: &str, ty: Ty, is_const: bool) -> u16 {
        let idx = self.entries.len() as u16;
        self.entries.push(GlobalBinding {
            name: name.to_string(),
            ty,
            is_const,
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Existing index for `name`, or a fresh entry.
    pub fn intern(&mut self, name: &str, ty: Ty) -> u16 {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        self.push(name, ty, false)
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.index.get(name).copied()
    }

    pub fn get(&self, idx: u16) -> Option<&GlobalBinding> {
        self.entries.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GlobalBinding> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_is_indexed_in_order() {
        let table = GlobalTable::with_prelude();
        assert_eq!(table.lookup("print"), Some(0));
        assert_eq!(table.len(), PRELUDE.len());
        for (i, &name) in PRELUDE.iter().enumerate() {
            assert_eq!(table.lookup(name), Some(i as u16));
        }
    }

    #[test]
    fn intern_returns_stable_indices() {
        let mut table = GlobalTable::with_prelude();
        let a = table.intern("script_global", Ty::Any);
        let b = table.intern("script_global", Ty::Any);
        assert_eq!(a, b);
        assert_eq!(table.get(a).unwrap().name, "script_global");
    }
}
