use std::collections::{hash_map, HashMap};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ObjSymbolScope {
    Global,
    Weak,
    Local,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ObjSymbolKind {
    Function,
    Object,
    NoType,
}

/// Section association of a symbol within the linked object.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SymbolSection {
    Index(u32),
    Abs,
    Undefined,
}

#[derive(Debug, Clone)]
pub struct ObjSymbol {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub scope: ObjSymbolScope,
    pub kind: ObjSymbolKind,
    pub section: SymbolSection,
}

/// Symbols extracted from the linked project object, plus the two synthetic
/// small data area bases. Names are unique; the object parser guarantees it.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, ObjSymbol>,
    sda_base: Option<u32>,
    sda2_base: Option<u32>,
}

impl SymbolTable {
    pub fn new() -> Self { Self::default() }

    /// Inserts a symbol, filtering out locally bound entries. The compiler
    /// emits plenty of those and none are patch targets.
    pub fn insert(&mut self, symbol: ObjSymbol) {
        if symbol.scope == ObjSymbolScope::Local {
            return;
        }
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    pub fn get(&self, name: &str) -> Option<&ObjSymbol> { self.symbols.get(name) }

    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).map(|s| s.address)
    }

    /// Forces `_SDA_BASE_` and `_SDA2_BASE_` to exist when configured. The
    /// compiler doesn't reliably make them available.
    pub fn set_sda_bases(&mut self, sda_base: Option<u32>, sda2_base: Option<u32>) {
        self.sda_base = sda_base;
        self.sda2_base = sda2_base;
        for (name, base) in [("_SDA_BASE_", sda_base), ("_SDA2_BASE_", sda2_base)] {
            if let Some(address) = base {
                self.symbols.insert(name.to_string(), ObjSymbol {
                    name: name.to_string(),
                    address,
                    size: 0,
                    scope: ObjSymbolScope::Global,
                    kind: ObjSymbolKind::Object,
                    section: SymbolSection::Abs,
                });
            }
        }
    }

    pub fn sda_base(&self) -> Option<u32> { self.sda_base }

    pub fn sda2_base(&self) -> Option<u32> { self.sda2_base }

    pub fn iter(&self) -> hash_map::Values<'_, String, ObjSymbol> { self.symbols.values() }

    pub fn len(&self) -> usize { self.symbols.len() }

    pub fn is_empty(&self) -> bool { self.symbols.is_empty() }

    pub fn clear(&mut self) { self.symbols.clear(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str, address: u32, scope: ObjSymbolScope) -> ObjSymbol {
        ObjSymbol {
            name: name.to_string(),
            address,
            size: 4,
            scope,
            kind: ObjSymbolKind::Object,
            section: SymbolSection::Index(1),
        }
    }

    #[test]
    fn test_local_symbols_filtered() {
        let mut table = SymbolTable::new();
        table.insert(symbol("global", 0x8000_4000, ObjSymbolScope::Global));
        table.insert(symbol("local", 0x8000_4004, ObjSymbolScope::Local));
        table.insert(symbol("weak", 0x8000_4008, ObjSymbolScope::Weak));
        assert_eq!(table.address_of("global"), Some(0x8000_4000));
        assert_eq!(table.address_of("local"), None);
        assert_eq!(table.address_of("weak"), Some(0x8000_4008));
    }

    #[test]
    fn test_synthetic_sda_bases() {
        let mut table = SymbolTable::new();
        table.set_sda_bases(Some(0x8044_8000), None);
        assert_eq!(table.address_of("_SDA_BASE_"), Some(0x8044_8000));
        assert_eq!(table.address_of("_SDA2_BASE_"), None);
        assert_eq!(table.sda_base(), Some(0x8044_8000));
        assert_eq!(table.sda2_base(), None);
    }
}
