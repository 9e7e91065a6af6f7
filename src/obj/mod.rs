mod symbols;

pub use symbols::{ObjSymbol, ObjSymbolKind, ObjSymbolScope, SymbolSection, SymbolTable};
