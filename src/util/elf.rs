//! Consumes the linked project object: raw section data for the appended
//! blob, plus the symbol tables hooks and the map writer resolve against.

use anyhow::{bail, ensure, Context, Result};
use object::{
    Architecture, Endianness, Object, ObjectKind, ObjectSection, ObjectSymbol, SectionFlags,
    SectionKind, SymbolKind,
};

use crate::obj::{ObjSymbol, ObjSymbolKind, ObjSymbolScope, SymbolSection, SymbolTable};

fn parse_ppc(buf: &[u8]) -> Result<object::read::File> {
    let obj_file = object::read::File::parse(buf)?;
    match obj_file.architecture() {
        Architecture::PowerPc => {}
        arch => bail!("Unexpected architecture: {arch:?}"),
    }
    ensure!(obj_file.endianness() == Endianness::Big, "Expected big endian");
    match obj_file.kind() {
        ObjectKind::Executable | ObjectKind::Relocatable => {}
        kind => bail!("Unexpected ELF type: {kind:?}"),
    }
    Ok(obj_file)
}

#[inline]
fn is_alloc(flags: SectionFlags) -> bool {
    matches!(flags, SectionFlags::Elf { sh_flags } if sh_flags & object::elf::SHF_ALLOC as u64 != 0)
}

fn to_scope(symbol: &object::read::Symbol) -> ObjSymbolScope {
    if symbol.is_weak() {
        ObjSymbolScope::Weak
    } else if symbol.is_global() {
        ObjSymbolScope::Global
    } else {
        ObjSymbolScope::Local
    }
}

/// Flattens the linked object's allocatable section data into one blob whose
/// offset 0 corresponds to `base_addr`, and collects the globally visible
/// symbols for hook resolution.
pub fn process_object(buf: &[u8], base_addr: u32) -> Result<(Vec<u8>, SymbolTable)> {
    let obj_file = parse_ppc(buf)?;

    let mut blob = Vec::<u8>::new();
    for section in obj_file
        .sections()
        .filter(|s| is_alloc(s.flags()) && s.kind() != SectionKind::UninitializedData)
    {
        if section.size() == 0 {
            continue;
        }
        let address = section.address() as u32;
        ensure!(
            address >= base_addr,
            "Section '{}' at {:#010X} is below the base address {:#010X}",
            section.name().unwrap_or("[error]"),
            address,
            base_addr
        );
        let offset = (address - base_addr) as usize;
        let data = section.uncompressed_data()?;
        if blob.len() < offset + data.len() {
            blob.resize(offset + data.len(), 0);
        }
        blob[offset..offset + data.len()].copy_from_slice(&data);
    }

    let mut symbols = SymbolTable::new();
    for symbol in obj_file.symbols() {
        // Section and file symbols are never patch targets.
        if matches!(symbol.kind(), SymbolKind::Section | SymbolKind::File) {
            continue;
        }
        let name = symbol.name().context("Failed to read symbol name")?;
        if name.is_empty() {
            continue;
        }
        let section = match symbol.section() {
            object::SymbolSection::Absolute => SymbolSection::Abs,
            object::SymbolSection::Undefined
            | object::SymbolSection::Common
            | object::SymbolSection::None => SymbolSection::Undefined,
            object::SymbolSection::Section(index) => SymbolSection::Index(index.0 as u32),
            section => bail!("Unsupported symbol section {section:?}"),
        };
        symbols.insert(ObjSymbol {
            name: name.to_string(),
            address: symbol.address() as u32,
            size: symbol.size() as u32,
            scope: to_scope(&symbol),
            kind: match symbol.kind() {
                SymbolKind::Text => ObjSymbolKind::Function,
                SymbolKind::Data => ObjSymbolKind::Object,
                _ => ObjSymbolKind::NoType,
            },
            section,
        });
    }
    Ok((blob, symbols))
}

/// A symbol destined for the map file, tagged with its section name.
#[derive(Debug, Clone)]
pub struct MapSymbol {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub section: String,
}

/// Collects the symbols worth listing in the map: globally visible, defined,
/// and attached to a real section. Linker-script symbols are absolute and
/// already known, so they are filtered out.
pub fn map_symbols(buf: &[u8]) -> Result<Vec<MapSymbol>> {
    let obj_file = parse_ppc(buf)?;
    let mut out = Vec::new();
    for symbol in obj_file.symbols() {
        if to_scope(&symbol) == ObjSymbolScope::Local
            || matches!(symbol.kind(), SymbolKind::Section | SymbolKind::File)
        {
            continue;
        }
        let object::SymbolSection::Section(index) = symbol.section() else {
            continue;
        };
        let section = obj_file.section_by_index(index)?;
        out.push(MapSymbol {
            name: symbol.name()?.to_string(),
            address: symbol.address() as u32,
            size: symbol.size() as u32,
            section: section.name()?.to_string(),
        });
    }
    Ok(out)
}
