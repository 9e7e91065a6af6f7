//! Symbolic patch hooks: each variant resolves against the project symbol
//! table and can be applied either to a DOL image or emitted as a Gecko
//! command. A failed resolution degrades the single hook, never the build.

use std::{fmt, io::Write, path::PathBuf};

use anyhow::{bail, Result};

use crate::{
    gecko::GeckoCommand,
    obj::SymbolTable,
    ppc::{assemble_branch, ha, hi, lo, mask_field},
    util::dol::DolFile,
};

#[derive(Debug, Clone)]
pub enum HookKind {
    /// Branch (or branch-and-link) from the hook address to a symbol.
    Branch { symbol: String, lk: bool },
    /// Raw 32-bit pointer to a symbol.
    Pointer { symbol: String },
    /// NUL-terminated byte string, optionally zero-padded to `max_len`.
    String { string: String, max_len: Option<usize> },
    /// Byte range of an external file, optionally zero-padded to `max_size`.
    File { path: PathBuf, start: usize, end: Option<usize>, max_size: Option<usize> },
    /// 16-bit immediate derived from a symbol address.
    Immediate16 { symbol: String, modifier: String },
    /// 12-bit immediate packed with the paired-single `i` (1 bit) and `w`
    /// (3 bits) fields. Paired-single loads and stores have a narrower
    /// immediate field than ordinary load/store instructions.
    Immediate12 { symbol: String, modifier: String, w: u8, i: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Payload {
    Branch(u32),
    Word(u32),
    Half(u16),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Hook {
    pub addr: u32,
    pub kind: HookKind,
    payload: Option<Payload>,
    applied: bool,
}

impl Hook {
    pub fn branch(addr: u32, symbol: &str, lk: bool) -> Self {
        Self::new(addr, HookKind::Branch { symbol: symbol.to_string(), lk })
    }

    pub fn pointer(addr: u32, symbol: &str) -> Self {
        Self::new(addr, HookKind::Pointer { symbol: symbol.to_string() })
    }

    pub fn string(addr: u32, string: &str, max_len: Option<usize>) -> Self {
        Self::new(addr, HookKind::String { string: string.to_string(), max_len })
    }

    pub fn file(
        addr: u32,
        path: PathBuf,
        start: usize,
        end: Option<usize>,
        max_size: Option<usize>,
    ) -> Self {
        Self::new(addr, HookKind::File { path, start, end, max_size })
    }

    pub fn immediate16(addr: u32, symbol: &str, modifier: &str) -> Self {
        Self::new(addr, HookKind::Immediate16 {
            symbol: symbol.to_string(),
            modifier: modifier.to_string(),
        })
    }

    pub fn immediate12(addr: u32, w: u8, i: u8, symbol: &str, modifier: &str) -> Self {
        Self::new(addr, HookKind::Immediate12 {
            symbol: symbol.to_string(),
            modifier: modifier.to_string(),
            w,
            i,
        })
    }

    fn new(addr: u32, kind: HookKind) -> Self { Self { addr, kind, payload: None, applied: false } }

    pub fn is_resolved(&self) -> bool { self.payload.is_some() }

    pub fn is_applied(&self) -> bool { self.applied }

    /// Resolves the hook against `symbols`. A missing symbol or unknown
    /// modifier leaves the hook unresolved; using an `@sda`/`@sda2` modifier
    /// without the corresponding base configured is a fatal configuration
    /// error.
    pub fn resolve(&mut self, symbols: &SymbolTable) -> Result<()> {
        self.payload = match self.kind {
            HookKind::Branch { ref symbol, .. } => symbols.address_of(symbol).map(Payload::Branch),
            HookKind::Pointer { ref symbol } => symbols.address_of(symbol).map(Payload::Word),
            HookKind::String { ref string, max_len } => {
                let mut data = string.as_bytes().to_vec();
                data.push(0);
                Some(Payload::Bytes(pad_to_max(data, max_len, string)))
            }
            HookKind::File { ref path, start, end, max_size } => {
                let data = match std::fs::read(path) {
                    Ok(contents) => {
                        let end = end.unwrap_or(contents.len()).min(contents.len());
                        let start = start.min(end);
                        contents[start..end].to_vec()
                    }
                    Err(_) => {
                        log::warn!("\"{}\" could not be opened!", path.display());
                        Vec::new()
                    }
                };
                Some(Payload::Bytes(pad_to_max(data, max_size, &path.display().to_string())))
            }
            HookKind::Immediate16 { ref symbol, ref modifier } => {
                match immediate_field(symbols, symbol, modifier)? {
                    Some(value) => Some(Payload::Half(mask_field(value, 16) as u16)),
                    None => None,
                }
            }
            HookKind::Immediate12 { ref symbol, ref modifier, w, i } => {
                match immediate_field(symbols, symbol, modifier)? {
                    Some(value) => {
                        let mut field = mask_field(value, 12);
                        field |= mask_field(i as u32, 1) << 12;
                        field |= mask_field(w as u32, 3) << 13;
                        Some(Payload::Half(field as u16))
                    }
                    None => None,
                }
            }
        };
        Ok(())
    }

    /// Writes the resolved payload into the DOL if the target address is
    /// mapped. Unresolved hooks leave the image untouched.
    pub fn apply_dol(&mut self, dol: &mut DolFile) -> Result<()> {
        let Some(ref payload) = self.payload else {
            return Ok(());
        };
        if !dol.is_mapped(self.addr) {
            return Ok(());
        }
        match *payload {
            Payload::Branch(target) => {
                let lk = matches!(self.kind, HookKind::Branch { lk: true, .. });
                dol.write_u32(self.addr, assemble_branch(self.addr, target, lk))?;
            }
            Payload::Word(value) => dol.write_u32(self.addr, value)?,
            Payload::Half(value) => dol.write_u16(self.addr, value)?,
            Payload::Bytes(ref bytes) => dol.write_bytes(self.addr, bytes)?,
        }
        self.applied = true;
        Ok(())
    }

    /// Emits the equivalent Gecko command if the hook resolved.
    pub fn write_gecko<W>(&mut self, w: &mut W) -> Result<()>
    where W: Write + ?Sized {
        let Some(ref payload) = self.payload else {
            return Ok(());
        };
        let addr = self.addr & 0x01FF_FFFF;
        let command = match *payload {
            Payload::Branch(target) => {
                // Branch targets are 4-aligned, so the link bit rides in the
                // low bit of the destination word.
                let lk = matches!(self.kind, HookKind::Branch { lk: true, .. });
                GeckoCommand::WriteBranch { addr, dest: target | lk as u32 }
            }
            Payload::Word(value) => GeckoCommand::Write32 { addr, value },
            Payload::Half(value) => GeckoCommand::Write16 { addr, count: 0, value },
            Payload::Bytes(ref bytes) => GeckoCommand::WriteString { addr, data: bytes.clone() },
        };
        writeln!(w, "{}", command.as_text())?;
        self.applied = true;
        Ok(())
    }

    /// One-line, fixed-width status for diagnostics.
    pub fn describe(&self) -> String {
        let arrow = if self.applied { "-->" } else { "-X>" };
        match self.kind {
            HookKind::Branch { ref symbol, lk } => {
                let kind = if lk { "[Branchlink]" } else { "[Branch]" };
                format!("{kind:<13} {:08X} {arrow} {symbol}", self.addr)
            }
            HookKind::Pointer { ref symbol } => {
                format!("{:<13} {:08X} {arrow} {symbol}", "[Pointer]", self.addr)
            }
            HookKind::String { ref string, .. } => {
                format!("{:<13} {:08X} {arrow} \"{}\"", "[String]", self.addr, string.escape_default())
            }
            HookKind::File { ref path, .. } => {
                format!("{:<13} {:08X} {arrow} \"{}\"", "[File]", self.addr, path.display())
            }
            HookKind::Immediate16 { ref symbol, ref modifier } => {
                format!("{:<13} {:08X} {arrow} {symbol} {modifier}", "[Immediate16]", self.addr)
            }
            HookKind::Immediate12 { ref symbol, ref modifier, .. } => {
                format!("{:<13} {:08X} {arrow} {symbol} {modifier}", "[Immediate12]", self.addr)
            }
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.describe()) }
}

fn pad_to_max(mut data: Vec<u8>, max: Option<usize>, what: &str) -> Vec<u8> {
    if let Some(max) = max {
        if data.len() > max {
            log::warn!("\"{what}\" exceeds {max} bytes!");
        } else {
            data.resize(max, 0);
        }
    }
    data
}

/// Computes the 16-bit address transform selected by `modifier`, before any
/// narrower masking. `Ok(None)` means the hook stays unresolved.
fn immediate_field(symbols: &SymbolTable, symbol: &str, modifier: &str) -> Result<Option<u32>> {
    let Some(value) = symbols.address_of(symbol) else {
        return Ok(None);
    };
    let field = match modifier {
        "@h" => hi(value) as u32,
        "@l" => lo(value) as u32,
        "@ha" => ha(value) as u32,
        "@sda" => {
            let Some(base) = symbols.sda_base() else {
                bail!(
                    "The project's sda_base must be set before using the @sda modifier. \
                     See set_sda_bases."
                );
            };
            mask_field(value.wrapping_sub(base), 16)
        }
        "@sda2" => {
            let Some(base) = symbols.sda2_base() else {
                bail!(
                    "The project's sda2_base must be set before using the @sda2 modifier. \
                     See set_sda_bases."
                );
            };
            mask_field(value.wrapping_sub(base), 16)
        }
        _ => {
            log::warn!("Unknown modifier: \"{modifier}\"");
            return Ok(None);
        }
    };
    Ok(Some(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        obj::{ObjSymbol, ObjSymbolKind, ObjSymbolScope, SymbolSection},
        util::dol::tests::test_dol,
    };

    fn table_with(name: &str, address: u32) -> SymbolTable {
        let mut table = SymbolTable::new();
        table.insert(ObjSymbol {
            name: name.to_string(),
            address,
            size: 4,
            scope: ObjSymbolScope::Global,
            kind: ObjSymbolKind::Function,
            section: SymbolSection::Index(1),
        });
        table
    }

    #[test]
    fn test_unresolved_hook_is_a_no_op() {
        let symbols = SymbolTable::new();
        let mut dol = test_dol(&[0u8; 0x100]);
        for mut hook in [
            Hook::branch(0x8000_3000, "Missing", false),
            Hook::pointer(0x8000_3004, "Missing"),
            Hook::immediate16(0x8000_3008, "Missing", "@l"),
            Hook::immediate12(0x8000_300A, 1, 0, "Missing", "@l"),
        ] {
            hook.resolve(&symbols).unwrap();
            assert!(!hook.is_resolved());
            hook.apply_dol(&mut dol).unwrap();
            assert!(!hook.is_applied());
            assert_eq!(dol.read_u32(hook.addr & !3).unwrap(), 0);
        }
    }

    #[test]
    fn test_pointer_hook_end_to_end() {
        let symbols = table_with("Foo", 0x8000_5000);
        let mut dol = test_dol(&[0u8; 0x100]);
        let mut hook = Hook::pointer(0x8000_3010, "Foo");
        hook.resolve(&symbols).unwrap();
        hook.apply_dol(&mut dol).unwrap();
        assert!(hook.is_applied());
        assert_eq!(dol.read_u32(0x8000_3010).unwrap(), 0x8000_5000);
        assert_eq!(hook.describe(), "[Pointer]     80003010 --> Foo");
    }

    #[test]
    fn test_branch_hook_encoding() {
        let symbols = table_with("Target", 0x8000_4000);
        let mut dol = test_dol(&[0u8; 0x100]);
        let mut hook = Hook::branch(0x8000_3000, "Target", true);
        hook.resolve(&symbols).unwrap();
        hook.apply_dol(&mut dol).unwrap();
        assert_eq!(dol.read_u32(0x8000_3000).unwrap(), 0x4800_1001);
    }

    #[test]
    fn test_immediate16_transforms() {
        let addr = 0x8044_8123;
        let symbols = table_with("Sym", addr);
        for (modifier, expected) in
            [("@h", 0x8044u16), ("@ha", 0x8045), ("@l", 0x8123)]
        {
            let mut hook = Hook::immediate16(0x8000_3010, "Sym", modifier);
            hook.resolve(&symbols).unwrap();
            assert_eq!(hook.payload, Some(Payload::Half(expected)), "{modifier}");
        }
    }

    #[test]
    fn test_immediate16_unknown_modifier() {
        let symbols = table_with("Sym", 0x8000_5000);
        let mut hook = Hook::immediate16(0x8000_3010, "Sym", "@bogus");
        hook.resolve(&symbols).unwrap();
        assert!(!hook.is_resolved());
    }

    #[test]
    fn test_immediate12_packing() {
        let symbols = table_with("Sym", 0x8000_5FF4);
        let mut hook = Hook::immediate12(0x8000_3012, 0b101, 1, "Sym", "@l");
        hook.resolve(&symbols).unwrap();
        let Some(Payload::Half(field)) = hook.payload else {
            panic!("hook did not resolve");
        };
        // Round-trip the three sub-fields.
        assert_eq!(field & 0x0FFF, 0xFF4);
        assert_eq!((field >> 12) & 1, 1);
        assert_eq!(field >> 13, 0b101);
    }

    #[test]
    fn test_sda_offsets() {
        let mut symbols = table_with("small_data", 0x8044_7F00);
        symbols.set_sda_bases(Some(0x8044_8000), Some(0x8045_0000));
        let mut hook = Hook::immediate16(0x8000_3010, "small_data", "@sda");
        hook.resolve(&symbols).unwrap();
        // 0x80447F00 - 0x80448000 = -0x100, reinterpreted as signed 16-bit
        assert_eq!(hook.payload, Some(Payload::Half(0xFF00)));

        let mut hook2 = Hook::immediate16(0x8000_3010, "small_data", "@sda2");
        hook2.resolve(&symbols).unwrap();
        assert_eq!(hook2.payload, Some(Payload::Half(0x7F00)));
    }

    #[test]
    fn test_sda_without_base_is_fatal() {
        let symbols = table_with("small_data", 0x8044_7F00);
        let mut hook = Hook::immediate16(0x8000_3010, "small_data", "@sda");
        assert!(hook.resolve(&symbols).is_err());
    }

    #[test]
    fn test_string_hook_padding() {
        let symbols = SymbolTable::new();
        let mut hook = Hook::string(0x8000_3010, "hi", Some(8));
        hook.resolve(&symbols).unwrap();
        assert_eq!(hook.payload, Some(Payload::Bytes(vec![b'h', b'i', 0, 0, 0, 0, 0, 0])));
    }

    #[test]
    fn test_missing_file_resolves_empty() {
        let symbols = SymbolTable::new();
        let mut hook =
            Hook::file(0x8000_3010, PathBuf::from("/nonexistent/file.bin"), 0, None, None);
        hook.resolve(&symbols).unwrap();
        assert_eq!(hook.payload, Some(Payload::Bytes(Vec::new())));
    }

    #[test]
    fn test_write_gecko() {
        let symbols = table_with("Foo", 0x8000_5000);
        let mut hook = Hook::pointer(0x8000_3010, "Foo");
        hook.resolve(&symbols).unwrap();
        let mut out = Vec::new();
        hook.write_gecko(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "04003010 80005000\n");
        assert!(hook.is_applied());

        // Unresolved hooks emit nothing.
        let mut missing = Hook::pointer(0x8000_3010, "Missing");
        missing.resolve(&SymbolTable::new()).unwrap();
        let mut out = Vec::new();
        missing.write_gecko(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
