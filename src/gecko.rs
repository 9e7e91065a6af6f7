//! Gecko (WiiRd) code table support: the decoded command model, text/GCT
//! parsing, direct application of write commands to a DOL, and relocation of
//! inline-assembly insert commands into an appended section.

use std::{fmt, io::BufRead};

use anyhow::{bail, ensure, Result};

use crate::{ppc::assemble_branch, util::dol::DolFile};

pub const GCT_MAGIC: u32 = 0x00D0_C0DE;
pub const GCT_END: u32 = 0xF000_0000;

/// A single decoded Gecko command. Addresses are stored as the 25-bit field
/// from the command word; [`GeckoCommand::origin_address`] yields the full
/// virtual address (the 0x80000000 base is assumed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeckoCommand {
    /// `00`: repeated 8-bit write.
    Write8 { addr: u32, count: u16, value: u8 },
    /// `02`: repeated 16-bit write.
    Write16 { addr: u32, count: u16, value: u16 },
    /// `04`: 32-bit write.
    Write32 { addr: u32, value: u32 },
    /// `06`: string write.
    WriteString { addr: u32, data: Vec<u8> },
    /// `08`: serial write with address and value strides.
    WriteSerial { addr: u32, value: u32, value_size: u8, count: u16, addr_inc: u16, val_inc: u32 },
    /// `C6`: write a branch at `addr` targeting `dest`.
    WriteBranch { addr: u32, dest: u32 },
    /// `C2`/`F2`: insert inline assembly at `addr`. `code` is the raw payload
    /// in 8-byte lines, ending with the placeholder branch line. The XOR
    /// variant carries its checksum parameters through unmodified.
    AsmInsert { addr: u32, code: Vec<u8>, xor: Option<AsmInsertXor> },
    /// Anything else: carried through as raw words for diagnostics.
    Unknown { words: Vec<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsmInsertXor {
    pub checksum: u16,
    pub num_lines: u8,
}

impl GeckoCommand {
    /// Whether this command kind survives a DOL build (either applied
    /// directly or relocated).
    pub fn is_supported(&self) -> bool { !matches!(self, GeckoCommand::Unknown { .. }) }

    /// Full virtual address the command targets.
    pub fn origin_address(&self) -> u32 {
        match *self {
            GeckoCommand::Write8 { addr, .. }
            | GeckoCommand::Write16 { addr, .. }
            | GeckoCommand::Write32 { addr, .. }
            | GeckoCommand::WriteString { addr, .. }
            | GeckoCommand::WriteSerial { addr, .. }
            | GeckoCommand::WriteBranch { addr, .. }
            | GeckoCommand::AsmInsert { addr, .. } => 0x8000_0000 | addr,
            GeckoCommand::Unknown { .. } => 0,
        }
    }

    /// Applies a direct write command to the DOL. Insert commands are handled
    /// by the relocator; unknown commands are ignored.
    pub fn apply_dol(&self, dol: &mut DolFile) -> Result<()> {
        match *self {
            GeckoCommand::Write8 { count, value, .. } => {
                let base = self.origin_address();
                for i in 0..count as u32 + 1 {
                    dol.write_u8(base + i, value)?;
                }
            }
            GeckoCommand::Write16 { count, value, .. } => {
                let base = self.origin_address();
                for i in 0..count as u32 + 1 {
                    dol.write_u16(base + i * 2, value)?;
                }
            }
            GeckoCommand::Write32 { value, .. } => {
                dol.write_u32(self.origin_address(), value)?;
            }
            GeckoCommand::WriteString { ref data, .. } => {
                dol.write_bytes(self.origin_address(), data)?;
            }
            GeckoCommand::WriteSerial { value, value_size, count, addr_inc, val_inc, .. } => {
                let mut addr = self.origin_address();
                let mut value = value;
                for _ in 0..count as u32 + 1 {
                    match value_size {
                        0 => dol.write_u8(addr, value as u8)?,
                        1 => dol.write_u16(addr, value as u16)?,
                        _ => dol.write_u32(addr, value)?,
                    }
                    addr += addr_inc as u32;
                    value = value.wrapping_add(val_inc);
                }
            }
            GeckoCommand::WriteBranch { dest, .. } => {
                let addr = self.origin_address();
                dol.write_u32(addr, assemble_branch(addr, 0x8000_0000 | dest, false))?;
            }
            GeckoCommand::AsmInsert { .. } | GeckoCommand::Unknown { .. } => {}
        }
        Ok(())
    }

    fn to_words(&self) -> Vec<u32> {
        fn data_words(out: &mut Vec<u32>, data: &[u8]) {
            for chunk in data.chunks(4) {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                out.push(u32::from_be_bytes(word));
            }
            if out.len() % 2 != 0 {
                out.push(0);
            }
        }
        let mut out = Vec::new();
        match *self {
            GeckoCommand::Write8 { addr, count, value } => {
                out.push(addr);
                out.push(((count as u32) << 16) | value as u32);
            }
            GeckoCommand::Write16 { addr, count, value } => {
                out.push(0x0200_0000 | addr);
                out.push(((count as u32) << 16) | value as u32);
            }
            GeckoCommand::Write32 { addr, value } => {
                out.push(0x0400_0000 | addr);
                out.push(value);
            }
            GeckoCommand::WriteString { addr, ref data } => {
                out.push(0x0600_0000 | addr);
                out.push(data.len() as u32);
                data_words(&mut out, data);
            }
            GeckoCommand::WriteSerial { addr, value, value_size, count, addr_inc, val_inc } => {
                out.push(0x0800_0000 | addr);
                out.push(value);
                out.push(((value_size as u32) << 28) | ((count as u32) << 16) | addr_inc as u32);
                out.push(val_inc);
            }
            GeckoCommand::WriteBranch { addr, dest } => {
                out.push(0xC600_0000 | addr);
                out.push(dest);
            }
            GeckoCommand::AsmInsert { addr, ref code, xor } => {
                let lines = (code.len() / 8) as u32;
                match xor {
                    Some(x) => {
                        out.push(0xF200_0000 | addr);
                        out.push(
                            ((x.checksum as u32) << 16) | ((x.num_lines as u32) << 8) | lines,
                        );
                    }
                    None => {
                        out.push(0xC200_0000 | addr);
                        out.push(lines);
                    }
                }
                data_words(&mut out, code);
            }
            GeckoCommand::Unknown { ref words } => out.extend_from_slice(words),
        }
        out
    }

    /// Renders the command in its native text form: one `XXXXXXXX YYYYYYYY`
    /// pair per line.
    pub fn as_text(&self) -> String {
        let words = self.to_words();
        let mut out = String::new();
        for pair in words.chunks(2) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("{:08X} {:08X}", pair[0], *pair.get(1).unwrap_or(&0)));
        }
        out
    }
}

impl fmt::Display for GeckoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_text()) }
}

/// Decodes a word stream into commands. Used by both the text and GCT
/// parsers; the encodings are identical.
fn parse_commands(words: &[u32]) -> Result<Vec<GeckoCommand>> {
    let mut commands = Vec::new();
    let mut iter = words.iter().copied();
    while let Some(word) = iter.next() {
        let mut next = || {
            iter.next().ok_or_else(|| anyhow::anyhow!("Truncated Gecko command {word:#010X}"))
        };
        let addr = word & 0x01FF_FFFF;
        let ct = (word >> 24) & !1;
        let command = match ct {
            0x00 => {
                let value = next()?;
                GeckoCommand::Write8 {
                    addr,
                    count: (value >> 16) as u16,
                    value: value as u8,
                }
            }
            0x02 => {
                let value = next()?;
                GeckoCommand::Write16 {
                    addr,
                    count: (value >> 16) as u16,
                    value: value as u16,
                }
            }
            0x04 => GeckoCommand::Write32 { addr, value: next()? },
            0x06 => {
                let len = next()? as usize;
                let mut data = Vec::with_capacity(len);
                while data.len() < len {
                    let word = next()?;
                    let take = (len - data.len()).min(4);
                    data.extend_from_slice(&word.to_be_bytes()[..take]);
                }
                // data is padded to a full 8-byte line
                if (len + 3) / 4 % 2 != 0 {
                    next()?;
                }
                GeckoCommand::WriteString { addr, data }
            }
            0x08 => {
                let value = next()?;
                let stride = next()?;
                let val_inc = next()?;
                GeckoCommand::WriteSerial {
                    addr,
                    value,
                    value_size: (stride >> 28) as u8,
                    count: (stride >> 16) as u16 & 0x0FFF,
                    addr_inc: stride as u16,
                    val_inc,
                }
            }
            0xC6 => GeckoCommand::WriteBranch { addr, dest: next()? },
            0xC2 | 0xF2 => {
                let info = next()?;
                let (lines, xor) = if ct == 0xF2 {
                    (info & 0xFF, Some(AsmInsertXor {
                        checksum: (info >> 16) as u16,
                        num_lines: (info >> 8) as u8,
                    }))
                } else {
                    (info, None)
                };
                let mut code = Vec::with_capacity(lines as usize * 8);
                for _ in 0..lines {
                    code.extend_from_slice(&next()?.to_be_bytes());
                    code.extend_from_slice(&next()?.to_be_bytes());
                }
                ensure!(
                    code.len() >= 8,
                    "ASM insert at {addr:#010X} has no payload",
                );
                GeckoCommand::AsmInsert { addr, code, xor }
            }
            0xC0 => {
                // Embedded ASM is unsupported, but its payload length must be
                // consumed to keep the word stream in sync.
                let lines = next()?;
                let mut words = vec![word, lines];
                for _ in 0..lines * 2 {
                    words.push(next()?);
                }
                GeckoCommand::Unknown { words }
            }
            // Every other codetype (conditionals, repeats, terminators) spans
            // exactly two words.
            _ => GeckoCommand::Unknown { words: vec![word, next().unwrap_or(0)] },
        };
        commands.push(command);
    }
    Ok(commands)
}

#[derive(Debug, Clone)]
pub struct GeckoCode {
    pub name: String,
    pub enabled: bool,
    pub commands: Vec<GeckoCommand>,
}

impl GeckoCode {
    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn is_supported(&self) -> bool { self.commands.iter().all(GeckoCommand::is_supported) }

    pub fn as_text(&self) -> String {
        let mut out = String::new();
        for command in &self.commands {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&command.as_text());
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeckoCodeTable {
    pub codes: Vec<GeckoCode>,
}

impl GeckoCodeTable {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, code: GeckoCode) { self.codes.push(code); }

    pub fn iter(&self) -> std::slice::Iter<'_, GeckoCode> { self.codes.iter() }

    /// Parses the Dolphin-style text form: `$Name` starts a code, `*` lines
    /// are comments, everything else is `XXXXXXXX YYYYYYYY` word pairs.
    /// A `$Name` prefixed with `-` is parsed as disabled.
    pub fn parse_text<R>(&mut self, reader: R) -> Result<()>
    where R: BufRead {
        let mut name = None::<(String, bool)>;
        let mut words = Vec::<u32>::new();
        let mut flush = |name: &Option<(String, bool)>, words: &mut Vec<u32>| -> Result<()> {
            if let Some((name, enabled)) = name {
                self.codes.push(GeckoCode {
                    name: name.clone(),
                    enabled: *enabled,
                    commands: parse_commands(words)?,
                });
            }
            words.clear();
            Ok(())
        };
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('*') || line.starts_with('[') {
                continue;
            }
            if let Some(header) = line.strip_prefix('$') {
                flush(&name, &mut words)?;
                let (header, enabled) = match header.strip_prefix('-') {
                    Some(rest) => (rest, false),
                    None => (header, true),
                };
                name = Some((header.trim().to_string(), enabled));
                continue;
            }
            for part in line.split_whitespace() {
                let word = u32::from_str_radix(part, 16)
                    .map_err(|_| anyhow::anyhow!("Invalid Gecko code line: '{line}'"))?;
                words.push(word);
            }
        }
        flush(&name, &mut words)?;
        Ok(())
    }

    /// Parses a binary GCT: `00D0C0DE 00D0C0DE` header, commands, `F0000000`
    /// terminator. The whole table becomes one enabled code.
    pub fn parse_gct(&mut self, buf: &[u8], name: &str) -> Result<()> {
        ensure!(buf.len() % 4 == 0 && buf.len() >= 16, "Invalid GCT size {:#X}", buf.len());
        let words: Vec<u32> =
            buf.chunks_exact(4).map(|c| u32::from_be_bytes(c.try_into().unwrap())).collect();
        ensure!(words[0] == GCT_MAGIC && words[1] == GCT_MAGIC, "Missing GCT magic");
        let end = words
            .iter()
            .rposition(|&w| w == GCT_END)
            .ok_or_else(|| anyhow::anyhow!("Missing GCT terminator"))?;
        self.codes.push(GeckoCode {
            name: name.to_string(),
            enabled: true,
            commands: parse_commands(&words[2..end])?,
        });
        Ok(())
    }

    /// Applies every enabled code's direct write commands to the DOL.
    /// Insert commands are left to the relocator; unsupported commands are
    /// skipped per command, so a code that mixes writes with unsupported
    /// codetypes still gets its writes.
    pub fn apply_dol(&self, dol: &mut DolFile) -> Result<()> {
        for code in self.codes.iter().filter(|c| c.is_enabled()) {
            for command in &code.commands {
                command.apply_dol(dol)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeckoStatus {
    Enabled,
    Disabled,
    Omitted,
}

impl fmt::Display for GeckoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeckoStatus::Enabled => write!(f, "ENABLED"),
            GeckoStatus::Disabled => write!(f, "DISABLED"),
            GeckoStatus::Omitted => write!(f, "OMITTED"),
        }
    }
}

/// Placement record for one relocated (or skipped) ASM insert command.
#[derive(Debug, Clone)]
pub struct GeckoCommandMeta {
    pub address: u32,
    pub size: u32,
    pub status: GeckoStatus,
    pub index: usize,
}

/// Placement record for one code entry, for symbol map rendering.
#[derive(Debug, Clone)]
pub struct GeckoCodeMeta {
    pub address: u32,
    pub size: u32,
    pub status: GeckoStatus,
    pub name: String,
    pub commands: Vec<GeckoCommandMeta>,
}

/// Relocates every enabled ASM insert command into the data blob, rewriting
/// its origin site to branch into the blob and appending a branch back to the
/// instruction after the origin. Returns placement metadata for the map.
///
/// The blob addresses assigned here depend only on the table order, so this
/// must run before anything else is appended to the blob.
pub fn relocate_codetable(
    dol: &mut DolFile,
    table: &GeckoCodeTable,
    base_addr: u32,
    blob: &mut Vec<u8>,
) -> Result<Vec<GeckoCodeMeta>> {
    let mut metadata = Vec::new();
    for code in table.iter() {
        let status = if !code.is_enabled() {
            GeckoStatus::Disabled
        } else if !code.is_supported() {
            GeckoStatus::Omitted
        } else {
            GeckoStatus::Enabled
        };
        log::info!("[GeckoCode]   {:12} ${}", status.to_string(), code.name);
        if status == GeckoStatus::Omitted {
            log::warn!("${} includes unsupported codetypes:", code.name);
            for command in code.commands.iter().filter(|c| !c.is_supported()) {
                log::warn!("{command}");
            }
        }

        let vaddress = base_addr + blob.len() as u32;
        let mut geckoblob = Vec::<u8>::new();
        let mut command_meta = Vec::new();
        for (index, command) in code.commands.iter().enumerate() {
            let GeckoCommand::AsmInsert { ref code, .. } = *command else {
                continue;
            };
            if status != GeckoStatus::Enabled {
                command_meta.push(GeckoCommandMeta {
                    address: 0,
                    size: code.len() as u32,
                    status,
                    index,
                });
                continue;
            }
            let origin = command.origin_address();
            let placement = vaddress + geckoblob.len() as u32;
            dol.write_u32(origin, assemble_branch(origin, placement, false))?;
            command_meta.push(GeckoCommandMeta {
                address: placement,
                size: code.len() as u32,
                status,
                index,
            });
            // Drop the placeholder branch line and return to the instruction
            // after the hook site.
            geckoblob.extend_from_slice(&code[..code.len() - 4]);
            let branch_addr = vaddress + geckoblob.len() as u32;
            geckoblob
                .extend_from_slice(&assemble_branch(branch_addr, origin + 4, false).to_be_bytes());
        }
        blob.extend_from_slice(&geckoblob);
        if !command_meta.is_empty() {
            metadata.push(GeckoCodeMeta {
                address: vaddress,
                size: geckoblob.len() as u32,
                status,
                name: code.name.clone(),
                commands: command_meta,
            });
        }
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::dol::tests::test_dol;

    fn insert_code(origin_field: u32, code: Vec<u8>) -> GeckoCode {
        GeckoCode {
            name: "Test".to_string(),
            enabled: true,
            commands: vec![GeckoCommand::AsmInsert { addr: origin_field, code, xor: None }],
        }
    }

    #[test]
    fn test_parse_text() {
        let text = "$Example Code\n\
                    * a comment\n\
                    04003010 60000000\n\
                    02003020 00030001\n\
                    $-Disabled Code\n\
                    00003030 000000FF\n";
        let mut table = GeckoCodeTable::new();
        table.parse_text(text.as_bytes()).unwrap();
        assert_eq!(table.codes.len(), 2);
        assert!(table.codes[0].enabled);
        assert_eq!(table.codes[0].commands, vec![
            GeckoCommand::Write32 { addr: 0x3010, value: 0x6000_0000 },
            GeckoCommand::Write16 { addr: 0x3020, count: 3, value: 1 },
        ]);
        assert!(!table.codes[1].enabled);
        assert_eq!(table.codes[1].commands, vec![GeckoCommand::Write8 {
            addr: 0x3030,
            count: 0,
            value: 0xFF
        }]);
    }

    #[test]
    fn test_text_round_trip() {
        let command = GeckoCommand::Write32 { addr: 0x3010, value: 0x1234_5678 };
        assert_eq!(command.as_text(), "04003010 12345678");
        let insert = GeckoCommand::AsmInsert {
            addr: 0x3100,
            code: vec![0x60, 0, 0, 0, 0x60, 0, 0, 0, 0x60, 0, 0, 0, 0, 0, 0, 0],
            xor: None,
        };
        assert_eq!(insert.as_text(), "C2003100 00000002\n60000000 60000000\n60000000 00000000");
        let mut table = GeckoCodeTable::new();
        table.parse_text(format!("$X\n{}", insert.as_text()).as_bytes()).unwrap();
        assert_eq!(table.codes[0].commands[0], insert);
    }

    #[test]
    fn test_apply_write_commands() {
        let mut dol = test_dol(&[0u8; 0x100]);
        let mut table = GeckoCodeTable::new();
        table.add(GeckoCode {
            name: "Writes".to_string(),
            enabled: true,
            commands: vec![
                GeckoCommand::Write32 { addr: 0x3010, value: 0xDEAD_BEEF },
                GeckoCommand::Write8 { addr: 0x3020, count: 3, value: 0x11 },
            ],
        });
        table.apply_dol(&mut dol).unwrap();
        assert_eq!(dol.read_u32(0x8000_3010).unwrap(), 0xDEAD_BEEF);
        assert_eq!(dol.read_u32(0x8000_3020).unwrap(), 0x1111_1111);
    }

    #[test]
    fn test_apply_writes_of_partially_supported_code() {
        let mut dol = test_dol(&[0u8; 0x100]);
        let mut table = GeckoCodeTable::new();
        table.add(GeckoCode {
            name: "Mixed".to_string(),
            enabled: true,
            commands: vec![
                GeckoCommand::Write32 { addr: 0x3010, value: 0xDEAD_BEEF },
                GeckoCommand::Unknown { words: vec![0xDE00_0000, 0] },
            ],
        });
        table.apply_dol(&mut dol).unwrap();
        // The unsupported command only costs the code its relocation, not
        // its plain writes.
        assert_eq!(dol.read_u32(0x8000_3010).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_embedded_asm_keeps_stream_in_sync() {
        let text = "$Embedded\n\
                    C0000000 00000001\n\
                    4E800020 00000000\n\
                    04003010 60000000\n";
        let mut table = GeckoCodeTable::new();
        table.parse_text(text.as_bytes()).unwrap();
        let commands = &table.codes[0].commands;
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], GeckoCommand::Unknown {
            words: vec![0xC000_0000, 1, 0x4E80_0020, 0]
        });
        assert_eq!(commands[1], GeckoCommand::Write32 { addr: 0x3010, value: 0x6000_0000 });
    }

    #[test]
    fn test_relocate_insert() {
        let mut dol = test_dol(&[0u8; 0x100]);
        // Payload: two real instructions plus the placeholder line.
        let code = vec![
            0x38, 0x60, 0x00, 0x01, // li r3, 1
            0x38, 0x80, 0x00, 0x02, // li r4, 2
            0x60, 0x00, 0x00, 0x00, // nop (pad)
            0x00, 0x00, 0x00, 0x00, // placeholder branch
        ];
        let mut table = GeckoCodeTable::new();
        table.add(insert_code(0x3040, code.clone()));

        let base_addr = 0x8000_4000;
        let mut blob = Vec::new();
        let meta = relocate_codetable(&mut dol, &table, base_addr, &mut blob).unwrap();

        // Origin now branches into the blob.
        assert_eq!(dol.read_u32(0x8000_3040).unwrap(), assemble_branch(0x8000_3040, base_addr, false));
        // Blob: payload minus placeholder, then a branch back to origin+4.
        assert_eq!(&blob[..12], &code[..12]);
        let branch = u32::from_be_bytes(blob[12..16].try_into().unwrap());
        assert_eq!(branch, assemble_branch(base_addr + 12, 0x8000_3044, false));
        assert_eq!(blob.len(), 16);

        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].status, GeckoStatus::Enabled);
        assert_eq!(meta[0].commands[0].address, base_addr);
        assert_eq!(meta[0].commands[0].size, code.len() as u32);
    }

    #[test]
    fn test_relocate_skips_disabled_and_omitted() {
        let mut dol = test_dol(&[0u8; 0x100]);
        let mut table = GeckoCodeTable::new();
        let mut disabled = insert_code(0x3040, vec![0; 16]);
        disabled.enabled = false;
        table.add(disabled);
        let mut omitted = insert_code(0x3050, vec![0; 16]);
        omitted.commands.push(GeckoCommand::Unknown { words: vec![0xDE00_0000, 0] });
        table.add(omitted);

        let mut blob = Vec::new();
        let meta = relocate_codetable(&mut dol, &table, 0x8000_4000, &mut blob).unwrap();
        assert!(blob.is_empty());
        // Origins untouched
        assert_eq!(dol.read_u32(0x8000_3040).unwrap(), 0);
        assert_eq!(meta[0].status, GeckoStatus::Disabled);
        assert_eq!(meta[0].commands[0].address, 0);
        assert_eq!(meta[1].status, GeckoStatus::Omitted);
        assert_eq!(meta[1].commands[0].address, 0);
    }
}
