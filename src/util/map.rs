//! Writes a CodeWarrior-style symbol map for the patched image: object
//! symbols grouped by section, placement records for relocated Gecko
//! fragments, and one workaround entry for Dolphin's map loader.

use std::io::Write;

use anyhow::Result;
use itertools::Itertools;

use crate::{
    gecko::{GeckoCodeMeta, GeckoStatus},
    util::elf::MapSymbol,
};

fn write_section_header<W>(w: &mut W, name: &str) -> Result<()>
where W: Write + ?Sized {
    write!(
        w,
        "\n\
         {name} section layout\n\
         \x20 Starting        Virtual\n\
         \x20 address  Size   address\n\
         \x20 -----------------------\n"
    )?;
    Ok(())
}

/// Renders the full map. `symbols` may be empty (e.g. when the linked object
/// was unreadable); the Gecko and workaround sections are written regardless.
pub fn write_map<W>(
    w: &mut W,
    symbols: &[MapSymbol],
    base_addr: u32,
    gecko_meta: &[GeckoCodeMeta],
) -> Result<()>
where
    W: Write + ?Sized,
{
    let mut current_section = None::<&str>;
    for symbol in symbols.iter().sorted_by_key(|s| s.address) {
        if current_section != Some(symbol.section.as_str()) {
            current_section = Some(symbol.section.as_str());
            write_section_header(w, &symbol.section)?;
        }
        write!(
            w,
            "  {:08X} {:06X} {:08X}  0 {}\n",
            symbol.address.wrapping_sub(base_addr),
            symbol.size,
            symbol.address,
            symbol.name
        )?;
    }

    // Relocated C2/F2 fragments. Only .init and .text section headers tell
    // Dolphin to color the symbols by index, hence the section name.
    if !gecko_meta.is_empty() {
        write_section_header(w, ".text")?;
        for code in gecko_meta {
            for command in &code.commands {
                if command.status == GeckoStatus::Enabled {
                    write!(
                        w,
                        "  {:08X} {:06X} {:08X}  0 {}${}\n",
                        command.address.wrapping_sub(base_addr),
                        command.size,
                        command.address,
                        code.name,
                        command.index
                    )?;
                } else {
                    write!(
                        w,
                        "  UNUSED   {:06X} ........ {}${}\n",
                        command.size, code.name, command.index
                    )?;
                }
            }
        }
    }

    // The final valid symbol loaded by Dolphin (<= 5.0-13603) loses its
    // size, so a dummy symbol is thrown into the map at a dubious address.
    write_section_header(w, ".dummy")?;
    write!(w, "  00000000 000000 81200000  0 Workaround for Dolphin's bad symbol map loader\n")?;
    Ok(())
}
