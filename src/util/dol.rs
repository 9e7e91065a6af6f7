use std::{
    io,
    io::{Cursor, Write},
};

use anyhow::{anyhow, bail, ensure, Result};

use crate::util::{
    align_up,
    reader::{skip_bytes, Endian, FromReader, ToWriter},
};

pub const MAX_TEXT_SECTIONS: usize = 7;
pub const MAX_DATA_SECTIONS: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DolSectionKind {
    Text,
    Data,
    Bss,
}

#[derive(Debug, Clone)]
pub struct DolSection {
    pub address: u32,
    pub file_offset: u32,
    pub size: u32,
    pub kind: DolSectionKind,
}

#[derive(Debug, Clone, Default)]
pub struct DolHeader {
    pub text_offs: [u32; MAX_TEXT_SECTIONS],
    pub data_offs: [u32; MAX_DATA_SECTIONS],
    pub text_addrs: [u32; MAX_TEXT_SECTIONS],
    pub data_addrs: [u32; MAX_DATA_SECTIONS],
    pub text_sizes: [u32; MAX_TEXT_SECTIONS],
    pub data_sizes: [u32; MAX_DATA_SECTIONS],
    pub bss_addr: u32,
    pub bss_size: u32,
    pub entry_point: u32,
}

impl DolHeader {
    pub const STATIC_SIZE: usize = 0x100;
}

impl FromReader for DolHeader {
    const STATIC_SIZE: usize = DolHeader::STATIC_SIZE;

    fn from_reader<R>(reader: &mut R, e: Endian) -> io::Result<Self>
    where R: io::Read + io::Seek + ?Sized {
        let result = Self {
            text_offs: <_>::from_reader(reader, e)?,
            data_offs: <_>::from_reader(reader, e)?,
            text_addrs: <_>::from_reader(reader, e)?,
            data_addrs: <_>::from_reader(reader, e)?,
            text_sizes: <_>::from_reader(reader, e)?,
            data_sizes: <_>::from_reader(reader, e)?,
            bss_addr: u32::from_reader(reader, e)?,
            bss_size: u32::from_reader(reader, e)?,
            entry_point: u32::from_reader(reader, e)?,
        };
        skip_bytes::<0x1C, _>(reader)?; // padding
        Ok(result)
    }
}

impl ToWriter for DolHeader {
    fn to_writer<W>(&self, writer: &mut W, e: Endian) -> io::Result<()>
    where W: Write + ?Sized {
        self.text_offs.to_writer(writer, e)?;
        self.data_offs.to_writer(writer, e)?;
        self.text_addrs.to_writer(writer, e)?;
        self.data_addrs.to_writer(writer, e)?;
        self.text_sizes.to_writer(writer, e)?;
        self.data_sizes.to_writer(writer, e)?;
        self.bss_addr.to_writer(writer, e)?;
        self.bss_size.to_writer(writer, e)?;
        self.entry_point.to_writer(writer, e)?;
        // padding
        for _ in 0..0x1C {
            writer.write_all(&[0])?;
        }
        Ok(())
    }

    fn write_size(&self) -> usize { Self::STATIC_SIZE }
}

/// A mutable DOL executable image. The full file contents are kept in memory;
/// virtual-address writes patch the backing buffer in place, and appended
/// sections grow it.
#[derive(Debug, Clone)]
pub struct DolFile {
    pub header: DolHeader,
    pub sections: Vec<DolSection>,
    data: Vec<u8>,
}

impl DolFile {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure!(buf.len() >= DolHeader::STATIC_SIZE, "DOL file too small ({} bytes)", buf.len());
        let header = DolHeader::from_reader(&mut Cursor::new(buf), Endian::Big)?;
        let mut sections = Vec::new();
        for (idx, &size) in header.text_sizes.iter().enumerate() {
            if size == 0 {
                continue;
            }
            sections.push(DolSection {
                address: header.text_addrs[idx],
                file_offset: header.text_offs[idx],
                size,
                kind: DolSectionKind::Text,
            });
        }
        for (idx, &size) in header.data_sizes.iter().enumerate() {
            if size == 0 {
                continue;
            }
            sections.push(DolSection {
                address: header.data_addrs[idx],
                file_offset: header.data_offs[idx],
                size,
                kind: DolSectionKind::Data,
            });
        }
        if header.bss_size > 0 {
            sections.push(DolSection {
                address: header.bss_addr,
                file_offset: 0,
                size: header.bss_size,
                kind: DolSectionKind::Bss,
            });
        }
        for section in sections.iter().filter(|s| s.kind != DolSectionKind::Bss) {
            ensure!(
                section.file_offset as usize + section.size as usize <= buf.len(),
                "Section {:#010X}..{:#010X} extends past end of file",
                section.address,
                section.address + section.size
            );
        }
        Ok(Self { header, sections, data: buf.to_vec() })
    }

    fn section_for(&self, addr: u32, size: u32) -> Option<&DolSection> {
        self.sections.iter().filter(|s| s.kind != DolSectionKind::Bss).find(|s| {
            addr >= s.address && addr as u64 + size as u64 <= s.address as u64 + s.size as u64
        })
    }

    /// Whether `addr` falls within a loadable (non-BSS) section.
    pub fn is_mapped(&self, addr: u32) -> bool { self.section_for(addr, 1).is_some() }

    pub fn read_u32(&self, addr: u32) -> Result<u32> {
        let section = self
            .section_for(addr, 4)
            .ok_or_else(|| anyhow!("Address {addr:#010X} is not mapped"))?;
        let offset = (section.file_offset + (addr - section.address)) as usize;
        Ok(u32::from_be_bytes(*crate::array_ref!(self.data, offset, 4)))
    }

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let section = self
            .section_for(addr, bytes.len() as u32)
            .ok_or_else(|| anyhow!("Address {addr:#010X} is not mapped"))?;
        let offset = (section.file_offset + (addr - section.address)) as usize;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write_bytes(addr, &[value])
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_bytes(addr, &value.to_be_bytes())
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_bytes(addr, &value.to_be_bytes())
    }

    /// End of the highest-addressed loadable section. BSS is deliberately
    /// excluded, matching the runtime's view of ROM contents.
    pub fn rom_end(&self) -> u32 {
        self.sections
            .iter()
            .filter(|s| s.kind != DolSectionKind::Bss)
            .map(|s| s.address + s.size)
            .max()
            .unwrap_or(0x8000_0000)
            .max(0x8000_0000)
    }

    fn free_text_slot(&self) -> Option<usize> {
        self.header.text_sizes.iter().position(|&size| size == 0)
    }

    fn free_data_slot(&self) -> Option<usize> {
        self.header.data_sizes.iter().position(|&size| size == 0)
    }

    /// Appends a new section at `address`, preferring a text slot so that
    /// Dolphin colors the appended code by symbol index. Fails without
    /// mutating the image when every slot is taken.
    pub fn append_section(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let size = data.len() as u32;
        ensure!(size > 0, "Refusing to append an empty section");
        let file_offset = align_up(self.data.len() as u32, 32);
        let (kind, slot) = if let Some(slot) = self.free_text_slot() {
            (DolSectionKind::Text, slot)
        } else if let Some(slot) = self.free_data_slot() {
            (DolSectionKind::Data, slot)
        } else {
            bail!("DOL is full! Cannot allocate any new sections");
        };
        match kind {
            DolSectionKind::Text => {
                self.header.text_offs[slot] = file_offset;
                self.header.text_addrs[slot] = address;
                self.header.text_sizes[slot] = size;
            }
            DolSectionKind::Data => {
                self.header.data_offs[slot] = file_offset;
                self.header.data_addrs[slot] = address;
                self.header.data_sizes[slot] = size;
            }
            DolSectionKind::Bss => unreachable!(),
        }
        self.data.resize(file_offset as usize, 0);
        self.data.extend_from_slice(data);
        self.sections.push(DolSection { address, file_offset, size, kind });
        Ok(())
    }

    pub fn save<W>(&self, writer: &mut W) -> Result<()>
    where W: Write + ?Sized {
        self.header.to_writer(writer, Endian::Big)?;
        writer.write_all(&self.data[DolHeader::STATIC_SIZE..])?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a single-text-section DOL image for tests:
    /// [0x80003000, 0x80003000 + data len).
    pub(crate) fn test_dol(data: &[u8]) -> DolFile {
        let mut header = DolHeader::default();
        header.text_offs[0] = DolHeader::STATIC_SIZE as u32;
        header.text_addrs[0] = 0x8000_3000;
        header.text_sizes[0] = data.len() as u32;
        header.entry_point = 0x8000_3000;
        let mut out = Vec::new();
        header.to_writer(&mut out, Endian::Big).unwrap();
        out.extend_from_slice(data);
        DolFile::parse(&out).unwrap()
    }

    #[test]
    fn test_parse_and_rom_end() {
        let dol = test_dol(&[0u8; 0x1000]);
        assert_eq!(dol.sections.len(), 1);
        assert_eq!(dol.rom_end(), 0x8000_4000);
        assert!(dol.is_mapped(0x8000_3000));
        assert!(dol.is_mapped(0x8000_3FFF));
        assert!(!dol.is_mapped(0x8000_4000));
    }

    #[test]
    fn test_read_write() {
        let mut dol = test_dol(&[0u8; 0x100]);
        dol.write_u32(0x8000_3010, 0x8000_5000).unwrap();
        assert_eq!(dol.read_u32(0x8000_3010).unwrap(), 0x8000_5000);
        dol.write_u16(0x8000_3020, 0xBEEF).unwrap();
        assert_eq!(dol.read_u32(0x8000_3020).unwrap(), 0xBEEF_0000);
        assert!(dol.write_u32(0x8000_30FE, 0).is_err()); // straddles the end
    }

    #[test]
    fn test_append_section() {
        let mut dol = test_dol(&[0u8; 0x100]);
        let blob = vec![0x60u8; 0x40];
        dol.append_section(0x8000_4000, &blob).unwrap();
        assert_eq!(dol.rom_end(), 0x8000_4040);
        assert_eq!(dol.header.text_sizes[1], 0x40);
        assert_eq!(dol.read_u32(0x8000_4000).unwrap(), 0x6060_6060);
    }

    #[test]
    fn test_append_prefers_text_then_data() {
        let mut dol = test_dol(&[0u8; 0x100]);
        for i in 0..MAX_TEXT_SECTIONS - 1 {
            dol.append_section(0x8010_0000 + (i as u32) * 0x100, &[0u8; 4]).unwrap();
        }
        assert!(dol.free_text_slot().is_none());
        dol.append_section(0x8020_0000, &[0u8; 4]).unwrap();
        assert_eq!(dol.header.data_sizes[0], 4);
    }

    #[test]
    fn test_append_fails_when_full() {
        let mut dol = test_dol(&[0u8; 0x100]);
        for i in 0..(MAX_TEXT_SECTIONS - 1) + MAX_DATA_SECTIONS {
            dol.append_section(0x8010_0000 + (i as u32) * 0x100, &[0u8; 4]).unwrap();
        }
        let sections_before = dol.sections.len();
        let err = dol.append_section(0x8090_0000, &[0u8; 4]).unwrap_err();
        assert!(err.to_string().contains("DOL is full"));
        assert_eq!(dol.sections.len(), sections_before);
    }

    #[test]
    fn test_save_round_trip() {
        let mut dol = test_dol(&[0xAAu8; 0x100]);
        dol.append_section(0x8000_4000, &[0xBBu8; 8]).unwrap();
        let mut out = Vec::new();
        dol.save(&mut out).unwrap();
        let reparsed = DolFile::parse(&out).unwrap();
        assert_eq!(reparsed.sections.len(), 2);
        assert_eq!(reparsed.read_u32(0x8000_4000).unwrap(), 0xBBBB_BBBB);
    }
}
