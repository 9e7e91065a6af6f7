//! PowerPC instruction encoding helpers for the Gekko/Broadway CPUs.

/// Masks `value` to the low `bits` bits of the field.
#[inline]
pub const fn mask_field(value: u32, bits: u32) -> u32 { value & ((1 << bits) - 1) }

/// Reinterprets the low `bits` bits of `value` as a signed quantity.
#[inline]
pub const fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Low halfword of an address, for `addi`/`ori`-style pairings.
#[inline]
pub const fn lo(value: u32) -> u16 { (value & 0xFFFF) as u16 }

/// High halfword of an address, for `oris` pairings (no sign compensation).
#[inline]
pub const fn hi(value: u32) -> u16 { (value >> 16) as u16 }

/// High halfword adjusted for the sign extension a subsequent `addi` of the
/// low halfword introduces: `lis rX, addr@ha` + `addi rX, rX, addr@l`.
#[inline]
pub const fn ha(value: u32) -> u16 { ((value >> 16) as u16).wrapping_add((value >> 15) as u16 & 1) }

/// Assembles an I-form branch from `from` to `to`. `lk` selects `bl` over `b`.
/// The 26-bit displacement must reach; both ends of RAM are within range on
/// this platform, so an out-of-range displacement indicates a logic error.
#[inline]
pub const fn assemble_branch(from: u32, to: u32, lk: bool) -> u32 {
    let delta = to.wrapping_sub(from);
    0x4800_0000 | (delta & 0x03FF_FFFC) | lk as u32
}

#[inline]
pub const fn assemble_addi(rd: u8, ra: u8, simm: u16) -> u32 {
    0x3800_0000 | ((rd as u32) << 21) | ((ra as u32) << 16) | simm as u32
}

#[inline]
pub const fn assemble_addis(rd: u8, ra: u8, simm: u16) -> u32 {
    0x3C00_0000 | ((rd as u32) << 21) | ((ra as u32) << 16) | simm as u32
}

#[inline]
pub const fn assemble_ori(ra: u8, rs: u8, uimm: u16) -> u32 {
    0x6000_0000 | ((rs as u32) << 21) | ((ra as u32) << 16) | uimm as u32
}

#[inline]
pub const fn assemble_oris(ra: u8, rs: u8, uimm: u16) -> u32 {
    0x6400_0000 | ((rs as u32) << 21) | ((ra as u32) << 16) | uimm as u32
}

/// `lis rd, uimm` (`addis rd, 0, uimm`).
#[inline]
pub const fn assemble_lis(rd: u8, uimm: u16) -> u32 { assemble_addis(rd, 0, uimm) }

/// `nop` (`ori 0, 0, 0`).
#[inline]
pub const fn assemble_nop() -> u32 { 0x6000_0000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_branch() {
        // Forward branch
        assert_eq!(assemble_branch(0x8000_3000, 0x8000_4000, false), 0x4800_1000);
        // Backward branch wraps into the 26-bit displacement field
        assert_eq!(assemble_branch(0x8000_4000, 0x8000_3000, false), 0x4BFF_F000);
        // Link bit
        assert_eq!(assemble_branch(0x8000_3000, 0x8000_4000, true), 0x4800_1001);
        // Branch to self
        assert_eq!(assemble_branch(0x8000_3000, 0x8000_3000, false), 0x4800_0000);
    }

    #[test]
    fn test_halves() {
        assert_eq!(lo(0x8044_7FFF), 0x7FFF);
        assert_eq!(hi(0x8044_7FFF), 0x8044);
        // Bit 15 clear: no adjustment
        assert_eq!(ha(0x8044_7FFF), 0x8044);
        // Bit 15 set: compensate the addi sign extension
        assert_eq!(ha(0x8044_8000), 0x8045);
        assert_eq!(ha(0xFFFF_8000), 0x0000);
    }

    #[test]
    fn test_mask_and_sign() {
        assert_eq!(mask_field(0xFFFF_FFF0, 12), 0xFF0);
        assert_eq!(sign_extend(0xFFF0, 16), -16);
        assert_eq!(sign_extend(0x7FFF, 16), 0x7FFF);
    }

    #[test]
    fn test_immediate_forms() {
        assert_eq!(assemble_lis(3, 0x8045), 0x3C60_8045);
        assert_eq!(assemble_addi(3, 3, 0x8000), 0x3863_8000);
        assert_eq!(assemble_ori(4, 3, 0x1234), 0x6064_1234);
        assert_eq!(assemble_oris(4, 3, 0x1234), 0x6464_1234);
        assert_eq!(assemble_nop(), 0x6000_0000);
    }
}
