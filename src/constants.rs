//! DWARF tag/attribute/form/opcode constants and the per-machine recognized
//! relocation-type table (`spec.md` §6).

#![allow(dead_code)]

// -- DWARF unit types (DW_UT_*, v5 CU headers) -------------------------------

pub const DW_UT_COMPILE: u8 = 0x01;
pub const DW_UT_TYPE: u8 = 0x02;
pub const DW_UT_PARTIAL: u8 = 0x03;
pub const DW_UT_SKELETON: u8 = 0x04;
pub const DW_UT_SPLIT_COMPILE: u8 = 0x05;
pub const DW_UT_SPLIT_TYPE: u8 = 0x06;

// -- DW_TAG_* (only the ones this tool inspects) -----------------------------

pub const DW_TAG_COMPILE_UNIT: u16 = 0x11;
pub const DW_TAG_PARTIAL_UNIT: u16 = 0x3c;
pub const DW_TAG_TYPE_UNIT: u16 = 0x41;

// -- DW_AT_* ------------------------------------------------------------------

pub const DW_AT_NAME: u16 = 0x03;
pub const DW_AT_STMT_LIST: u16 = 0x10;
pub const DW_AT_COMP_DIR: u16 = 0x1b;
pub const DW_AT_MACRO_INFO: u16 = 0x43; // DWARF <= 4 GNU macinfo, not rewritten
pub const DW_AT_STR_OFFSETS_BASE: u16 = 0x72;
pub const DW_AT_MACROS: u16 = 0x79;
pub const DW_AT_GNU_MACROS: u16 = 0x2119;

// -- DW_FORM_* ------------------------------------------------------------------

pub const DW_FORM_ADDR: u16 = 0x01;
pub const DW_FORM_BLOCK2: u16 = 0x03;
pub const DW_FORM_BLOCK4: u16 = 0x04;
pub const DW_FORM_DATA2: u16 = 0x05;
pub const DW_FORM_DATA4: u16 = 0x06;
pub const DW_FORM_DATA8: u16 = 0x07;
pub const DW_FORM_STRING: u16 = 0x08;
pub const DW_FORM_BLOCK: u16 = 0x09;
pub const DW_FORM_BLOCK1: u16 = 0x0a;
pub const DW_FORM_DATA1: u16 = 0x0b;
pub const DW_FORM_FLAG: u16 = 0x0c;
pub const DW_FORM_SDATA: u16 = 0x0d;
pub const DW_FORM_STRP: u16 = 0x0e;
pub const DW_FORM_UDATA: u16 = 0x0f;
pub const DW_FORM_REF_ADDR: u16 = 0x10;
pub const DW_FORM_REF1: u16 = 0x11;
pub const DW_FORM_REF2: u16 = 0x12;
pub const DW_FORM_REF4: u16 = 0x13;
pub const DW_FORM_REF8: u16 = 0x14;
pub const DW_FORM_REF_UDATA: u16 = 0x15;
pub const DW_FORM_INDIRECT: u16 = 0x16;
pub const DW_FORM_SEC_OFFSET: u16 = 0x17;
pub const DW_FORM_EXPRLOC: u16 = 0x18;
pub const DW_FORM_FLAG_PRESENT: u16 = 0x19;
pub const DW_FORM_STRX: u16 = 0x1a;
pub const DW_FORM_ADDRX: u16 = 0x1b;
pub const DW_FORM_REF_SUP4: u16 = 0x1c;
pub const DW_FORM_STRP_SUP: u16 = 0x1d;
pub const DW_FORM_DATA16: u16 = 0x1e;
pub const DW_FORM_LINE_STRP: u16 = 0x1f;
pub const DW_FORM_REF_SIG8: u16 = 0x20;
pub const DW_FORM_IMPLICIT_CONST: u16 = 0x21;
pub const DW_FORM_LOCLISTX: u16 = 0x22;
pub const DW_FORM_RNGLISTX: u16 = 0x23;
pub const DW_FORM_REF_SUP8: u16 = 0x24;
pub const DW_FORM_STRX1: u16 = 0x25;
pub const DW_FORM_STRX2: u16 = 0x26;
pub const DW_FORM_STRX3: u16 = 0x27;
pub const DW_FORM_STRX4: u16 = 0x28;
pub const DW_FORM_ADDRX1: u16 = 0x29;
pub const DW_FORM_ADDRX2: u16 = 0x2a;
pub const DW_FORM_ADDRX3: u16 = 0x2b;
pub const DW_FORM_ADDRX4: u16 = 0x2c;

/// Closed accept set for abbreviation-table forms (`spec.md` §4.E): the
/// DWARF-2 base set plus `ref_sig8`, `data16`, `line_strp`,
/// `implicit_const`, all `addrx*`, `loclistx`, `rnglistx`, all `strx*`.
pub fn is_recognized_form(form: u16) -> bool {
    matches!(
        form,
        DW_FORM_ADDR
            | DW_FORM_BLOCK2
            | DW_FORM_BLOCK4
            | DW_FORM_DATA2
            | DW_FORM_DATA4
            | DW_FORM_DATA8
            | DW_FORM_STRING
            | DW_FORM_BLOCK
            | DW_FORM_BLOCK1
            | DW_FORM_DATA1
            | DW_FORM_FLAG
            | DW_FORM_SDATA
            | DW_FORM_STRP
            | DW_FORM_UDATA
            | DW_FORM_REF_ADDR
            | DW_FORM_REF1
            | DW_FORM_REF2
            | DW_FORM_REF4
            | DW_FORM_REF8
            | DW_FORM_REF_UDATA
            | DW_FORM_INDIRECT
            | DW_FORM_SEC_OFFSET
            | DW_FORM_EXPRLOC
            | DW_FORM_FLAG_PRESENT
            | DW_FORM_STRX
            | DW_FORM_ADDRX
            | DW_FORM_DATA16
            | DW_FORM_LINE_STRP
            | DW_FORM_REF_SIG8
            | DW_FORM_IMPLICIT_CONST
            | DW_FORM_LOCLISTX
            | DW_FORM_RNGLISTX
            | DW_FORM_STRX1
            | DW_FORM_STRX2
            | DW_FORM_STRX3
            | DW_FORM_STRX4
            | DW_FORM_ADDRX1
            | DW_FORM_ADDRX2
            | DW_FORM_ADDRX3
            | DW_FORM_ADDRX4
    )
}

// -- DW_MACRO_* (DWARF5) and DW_MACRO_GNU_* (pre-5 vendor extension) ---------

pub const DW_MACRO_DEFINE: u8 = 0x01;
pub const DW_MACRO_UNDEF: u8 = 0x02;
pub const DW_MACRO_START_FILE: u8 = 0x03;
pub const DW_MACRO_END_FILE: u8 = 0x04;
pub const DW_MACRO_DEFINE_STRP: u8 = 0x05;
pub const DW_MACRO_UNDEF_STRP: u8 = 0x06;
pub const DW_MACRO_IMPORT: u8 = 0x07;
pub const DW_MACRO_DEFINE_STRX: u8 = 0x08;
pub const DW_MACRO_UNDEF_STRX: u8 = 0x09;
pub const DW_MACRO_IMPORT_SUP: u8 = 0x0a;
pub const DW_MACRO_DEFINE_SUP: u8 = 0x0b;
pub const DW_MACRO_UNDEF_SUP: u8 = 0x0c;
pub const DW_MACRO_DEFINE_INDIRECT: u8 = 0x0d;
pub const DW_MACRO_UNDEF_INDIRECT: u8 = 0x0e;
pub const DW_MACRO_TRANSPARENT_INCLUDE: u8 = 0x0f;
pub const DW_MACRO_DEFINE_INDIRECT_SUP: u8 = 0x10;
pub const DW_MACRO_UNDEF_INDIRECT_SUP: u8 = 0x11;
pub const DW_MACRO_TRANSPARENT_INCLUDE_SUP: u8 = 0x12;

/// `.debug_macro` header flag bits (`spec.md` §4.H). Any other bit set is
/// fatal.
pub const DEBUG_MACRO_FLAG_OFFSET_SIZE_64: u8 = 0x01;
pub const DEBUG_MACRO_FLAG_DEBUG_LINE_OFFSET: u8 = 0x02;
pub const DEBUG_MACRO_KNOWN_FLAGS: u8 =
    DEBUG_MACRO_FLAG_OFFSET_SIZE_64 | DEBUG_MACRO_FLAG_DEBUG_LINE_OFFSET;

// -- ELF note / build-id -------------------------------------------------------

pub const NT_GNU_BUILD_ID: u32 = 0x3;

// -- ELF e_machine values needed to select the relocation table -------------

pub const EM_SPARC: u16 = 2;
pub const EM_386: u16 = 3;
pub const EM_68K: u16 = 4;
pub const EM_PARISC: u16 = 15;
pub const EM_PPC: u16 = 20;
pub const EM_PPC64: u16 = 21;
pub const EM_S390: u16 = 22;
pub const EM_IA_64: u16 = 50;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;
pub const EM_AMDGPU: u16 = 224;
pub const EM_LOONGARCH: u16 = 258;
pub const EM_ALPHA: u16 = 0x9026; // historical non-standard value used by binutils
pub const EM_SPARC32PLUS: u16 = 18;
pub const EM_SPARCV9: u16 = 43;
pub const EM_E2K: u16 = 0xaf; // binutils MACHINE_e2k value (vendor-assigned)

/// Returns the set of relocation type values considered "32-bit absolute"
/// for `machine`, or `None` if the machine is not recognized at all
/// (`spec.md` §6). Any relocation type on a recognized machine that is not in
/// this set is a constraint-violation error.
pub fn abs32_relocation_types(machine: u16) -> Option<&'static [u32]> {
    match machine {
        EM_SPARC | EM_SPARC32PLUS | EM_SPARCV9 => Some(&[3, 23]), // R_SPARC_32, R_SPARC_UA32
        EM_386 => Some(&[1]),                                    // R_386_32
        EM_PPC | EM_PPC64 => Some(&[1, 101]), // R_PPC_ADDR32, R_PPC_UADDR32
        EM_S390 => Some(&[4]),                // R_390_32
        EM_PARISC => Some(&[6]),              // R_PARISC_DIR32
        EM_IA_64 => Some(&[0x41]),             // R_IA64_SECREL32LSB
        EM_X86_64 => Some(&[10]),              // R_X86_64_32
        EM_ALPHA => Some(&[1]),                // R_ALPHA_REFLONG
        EM_AARCH64 => Some(&[0x011]),           // R_AARCH64_ABS32
        EM_68K => Some(&[1]),                  // R_68K_32
        EM_RISCV => Some(&[1]),                // R_RISCV_32
        EM_E2K => Some(&[2]),                  // R_E2K_32_ABS
        EM_LOONGARCH => Some(&[1]),            // R_LARCH_32
        EM_AMDGPU => Some(&[1]),               // R_AMDGPU_ABS32
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_closed_form_set() {
        assert!(is_recognized_form(DW_FORM_STRX4));
        assert!(is_recognized_form(DW_FORM_IMPLICIT_CONST));
        assert!(is_recognized_form(DW_FORM_DATA16));
        assert!(!is_recognized_form(0xff));
    }

    #[test]
    fn known_machines_have_nonempty_abs32_tables() {
        for m in [
            EM_SPARC, EM_386, EM_PPC, EM_PPC64, EM_S390, EM_PARISC, EM_IA_64, EM_X86_64,
            EM_ALPHA, EM_AARCH64, EM_68K, EM_RISCV, EM_E2K, EM_LOONGARCH, EM_AMDGPU,
        ] {
            assert!(!abs32_relocation_types(m).unwrap().is_empty());
        }
    }

    #[test]
    fn unknown_machine_returns_none() {
        assert!(abs32_relocation_types(0xbeef).is_none());
    }
}
