//! `.debug_macro` walker (`spec.md` §4.H). Named to dodge the `macro`
//! reserved keyword. Two-phase traversal of one or more COMDAT subsections,
//! rewriting string-offset operands and line-program offsets.

use crate::codec::{Cursor, Endian};
use crate::constants::*;
use crate::die::CuInfo;
use crate::error::{Error, Result};
use crate::line::LineTableRegistry;
use crate::reloc::RelocIndex;
use crate::strings::StringPool;

/// Resolves which CU's `str_offsets_base` applies to the subsection
/// starting at `subsection_start`, per `spec.md` §4.H ("looks up the CU
/// whose `macros_offs` equals the start of the current subsection, falling
/// back to the first CU").
fn resolve_cu(cus: &[CuInfo], subsection_start: u32) -> Option<&CuInfo> {
    cus.iter()
        .find(|c| c.macros_offs == Some(subsection_start))
        .or_else(|| cus.first())
}

/// Walks every COMDAT subsection in `data` once. `phase` 0 registers
/// strings and the (line_offset) field's CU association; `phase` 1
/// rewrites `.debug_str` operands and the line_offset field in place.
/// `reloc`, when present, is the section's own relocation index — string
/// and line-program offset fields are read and written through it exactly
/// as `.debug_info` attribute offsets are (`spec.md` §4.D).
pub fn edit_macro(
    data: &mut [u8],
    endian: Endian,
    cus: &[CuInfo],
    str_pool: &mut StringPool,
    lines: &mut LineTableRegistry,
    mut reloc: Option<&mut RelocIndex>,
    phase: u8,
) -> Result<()> {
    let mut cursor = Cursor::new();

    while !cursor.is_at_end(data) {
        let subsection_start = cursor.pos as u32;
        let version = cursor.read_16(data, endian)?;
        if version != 4 && version != 5 {
            return Err(Error::format(format!("unsupported .debug_macro version {version}")));
        }
        let flags = cursor.read_8(data)?;
        if flags & !DEBUG_MACRO_KNOWN_FLAGS != 0 {
            return Err(Error::format(format!(
                "unrecognized .debug_macro flag bits 0x{flags:02x}"
            )));
        }
        let offset_size_64 = flags & DEBUG_MACRO_FLAG_OFFSET_SIZE_64 != 0;
        if offset_size_64 {
            return Err(Error::format(
                "8-byte .debug_macro offsets are not supported".to_string(),
            ));
        }
        let has_line_offset = flags & DEBUG_MACRO_FLAG_DEBUG_LINE_OFFSET != 0;

        let _cu = resolve_cu(cus, subsection_start);

        if has_line_offset {
            let field_offset = cursor.pos as u64;
            let raw = cursor.read_32(data, endian)?;
            let old_line_offset = match reloc.as_deref_mut() {
                Some(idx) => idx.read_32(field_offset, raw),
                None => raw,
            };
            if phase == 1 {
                if let Ok(new_offset) = lines.offset_lookup(old_line_offset) {
                    match reloc.as_deref_mut() {
                        Some(idx) => {
                            if let Some(direct) = idx.write_32(field_offset, new_offset) {
                                endian.write_u32(&mut data[field_offset as usize..], direct);
                            }
                        }
                        None => endian.write_u32(&mut data[field_offset as usize..], new_offset),
                    }
                }
            }
        }

        loop {
            let op = cursor.read_8(data)?;
            if op == 0 {
                break;
            }
            match op {
                DW_MACRO_DEFINE | DW_MACRO_UNDEF => {
                    cursor.read_uleb128(data)?; // line
                    cursor.read_cstr(data)?;
                }
                DW_MACRO_START_FILE => {
                    cursor.read_uleb128(data)?; // line
                    cursor.read_uleb128(data)?; // file index
                }
                DW_MACRO_END_FILE => {}
                DW_MACRO_DEFINE_STRP | DW_MACRO_UNDEF_STRP
                | DW_MACRO_DEFINE_INDIRECT | DW_MACRO_UNDEF_INDIRECT => {
                    cursor.read_uleb128(data)?; // line
                    let field_offset = cursor.pos as u64;
                    let raw = cursor.read_32(data, endian)?;
                    let str_off = match reloc.as_deref_mut() {
                        Some(idx) => idx.read_32(field_offset, raw),
                        None => raw,
                    };
                    if phase == 0 {
                        str_pool.register_replaced(str_off)?;
                    } else {
                        let new_off = str_pool.lookup(str_off, false)?;
                        match reloc.as_deref_mut() {
                            Some(idx) => {
                                if let Some(direct) = idx.write_32(field_offset, new_off.0) {
                                    endian.write_u32(&mut data[field_offset as usize..], direct);
                                }
                            }
                            None => endian.write_u32(&mut data[field_offset as usize..], new_off.0),
                        }
                    }
                }
                DW_MACRO_TRANSPARENT_INCLUDE => {
                    cursor.read_bytes(data, 4)?; // offset_size bytes, never interpreted
                }
                DW_MACRO_DEFINE_STRX | DW_MACRO_UNDEF_STRX => {
                    cursor.read_uleb128(data)?; // line
                    cursor.read_uleb128(data)?; // .debug_str_offsets index, resolved via component I
                }
                DW_MACRO_IMPORT => {
                    cursor.read_32(data, endian)?; // offset of imported subsection
                }
                other => {
                    return Err(Error::format(format!(
                        "unsupported .debug_macro opcode 0x{other:02x}"
                    )))
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_subsection(strp_offset: u32) -> Vec<u8> {
        let endian = Endian::Little;
        let mut buf = Vec::new();
        let mut tmp2 = [0u8; 2];
        endian.write_u16(&mut tmp2, 5);
        buf.extend_from_slice(&tmp2);
        buf.push(0); // flags: no line offset, 4-byte offsets
        buf.push(DW_MACRO_DEFINE_STRP);
        crate::codec::write_uleb128(1, &mut buf); // line
        let mut tmp4 = [0u8; 4];
        endian.write_u32(&mut tmp4, strp_offset);
        buf.extend_from_slice(&tmp4);
        buf.push(0); // terminator
        buf
    }

    #[test]
    fn rejects_unknown_flag_bits() {
        let mut buf = vec![5, 0, 0xf0];
        let empty = Vec::new();
        let mut str_pool = StringPool::new(&empty, None, None);
        let mut lines = LineTableRegistry::new();
        assert!(edit_macro(&mut buf, Endian::Little, &[], &mut str_pool, &mut lines, None, 0).is_err());
    }

    #[test]
    fn registers_and_rewrites_define_strp_operand() {
        let mut data_str = Vec::new();
        data_str.extend_from_slice(b"/build/src/pkg/FOO=1\0");
        let mut buf = build_subsection(0);
        let mut str_pool = StringPool::new(&data_str, Some("/build/src"), Some("/usr/src"));
        let mut lines = LineTableRegistry::new();
        edit_macro(&mut buf, Endian::Little, &[], &mut str_pool, &mut lines, None, 0).unwrap();
        str_pool.finalize();
        edit_macro(&mut buf, Endian::Little, &[], &mut str_pool, &mut lines, None, 1).unwrap();
        // offset field is at byte 5 (version:2 + flags:1 + opcode:1 + uleb-line:1)
        let new_off = Endian::Little.u32(&buf[5..]);
        assert_eq!(new_off, str_pool.lookup(0, false).unwrap().0);
    }
}
