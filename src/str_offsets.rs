//! `.debug_str_offsets` index-table updater (`spec.md` §4.I). Runs after
//! `.debug_str` has been finalized: translates each 4-byte entry through the
//! string pool, falling back to the dummy entry for offsets no DIE or
//! line-table row ever reached.

use crate::codec::{Cursor, Endian};
use crate::error::{Error, Result};
use crate::reloc::RelocIndex;
use crate::strings::StringPool;

/// Rewrites every entry of one `.debug_str_offsets` contribution in place.
/// `reloc`, when present, is consulted the same way `.debug_info` attribute
/// offsets are (`spec.md` §4.D): read through it before translating, write
/// back through it after.
pub fn edit_str_offsets(
    data: &mut [u8],
    endian: Endian,
    str_pool: &StringPool,
    mut reloc: Option<&mut RelocIndex>,
) -> Result<()> {
    let mut cursor = Cursor::new();

    while !cursor.is_at_end(data) {
        let unit_length = cursor.read_32(data, endian)?;
        if unit_length == 0xffff_ffff {
            return Err(Error::format("64-bit DWARF is not supported".to_string()));
        }
        let unit_end = cursor.pos + unit_length as usize;
        let version = cursor.read_16(data, endian)?;
        if version != 5 {
            return Err(Error::format(format!(
                "unsupported .debug_str_offsets version {version}"
            )));
        }
        let _padding = cursor.read_16(data, endian)?;

        while cursor.pos < unit_end {
            let field_offset = cursor.pos as u32;
            let raw = cursor.read_32(data, endian)?;
            let orig_off = match reloc.as_deref_mut() {
                Some(idx) => idx.read_32(field_offset as u64, raw),
                None => raw,
            };

            let new_off = match str_pool.lookup(orig_off, false) {
                Ok(off) => off,
                Err(_) => {
                    tracing::warn!(
                        offset = orig_off,
                        "debug_str_offsets entry points at an unreachable string; substituting dummy entry"
                    );
                    str_pool.lookup(orig_off, true)?
                }
            };

            match reloc.as_deref_mut() {
                Some(idx) => {
                    if let Some(direct) = idx.write_32(field_offset as u64, new_off.0) {
                        endian.write_u32(&mut data[field_offset as usize..], direct);
                    }
                }
                None => endian.write_u32(&mut data[field_offset as usize..], new_off.0),
            }
        }

        cursor.pos = unit_end;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_table(entries: &[u32]) -> Vec<u8> {
        let endian = Endian::Little;
        let mut buf = Vec::new();
        let mut tmp4 = [0u8; 4];
        let unit_length = 2 + 2 + entries.len() as u32 * 4;
        endian.write_u32(&mut tmp4, unit_length);
        buf.extend_from_slice(&tmp4);
        let mut tmp2 = [0u8; 2];
        endian.write_u16(&mut tmp2, 5);
        buf.extend_from_slice(&tmp2);
        buf.extend_from_slice(&[0, 0]); // padding
        for &e in entries {
            endian.write_u32(&mut tmp4, e);
            buf.extend_from_slice(&tmp4);
        }
        buf
    }

    #[test]
    fn rewrites_known_entry_and_substitutes_dummy_for_unreachable() {
        let strdata = b"/usr/src/pkg\0".to_vec();
        let mut pool = StringPool::new(&strdata, None, None);
        pool.register_existing(0).unwrap();
        pool.ensure_dummy_entry();
        pool.finalize();

        let mut buf = build_table(&[0, 999]);
        edit_str_offsets(&mut buf, Endian::Little, &pool, None).unwrap();

        let known = Endian::Little.u32(&buf[8..]);
        let unknown = Endian::Little.u32(&buf[12..]);
        assert_eq!(known, pool.lookup(0, false).unwrap().0);
        assert_eq!(unknown, pool.lookup(999, true).unwrap().0);
    }

    #[test]
    fn rejects_non_v5_version() {
        let endian = Endian::Little;
        let mut buf = Vec::new();
        let mut tmp4 = [0u8; 4];
        endian.write_u32(&mut tmp4, 4);
        buf.extend_from_slice(&tmp4);
        buf.extend_from_slice(&[4, 0, 0, 0]);
        let empty = Vec::new();
        let pool = StringPool::new(&empty, None, None);
        assert!(edit_str_offsets(&mut buf, endian, &pool, None).is_err());
    }
}
