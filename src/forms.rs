//! Shared DWARF form-width dispatch, used by the DIE walker (`spec.md`
//! §4.G "all other forms: advance the cursor by the form's fixed or
//! variable width") and by the version-5 line-table entry-format walker
//! (§4.F), which encodes directory/file entries with the same per-attribute
//! form vocabulary.

use crate::codec::{Cursor, Endian};
use crate::constants::*;
use crate::error::{Error, Result};

/// The decoded shape of one value read by form, generic enough to cover
/// both DIE attributes and v5 line-table entry fields.
#[derive(Debug, Clone)]
pub enum FormValue {
    /// `strp` / `line_strp`: 4-byte offset into `.debug_str` /
    /// `.debug_line_str`.
    StrOffset(u32),
    /// Inline `DW_FORM_string`: NUL-terminated bytes.
    InlineString(Vec<u8>),
    /// Any `strx*` form: index into `.debug_str_offsets` (relative to the
    /// CU's `str_offsets_base`). The index itself is never rewritten.
    StrIndex(u64),
    Unsigned(u64),
    Signed(i64),
    Bytes(Vec<u8>),
    Flag(bool),
    /// Everything else this tool never interprets further (addresses,
    /// references, exprlocs): consumed and discarded.
    Opaque,
}

/// Reads one value of `form` from `cursor` over `data`. `address_size` and
/// `version` disambiguate the forms whose width depends on context
/// (`DW_FORM_addr`, `DW_FORM_ref_addr`). `.debug_line_str`/
/// `.debug_str_offsets` widths are always 4 bytes: 64-bit DWARF is rejected
/// elsewhere before this is ever reached.
pub fn read_form(
    cursor: &mut Cursor,
    data: &[u8],
    form: u16,
    address_size: u8,
    version: u16,
    endian: Endian,
) -> Result<FormValue> {
    use FormValue::*;
    Ok(match form {
        DW_FORM_ADDR => {
            cursor.read_bytes(data, address_size as usize)?;
            Opaque
        }
        DW_FORM_BLOCK2 => {
            let len = cursor.read_16(data, endian)? as usize;
            Bytes(cursor.read_bytes(data, len)?.to_vec())
        }
        DW_FORM_BLOCK4 => {
            let len = cursor.read_32(data, endian)? as usize;
            Bytes(cursor.read_bytes(data, len)?.to_vec())
        }
        DW_FORM_DATA2 => Unsigned(cursor.read_16(data, endian)? as u64),
        DW_FORM_DATA4 => Unsigned(cursor.read_32(data, endian)? as u64),
        DW_FORM_DATA8 => {
            let bytes = cursor.read_bytes(data, 8)?;
            Unsigned(endian.u64(bytes))
        }
        DW_FORM_STRING => {
            let s = cursor.read_cstr(data)?;
            InlineString(s.to_vec())
        }
        DW_FORM_BLOCK => {
            let len = cursor.read_uleb128(data)? as usize;
            Bytes(cursor.read_bytes(data, len)?.to_vec())
        }
        DW_FORM_BLOCK1 => {
            let len = cursor.read_8(data)? as usize;
            Bytes(cursor.read_bytes(data, len)?.to_vec())
        }
        DW_FORM_DATA1 => Unsigned(cursor.read_8(data)? as u64),
        DW_FORM_FLAG => Flag(cursor.read_8(data)? != 0),
        DW_FORM_SDATA => Signed(cursor.read_sleb128(data)?),
        DW_FORM_STRP | DW_FORM_LINE_STRP => StrOffset(cursor.read_32(data, endian)?),
        DW_FORM_UDATA => Unsigned(cursor.read_uleb128(data)?),
        DW_FORM_REF_ADDR => {
            let width = if version >= 3 { 4 } else { address_size as usize };
            Unsigned(read_fixed(cursor, data, width, endian)?)
        }
        DW_FORM_REF1 => Unsigned(cursor.read_8(data)? as u64),
        DW_FORM_REF2 => Unsigned(cursor.read_16(data, endian)? as u64),
        DW_FORM_REF4 => Unsigned(cursor.read_32(data, endian)? as u64),
        DW_FORM_REF8 => Unsigned(read_fixed(cursor, data, 8, endian)?),
        DW_FORM_REF_UDATA => Unsigned(cursor.read_uleb128(data)?),
        DW_FORM_INDIRECT => {
            return Err(Error::format(
                "DW_FORM_indirect must be resolved by the caller, not read_form".to_string(),
            ))
        }
        DW_FORM_SEC_OFFSET => Unsigned(cursor.read_32(data, endian)? as u64),
        DW_FORM_EXPRLOC => {
            let len = cursor.read_uleb128(data)? as usize;
            Bytes(cursor.read_bytes(data, len)?.to_vec())
        }
        DW_FORM_FLAG_PRESENT => Flag(true),
        DW_FORM_STRX => StrIndex(cursor.read_uleb128(data)?),
        DW_FORM_ADDRX => StrIndex(cursor.read_uleb128(data)?),
        DW_FORM_REF_SUP4 => Unsigned(cursor.read_32(data, endian)? as u64),
        DW_FORM_STRP_SUP => StrOffset(cursor.read_32(data, endian)?),
        DW_FORM_DATA16 => Bytes(cursor.read_bytes(data, 16)?.to_vec()),
        DW_FORM_REF_SIG8 => Unsigned(read_fixed(cursor, data, 8, endian)?),
        DW_FORM_IMPLICIT_CONST => Opaque, // value lives in the abbrev, not the DIE
        DW_FORM_LOCLISTX => Unsigned(cursor.read_uleb128(data)?),
        DW_FORM_RNGLISTX => Unsigned(cursor.read_uleb128(data)?),
        DW_FORM_REF_SUP8 => Unsigned(read_fixed(cursor, data, 8, endian)?),
        DW_FORM_STRX1 => StrIndex(cursor.read_8(data)? as u64),
        DW_FORM_STRX2 => StrIndex(cursor.read_16(data, endian)? as u64),
        DW_FORM_STRX3 => StrIndex(cursor.read_24(data, endian)? as u64),
        DW_FORM_STRX4 => StrIndex(cursor.read_32(data, endian)? as u64),
        DW_FORM_ADDRX1 => StrIndex(cursor.read_8(data)? as u64),
        DW_FORM_ADDRX2 => StrIndex(cursor.read_16(data, endian)? as u64),
        DW_FORM_ADDRX3 => StrIndex(cursor.read_24(data, endian)? as u64),
        DW_FORM_ADDRX4 => StrIndex(cursor.read_32(data, endian)? as u64),
        other => return Err(Error::format(format!("unrecognized DWARF form 0x{other:02x}"))),
    })
}

fn read_fixed(cursor: &mut Cursor, data: &[u8], width: usize, endian: Endian) -> Result<u64> {
    let bytes = cursor.read_bytes(data, width)?;
    match width {
        4 => Ok(endian.u32(bytes) as u64),
        8 => Ok(endian.u64(bytes)),
        _ => {
            let mut v = 0u64;
            for (i, &b) in bytes.iter().enumerate() {
                v |= (b as u64) << (8 * i);
            }
            Ok(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_strp_as_four_byte_offset() {
        let buf = [0x10, 0x00, 0x00, 0x00];
        let mut c = Cursor::new();
        match read_form(&mut c, &buf, DW_FORM_STRP, 8, 5, Endian::Little).unwrap() {
            FormValue::StrOffset(off) => assert_eq!(off, 0x10),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn reads_strx_as_uleb_index() {
        let buf = [0x81, 0x01];
        let mut c = Cursor::new();
        match read_form(&mut c, &buf, DW_FORM_STRX, 8, 5, Endian::Little).unwrap() {
            FormValue::StrIndex(idx) => assert_eq!(idx, 0x81),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ref_addr_width_depends_on_version() {
        let buf = [0u8; 8];
        let mut c = Cursor::new();
        read_form(&mut c, &buf, DW_FORM_REF_ADDR, 8, 2, Endian::Little).unwrap();
        assert_eq!(c.pos, 8); // v2: ptr_size wide
        let mut c2 = Cursor::new();
        read_form(&mut c2, &buf, DW_FORM_REF_ADDR, 8, 4, Endian::Little).unwrap();
        assert_eq!(c2.pos, 4); // v>=3: always 4 bytes
    }

    #[test]
    fn rejects_unknown_form() {
        let buf = [0u8; 4];
        let mut c = Cursor::new();
        assert!(read_form(&mut c, &buf, 0xfe, 8, 5, Endian::Little).is_err());
    }
}
