//! `.debug_abbrev` table parsing (`spec.md` §4.E), parsed on demand per CU
//! and indexed by code.

use std::collections::HashMap;

use crate::codec::Cursor;
use crate::constants::{self, DW_FORM_IMPLICIT_CONST};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct AbbrevAttr {
    pub attr: u64,
    pub form: u16,
    /// Present only for `DW_FORM_implicit_const`; the SLEB128 constant that
    /// follows the (attr, form) pair in the abbreviation entry. The value
    /// itself is never consulted — only its presence affects cursor shape
    /// (`spec.md` §4.E).
    pub implicit_const: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AbbrevDecl {
    pub tag: u64,
    pub has_children: bool,
    pub attrs: Vec<AbbrevAttr>,
}

#[derive(Debug, Clone, Default)]
pub struct AbbrevTable {
    by_code: HashMap<u64, AbbrevDecl>,
}

impl AbbrevTable {
    pub fn get(&self, code: u64) -> Option<&AbbrevDecl> {
        self.by_code.get(&code)
    }

    /// Parses entries starting at `cursor` until a zero code, matching
    /// `read_abbrev` in the original tool. Duplicate codes and forms outside
    /// the closed accept set are hard errors.
    pub fn parse(cursor: &mut Cursor, data: &[u8]) -> Result<AbbrevTable> {
        let mut table = AbbrevTable::default();
        loop {
            let code = cursor.read_uleb128(data)?;
            if code == 0 {
                break;
            }
            if table.by_code.contains_key(&code) {
                return Err(Error::format(format!(
                    "duplicate abbreviation code {code}"
                )));
            }
            let tag = cursor.read_uleb128(data)?;
            let has_children = cursor.read_8(data)? != 0;
            let mut attrs = Vec::new();
            loop {
                let attr = cursor.read_uleb128(data)?;
                let form = cursor.read_uleb128(data)?;
                if attr == 0 && form == 0 {
                    break;
                }
                let form = u16::try_from(form)
                    .map_err(|_| Error::format(format!("form value {form} out of range")))?;
                if !constants::is_recognized_form(form) {
                    return Err(Error::format(format!("unrecognized DWARF form 0x{form:02x}")));
                }
                let implicit_const = if form == DW_FORM_IMPLICIT_CONST {
                    Some(cursor.read_sleb128(data)?)
                } else {
                    None
                };
                attrs.push(AbbrevAttr {
                    attr,
                    form,
                    implicit_const,
                });
            }
            table.by_code.insert(
                code,
                AbbrevDecl {
                    tag,
                    has_children,
                    attrs,
                },
            );
        }
        Ok(table)
    }
}
