//! DIE walker (`spec.md` §4.G): two-phase traversal of `.debug_info` (and
//! `.debug_types`). Phase 0 plans — registers strings, records which
//! `DW_AT_stmt_list` values need translating. Phase 1 writes the plan back
//! into the buffer in place.

use std::collections::HashMap;

use crate::abbrev::AbbrevTable;
use crate::codec::{Cursor, Endian};
use crate::constants::*;
use crate::error::{Error, Result};
use crate::forms::{read_form, FormValue};
use crate::line::LineTableRegistry;
use crate::listing::Listing;
use crate::path_util;
use crate::reloc::RelocIndex;
use crate::strings::StringPool;

#[derive(Debug, Clone, Default)]
pub struct CuInfo {
    pub header_offset: u32,
    pub ptr_size: u8,
    pub version: u16,
    pub str_offsets_base: u32,
    pub macros_offs: Option<u32>,
    pub stmt_list_field_offset: Option<u32>,
    pub stmt_list_old_value: Option<u32>,
    pub comp_dir: Option<String>,
}

pub struct EditContext<'a, 'p> {
    pub base_dir: Option<&'a str>,
    pub dest_dir: Option<&'a str>,
    pub str_pool: &'p mut StringPool<'a>,
    pub line_str_pool: &'p mut StringPool<'a>,
    pub str_offsets_data: Option<&'a [u8]>,
    pub lines: &'p mut LineTableRegistry,
    pub line_data: &'a [u8],
    pub listing: Option<&'p mut Listing>,
    pub info_reloc: Option<&'p mut RelocIndex>,
    /// `.debug_line`'s own relocation index, threaded down to `get_or_create`
    /// so its DWARF5 `strp`/`line_strp` path fields are read relocation-aware
    /// (`spec.md` §4.D), exactly as `.debug_info` attribute offsets are.
    pub line_reloc: Option<&'p mut RelocIndex>,
}

/// Walks every CU in `data` (a `.debug_info` or `.debug_types` payload),
/// calling `edit_attributes` for each DIE. `phase` 0 plans; `phase` 1
/// writes. `cus` accumulates `CuInfo` on phase 0 and is read back on phase
/// 1, matched positionally to the walk order (CUs never move between
/// phases — the section's header offsets are stable across both passes).
pub fn edit_info(
    data: &mut [u8],
    endian: Endian,
    abbrev_data: &[u8],
    abbrev_cache: &mut HashMap<u32, AbbrevTable>,
    is_type_unit_section: bool,
    cus: &mut Vec<CuInfo>,
    ctx: &mut EditContext,
    phase: u8,
) -> Result<()> {
    let mut cursor = Cursor::new();
    let mut cu_index = 0usize;

    while !cursor.is_at_end(data) {
        let cu_start = cursor.pos as u32;
        let unit_length = cursor.read_32(data, endian)?;
        if unit_length == 0xffff_ffff {
            return Err(Error::format("64-bit DWARF is not supported".to_string()));
        }
        let cu_end = cursor.pos + unit_length as usize;
        let version = cursor.read_16(data, endian)?;
        if !(2..=5).contains(&version) {
            return Err(Error::format(format!("unsupported CU version {version}")));
        }

        let mut unit_type = DW_UT_COMPILE;
        let (abbrev_offset, ptr_size);
        if version >= 5 {
            unit_type = cursor.read_8(data)?;
            if !matches!(
                unit_type,
                DW_UT_COMPILE | DW_UT_PARTIAL | DW_UT_TYPE | DW_UT_SKELETON
                    | DW_UT_SPLIT_COMPILE | DW_UT_SPLIT_TYPE
            ) {
                return Err(Error::format(format!("unsupported unit_type {unit_type}")));
            }
            ptr_size = cursor.read_8(data)?;
            abbrev_offset = cursor.read_32(data, endian)?;
        } else {
            abbrev_offset = cursor.read_32(data, endian)?;
            ptr_size = cursor.read_8(data)?;
        }
        if !matches!(ptr_size, 4 | 8) {
            return Err(Error::format(format!("unsupported pointer size {ptr_size}")));
        }

        let is_type_unit = is_type_unit_section || matches!(unit_type, DW_UT_TYPE | DW_UT_SPLIT_TYPE);
        if is_type_unit {
            cursor.read_bytes(data, 8)?; // type signature
            cursor.read_32(data, endian)?; // type offset
        }

        if !abbrev_cache.contains_key(&abbrev_offset) {
            let mut abbrev_cursor = Cursor::at(abbrev_offset as usize);
            let table = AbbrevTable::parse(&mut abbrev_cursor, abbrev_data)?;
            abbrev_cache.insert(abbrev_offset, table);
        }

        if phase == 0 {
            cus.push(CuInfo {
                header_offset: cu_start,
                ptr_size,
                version,
                str_offsets_base: 0,
                macros_offs: None,
                stmt_list_field_offset: None,
                stmt_list_old_value: None,
                comp_dir: None,
            });
        }
        if cu_index >= cus.len() {
            return Err(Error::format(
                "CU count differs between phase 0 and phase 1".to_string(),
            ));
        }

        if version >= 5 && phase == 0 {
            // First-DIE pre-scan: locate DW_AT_str_offsets_base before any
            // strx form is resolved.
            let abbrev = abbrev_cache.get(&abbrev_offset).unwrap().clone();
            let mut prescan = cursor;
            let code = prescan.read_uleb128(data)?;
            if code != 0 {
                if let Some(decl) = abbrev.get(code) {
                    for a in &decl.attrs {
                        let mut form = a.form;
                        loop {
                            if form == DW_FORM_INDIRECT {
                                form = prescan.read_uleb128(data)? as u16;
                                continue;
                            }
                            if a.attr == DW_AT_STR_OFFSETS_BASE as u64 {
                                let v = read_form(&mut prescan, data, form, ptr_size, version, endian)?;
                                if let FormValue::Unsigned(off) = v {
                                    cus[cu_index].str_offsets_base = off as u32;
                                }
                            } else if form == DW_FORM_IMPLICIT_CONST {
                                // no cursor bytes consumed
                            } else {
                                read_form(&mut prescan, data, form, ptr_size, version, endian)?;
                            }
                            break;
                        }
                    }
                }
            }
        }

        // Main DIE walk.
        while cursor.pos < cu_end {
            let die_start = cursor.pos;
            let code = cursor.read_uleb128(data)?;
            if code == 0 {
                continue; // null DIE (end of a sibling chain)
            }
            let abbrev = abbrev_cache
                .get(&abbrev_offset)
                .ok_or_else(|| Error::format("missing abbreviation table".to_string()))?
                .clone();
            let decl = abbrev
                .get(code)
                .ok_or_else(|| Error::format(format!("unknown abbreviation code {code} at {die_start}")))?
                .clone();

            edit_attributes(
                &mut cursor,
                data,
                endian,
                decl.tag,
                &decl.attrs,
                ptr_size,
                version,
                phase,
                &mut cus[cu_index],
                ctx,
            )?;
        }

        if phase == 0 {
            if let Some(stmt_off) = cus[cu_index].stmt_list_old_value {
                let (_, _created) = ctx.lines.get_or_create(
                    ctx.line_data,
                    endian,
                    stmt_off,
                    ptr_size,
                    ctx.base_dir,
                    ctx.dest_dir,
                    cus[cu_index].comp_dir.as_deref(),
                    ctx.str_pool,
                    ctx.line_str_pool,
                    ctx.listing.as_deref_mut(),
                    ctx.line_reloc.as_deref_mut(),
                )?;
            }
            if let (Some(listing), Some(comp_dir), Some(base)) =
                (ctx.listing.as_deref_mut(), cus[cu_index].comp_dir.as_deref(), ctx.base_dir)
            {
                if let Some(tail) = path_util::skip_prefix(comp_dir, base) {
                    let dest = ctx.dest_dir.unwrap_or("");
                    let stripped = if tail.is_empty() {
                        dest.to_string()
                    } else {
                        format!("{dest}/{tail}")
                    };
                    listing.append_path(&stripped, true);
                }
            }
        }

        cursor.pos = cu_end;
        cu_index += 1;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn edit_attributes(
    cursor: &mut Cursor,
    data: &mut [u8],
    endian: Endian,
    tag: u64,
    attrs: &[crate::abbrev::AbbrevAttr],
    ptr_size: u8,
    version: u16,
    phase: u8,
    cu: &mut CuInfo,
    ctx: &mut EditContext,
) -> Result<()> {
    let is_unit_tag = matches!(tag, t if t == DW_TAG_COMPILE_UNIT as u64 || t == DW_TAG_PARTIAL_UNIT as u64);

    for a in attrs {
        let mut form = a.form;
        loop {
            if form == DW_FORM_INDIRECT {
                form = cursor.read_uleb128(data)? as u16;
                continue;
            }
            break;
        }

        match a.attr as u16 {
            DW_AT_STMT_LIST if matches!(form, DW_FORM_DATA4 | DW_FORM_SEC_OFFSET) => {
                let field_offset = cursor.pos as u32;
                let raw = cursor.read_32(data, endian)?;
                if phase == 0 {
                    let value = relocated_read(ctx, field_offset, raw);
                    cu.stmt_list_field_offset = Some(field_offset);
                    cu.stmt_list_old_value = Some(value);
                } else {
                    let old_value = cu
                        .stmt_list_old_value
                        .ok_or_else(|| Error::format("stmt_list missing from phase 0 plan".to_string()))?;
                    let new_value = ctx.lines.offset_lookup(old_value)?;
                    relocated_write(ctx, data, endian, field_offset, new_value)?;
                }
            }
            DW_AT_MACROS | DW_AT_GNU_MACROS if phase == 0 => {
                let v = read_form(cursor, data, form, ptr_size, version, endian)?;
                if let FormValue::Unsigned(off) = v {
                    cu.macros_offs = Some(off as u32);
                }
            }
            DW_AT_COMP_DIR if form == DW_FORM_STRING => {
                handle_inline_comp_dir(cursor, data, phase, cu, ctx)?;
            }
            DW_AT_COMP_DIR if matches!(form, DW_FORM_STRP | DW_FORM_LINE_STRP) => {
                handle_strp_family(cursor, data, endian, form, phase, cu, ctx, |cu, s| {
                    cu.comp_dir = Some(s);
                })?;
            }
            DW_AT_COMP_DIR if is_strx_form(form) => {
                handle_strx_family(cursor, data, endian, form, ptr_size, version, phase, cu, ctx, |cu, s| {
                    cu.comp_dir = Some(s);
                })?;
            }
            DW_AT_NAME if is_unit_tag && matches!(form, DW_FORM_STRP | DW_FORM_LINE_STRP) => {
                handle_strp_family(cursor, data, endian, form, phase, cu, ctx, |cu, s| {
                    if cu.comp_dir.is_none() && s.starts_with('/') {
                        let parent = s.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                        cu.comp_dir = Some(if parent.is_empty() { "/".to_string() } else { parent.to_string() });
                    }
                })?;
            }
            DW_AT_NAME if is_unit_tag && is_strx_form(form) => {
                handle_strx_family(cursor, data, endian, form, ptr_size, version, phase, cu, ctx, |cu, s| {
                    if cu.comp_dir.is_none() && s.starts_with('/') {
                        let parent = s.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                        cu.comp_dir = Some(if parent.is_empty() { "/".to_string() } else { parent.to_string() });
                    }
                })?;
            }
            _ if matches!(form, DW_FORM_STRP | DW_FORM_LINE_STRP) => {
                handle_strp_family(cursor, data, endian, form, phase, cu, ctx, |_, _| {})?;
            }
            _ if is_strx_form(form) => {
                handle_strx_family(cursor, data, endian, form, ptr_size, version, phase, cu, ctx, |_, _| {})?;
            }
            _ => {
                read_form(cursor, data, form, ptr_size, version, endian)?;
            }
        }
    }
    Ok(())
}

fn is_strx_form(form: u16) -> bool {
    matches!(
        form,
        DW_FORM_STRX | DW_FORM_STRX1 | DW_FORM_STRX2 | DW_FORM_STRX3 | DW_FORM_STRX4
    )
}

fn relocated_read(ctx: &mut EditContext, offset: u32, in_place: u32) -> u32 {
    match ctx.info_reloc.as_deref_mut() {
        Some(idx) => idx.read_32(offset as u64, in_place),
        None => in_place,
    }
}

fn relocated_write(ctx: &mut EditContext, data: &mut [u8], endian: Endian, offset: u32, value: u32) -> Result<()> {
    match ctx.info_reloc.as_deref_mut() {
        Some(idx) => {
            if let Some(direct) = idx.write_32(offset as u64, value) {
                endian.write_u32(&mut data[offset as usize..], direct);
            }
            Ok(())
        }
        None => {
            // No relocation section for this CU's object: the stored
            // 32-bit value is absolute in-place data.
            endian.write_u32(&mut data[offset as usize..], value);
            Ok(())
        }
    }
}

fn handle_inline_comp_dir(
    cursor: &mut Cursor,
    data: &mut [u8],
    phase: u8,
    cu: &mut CuInfo,
    ctx: &mut EditContext,
) -> Result<()> {
    let start = cursor.pos;
    let s = cursor.read_cstr(data)?;
    let original_len = cursor.pos - start - 1; // exclude the NUL
    if phase == 0 {
        cu.comp_dir = Some(String::from_utf8_lossy(s).into_owned());
        return Ok(());
    }
    let (Some(base), Some(dest)) = (ctx.base_dir, ctx.dest_dir) else {
        return Ok(());
    };
    let original_str = String::from_utf8_lossy(s).into_owned();
    let Some(tail) = path_util::skip_prefix(&original_str, base) else {
        return Ok(());
    };
    let mut replacement = dest.to_string();
    if !tail.is_empty() {
        replacement.push('/');
        replacement.push_str(tail);
    }
    if replacement.len() > original_len {
        tracing::warn!(
            original = %original_str,
            replacement = %replacement,
            "DW_FORM_string comp_dir replacement exceeds original length; leaving DIE unchanged"
        );
        return Ok(());
    }
    let mut bytes = replacement.into_bytes();
    bytes.resize(original_len, b'/');
    data[start..start + original_len].copy_from_slice(&bytes);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_strp_family(
    cursor: &mut Cursor,
    data: &mut [u8],
    endian: Endian,
    form: u16,
    phase: u8,
    cu: &mut CuInfo,
    ctx: &mut EditContext,
    mut on_resolved: impl FnMut(&mut CuInfo, String),
) -> Result<()> {
    let field_offset = cursor.pos;
    let raw = cursor.read_32(data, endian)?;
    let pool_is_line_str = form == DW_FORM_LINE_STRP;

    if phase == 0 {
        let orig_off = relocated_read(ctx, field_offset as u32, raw);
        let pool = if pool_is_line_str {
            &mut *ctx.line_str_pool
        } else {
            &mut *ctx.str_pool
        };
        pool.register_replaced(orig_off)?;
        if let Ok(s) = pool.original_str(orig_off) {
            on_resolved(cu, s.to_string());
        }
        Ok(())
    } else {
        let orig_off = relocated_read(ctx, field_offset as u32, raw);
        let pool = if pool_is_line_str {
            &*ctx.line_str_pool
        } else {
            &*ctx.str_pool
        };
        let new_off = pool.lookup(orig_off, false)?;
        relocated_write(ctx, data, endian, field_offset as u32, new_off.0)
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_strx_family(
    cursor: &mut Cursor,
    data: &mut [u8],
    endian: Endian,
    form: u16,
    ptr_size: u8,
    version: u16,
    phase: u8,
    cu: &mut CuInfo,
    ctx: &mut EditContext,
    mut on_resolved: impl FnMut(&mut CuInfo, String),
) -> Result<()> {
    let index = match read_form(cursor, data, form, ptr_size, version, endian)? {
        FormValue::StrIndex(i) => i,
        _ => return Err(Error::format("expected strx-family index".to_string())),
    };
    if phase != 0 {
        return Ok(()); // strx index itself never changes; see 4.I for the table rewrite.
    }
    let Some(str_offsets) = ctx.str_offsets_data else {
        return Ok(());
    };
    let entry_off = cu.str_offsets_base as usize + index as usize * 4;
    let Some(bytes) = str_offsets.get(entry_off..entry_off + 4) else {
        return Ok(());
    };
    let str_off = endian.u32(bytes);
    let replaced = ctx.str_pool.register_replaced(str_off)?;
    if replaced {
        if let Ok(s) = ctx.str_pool.original_str(str_off) {
            on_resolved(cu, s.to_string());
        }
    }
    Ok(())
}
