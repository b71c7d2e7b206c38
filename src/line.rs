//! Line-table registry (`spec.md` §4.F): parses `.debug_line` prologues,
//! plans per-table size deltas, rebuilds the section, and maps old table
//! offsets to new ones for `DW_AT_stmt_list` rewriting.

use crate::codec::{Cursor, Endian};
use crate::constants::DW_FORM_LINE_STRP;
use crate::constants::DW_FORM_STRP;
use crate::error::{Error, Result};
use crate::listing::Listing;
use crate::path_util;
use crate::reloc::RelocIndex;
use crate::strings::StringPool;

const DW_LNCT_PATH: u64 = 1;

struct FileEntryV4 {
    name: Vec<u8>,
    /// Raw `(dir_idx, mtime, length)` ULEB128 bytes, copied verbatim —
    /// these never change (`spec.md` §9 open question on ULEB128 length
    /// preservation).
    tail_raw: Vec<u8>,
    dir_idx: u64,
}

struct V5Field {
    content_type: u64,
    form: u16,
}

struct V5Row {
    /// `(field_offset, form, old_pool_offset)`: `field_offset` is absolute
    /// within the original (pre-rebuild) `.debug_line` section — the same
    /// frame of reference the section's own relocation entries use — for a
    /// row that carries a rewritable `DW_FORM_strp`/`DW_FORM_line_strp` path
    /// field. `old_pool_offset` is the offset into `.debug_str`/
    /// `.debug_line_str` this field pointed at before any rewrite, used to
    /// look up its replacement once both string pools are finalized.
    path_field: Option<(u64, u16, u32)>,
}

struct V5Section {
    rows: Vec<V5Row>,
}

pub struct LineTable {
    pub old_offset: u32,
    pub new_offset: u32,
    version: u16,
    min_instr_len: u8,
    max_op_per_instr: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    std_opcode_lengths: Vec<u8>,
    dirs: Vec<Vec<u8>>,
    files: Vec<FileEntryV4>,
    /// Opcode stream, copied verbatim in every case.
    program: Vec<u8>,
    /// Whole original table bytes, used only for the v5 copy-and-patch path.
    raw: Vec<u8>,
    v5_dirs: Option<V5Section>,
    v5_files: Option<V5Section>,
    pub size_delta: u32,
    pub replace_dirs: bool,
    pub replace_files: bool,
}

pub struct LineTableRegistry {
    tables: Vec<LineTable>,
    sorted_for_lookup: Option<Vec<(u32, u32)>>, // (old_offset, new_offset)
}

impl LineTableRegistry {
    pub fn new() -> Self {
        LineTableRegistry {
            tables: Vec::new(),
            sorted_for_lookup: None,
        }
    }

    fn find_index(&self, offset: u32) -> Option<usize> {
        self.tables.iter().position(|t| t.old_offset == offset)
    }

    /// `get_or_create` (`spec.md` §4.F). Parses the prologue on first
    /// reference; subsequent calls with the same offset are no-ops save for
    /// returning the existing handle. `reloc`, when present, is
    /// `.debug_line`'s own relocation index — DWARF5 `strp`/`line_strp` path
    /// fields are read through it exactly as `.debug_info` attribute offsets
    /// are (`spec.md` §4.D).
    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create(
        &mut self,
        data: &[u8],
        endian: Endian,
        offset: u32,
        cu_ptr_size: u8,
        base_dir: Option<&str>,
        dest_dir: Option<&str>,
        comp_dir: Option<&str>,
        str_pool: &mut StringPool,
        line_str_pool: &mut StringPool,
        mut listing: Option<&mut Listing>,
        reloc: Option<&mut RelocIndex>,
    ) -> Result<(usize, bool)> {
        if let Some(idx) = self.find_index(offset) {
            return Ok((idx, false));
        }

        let table = parse_line_table(
            data, endian, offset, cu_ptr_size, base_dir, dest_dir, comp_dir, str_pool,
            line_str_pool, listing.as_deref_mut(), reloc,
        )?;
        self.tables.push(table);
        Ok((self.tables.len() - 1, true))
    }

    pub fn needs_rebuild(&self) -> bool {
        self.tables.iter().any(|t| t.replace_dirs || t.replace_files)
    }

    /// `emit_new_section`: allocates a fresh buffer sized to the sum of
    /// `4 + unit_length + size_delta` across all tables, in ascending
    /// old-offset order. `str_pool`/`line_str_pool` must already be
    /// finalized — a v5 table's path fields are resolved to their final
    /// pool offsets here. `reloc`, when present, is `.debug_line`'s own
    /// relocation index, used to write those resolved offsets back exactly
    /// as `.debug_macro` writes its string operands (`spec.md` §4.D).
    pub fn emit_new_section(
        &mut self,
        endian: Endian,
        str_pool: &StringPool,
        line_str_pool: &StringPool,
        mut reloc: Option<&mut RelocIndex>,
    ) -> Result<Vec<u8>> {
        self.tables.sort_by_key(|t| t.old_offset);
        let mut out = Vec::new();
        let mut lookup = Vec::with_capacity(self.tables.len());

        for table in &mut self.tables {
            let new_offset = out.len() as u32;
            table.new_offset = new_offset;
            lookup.push((table.old_offset, new_offset));

            if !table.replace_dirs && !table.replace_files {
                out.extend_from_slice(&table.raw);
                continue;
            }

            if let Some(v5_dirs) = &table.v5_dirs {
                // v5: fixed total size, patch specific offset fields in place.
                let mut raw = table.raw.clone();
                patch_v5_rows(
                    &mut raw, table.old_offset, v5_dirs, endian, str_pool, line_str_pool, reloc.as_deref_mut(),
                )?;
                if let Some(v5_files) = &table.v5_files {
                    patch_v5_rows(
                        &mut raw, table.old_offset, v5_files, endian, str_pool, line_str_pool, reloc.as_deref_mut(),
                    )?;
                }
                out.extend_from_slice(&raw);
                continue;
            }

            emit_v2_4_table(table, endian, &mut out);
        }

        self.sorted_for_lookup = Some(lookup);
        Ok(out)
    }

    /// Binary search by old-offset, valid only after `emit_new_section`.
    pub fn offset_lookup(&self, old_offset: u32) -> Result<u32> {
        let table = self
            .sorted_for_lookup
            .as_ref()
            .ok_or_else(|| Error::format("line table offset lookup before emission".to_string()))?;
        table
            .binary_search_by_key(&old_offset, |&(o, _)| o)
            .map(|idx| table[idx].1)
            .map_err(|_| Error::format(format!("no line table registered at offset {old_offset}")))
    }

    /// Returns the byte delta to apply to a `.debug_line` relocation whose
    /// `r_offset` falls inside the table occupying `offset` in the
    /// pre-rebuild layout: `(new_offset - old_offset) + size_delta`
    /// (`spec.md` §4.F). `None` if no registered table covers it.
    pub fn shift_for(&self, offset: u32) -> Option<i64> {
        self.tables.iter().find_map(|t| {
            let old_len = t.raw.len() as u32;
            if offset >= t.old_offset && offset < t.old_offset + old_len {
                Some((t.new_offset as i64 - t.old_offset as i64) + t.size_delta as i64)
            } else {
                None
            }
        })
    }
}

/// `table_start` is the table's absolute offset in the original section —
/// subtracted from each field's absolute offset to index into `raw`, which
/// holds only that one table's bytes.
fn patch_v5_rows(
    raw: &mut [u8],
    table_start: u32,
    section: &V5Section,
    endian: Endian,
    str_pool: &StringPool,
    line_str_pool: &StringPool,
    mut reloc: Option<&mut RelocIndex>,
) -> Result<()> {
    for row in &section.rows {
        let Some((field_offset, form, old_off)) = row.path_field else {
            continue;
        };
        let pool = if form == DW_FORM_LINE_STRP { line_str_pool } else { str_pool };
        let new_value = pool.lookup(old_off, false)?.0;
        let rel_pos = (field_offset - table_start as u64) as usize;
        match reloc.as_deref_mut() {
            Some(idx) => {
                let existing = endian.u32(&raw[rel_pos..rel_pos + 4]);
                idx.read_32(field_offset, existing);
                if let Some(direct) = idx.write_32(field_offset, new_value) {
                    endian.write_u32(&mut raw[rel_pos..rel_pos + 4], direct);
                }
            }
            None => endian.write_u32(&mut raw[rel_pos..rel_pos + 4], new_value),
        }
    }
    Ok(())
}

fn emit_v2_4_table(table: &LineTable, endian: Endian, out: &mut Vec<u8>) {
    let mut dirs_buf = Vec::new();
    for d in &table.dirs {
        dirs_buf.extend_from_slice(d);
        dirs_buf.push(0);
    }
    dirs_buf.push(0); // terminator

    let mut files_buf = Vec::new();
    for f in &table.files {
        files_buf.extend_from_slice(&f.name);
        files_buf.push(0);
        files_buf.extend_from_slice(&f.tail_raw);
    }
    files_buf.push(0); // terminator

    let mut prologue_tail = Vec::new();
    prologue_tail.push(table.min_instr_len);
    if table.version >= 4 {
        prologue_tail.push(table.max_op_per_instr);
    }
    prologue_tail.push(table.default_is_stmt as u8);
    prologue_tail.push(table.line_base as u8);
    prologue_tail.push(table.line_range);
    prologue_tail.push(table.opcode_base);
    prologue_tail.extend_from_slice(&table.std_opcode_lengths);
    prologue_tail.extend_from_slice(&dirs_buf);
    prologue_tail.extend_from_slice(&files_buf);

    let header_length = prologue_tail.len() as u32;
    let unit_length = 2 /* version */ + 4 /* header_length field */
        + header_length
        + table.program.len() as u32;

    let mut buf = Vec::with_capacity(4 + unit_length as usize);
    let mut tmp4 = [0u8; 4];
    endian.write_u32(&mut tmp4, unit_length);
    buf.extend_from_slice(&tmp4);
    let mut tmp2 = [0u8; 2];
    endian.write_u16(&mut tmp2, table.version);
    buf.extend_from_slice(&tmp2);
    endian.write_u32(&mut tmp4, header_length);
    buf.extend_from_slice(&tmp4);
    buf.extend_from_slice(&prologue_tail);
    buf.extend_from_slice(&table.program);

    out.extend_from_slice(&buf);
}

#[allow(clippy::too_many_arguments)]
fn parse_line_table(
    data: &[u8],
    endian: Endian,
    offset: u32,
    cu_ptr_size: u8,
    base_dir: Option<&str>,
    dest_dir: Option<&str>,
    comp_dir: Option<&str>,
    str_pool: &mut StringPool,
    line_str_pool: &mut StringPool,
    mut listing: Option<&mut Listing>,
    mut reloc: Option<&mut RelocIndex>,
) -> Result<LineTable> {
    let start = offset as usize;
    let mut cursor = Cursor::at(start);

    let unit_length = cursor.read_32(data, endian)?;
    if unit_length == 0xffff_ffff {
        return Err(Error::format("64-bit DWARF is not supported".to_string()));
    }
    let table_end = cursor.pos + unit_length as usize;
    if table_end > data.len() {
        return Err(Error::format("line table extends past section end".to_string()));
    }

    let version = cursor.read_16(data, endian)?;
    if !(2..=5).contains(&version) {
        return Err(Error::format(format!("unsupported line table version {version}")));
    }

    let mut address_size = cu_ptr_size;
    if version >= 5 {
        address_size = cursor.read_8(data)?;
        if address_size != cu_ptr_size {
            return Err(Error::constraint(format!(
                "line table address_size {address_size} does not match CU pointer size {cu_ptr_size}"
            )));
        }
        let _segment_selector_size = cursor.read_8(data)?;
    }

    let header_length = cursor.read_32(data, endian)?;
    let after_header_length_field = cursor.pos;
    let program_start = after_header_length_field + header_length as usize;

    let min_instr_len = cursor.read_8(data)?;
    let max_op_per_instr = if version >= 4 { cursor.read_8(data)? } else { 1 };
    let default_is_stmt = cursor.read_8(data)? != 0;
    let line_base = cursor.read_8(data)? as i8;
    let line_range = cursor.read_8(data)?;
    let opcode_base = cursor.read_8(data)?;
    let std_opcode_lengths = cursor
        .read_bytes(data, opcode_base.saturating_sub(1) as usize)?
        .to_vec();

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut v5_dirs = None;
    let mut v5_files = None;
    let mut replace_dirs = false;
    let mut replace_files = false;
    let mut old_size_sum: i64 = 0;

    if version >= 5 {
        v5_dirs = Some(parse_v5_section(
            &mut cursor, data, endian, str_pool, line_str_pool, &mut replace_dirs, reloc.as_deref_mut(),
        )?);
        v5_files = Some(parse_v5_section(
            &mut cursor, data, endian, str_pool, line_str_pool, &mut replace_files, reloc.as_deref_mut(),
        )?);
    } else {
        loop {
            let s = cursor.read_cstr(data)?;
            if s.is_empty() {
                break;
            }
            let new_path = replacement_path(s, base_dir, dest_dir);
            if let Some(new_path) = &new_path {
                old_size_sum += new_path.len() as i64 - s.len() as i64;
                replace_dirs = true;
                dirs.push(new_path.clone());
            } else {
                dirs.push(s.to_vec());
            }
        }

        loop {
            let name = cursor.read_cstr(data)?;
            if name.is_empty() {
                break;
            }
            let tail_start = cursor.pos;
            let dir_idx = cursor.read_uleb128(data)?;
            let _mtime = cursor.read_uleb128(data)?;
            let _length = cursor.read_uleb128(data)?;
            let tail_raw = data[tail_start..cursor.pos].to_vec();

            let new_name = replacement_path(name, base_dir, dest_dir);
            let emitted_name = new_name.clone().unwrap_or_else(|| name.to_vec());
            if new_name.is_some() {
                old_size_sum += emitted_name.len() as i64 - name.len() as i64;
                replace_files = true;
            }

            if let Some(listing) = listing.as_deref_mut() {
                let dir_path = if dir_idx == 0 {
                    None
                } else {
                    dirs.get(dir_idx as usize - 1).map(|d| String::from_utf8_lossy(d).into_owned())
                };
                let name_str = String::from_utf8_lossy(name).into_owned();
                let absolute = build_absolute_path(comp_dir, dir_path.as_deref(), &name_str);
                emit_listing_entry(listing, &absolute, base_dir, dest_dir);
            }

            files.push(FileEntryV4 {
                name: emitted_name,
                tail_raw,
                dir_idx,
            });
        }
    }

    let program = data[program_start..table_end].to_vec();
    let raw = data[start..table_end].to_vec();
    let size_delta = if old_size_sum < 0 {
        0
    } else {
        old_size_sum as u32
    };

    Ok(LineTable {
        old_offset: offset,
        new_offset: 0,
        version,
        min_instr_len,
        max_op_per_instr,
        default_is_stmt,
        line_base,
        line_range,
        opcode_base,
        std_opcode_lengths,
        dirs,
        files,
        program,
        raw,
        v5_dirs,
        v5_files,
        size_delta,
        replace_dirs,
        replace_files,
    })
}

#[allow(clippy::too_many_arguments)]
fn parse_v5_section(
    cursor: &mut Cursor,
    data: &[u8],
    endian: Endian,
    str_pool: &mut StringPool,
    line_str_pool: &mut StringPool,
    any_replaced: &mut bool,
    mut reloc: Option<&mut RelocIndex>,
) -> Result<V5Section> {
    let format_count = cursor.read_8(data)?;
    let mut fields = Vec::with_capacity(format_count as usize);
    for _ in 0..format_count {
        let content_type = cursor.read_uleb128(data)?;
        let form = cursor.read_uleb128(data)? as u16;
        fields.push(V5Field { content_type, form });
    }
    let entry_count = cursor.read_uleb128(data)?;
    let mut rows = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let mut path_field = None;
        for field in &fields {
            let field_pos = cursor.pos as u64;
            if field.content_type == DW_LNCT_PATH
                && matches!(field.form, DW_FORM_STRP | DW_FORM_LINE_STRP)
            {
                let raw = cursor.read_32(data, endian)?;
                let old_off = match reloc.as_deref_mut() {
                    Some(idx) => idx.read_32(field_pos, raw),
                    None => raw,
                };
                let pool = if field.form == DW_FORM_LINE_STRP {
                    &mut *line_str_pool
                } else {
                    &mut *str_pool
                };
                let replaced = pool.register_replaced(old_off)?;
                if replaced {
                    *any_replaced = true;
                }
                path_field = Some((field_pos, field.form, old_off));
            } else {
                crate::forms::read_form(cursor, data, field.form, 8, 5, endian)?;
            }
        }
        rows.push(V5Row { path_field });
    }
    Ok(V5Section { rows })
}

fn replacement_path(original: &[u8], base_dir: Option<&str>, dest_dir: Option<&str>) -> Option<Vec<u8>> {
    let (base, dest) = (base_dir?, dest_dir?);
    let original_str = std::str::from_utf8(original).ok()?;
    let tail = path_util::skip_prefix(original_str, base)?;
    let mut out = dest.as_bytes().to_vec();
    if !tail.is_empty() {
        out.push(b'/');
        out.extend_from_slice(tail.as_bytes());
    }
    Some(out)
}

fn build_absolute_path(comp_dir: Option<&str>, dir: Option<&str>, name: &str) -> String {
    let joined = match (dir, name.starts_with('/')) {
        (_, true) => name.to_string(),
        (Some(dir), false) if dir.starts_with('/') => format!("{dir}/{name}"),
        (Some(dir), false) => {
            let cd = comp_dir.unwrap_or("");
            format!("{cd}/{dir}/{name}")
        }
        (None, false) => {
            let cd = comp_dir.unwrap_or("");
            format!("{cd}/{name}")
        }
    };
    path_util::canonicalize(&joined)
}

fn emit_listing_entry(listing: &mut Listing, absolute: &str, base_dir: Option<&str>, dest_dir: Option<&str>) {
    let stripped = base_dir
        .and_then(|b| path_util::skip_prefix(absolute, b))
        .map(|tail| if tail.is_empty() { dest_dir.unwrap_or("/").to_string() } else { format!("{}/{}", dest_dir.unwrap_or(""), tail) })
        .unwrap_or_else(|| absolute.to_string());
    listing.append_path(&stripped, false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_uleb128;

    fn build_v4_table(dirs: &[&str], files: &[(&str, u64)]) -> Vec<u8> {
        let endian = Endian::Little;
        let mut prologue_tail = Vec::new();
        prologue_tail.push(1u8); // min_instr_len
        prologue_tail.push(1u8); // max_op_per_instr (v4)
        prologue_tail.push(1u8); // default_is_stmt
        prologue_tail.push((-5i8) as u8); // line_base
        prologue_tail.push(14u8); // line_range
        prologue_tail.push(13u8); // opcode_base
        prologue_tail.extend_from_slice(&[0u8; 12]); // std_opcode_lengths (opcode_base-1)
        for d in dirs {
            prologue_tail.extend_from_slice(d.as_bytes());
            prologue_tail.push(0);
        }
        prologue_tail.push(0);
        for (name, dir_idx) in files {
            prologue_tail.extend_from_slice(name.as_bytes());
            prologue_tail.push(0);
            write_uleb128(*dir_idx, &mut prologue_tail);
            write_uleb128(0, &mut prologue_tail); // mtime
            write_uleb128(0, &mut prologue_tail); // length
        }
        prologue_tail.push(0);

        let header_length = prologue_tail.len() as u32;
        let program = vec![0u8]; // DW_LNS_copy-ish filler, content irrelevant here
        let unit_length = 2 + 4 + header_length + program.len() as u32;

        let mut buf = Vec::new();
        let mut tmp4 = [0u8; 4];
        endian.write_u32(&mut tmp4, unit_length);
        buf.extend_from_slice(&tmp4);
        let mut tmp2 = [0u8; 2];
        endian.write_u16(&mut tmp2, 4);
        buf.extend_from_slice(&tmp2);
        endian.write_u32(&mut tmp4, header_length);
        buf.extend_from_slice(&tmp4);
        buf.extend_from_slice(&prologue_tail);
        buf.extend_from_slice(&program);
        buf
    }

    #[test]
    fn parses_v4_prologue_and_marks_replacement() {
        let data = build_v4_table(&["/build/src/pkg"], &[("a.c", 1)]);
        let empty = Vec::new();
        let mut str_pool = StringPool::new(&empty, None, None);
        let mut line_str_pool = StringPool::new(&empty, None, None);
        let mut registry = LineTableRegistry::new();
        let (idx, created) = registry
            .get_or_create(
                &data,
                Endian::Little,
                0,
                8,
                Some("/build/src"),
                Some("/usr/src"),
                Some("/build/src/pkg"),
                &mut str_pool,
                &mut line_str_pool,
                None,
                None,
            )
            .unwrap();
        assert!(created);
        assert!(registry.tables[idx].replace_dirs);
        assert_eq!(registry.tables[idx].dirs[0], b"/usr/src/pkg");
    }

    #[test]
    fn get_or_create_is_idempotent_for_same_offset() {
        let data = build_v4_table(&["/a"], &[("x.c", 1)]);
        let empty = Vec::new();
        let mut str_pool = StringPool::new(&empty, None, None);
        let mut line_str_pool = StringPool::new(&empty, None, None);
        let mut registry = LineTableRegistry::new();
        let (idx1, created1) = registry
            .get_or_create(
                &data, Endian::Little, 0, 8, None, None, None, &mut str_pool, &mut line_str_pool, None, None,
            )
            .unwrap();
        let (idx2, created2) = registry
            .get_or_create(
                &data, Endian::Little, 0, 8, None, None, None, &mut str_pool, &mut line_str_pool, None, None,
            )
            .unwrap();
        assert!(created1);
        assert!(!created2);
        assert_eq!(idx1, idx2);
    }

    #[test]
    fn emission_grows_table_by_size_delta_and_offset_lookup_finds_it() {
        let data = build_v4_table(&["/build/src/pkg"], &[("a.c", 1)]);
        let empty = Vec::new();
        let mut str_pool = StringPool::new(&empty, None, None);
        let mut line_str_pool = StringPool::new(&empty, None, None);
        let mut registry = LineTableRegistry::new();
        registry
            .get_or_create(
                &data,
                Endian::Little,
                0,
                8,
                Some("/build/src"),
                Some("/usr/src"),
                None,
                &mut str_pool,
                &mut line_str_pool,
                None,
                None,
            )
            .unwrap();
        str_pool.finalize();
        line_str_pool.finalize();
        let new_section = registry.emit_new_section(Endian::Little, &str_pool, &line_str_pool, None).unwrap();
        assert!(new_section.len() >= data.len());
        let new_off = registry.offset_lookup(0).unwrap();
        assert_eq!(new_off, 0);
    }

    #[test]
    fn unrelated_table_copies_verbatim() {
        let data = build_v4_table(&["/other"], &[("z.c", 1)]);
        let empty = Vec::new();
        let mut str_pool = StringPool::new(&empty, None, None);
        let mut line_str_pool = StringPool::new(&empty, None, None);
        let mut registry = LineTableRegistry::new();
        let (idx, _) = registry
            .get_or_create(
                &data,
                Endian::Little,
                0,
                8,
                Some("/build/src"),
                Some("/usr/src"),
                None,
                &mut str_pool,
                &mut line_str_pool,
                None,
                None,
            )
            .unwrap();
        assert!(!registry.tables[idx].replace_dirs);
        assert!(!registry.tables[idx].replace_files);
        str_pool.finalize();
        line_str_pool.finalize();
        let new_section = registry.emit_new_section(Endian::Little, &str_pool, &line_str_pool, None).unwrap();
        assert_eq!(new_section, data);
    }

    fn build_v5_table(str_offset: u32, line_str_offset: u32) -> Vec<u8> {
        let endian = Endian::Little;
        let mut buf = Vec::new();
        let tmp4 = |v: u32| -> [u8; 4] {
            let mut t = [0u8; 4];
            endian.write_u32(&mut t, v);
            t
        };

        let mut prologue_tail = Vec::new();
        prologue_tail.push(1u8); // min_instr_len
        prologue_tail.push(1u8); // max_op_per_instr
        prologue_tail.push(1u8); // default_is_stmt
        prologue_tail.push((-5i8) as u8); // line_base
        prologue_tail.push(14u8); // line_range
        prologue_tail.push(13u8); // opcode_base
        prologue_tail.extend_from_slice(&[0u8; 12]);

        // directory_entry_format_count = 1, (DW_LNCT_path, DW_FORM_line_strp)
        prologue_tail.push(1);
        write_uleb128(DW_LNCT_PATH, &mut prologue_tail);
        write_uleb128(DW_FORM_LINE_STRP as u64, &mut prologue_tail);
        write_uleb128(1, &mut prologue_tail); // directories_count
        prologue_tail.extend_from_slice(&tmp4(line_str_offset));

        // file_name_entry_format_count = 1, (DW_LNCT_path, DW_FORM_strp)
        prologue_tail.push(1);
        write_uleb128(DW_LNCT_PATH, &mut prologue_tail);
        write_uleb128(DW_FORM_STRP as u64, &mut prologue_tail);
        write_uleb128(1, &mut prologue_tail); // file_names_count
        prologue_tail.extend_from_slice(&tmp4(str_offset));

        let header_length = prologue_tail.len() as u32;
        let program = vec![0u8];
        let unit_length = 2 /* version */ + 1 /* address_size */ + 1 /* seg_sel_size */
            + 4 /* header_length field */
            + header_length
            + program.len() as u32;

        buf.extend_from_slice(&tmp4(unit_length));
        let mut tmp2 = [0u8; 2];
        endian.write_u16(&mut tmp2, 5);
        buf.extend_from_slice(&tmp2);
        buf.push(8); // address_size
        buf.push(0); // segment_selector_size
        buf.extend_from_slice(&tmp4(header_length));
        buf.extend_from_slice(&prologue_tail);
        buf.extend_from_slice(&program);
        buf
    }

    #[test]
    fn v5_path_fields_are_rewritten_to_the_finalized_pool_offset() {
        let mut str_data = Vec::new();
        str_data.extend_from_slice(b"/build/src/pkg/a.c\0");
        let mut line_str_data = Vec::new();
        line_str_data.extend_from_slice(b"/build/src/pkg\0");

        let data = build_v5_table(0, 0);
        let mut str_pool = StringPool::new(&str_data, Some("/build/src"), Some("/usr/src"));
        let mut line_str_pool = StringPool::new(&line_str_data, Some("/build/src"), Some("/usr/src"));
        let mut registry = LineTableRegistry::new();
        let (idx, _) = registry
            .get_or_create(
                &data,
                Endian::Little,
                0,
                8,
                Some("/build/src"),
                Some("/usr/src"),
                None,
                &mut str_pool,
                &mut line_str_pool,
                None,
                None,
            )
            .unwrap();
        assert!(registry.tables[idx].replace_dirs);
        assert!(registry.tables[idx].replace_files);

        str_pool.finalize();
        line_str_pool.finalize();
        let new_section = registry.emit_new_section(Endian::Little, &str_pool, &line_str_pool, None).unwrap();

        // unit_length(4) + version(2) + address_size(1) + seg_sel(1) +
        // header_length(4) + prologue fixed fields(6+12) + dir format header
        // (1+1+1) + dir count(1) = file path field starts at byte 34.
        let dir_field_off = 4 + 2 + 1 + 1 + 4 + 6 + 12 + 3 + 1;
        let new_line_str_off = line_str_pool.lookup(0, false).unwrap().0;
        assert_eq!(Endian::Little.u32(&new_section[dir_field_off..]), new_line_str_off);

        let file_field_off = dir_field_off + 4 + 3 + 1;
        let new_str_off = str_pool.lookup(0, false).unwrap().0;
        assert_eq!(Endian::Little.u32(&new_section[file_field_off..]), new_str_off);
        assert_ne!(new_str_off, 0, "the replaced path must not collapse back to offset 0");
    }

    #[test]
    fn v5_path_field_write_goes_through_the_section_relocation_index() {
        let str_data = b"/build/src/pkg/a.c\0".to_vec();
        let line_str_data = b"/build/src/pkg\0".to_vec();
        let data = build_v5_table(0, 0);
        let mut str_pool = StringPool::new(&str_data, Some("/build/src"), Some("/usr/src"));
        let mut line_str_pool = StringPool::new(&line_str_data, Some("/build/src"), Some("/usr/src"));
        let mut registry = LineTableRegistry::new();

        // File-path field sits right after the directory field; its absolute
        // offset matches `file_field_off` computed in the test above.
        let file_field_off = (4 + 2 + 1 + 1 + 4 + 6 + 12 + 3 + 1 + 4 + 3 + 1) as u64;
        let mut reloc = crate::reloc::test_support::rela_index_with_one_entry(file_field_off, 0);

        registry
            .get_or_create(
                &data,
                Endian::Little,
                0,
                8,
                Some("/build/src"),
                Some("/usr/src"),
                None,
                &mut str_pool,
                &mut line_str_pool,
                None,
                Some(&mut reloc),
            )
            .unwrap();

        str_pool.finalize();
        line_str_pool.finalize();
        let new_str_off = str_pool.lookup(0, false).unwrap().0;
        let new_section = registry
            .emit_new_section(Endian::Little, &str_pool, &line_str_pool, Some(&mut reloc))
            .unwrap();

        // A Rela entry absorbs the new value into its addend; the in-place
        // bytes are left untouched (still the original offset, 0).
        assert_eq!(Endian::Little.u32(&new_section[file_field_off as usize..]), 0);
        assert!(reloc.is_dirty());
        assert_eq!(reloc.addend_at(file_field_off), Some(new_str_off as i64));
    }
}
