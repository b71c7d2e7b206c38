//! Top-level rewrite driver (`spec.md` §4.J). Discovers the debug-section
//! catalog, runs the two-phase DWARF walk over `.debug_info` and every
//! `.debug_types` COMDAT chain link in the order the spec fixes, rebuilds
//! `.debug_line`, finalizes the string pools, flushes relocations, and
//! reflows the section layout if any payload changed length.

use std::collections::HashMap;

use crate::abbrev::AbbrevTable;
use crate::die::{self, CuInfo, EditContext};
use crate::elf::{self, Class, ElfHeader, SectionHeader};
use crate::error::{Error, Result};
use crate::line::LineTableRegistry;
use crate::listing::Listing;
use crate::macros;
use crate::reloc::RelocIndex;
use crate::str_offsets;
use crate::strings::StringPool;

const DEBUG_INFO: &[u8] = b".debug_info";
const DEBUG_ABBREV: &[u8] = b".debug_abbrev";
const DEBUG_LINE: &[u8] = b".debug_line";
const DEBUG_STR: &[u8] = b".debug_str";
const DEBUG_LINE_STR: &[u8] = b".debug_line_str";
const DEBUG_STR_OFFSETS: &[u8] = b".debug_str_offsets";
const DEBUG_MACRO: &[u8] = b".debug_macro";
const DEBUG_TYPES: &[u8] = b".debug_types";

/// A debug section's decompressed working copy, held alongside enough of
/// its original header to recompress and place it again.
struct Loaded {
    sh: SectionHeader,
    ch_type: Option<u32>,
    buf: Vec<u8>,
}

impl Loaded {
    fn load(file_data: &[u8], hdr: &ElfHeader, sh: SectionHeader) -> Result<Loaded> {
        let start = sh.sh_offset as usize;
        let end = start + sh.sh_size as usize;
        let raw = file_data
            .get(start..end)
            .ok_or_else(|| Error::format("section payload out of bounds".to_string()))?;
        if sh.sh_flags & elf::SHF_COMPRESSED != 0 {
            let (dec, ch_type, _) = elf::decompress_section(raw, hdr)?;
            Ok(Loaded { sh, ch_type: Some(ch_type), buf: dec })
        } else {
            Ok(Loaded { sh, ch_type: None, buf: raw.to_vec() })
        }
    }
}

fn find_one(names: &[Vec<u8>], name: &[u8]) -> Option<usize> {
    names.iter().position(|n| n.as_slice() == name)
}

fn find_all(names: &[Vec<u8>], name: &[u8]) -> Vec<usize> {
    names
        .iter()
        .enumerate()
        .filter(|(_, n)| n.as_slice() == name)
        .map(|(i, _)| i)
        .collect()
}

fn build_reloc(
    file_data: &[u8],
    hdr: &ElfHeader,
    sections: &[SectionHeader],
    reloc_for: &HashMap<usize, usize>,
    idx: usize,
) -> Result<Option<RelocIndex>> {
    match reloc_for.get(&idx) {
        Some(&relsec_idx) => {
            let relsec = &sections[relsec_idx];
            let symtab = &sections[relsec.sh_link as usize];
            Ok(Some(RelocIndex::build(file_data, hdr, relsec, symtab, hdr.e_machine)?))
        }
        None => Ok(None),
    }
}

/// Re-points every `.debug_line` relocation whose `r_offset` fell inside a
/// table that moved or resized, per the formula in `spec.md` §4.F.
fn fixup_line_relocations(
    file_data: &mut [u8],
    hdr: &ElfHeader,
    relsec: &SectionHeader,
    lines: &LineTableRegistry,
) -> Result<()> {
    let mut raw = elf::parse_relocations(file_data, hdr, relsec)?;
    let mut changed = false;
    for r in raw.iter_mut() {
        if let Some(delta) = lines.shift_for(r.r_offset as u32) {
            let new_off = (r.r_offset as i64 + delta) as u64;
            if new_off != r.r_offset {
                r.r_offset = new_off;
                changed = true;
            }
        }
    }
    if changed {
        for (i, r) in raw.iter().enumerate() {
            elf::write_relocation(file_data, hdr, relsec, i, r);
        }
    }
    Ok(())
}

fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Rebuilds the file's byte layout when one or more unallocated sections
/// changed length. Allocated-section byte ranges are left untouched;
/// unallocated sections are walked in section-table order and packed
/// starting just past the allocated region, then the section-header table
/// is relocated to the new end (`spec.md` §4.J "Section reflow").
fn reflow(
    file_data: &mut Vec<u8>,
    hdr: &mut ElfHeader,
    sections: &mut [SectionHeader],
    resized: &HashMap<usize, Vec<u8>>,
) -> Result<()> {
    let mut boundary = if hdr.class == Class::Elf32 { 52 } else { 64 };
    if hdr.e_phoff != 0 {
        boundary = boundary.max(hdr.e_phoff as usize + hdr.e_phentsize as usize * hdr.e_phnum as usize);
    }
    for sh in sections.iter() {
        if sh.sh_flags & elf::SHF_ALLOC != 0 {
            boundary = boundary.max(sh.sh_offset as usize + sh.sh_size as usize);
        }
    }
    let mut out = file_data[..boundary.min(file_data.len())].to_vec();
    if out.len() < boundary {
        out.resize(boundary, 0);
    }

    for (idx, sh) in sections.iter_mut().enumerate() {
        if sh.sh_type == elf::SHT_NULL || sh.sh_flags & elf::SHF_ALLOC != 0 {
            continue;
        }
        let align = (sh.sh_addralign as usize).max(1);
        let new_off = align_up(out.len(), align);
        if new_off > out.len() {
            out.resize(new_off, 0);
        }
        match resized.get(&idx) {
            Some(bytes) => {
                sh.sh_offset = new_off as u64;
                sh.sh_size = bytes.len() as u64;
                out.extend_from_slice(bytes);
            }
            None => {
                let start = sh.sh_offset as usize;
                let end = start + sh.sh_size as usize;
                let bytes = file_data.get(start..end).unwrap_or(&[]).to_vec();
                sh.sh_offset = new_off as u64;
                out.extend_from_slice(&bytes);
            }
        }
    }

    let shoff_align = if hdr.class == Class::Elf32 { 4 } else { 8 };
    let shoff = align_up(out.len(), shoff_align);
    if shoff > out.len() {
        out.resize(shoff, 0);
    }
    out.resize(shoff + hdr.e_shentsize as usize * sections.len(), 0);

    hdr.e_shoff = shoff as u64;
    hdr.write_back(&mut out);
    for (idx, sh) in sections.iter().enumerate() {
        elf::write_section_header(&mut out, hdr, idx, sh);
    }

    *file_data = out;
    Ok(())
}

/// Runs the full rewrite over `file_data` in place. Returns whether any
/// section payload ended up different from what it started as.
pub fn rewrite(
    file_data: &mut Vec<u8>,
    base_dir: Option<&str>,
    dest_dir: Option<&str>,
    mut listing: Option<&mut Listing>,
) -> Result<bool> {
    let mut hdr = ElfHeader::parse(file_data)?;
    if !hdr.is_regular_object() {
        return Err(Error::format("input is not ET_REL/ET_EXEC/ET_DYN".to_string()));
    }
    let mut sections = elf::parse_section_headers(file_data, &hdr)?;
    let shstrtab = sections
        .get(hdr.e_shstrndx as usize)
        .cloned()
        .ok_or_else(|| Error::format("missing section header string table".to_string()))?;

    let names: Vec<Vec<u8>> = sections
        .iter()
        .map(|sh| elf::section_name(file_data, &shstrtab, sh.name_off).to_vec())
        .collect();

    let mut reloc_for: HashMap<usize, usize> = HashMap::new();
    for (i, sh) in sections.iter().enumerate() {
        if sh.sh_type == elf::SHT_REL || sh.sh_type == elf::SHT_RELA {
            reloc_for.insert(sh.sh_info as usize, i);
        }
    }

    let info_idx = find_one(&names, DEBUG_INFO);
    let abbrev_idx = find_one(&names, DEBUG_ABBREV);
    let line_idx = find_one(&names, DEBUG_LINE);
    let str_idx = find_one(&names, DEBUG_STR);
    let line_str_idx = find_one(&names, DEBUG_LINE_STR);
    let str_offsets_idx = find_one(&names, DEBUG_STR_OFFSETS);
    let macro_idxs = find_all(&names, DEBUG_MACRO);
    let types_idxs = find_all(&names, DEBUG_TYPES);

    let mut info = info_idx.map(|i| Loaded::load(file_data, &hdr, sections[i].clone())).transpose()?;
    let abbrev = abbrev_idx.map(|i| Loaded::load(file_data, &hdr, sections[i].clone())).transpose()?;
    let mut line = line_idx.map(|i| Loaded::load(file_data, &hdr, sections[i].clone())).transpose()?;
    let str_sec = str_idx.map(|i| Loaded::load(file_data, &hdr, sections[i].clone())).transpose()?;
    let line_str_sec = line_str_idx.map(|i| Loaded::load(file_data, &hdr, sections[i].clone())).transpose()?;
    let mut str_offsets_sec =
        str_offsets_idx.map(|i| Loaded::load(file_data, &hdr, sections[i].clone())).transpose()?;
    let mut macro_secs: Vec<Loaded> = macro_idxs
        .iter()
        .map(|&i| Loaded::load(file_data, &hdr, sections[i].clone()))
        .collect::<Result<_>>()?;
    let mut types_secs: Vec<Loaded> = types_idxs
        .iter()
        .map(|&i| Loaded::load(file_data, &hdr, sections[i].clone()))
        .collect::<Result<_>>()?;

    let mut info_reloc = match info_idx {
        Some(i) => build_reloc(file_data, &hdr, &sections, &reloc_for, i)?,
        None => None,
    };
    let mut str_offsets_reloc = match str_offsets_idx {
        Some(i) => build_reloc(file_data, &hdr, &sections, &reloc_for, i)?,
        None => None,
    };
    let mut line_reloc = match line_idx {
        Some(i) => build_reloc(file_data, &hdr, &sections, &reloc_for, i)?,
        None => None,
    };
    let mut macro_relocs: Vec<Option<RelocIndex>> = macro_idxs
        .iter()
        .map(|&i| build_reloc(file_data, &hdr, &sections, &reloc_for, i))
        .collect::<Result<_>>()?;
    let mut types_relocs: Vec<Option<RelocIndex>> = types_idxs
        .iter()
        .map(|&i| build_reloc(file_data, &hdr, &sections, &reloc_for, i))
        .collect::<Result<_>>()?;

    let str_buf_orig = str_sec.as_ref().map(|s| s.buf.clone()).unwrap_or_default();
    let line_str_buf_orig = line_str_sec.as_ref().map(|s| s.buf.clone()).unwrap_or_default();
    let line_buf_orig = line.as_ref().map(|s| s.buf.clone()).unwrap_or_default();
    let str_offsets_buf_orig = str_offsets_sec.as_ref().map(|s| s.buf.clone());
    let abbrev_buf = abbrev.as_ref().map(|s| s.buf.clone()).unwrap_or_default();

    let mut str_pool = StringPool::new(&str_buf_orig, base_dir, dest_dir);
    let mut line_str_pool = StringPool::new(&line_str_buf_orig, base_dir, dest_dir);
    let mut lines = LineTableRegistry::new();
    let mut abbrev_cache: HashMap<u32, AbbrevTable> = HashMap::new();
    let mut info_cus: Vec<CuInfo> = Vec::new();
    let mut types_cus: Vec<Vec<CuInfo>> = vec![Vec::new(); types_secs.len()];

    let endian = hdr.endian;

    // --- Phase 0: .debug_info, then each .debug_types chain link ---
    if let Some(info_sec) = info.as_mut() {
        let mut ctx = EditContext {
            base_dir,
            dest_dir,
            str_pool: &mut str_pool,
            line_str_pool: &mut line_str_pool,
            str_offsets_data: str_offsets_buf_orig.as_deref(),
            lines: &mut lines,
            line_data: &line_buf_orig,
            listing: listing.as_deref_mut(),
            info_reloc: info_reloc.as_mut(),
            line_reloc: line_reloc.as_mut(),
        };
        die::edit_info(&mut info_sec.buf, endian, &abbrev_buf, &mut abbrev_cache, false, &mut info_cus, &mut ctx, 0)?;
    }
    for (i, types_sec) in types_secs.iter_mut().enumerate() {
        let mut ctx = EditContext {
            base_dir,
            dest_dir,
            str_pool: &mut str_pool,
            line_str_pool: &mut line_str_pool,
            str_offsets_data: str_offsets_buf_orig.as_deref(),
            lines: &mut lines,
            line_data: &line_buf_orig,
            listing: listing.as_deref_mut(),
            info_reloc: types_relocs[i].as_mut(),
            line_reloc: line_reloc.as_mut(),
        };
        die::edit_info(
            &mut types_sec.buf,
            endian,
            &abbrev_buf,
            &mut abbrev_cache,
            true,
            &mut types_cus[i],
            &mut ctx,
            0,
        )?;
    }

    if (str_pool.is_dirty() || line_str_pool.is_dirty()) && str_offsets_sec.is_some() {
        str_pool.ensure_dummy_entry();
    }
    str_pool.finalize();
    line_str_pool.finalize();

    // Line tables are always re-emitted: a no-op rebuild when nothing
    // changed is cheap and keeps `offset_lookup` available for phase 1. Both
    // string pools must already be finalized — a v5 table's path fields are
    // resolved to their final pool offsets during emission.
    let new_line_buf = line
        .as_ref()
        .map(|_| lines.emit_new_section(endian, &str_pool, &line_str_pool, line_reloc.as_mut()))
        .transpose()?;
    if let (Some(line_idx), Some(_)) = (line_idx, &new_line_buf) {
        if let Some(&relsec_idx) = reloc_for.get(&line_idx) {
            fixup_line_relocations(file_data, &hdr, &sections[relsec_idx], &lines)?;
        }
    }

    for (macro_sec, reloc) in macro_secs.iter_mut().zip(macro_relocs.iter_mut()) {
        macros::edit_macro(&mut macro_sec.buf, endian, &info_cus, &mut str_pool, &mut lines, reloc.as_mut(), 0)?;
    }

    // --- Phase 1: symmetric order, now that both string pools and the
    // rebuilt .debug_line offsets are known ---
    if let Some(info_sec) = info.as_mut() {
        let mut ctx = EditContext {
            base_dir,
            dest_dir,
            str_pool: &mut str_pool,
            line_str_pool: &mut line_str_pool,
            str_offsets_data: str_offsets_buf_orig.as_deref(),
            lines: &mut lines,
            line_data: &line_buf_orig,
            listing: listing.as_deref_mut(),
            info_reloc: info_reloc.as_mut(),
            // get_or_create only ever runs in phase 0; .debug_line is fully
            // resolved and emitted by this point.
            line_reloc: None,
        };
        die::edit_info(&mut info_sec.buf, endian, &abbrev_buf, &mut abbrev_cache, false, &mut info_cus, &mut ctx, 1)?;
    }
    for (i, types_sec) in types_secs.iter_mut().enumerate() {
        let mut ctx = EditContext {
            base_dir,
            dest_dir,
            str_pool: &mut str_pool,
            line_str_pool: &mut line_str_pool,
            str_offsets_data: str_offsets_buf_orig.as_deref(),
            lines: &mut lines,
            line_data: &line_buf_orig,
            listing: listing.as_deref_mut(),
            info_reloc: types_relocs[i].as_mut(),
            line_reloc: None,
        };
        die::edit_info(
            &mut types_sec.buf,
            endian,
            &abbrev_buf,
            &mut abbrev_cache,
            true,
            &mut types_cus[i],
            &mut ctx,
            1,
        )?;
    }
    for (macro_sec, reloc) in macro_secs.iter_mut().zip(macro_relocs.iter_mut()) {
        macros::edit_macro(&mut macro_sec.buf, endian, &info_cus, &mut str_pool, &mut lines, reloc.as_mut(), 1)?;
    }
    if let Some(str_offsets_sec) = str_offsets_sec.as_mut() {
        str_offsets::edit_str_offsets(&mut str_offsets_sec.buf, endian, &str_pool, str_offsets_reloc.as_mut())?;
    }

    // --- Flush RELA addend changes back into the (still original-offset)
    // relocation sections ---
    if let (Some(i), Some(reloc)) = (info_idx, &info_reloc) {
        if let Some(&relsec_idx) = reloc_for.get(&i) {
            reloc.flush(file_data, &hdr, &sections[relsec_idx], &sections[sections[relsec_idx].sh_link as usize])?;
        }
    }
    for (i, reloc) in types_idxs.iter().zip(types_relocs.iter()) {
        if let Some(reloc) = reloc {
            if let Some(&relsec_idx) = reloc_for.get(i) {
                reloc.flush(file_data, &hdr, &sections[relsec_idx], &sections[sections[relsec_idx].sh_link as usize])?;
            }
        }
    }
    for (i, reloc) in macro_idxs.iter().zip(macro_relocs.iter()) {
        if let Some(reloc) = reloc {
            if let Some(&relsec_idx) = reloc_for.get(i) {
                reloc.flush(file_data, &hdr, &sections[relsec_idx], &sections[sections[relsec_idx].sh_link as usize])?;
            }
        }
    }
    if let (Some(i), Some(reloc)) = (str_offsets_idx, &str_offsets_reloc) {
        if let Some(&relsec_idx) = reloc_for.get(&i) {
            reloc.flush(file_data, &hdr, &sections[relsec_idx], &sections[sections[relsec_idx].sh_link as usize])?;
        }
    }
    if let (Some(i), Some(reloc)) = (line_idx, &line_reloc) {
        if let Some(&relsec_idx) = reloc_for.get(&i) {
            reloc.flush(file_data, &hdr, &sections[relsec_idx], &sections[sections[relsec_idx].sh_link as usize])?;
        }
    }

    // --- Collect final logical payloads, recompressing where needed ---
    let mut final_logical: HashMap<usize, (Vec<u8>, Option<u32>)> = HashMap::new();
    if let (Some(i), Some(info_sec)) = (info_idx, &info) {
        final_logical.insert(i, (info_sec.buf.clone(), info_sec.ch_type));
    }
    for (&i, types_sec) in types_idxs.iter().zip(types_secs.iter()) {
        final_logical.insert(i, (types_sec.buf.clone(), types_sec.ch_type));
    }
    for (&i, macro_sec) in macro_idxs.iter().zip(macro_secs.iter()) {
        final_logical.insert(i, (macro_sec.buf.clone(), macro_sec.ch_type));
    }
    if let (Some(i), Some(new_line)) = (line_idx, &new_line_buf) {
        let ch_type = line.as_ref().and_then(|s| s.ch_type);
        final_logical.insert(i, (new_line.clone(), ch_type));
    }
    if str_pool.is_dirty() {
        if let Some(i) = str_idx {
            let ch_type = str_sec.as_ref().and_then(|s| s.ch_type);
            final_logical.insert(i, (str_pool.finalized_payload().unwrap_or(&[]).to_vec(), ch_type));
        }
    }
    if line_str_pool.is_dirty() {
        if let Some(i) = line_str_idx {
            let ch_type = line_str_sec.as_ref().and_then(|s| s.ch_type);
            final_logical.insert(i, (line_str_pool.finalized_payload().unwrap_or(&[]).to_vec(), ch_type));
        }
    }
    if let (Some(i), Some(str_offsets_sec)) = (str_offsets_idx, &str_offsets_sec) {
        final_logical.insert(i, (str_offsets_sec.buf.clone(), str_offsets_sec.ch_type));
    }

    let mut dirty_any = false;
    let mut resized: HashMap<usize, Vec<u8>> = HashMap::new();
    for (&idx, (buf, ch_type)) in &final_logical {
        let final_bytes = match ch_type {
            Some(ct) => elf::compress_section(buf, &hdr, *ct)?,
            None => buf.clone(),
        };
        let orig_size = sections[idx].sh_size as usize;
        let orig_off = sections[idx].sh_offset as usize;
        let orig = file_data.get(orig_off..orig_off + orig_size).unwrap_or(&[]);
        if final_bytes.len() != orig_size {
            dirty_any = true;
            resized.insert(idx, final_bytes);
        } else if final_bytes != orig {
            dirty_any = true;
            file_data[orig_off..orig_off + orig_size].copy_from_slice(&final_bytes);
        }
    }

    if !resized.is_empty() {
        reflow(file_data, &mut hdr, &mut sections, &resized)?;
    }

    Ok(dirty_any)
}
