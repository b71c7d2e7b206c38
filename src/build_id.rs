//! Build-ID recomputation (`spec.md` §4.K). Hashes a canonicalized view of
//! the rewritten object with XXH3-128 so the build-ID reflects debug-info
//! content, not incidental offsets the rewrite itself changed.

use xxhash_rust::xxh3::Xxh3;

use crate::elf::{self, Class, ElfHeader, SectionHeader};
use crate::error::Result;

/// Recomputes the `NT_GNU_BUILD_ID` note in place, or (if
/// `no_recompute_build_id`) just prints the existing one. Returns the
/// lowercase hex string written to the note, for CLI echoing.
pub fn recompute_build_id(
    data: &mut [u8],
    hdr: &ElfHeader,
    sections: &[SectionHeader],
    seed: Option<&str>,
    no_recompute: bool,
) -> Result<Option<String>> {
    let Some((note_section_data_off, desc_start, desc_len)) = find_build_id_location(data, hdr, sections)
    else {
        return Ok(None);
    };

    if no_recompute {
        let note = &data[note_section_data_off + desc_start..note_section_data_off + desc_start + desc_len];
        return Ok(Some(hex_lower(note)));
    }

    // Preserve the note's original bytes (beyond the first 16, the digest
    // width, these are never touched) before zeroing the descriptor in
    // place. The zeroing happens in `data` itself — the same buffer the
    // section loop below reads — so a second recompute over an
    // already-recomputed file hashes the zeroed placeholder again, not the
    // previous digest, keeping the hash idempotent.
    let desc_off = note_section_data_off + desc_start;
    let original_desc = data[desc_off..desc_off + desc_len].to_vec();
    data[desc_off..desc_off + desc_len].fill(0);

    let mut hasher = Xxh3::new();
    if let Some(seed) = seed {
        hasher.update(seed.as_bytes());
    }

    let canonical_header = canonicalize_header(data, hdr);
    hasher.update(&canonical_header);

    if hdr.e_phoff != 0 && hdr.e_phnum > 0 {
        let phdrs_len = hdr.e_phentsize as usize * hdr.e_phnum as usize;
        if let Some(bytes) = data.get(hdr.e_phoff as usize..hdr.e_phoff as usize + phdrs_len) {
            hasher.update(bytes);
        }
    }

    for sh in sections {
        hasher.update(&canonicalize_section_header(hdr, sh));
        if sh.sh_type != elf::SHT_NOBITS {
            let start = sh.sh_offset as usize;
            let end = start + sh.sh_size as usize;
            if let Some(bytes) = data.get(start..end) {
                hasher.update(bytes);
            }
        }
    }

    let digest = hasher.digest128().to_le_bytes();
    // Bytes past the digest width keep their original value (spec.md §8
    // scenario 5: an oversized descriptor's trailing bytes are preserved,
    // not zero-padded).
    let mut note_bytes = original_desc;
    let copy_len = desc_len.min(16);
    note_bytes[..copy_len].copy_from_slice(&digest[..copy_len]);

    data[desc_off..desc_off + desc_len].copy_from_slice(&note_bytes);

    Ok(Some(hex_lower(&note_bytes)))
}

/// Scans every `SHT_NOTE` section (not just one named `.note.gnu.build-id`
/// — the original scans note sections by content, not by name) for the
/// first `NT_GNU_BUILD_ID` note.
fn find_build_id_location(
    data: &[u8],
    hdr: &ElfHeader,
    sections: &[SectionHeader],
) -> Option<(usize, usize, usize)> {
    for sh in sections {
        if sh.sh_type != elf::SHT_NOTE {
            continue;
        }
        let start = sh.sh_offset as usize;
        let end = start + sh.sh_size as usize;
        let Some(payload) = data.get(start..end) else {
            continue;
        };
        if let Some((desc_start, desc_len)) = elf::find_build_id_note(payload, hdr.endian) {
            return Some((start, desc_start, desc_len));
        }
    }
    None
}

/// Zeroes the offset fields the rewrite itself perturbs (`e_phoff`,
/// `e_shoff`) so the hash tracks debug content, not section-table
/// placement.
fn canonicalize_header(data: &[u8], hdr: &ElfHeader) -> Vec<u8> {
    let len = if hdr.class == Class::Elf32 { 52 } else { 64 };
    let mut buf = data[..len].to_vec();
    let mut canon = hdr.clone();
    canon.e_phoff = 0;
    canon.e_shoff = 0;
    canon.write_back(&mut buf);
    buf
}

fn canonicalize_section_header(hdr: &ElfHeader, sh: &SectionHeader) -> Vec<u8> {
    let mut canon = sh.clone();
    canon.sh_offset = 0;
    let mut buf = vec![0u8; if hdr.class == Class::Elf32 { 40 } else { 64 }];
    let fake_hdr = ElfHeader {
        e_shoff: 0,
        e_shentsize: buf.len() as u16,
        ..hdr.clone()
    };
    elf::write_section_header(&mut buf, &fake_hdr, 0, &canon);
    buf
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_lower_formats_without_separators() {
        assert_eq!(hex_lower(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }
}
