//! Self-contained ELF32/64 structure parsing: header, section headers,
//! symbol table, relocations, and `SHF_COMPRESSED` handling.
//!
//! The core treats an ELF library's section-update/compress primitives as an
//! external contract (`spec.md` §1); here that contract is implemented
//! directly against the raw byte image rather than through a third-party
//! object-file crate, since the orchestrator needs to mutate section
//! contents and offsets in place and reflow the section table afterward —
//! operations closer to a linker's output pass than to the read-only
//! parsing most ELF crates are built around.

use std::io::{Read, Write};

use crate::codec::Endian;
use crate::error::{Error, Result};

pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;

pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const SHT_NULL: u32 = 0;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_REL: u32 = 9;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOTE: u32 = 7;

pub const SHF_COMPRESSED: u64 = 1 << 11;
pub const SHF_ALLOC: u64 = 1 << 1;

pub const ELFCOMPRESS_ZLIB: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

/// Parsed ELF identification plus a handle on where the header fields live.
#[derive(Debug, Clone)]
pub struct ElfHeader {
    pub class: Class,
    pub endian: Endian,
    pub e_type: u16,
    pub e_machine: u16,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    pub fn parse(data: &[u8]) -> Result<ElfHeader> {
        if data.len() < 20 || &data[0..4] != b"\x7fELF" {
            return Err(Error::format("not an ELF file".to_string()));
        }
        let class = match data[EI_CLASS] {
            ELFCLASS32 => Class::Elf32,
            ELFCLASS64 => Class::Elf64,
            c => return Err(Error::format(format!("unsupported ELF class {c}"))),
        };
        let endian = match data[EI_DATA] {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            d => return Err(Error::format(format!("unsupported ELF data encoding {d}"))),
        };

        let need = if class == Class::Elf32 { 52 } else { 64 };
        if data.len() < need {
            return Err(Error::format("truncated ELF header".to_string()));
        }

        let e_type = endian.u16(&data[16..]);
        let e_machine = endian.u16(&data[18..]);

        let (e_phoff, e_shoff, e_phentsize, e_phnum, e_shentsize, e_shnum, e_shstrndx);
        if class == Class::Elf32 {
            e_phoff = endian.u32(&data[28..]) as u64;
            e_shoff = endian.u32(&data[32..]) as u64;
            e_phentsize = endian.u16(&data[42..]);
            e_phnum = endian.u16(&data[44..]);
            e_shentsize = endian.u16(&data[46..]);
            e_shnum = endian.u16(&data[48..]);
            e_shstrndx = endian.u16(&data[50..]);
        } else {
            e_phoff = endian.u64(&data[32..]);
            e_shoff = endian.u64(&data[40..]);
            e_phentsize = endian.u16(&data[54..]);
            e_phnum = endian.u16(&data[56..]);
            e_shentsize = endian.u16(&data[58..]);
            e_shnum = endian.u16(&data[60..]);
            e_shstrndx = endian.u16(&data[62..]);
        }

        Ok(ElfHeader {
            class,
            endian,
            e_type,
            e_machine,
            e_phoff,
            e_shoff,
            e_phentsize,
            e_phnum,
            e_shentsize,
            e_shnum,
            e_shstrndx,
        })
    }

    pub fn write_back(&self, data: &mut [u8]) {
        let e = self.endian;
        e.write_u16(&mut data[16..], self.e_type);
        if self.class == Class::Elf32 {
            e.write_u32(&mut data[28..], self.e_phoff as u32);
            e.write_u32(&mut data[32..], self.e_shoff as u32);
            e.write_u16(&mut data[48..], self.e_shnum);
        } else {
            e.write_u64(&mut data[32..], self.e_phoff);
            e.write_u64(&mut data[40..], self.e_shoff);
            e.write_u16(&mut data[60..], self.e_shnum);
        }
    }

    pub fn is_regular_object(&self) -> bool {
        matches!(self.e_type, ET_REL | ET_EXEC | ET_DYN)
    }
}

/// One `Elf{32,64}_Shdr`, normalized to 64-bit fields regardless of class.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name_off: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

pub fn parse_section_headers(data: &[u8], hdr: &ElfHeader) -> Result<Vec<SectionHeader>> {
    let mut out = Vec::with_capacity(hdr.e_shnum as usize);
    let e = hdr.endian;
    for i in 0..hdr.e_shnum as usize {
        let off = hdr.e_shoff as usize + i * hdr.e_shentsize as usize;
        let sh = data
            .get(off..off + hdr.e_shentsize as usize)
            .ok_or_else(|| Error::format("section header out of bounds".to_string()))?;
        let s = if hdr.class == Class::Elf32 {
            SectionHeader {
                name_off: e.u32(&sh[0..]),
                sh_type: e.u32(&sh[4..]),
                sh_flags: e.u32(&sh[8..]) as u64,
                sh_addr: e.u32(&sh[12..]) as u64,
                sh_offset: e.u32(&sh[16..]) as u64,
                sh_size: e.u32(&sh[20..]) as u64,
                sh_link: e.u32(&sh[24..]),
                sh_info: e.u32(&sh[28..]),
                sh_addralign: e.u32(&sh[32..]) as u64,
                sh_entsize: e.u32(&sh[36..]) as u64,
            }
        } else {
            SectionHeader {
                name_off: e.u32(&sh[0..]),
                sh_type: e.u32(&sh[4..]),
                sh_flags: e.u64(&sh[8..]),
                sh_addr: e.u64(&sh[16..]),
                sh_offset: e.u64(&sh[24..]),
                sh_size: e.u64(&sh[32..]),
                sh_link: e.u32(&sh[40..]),
                sh_info: e.u32(&sh[44..]),
                sh_addralign: e.u64(&sh[48..]),
                sh_entsize: e.u64(&sh[56..]),
            }
        };
        out.push(s);
    }
    Ok(out)
}

pub fn write_section_header(data: &mut [u8], hdr: &ElfHeader, idx: usize, sh: &SectionHeader) {
    let e = hdr.endian;
    let off = hdr.e_shoff as usize + idx * hdr.e_shentsize as usize;
    let sh_bytes = &mut data[off..off + hdr.e_shentsize as usize];
    if hdr.class == Class::Elf32 {
        e.write_u32(&mut sh_bytes[0..], sh.name_off);
        e.write_u32(&mut sh_bytes[4..], sh.sh_type);
        e.write_u32(&mut sh_bytes[8..], sh.sh_flags as u32);
        e.write_u32(&mut sh_bytes[12..], sh.sh_addr as u32);
        e.write_u32(&mut sh_bytes[16..], sh.sh_offset as u32);
        e.write_u32(&mut sh_bytes[20..], sh.sh_size as u32);
        e.write_u32(&mut sh_bytes[24..], sh.sh_link);
        e.write_u32(&mut sh_bytes[28..], sh.sh_info);
        e.write_u32(&mut sh_bytes[32..], sh.sh_addralign as u32);
        e.write_u32(&mut sh_bytes[36..], sh.sh_entsize as u32);
    } else {
        e.write_u32(&mut sh_bytes[0..], sh.name_off);
        e.write_u32(&mut sh_bytes[4..], sh.sh_type);
        e.write_u64(&mut sh_bytes[8..], sh.sh_flags);
        e.write_u64(&mut sh_bytes[16..], sh.sh_addr);
        e.write_u64(&mut sh_bytes[24..], sh.sh_offset);
        e.write_u64(&mut sh_bytes[32..], sh.sh_size);
        e.write_u32(&mut sh_bytes[40..], sh.sh_link);
        e.write_u32(&mut sh_bytes[44..], sh.sh_info);
        e.write_u64(&mut sh_bytes[48..], sh.sh_addralign);
        e.write_u64(&mut sh_bytes[56..], sh.sh_entsize);
    }
}

pub fn section_name<'a>(data: &'a [u8], shstrtab: &SectionHeader, name_off: u32) -> &'a [u8] {
    let start = shstrtab.sh_offset as usize + name_off as usize;
    let rest = &data[start..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    &rest[..end]
}

/// A symbol table entry, the fields this tool needs.
#[derive(Debug, Clone, Copy)]
pub struct Symbol {
    pub st_value: u64,
    pub st_shndx: u16,
}

pub fn parse_symbol(data: &[u8], hdr: &ElfHeader, symtab: &SectionHeader, index: u32) -> Result<Symbol> {
    let entsize = if hdr.class == Class::Elf32 { 16 } else { 24 };
    let off = symtab.sh_offset as usize + index as usize * entsize;
    let sym = data
        .get(off..off + entsize)
        .ok_or_else(|| Error::format("symbol table index out of bounds".to_string()))?;
    let e = hdr.endian;
    if hdr.class == Class::Elf32 {
        Ok(Symbol {
            st_value: e.u32(&sym[4..]) as u64,
            st_shndx: e.u16(&sym[14..]),
        })
    } else {
        Ok(Symbol {
            st_value: e.u64(&sym[8..]),
            st_shndx: e.u16(&sym[6..]),
        })
    }
}

/// One relocation entry, normalized. `addend` is `None` for `SHT_REL` (the
/// addend lives in the target section's payload instead).
#[derive(Debug, Clone, Copy)]
pub struct RawReloc {
    pub r_offset: u64,
    pub r_sym: u32,
    pub r_type: u32,
    pub r_addend: Option<i64>,
}

pub fn parse_relocations(data: &[u8], hdr: &ElfHeader, relsec: &SectionHeader) -> Result<Vec<RawReloc>> {
    let is_rela = relsec.sh_type == SHT_RELA;
    let entsize = if hdr.class == Class::Elf32 {
        if is_rela {
            12
        } else {
            8
        }
    } else if is_rela {
        24
    } else {
        16
    };
    if entsize == 0 || relsec.sh_size == 0 {
        return Ok(Vec::new());
    }
    let count = relsec.sh_size as usize / entsize;
    let mut out = Vec::with_capacity(count);
    let e = hdr.endian;
    for i in 0..count {
        let off = relsec.sh_offset as usize + i * entsize;
        let r = data
            .get(off..off + entsize)
            .ok_or_else(|| Error::format("relocation entry out of bounds".to_string()))?;
        let (r_offset, r_addend);
        if hdr.class == Class::Elf32 {
            r_offset = e.u32(&r[0..]) as u64;
            let info = e.u32(&r[4..]);
            let sym = info >> 8;
            let typ = info & 0xff;
            r_addend = if is_rela {
                Some(e.u32(&r[8..]) as i32 as i64)
            } else {
                None
            };
            out.push(RawReloc {
                r_offset,
                r_sym: sym,
                r_type: typ,
                r_addend,
            });
            continue;
        } else {
            r_offset = e.u64(&r[0..]);
            let info = e.u64(&r[8..]);
            let sym = (info >> 32) as u32;
            let typ = (info & 0xffff_ffff) as u32;
            r_addend = if is_rela {
                Some(e.u64(&r[16..]) as i64)
            } else {
                None
            };
            out.push(RawReloc {
                r_offset,
                r_sym: sym,
                r_type: typ,
                r_addend,
            });
        }
    }
    Ok(out)
}

pub fn write_relocation(
    data: &mut [u8],
    hdr: &ElfHeader,
    relsec: &SectionHeader,
    index: usize,
    rel: &RawReloc,
) {
    let is_rela = relsec.sh_type == SHT_RELA;
    let entsize = if hdr.class == Class::Elf32 {
        if is_rela {
            12
        } else {
            8
        }
    } else if is_rela {
        24
    } else {
        16
    };
    let off = relsec.sh_offset as usize + index * entsize;
    let e = hdr.endian;
    let r = &mut data[off..off + entsize];
    if hdr.class == Class::Elf32 {
        e.write_u32(&mut r[0..], rel.r_offset as u32);
        let info = (rel.r_sym << 8) | (rel.r_type & 0xff);
        e.write_u32(&mut r[4..], info);
        if let Some(a) = rel.r_addend {
            e.write_u32(&mut r[8..], a as u32);
        }
    } else {
        e.write_u64(&mut r[0..], rel.r_offset);
        let info = ((rel.r_sym as u64) << 32) | rel.r_type as u64;
        e.write_u64(&mut r[8..], info);
        if let Some(a) = rel.r_addend {
            e.write_u64(&mut r[16..], a as u64);
        }
    }
}

/// Decompresses a `SHF_COMPRESSED` section's payload (`Elf{32,64}_Chdr` +
/// zlib-deflated body). Returns the decompressed bytes and the `ch_type` so
/// the orchestrator can recompress with the same algorithm.
pub fn decompress_section(data: &[u8], hdr: &ElfHeader) -> Result<(Vec<u8>, u32, u64)> {
    let e = hdr.endian;
    let chdr_len = if hdr.class == Class::Elf32 { 12 } else { 24 };
    if data.len() < chdr_len {
        return Err(Error::format("truncated compression header".to_string()));
    }
    let (ch_type, ch_size);
    if hdr.class == Class::Elf32 {
        ch_type = e.u32(&data[0..]);
        ch_size = e.u32(&data[4..]) as u64;
    } else {
        ch_type = e.u32(&data[0..]);
        ch_size = e.u64(&data[8..]);
    }
    if ch_type != ELFCOMPRESS_ZLIB {
        return Err(Error::constraint(format!(
            "unsupported section compression type {ch_type}"
        )));
    }
    let mut out = Vec::with_capacity(ch_size as usize);
    let mut dec = flate2::read::ZlibDecoder::new(&data[chdr_len..]);
    dec.read_to_end(&mut out)
        .map_err(|e| Error::format(format!("zlib decompression failed: {e}")))?;
    Ok((out, ch_type, ch_size))
}

/// Recompresses `payload` into the `Elf{32,64}_Chdr` + zlib-deflated form.
pub fn compress_section(payload: &[u8], hdr: &ElfHeader, ch_type: u32) -> Result<Vec<u8>> {
    let e = hdr.endian;
    let mut body = Vec::new();
    {
        let mut enc = flate2::write::ZlibEncoder::new(&mut body, flate2::Compression::default());
        enc.write_all(payload)
            .map_err(|e| Error::format(format!("zlib compression failed: {e}")))?;
        enc.finish()
            .map_err(|e| Error::format(format!("zlib compression failed: {e}")))?;
    }
    let mut out = Vec::with_capacity(body.len() + 24);
    if hdr.class == Class::Elf32 {
        let mut chdr = [0u8; 12];
        e.write_u32(&mut chdr[0..], ch_type);
        e.write_u32(&mut chdr[4..], payload.len() as u32);
        e.write_u32(&mut chdr[8..], 4);
        out.extend_from_slice(&chdr);
    } else {
        let mut chdr = [0u8; 24];
        e.write_u32(&mut chdr[0..], ch_type);
        e.write_u64(&mut chdr[8..], payload.len() as u64);
        e.write_u64(&mut chdr[16..], 8);
        out.extend_from_slice(&chdr);
    }
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parses an `NT_GNU_BUILD_ID` note's header, returning `(name_len,
/// desc_len, note_type, desc_offset_within_section)` for the first matching
/// note found in a `SHT_NOTE` section's payload, if any.
pub fn find_build_id_note(data: &[u8], endian: Endian) -> Option<(usize, usize)> {
    let mut pos = 0usize;
    while pos + 12 <= data.len() {
        let namesz = endian.u32(&data[pos..]) as usize;
        let descsz = endian.u32(&data[pos + 4..]) as usize;
        let ntype = endian.u32(&data[pos + 8..]);
        let name_start = pos + 12;
        let name_end = name_start + namesz;
        if name_end > data.len() {
            return None;
        }
        let padded_name = align4(namesz);
        let desc_start = name_start + padded_name;
        let desc_end = desc_start + descsz;
        if desc_end > data.len() {
            return None;
        }
        if ntype == crate::constants::NT_GNU_BUILD_ID
            && namesz == 4
            && &data[name_start..name_start + 3] == b"GNU"
            && descsz > 0
        {
            return Some((desc_start, descsz));
        }
        let padded_desc = align4(descsz);
        pos = desc_start + padded_desc;
    }
    None
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf64() -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(b"\x7fELF");
        data[EI_CLASS] = ELFCLASS64;
        data[EI_DATA] = ELFDATA2LSB;
        let e = Endian::Little;
        e.write_u16(&mut data[16..], ET_REL);
        e.write_u16(&mut data[18..], EM_X86_64_TEST);
        data
    }

    const EM_X86_64_TEST: u16 = 62;

    #[test]
    fn parses_elf64_header_fields() {
        let data = build_minimal_elf64();
        let hdr = ElfHeader::parse(&data).unwrap();
        assert_eq!(hdr.class, Class::Elf64);
        assert_eq!(hdr.endian, Endian::Little);
        assert_eq!(hdr.e_type, ET_REL);
        assert_eq!(hdr.e_machine, EM_X86_64_TEST);
    }

    #[test]
    fn rejects_bad_magic() {
        let data = vec![0u8; 64];
        assert!(ElfHeader::parse(&data).is_err());
    }

    #[test]
    fn note_scan_finds_build_id() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_le_bytes()); // namesz
        data.extend_from_slice(&4u32.to_le_bytes()); // descsz
        data.extend_from_slice(&3u32.to_le_bytes()); // NT_GNU_BUILD_ID
        data.extend_from_slice(b"GNU\0");
        data.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        let (off, len) = find_build_id_note(&data, Endian::Little).unwrap();
        assert_eq!(len, 4);
        assert_eq!(&data[off..off + len], &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn compress_decompress_round_trip() {
        let hdr = ElfHeader {
            class: Class::Elf64,
            endian: Endian::Little,
            e_type: ET_REL,
            e_machine: 62,
            e_phoff: 0,
            e_shoff: 0,
            e_phentsize: 0,
            e_phnum: 0,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        let payload = b"hello debug info".to_vec();
        let compressed = compress_section(&payload, &hdr, ELFCOMPRESS_ZLIB).unwrap();
        let (decompressed, ch_type, ch_size) = decompress_section(&compressed, &hdr).unwrap();
        assert_eq!(decompressed, payload);
        assert_eq!(ch_type, ELFCOMPRESS_ZLIB);
        assert_eq!(ch_size, payload.len() as u64);
    }
}
