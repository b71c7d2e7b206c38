//! Per-section relocation index (`spec.md` §4.D).
//!
//! The original keeps a single-slot "last relocation" triple as a process
//! global (`last_reloc` in `debugedit.c`'s `do_read_32_relocated` /
//! `do_write_32_relocated` macros) so that a read immediately followed by a
//! write for the same pointer can reuse the binary-search hit. Here that
//! becomes an explicit one-slot register owned by the index itself
//! (`spec.md` §9 "Global mutable state").

use crate::elf::{self, Class, ElfHeader, RawReloc, SectionHeader};
use crate::error::{Error, Result};

/// One relocation entry, indexed by its location within the target
/// section's payload. `addend` already has the symbol value folded in
/// (`spec.md` §3 "Relocation record"): `sym_value + entry_addend`.
#[derive(Debug, Clone, Copy)]
pub struct RelocEntry {
    pub offset: u64,
    pub addend: i64,
    pub source_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelKind {
    Rel,
    Rela,
}

/// A one-slot register remembering the most recent successful lookup, so a
/// matching `write_32` call can avoid a second search. Any other index
/// operation must invalidate it (`spec.md` §5 "no other relocation-aware
/// operation may intervene").
#[derive(Debug, Clone, Copy)]
struct LastHit {
    offset: u64,
    entry_index: usize,
}

#[derive(Debug)]
pub struct RelocIndex {
    pub kind: RelKind,
    entries: Vec<RelocEntry>,
    dirty: bool,
    last_hit: Option<LastHit>,
}

impl RelocIndex {
    /// Builds the index from raw ELF relocations, keeping only entries whose
    /// symbol resolves within a recognized debug section, whose type is the
    /// machine's 32-bit absolute relocation, and (for REL) whose symbol
    /// value is nonzero (`spec.md` §4.D).
    pub fn build(
        data: &[u8],
        hdr: &ElfHeader,
        relsec: &SectionHeader,
        symtab: &SectionHeader,
        machine: u16,
    ) -> Result<RelocIndex> {
        let kind = if relsec.sh_type == elf::SHT_RELA {
            RelKind::Rela
        } else {
            RelKind::Rel
        };
        let accepted = crate::constants::abs32_relocation_types(machine).ok_or_else(|| {
            Error::constraint(format!("unrecognized e_machine {machine} for relocations"))
        })?;

        let raw = elf::parse_relocations(data, hdr, relsec)?;
        let mut entries = Vec::with_capacity(raw.len());
        for (i, r) in raw.iter().enumerate() {
            if !accepted.contains(&r.r_type) {
                return Err(Error::constraint(format!(
                    "unsupported relocation type {} for machine {machine}",
                    r.r_type
                )));
            }
            let sym = elf::parse_symbol(data, hdr, symtab, r.r_sym)?;
            let addend = match r.r_addend {
                Some(a) => sym.st_value as i64 + a,
                None => {
                    if sym.st_value == 0 {
                        continue;
                    }
                    // REL: addend lives in the section payload at r_offset;
                    // resolved lazily by the caller via `resolve_rel_addend`.
                    sym.st_value as i64
                }
            };
            entries.push(RelocEntry {
                offset: r.r_offset,
                addend,
                source_index: i,
            });
        }
        entries.sort_by_key(|e| e.offset);
        Ok(RelocIndex {
            kind,
            entries,
            dirty: false,
            last_hit: None,
        })
    }

    fn find(&self, offset: u64) -> Option<usize> {
        self.entries.binary_search_by_key(&offset, |e| e.offset).ok()
    }

    /// `read_32_relocated` (`spec.md` §4.D): returns the relocated value
    /// for `ptr`, or `in_place` unchanged if no relocation is recorded at
    /// that location. Records the hit (or its absence) in the one-slot
    /// register for a following `write_32_relocated`.
    pub fn read_32(&mut self, offset: u64, in_place: u32) -> u32 {
        match self.find(offset) {
            Some(idx) => {
                self.last_hit = Some(LastHit { offset, entry_index: idx });
                match self.kind {
                    RelKind::Rela => self.entries[idx].addend as u32,
                    RelKind::Rel => (in_place as i64 + self.entries[idx].addend) as u32,
                }
            }
            None => {
                self.last_hit = None;
                in_place
            }
        }
    }

    /// `write_32_relocated`: expected to be called with the same `offset` as
    /// the immediately preceding `read_32`. Returns `Some(value)` when the
    /// caller must still write `value` into the section payload at `offset`;
    /// returns `None` when nothing more is needed (the value was folded into
    /// a `Rela` addend, flushed later by `flush`).
    ///
    /// For `Rel`, the section payload stores only the addend portion — the
    /// symbol value is folded back in by the linker — so the byte written
    /// back is `new_value - entry.addend`, mirroring `do_write_32_relocated`
    /// (`debugedit.c:546-547`), not `new_value` itself. When no relocation
    /// entry covers `offset` (a debug-section field with a relocation table
    /// but no entry at this particular location, or `write_32` called
    /// without a preceding hit), the field simply isn't relocated: `new_value`
    /// is returned unchanged for a plain write, matching the original's
    /// `else do_write_32(ptr, val)` branch rather than treating it as an
    /// error.
    pub fn write_32(&mut self, offset: u64, new_value: u32) -> Option<u32> {
        match self.last_hit {
            Some(hit) if hit.offset == offset => match self.kind {
                RelKind::Rela => {
                    self.entries[hit.entry_index].addend = new_value as i64;
                    self.dirty = true;
                    None
                }
                RelKind::Rel => {
                    let addend = self.entries[hit.entry_index].addend;
                    Some((new_value as i64 - addend) as u32)
                }
            },
            _ => Some(new_value),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `update_rela_data`: re-encodes every dirtied `Rela` entry's addend
    /// back to `record.addend - sym_value` and writes it into the ELF
    /// relocation entries.
    pub fn flush(
        &self,
        data: &mut [u8],
        hdr: &ElfHeader,
        relsec: &SectionHeader,
        symtab: &SectionHeader,
    ) -> Result<()> {
        if self.kind != RelKind::Rela || !self.dirty {
            return Ok(());
        }
        let raw = elf::parse_relocations(data, hdr, relsec)?;
        let mut raw = raw;
        for entry in &self.entries {
            let r = &mut raw[entry.source_index];
            let sym = elf::parse_symbol(data, hdr, symtab, r.r_sym)?;
            r.r_addend = Some(entry.addend - sym.st_value as i64);
        }
        for (i, r) in raw.iter().enumerate() {
            elf::write_relocation(data, hdr, relsec, i, r);
        }
        Ok(())
    }
}

#[allow(dead_code)]
fn entsize_for(class: Class, rela: bool) -> usize {
    match (class, rela) {
        (Class::Elf32, false) => 8,
        (Class::Elf32, true) => 12,
        (Class::Elf64, false) => 16,
        (Class::Elf64, true) => 24,
    }
}

/// Lets other modules' tests build a minimal `RelocIndex` without going
/// through `RelocIndex::build`'s ELF parsing.
#[cfg(test)]
pub(crate) mod test_support {
    use super::{RelKind, RelocEntry, RelocIndex};

    pub fn rela_index_with_one_entry(offset: u64, addend: i64) -> RelocIndex {
        RelocIndex {
            kind: RelKind::Rela,
            entries: vec![RelocEntry { offset, addend, source_index: 0 }],
            dirty: false,
            last_hit: None,
        }
    }
}

#[cfg(test)]
impl RelocIndex {
    pub(crate) fn addend_at(&self, offset: u64) -> Option<i64> {
        self.entries.iter().find(|e| e.offset == offset).map(|e| e.addend)
    }
}
