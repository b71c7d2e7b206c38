//! String-pool manager (`spec.md` §4.C), one instance per string section
//! (`.debug_str`, `.debug_line_str`).
//!
//! Modeled on the accumulate-then-finalize shape of `PackageStringTable` in
//! the `thorin` DWARF-package writer: an `IndexSet` gives deduplication and a
//! stable insertion order to finalize from, and a side map remembers each
//! original offset's assigned entry so phase 1 can look it up by the value
//! it already has in hand (the CU's old `strp`/`strx` offset) rather than by
//! content.

use indexmap::IndexSet;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Sentinel value substituted for a `.debug_str_offsets` entry that points
/// at a string never reached through any DIE attribute (`spec.md` §4.C,
/// §4.I, §8 "unreachable string").
pub const DUMMY_ENTRY: &[u8] = b"<debugedit>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewOffset(pub u32);

pub struct StringPool<'a> {
    original: &'a [u8],
    base_dir: Option<&'a str>,
    dest_dir: Option<&'a str>,
    strings: IndexSet<Vec<u8>>,
    by_orig_offset: HashMap<u32, usize>,
    dummy_index: Option<usize>,
    finalized: Option<(Vec<u8>, Vec<u32>)>,
}

impl<'a> StringPool<'a> {
    pub fn new(original: &'a [u8], base_dir: Option<&'a str>, dest_dir: Option<&'a str>) -> Self {
        StringPool {
            original,
            base_dir,
            dest_dir,
            strings: IndexSet::new(),
            by_orig_offset: HashMap::new(),
            dummy_index: None,
            finalized: None,
        }
    }

    fn read_cstr(&self, orig_off: u32) -> Result<&'a [u8]> {
        let start = orig_off as usize;
        let rest = self
            .original
            .get(start..)
            .ok_or_else(|| Error::format(format!("string offset {orig_off} out of bounds")))?;
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::format(format!("unterminated string at offset {orig_off}")))?;
        Ok(&rest[..end])
    }

    fn insert(&mut self, orig_off: u32, value: Vec<u8>) -> usize {
        let (index, _) = self.strings.insert_full(value);
        self.by_orig_offset.insert(orig_off, index);
        index
    }

    /// `register_existing`: idempotent; copies the original string verbatim
    /// into the new pool if not already known for this offset.
    pub fn register_existing(&mut self, orig_off: u32) -> Result<()> {
        if self.by_orig_offset.contains_key(&orig_off) {
            return Ok(());
        }
        let s = self.read_cstr(orig_off)?.to_vec();
        self.insert(orig_off, s);
        Ok(())
    }

    /// `register_replaced`: like `register_existing`, but substitutes
    /// `dest_dir[/tail]` when the string begins with `base_dir`. Returns
    /// `true` iff a replacement happened.
    pub fn register_replaced(&mut self, orig_off: u32) -> Result<bool> {
        if let Some(&idx) = self.by_orig_offset.get(&orig_off) {
            // Already registered: report whether it differs from the original.
            let original = self.read_cstr(orig_off)?;
            return Ok(self.strings[idx] != original);
        }
        let original = self.read_cstr(orig_off)?;
        let replaced = self.replacement_for(original);
        let (is_replacement, value) = match replaced {
            Some(v) => (true, v),
            None => (false, original.to_vec()),
        };
        self.insert(orig_off, value);
        Ok(is_replacement)
    }

    fn replacement_for(&self, original: &[u8]) -> Option<Vec<u8>> {
        let (base, dest) = (self.base_dir?, self.dest_dir?);
        let original_str = std::str::from_utf8(original).ok()?;
        let tail = crate::path_util::skip_prefix(original_str, base)?;
        let mut out = dest.as_bytes().to_vec();
        if !tail.is_empty() {
            out.push(b'/');
            out.extend_from_slice(tail.as_bytes());
        }
        Some(out)
    }

    /// Returns the original (pre-replacement) NUL-terminated string at
    /// `orig_off`, for callers that need the text itself rather than a
    /// pool offset (e.g. synthesizing `comp_dir` from a `DW_AT_name`).
    pub fn original_str(&self, orig_off: u32) -> Result<&'a str> {
        let bytes = self.read_cstr(orig_off)?;
        std::str::from_utf8(bytes).map_err(|_| Error::format("string is not valid UTF-8".to_string()))
    }

    /// `lookup`: phase-1 operation. Requires the pool to be finalized.
    pub fn lookup(&self, orig_off: u32, accept_missing: bool) -> Result<NewOffset> {
        let (_, offsets) = self
            .finalized
            .as_ref()
            .ok_or_else(|| Error::format("string pool lookup before finalize".to_string()))?;
        if let Some(&idx) = self.by_orig_offset.get(&orig_off) {
            return Ok(NewOffset(offsets[idx]));
        }
        if accept_missing {
            let idx = self
                .dummy_index
                .ok_or_else(|| Error::format("dummy entry requested but never materialized".to_string()))?;
            return Ok(NewOffset(offsets[idx]));
        }
        Err(Error::format(format!(
            "string offset {orig_off} was never registered in phase 0"
        )))
    }

    /// Materializes the fixed `"<debugedit>"` entry. Only called when a
    /// `.debug_str_offsets` table exists (`spec.md` §4.C invariant).
    pub fn ensure_dummy_entry(&mut self) {
        if self.dummy_index.is_some() {
            return;
        }
        let (index, _) = self.strings.insert_full(DUMMY_ENTRY.to_vec());
        self.dummy_index = Some(index);
    }

    /// Materializes a contiguous buffer with each entry's final offset.
    /// Entries keep the insertion order `IndexSet` already deduplicated them
    /// into, so every distinct byte string is written exactly once.
    pub fn finalize(&mut self) {
        if self.finalized.is_some() {
            return;
        }
        let mut buf = Vec::new();
        let mut offsets = Vec::with_capacity(self.strings.len());
        for s in self.strings.iter() {
            offsets.push(buf.len() as u32);
            buf.extend_from_slice(s);
            buf.push(0);
        }
        self.finalized = Some((buf, offsets));
    }

    pub fn finalized_payload(&self) -> Option<&[u8]> {
        self.finalized.as_ref().map(|(buf, _)| buf.as_slice())
    }

    pub fn is_dirty(&self) -> bool {
        !self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_cstrs(strs: &[&str]) -> (Vec<u8>, Vec<u32>) {
        let mut data = Vec::new();
        let mut offs = Vec::new();
        for s in strs {
            offs.push(data.len() as u32);
            data.extend_from_slice(s.as_bytes());
            data.push(0);
        }
        (data, offs)
    }

    #[test]
    fn register_existing_is_idempotent() {
        let (data, offs) = pool_with_cstrs(&["/build/src/pkg/a.c"]);
        let mut pool = StringPool::new(&data, None, None);
        pool.register_existing(offs[0]).unwrap();
        pool.register_existing(offs[0]).unwrap();
        pool.finalize();
        assert_eq!(pool.finalized_payload().unwrap(), b"/build/src/pkg/a.c\0");
    }

    #[test]
    fn register_replaced_rewrites_matching_prefix() {
        let (data, offs) = pool_with_cstrs(&["/build/src/pkg"]);
        let mut pool = StringPool::new(&data, Some("/build/src"), Some("/usr/src"));
        let replaced = pool.register_replaced(offs[0]).unwrap();
        assert!(replaced);
        pool.finalize();
        let new_off = pool.lookup(offs[0], false).unwrap();
        let payload = pool.finalized_payload().unwrap();
        let s = &payload[new_off.0 as usize..];
        let end = s.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&s[..end], b"/usr/src/pkg");
    }

    #[test]
    fn register_replaced_leaves_non_matching_alone() {
        let (data, offs) = pool_with_cstrs(&["/other/path"]);
        let mut pool = StringPool::new(&data, Some("/build/src"), Some("/usr/src"));
        let replaced = pool.register_replaced(offs[0]).unwrap();
        assert!(!replaced);
    }

    #[test]
    fn deduplicates_identical_strings() {
        let (data, offs) = pool_with_cstrs(&["same", "same"]);
        let mut pool = StringPool::new(&data, None, None);
        pool.register_existing(offs[0]).unwrap();
        pool.register_existing(offs[1]).unwrap();
        pool.finalize();
        let a = pool.lookup(offs[0], false).unwrap();
        let b = pool.lookup(offs[1], false).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.finalized_payload().unwrap(), b"same\0");
    }

    #[test]
    fn missing_entry_falls_back_to_dummy_when_accepted() {
        let (data, _offs) = pool_with_cstrs(&["registered"]);
        let mut pool = StringPool::new(&data, None, None);
        pool.ensure_dummy_entry();
        pool.finalize();
        let dummy = pool.lookup(999, true).unwrap();
        let payload = pool.finalized_payload().unwrap();
        let s = &payload[dummy.0 as usize..];
        let end = s.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&s[..end], DUMMY_ENTRY);
    }

    #[test]
    fn missing_entry_without_accept_missing_is_an_error() {
        let (data, _offs) = pool_with_cstrs(&["registered"]);
        let mut pool = StringPool::new(&data, None, None);
        pool.finalize();
        assert!(pool.lookup(999, false).is_err());
    }
}
