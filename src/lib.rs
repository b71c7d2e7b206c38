//! Post-link DWARF debug-info rewriter: rewrites embedded source-file paths
//! and recomputes the `NT_GNU_BUILD_ID` note of an ELF object, without
//! touching any allocated (loadable) section.
//!
//! [`run`] is the library entry point; `main.rs` is a thin CLI wrapper
//! around it built with `clap`.

pub mod abbrev;
pub mod build_id;
pub mod codec;
pub mod constants;
pub mod die;
pub mod elf;
pub mod error;
pub mod forms;
pub mod line;
pub mod listing;
pub mod macros;
pub mod orchestrator;
pub mod path_util;
pub mod reloc;
pub mod str_offsets;
pub mod strings;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use error::{Error, Result};

/// Everything the rewrite needs that isn't read from the object itself
/// (`spec.md` §6 "Configuration").
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Source-tree prefix to strip from embedded paths.
    pub base_dir: Option<String>,
    /// Replacement prefix substituted for `base_dir`.
    pub dest_dir: Option<String>,
    /// File to append every source path discovered to, one per line.
    pub list_file: Option<PathBuf>,
    /// Recompute and print the build-ID note.
    pub build_id: bool,
    /// Extra seed material folded into the build-ID hash.
    pub build_id_seed: Option<String>,
    /// Print the existing build-ID without rehashing.
    pub no_recompute_build_id: bool,
    /// Restore the input file's mtime/atime/mode after rewriting it.
    pub preserve_dates: bool,
}

/// Rewrites `path` in place per `config`. Returns the build-ID hex string
/// when one was found and `config.build_id` was requested.
pub fn run(path: &Path, config: &Config) -> Result<Option<String>> {
    let metadata = fs::metadata(path)?;
    let original_mode = metadata.permissions();
    let original_mtime = metadata.modified().ok();
    let original_atime = accessed_time(&metadata);

    if config.preserve_dates {
        widen_permissions(path, &metadata)?;
    }

    let mut data = fs::read(path)?;

    let mut listing = config
        .list_file
        .as_deref()
        .map(listing::Listing::open)
        .transpose()?;

    let base_dir = config.base_dir.as_deref();
    let dest_dir = config.dest_dir.as_deref();
    orchestrator::rewrite(&mut data, base_dir, dest_dir, listing.as_mut())?;

    let build_id_hex = if config.build_id {
        let hdr = elf::ElfHeader::parse(&data)?;
        let sections = elf::parse_section_headers(&data, &hdr)?;
        build_id::recompute_build_id(
            &mut data,
            &hdr,
            &sections,
            config.build_id_seed.as_deref(),
            config.no_recompute_build_id,
        )?
    } else {
        None
    };

    fs::write(path, &data)?;

    if config.preserve_dates {
        restore_dates(path, original_mtime, original_atime)?;
        fs::set_permissions(path, original_mode)?;
    }

    Ok(build_id_hex)
}

fn accessed_time(metadata: &fs::Metadata) -> Option<SystemTime> {
    metadata.accessed().ok()
}

fn widen_permissions(path: &Path, metadata: &fs::Metadata) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = metadata.permissions();
    let widened = perms.mode() | 0o600;
    if widened != perms.mode() {
        perms.set_mode(widened);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn restore_dates(path: &Path, mtime: Option<SystemTime>, atime: Option<SystemTime>) -> Result<()> {
    if let (Some(mtime), Some(atime)) = (mtime, atime) {
        let mtime = filetime::FileTime::from_system_time(mtime);
        let atime = filetime::FileTime::from_system_time(atime);
        filetime::set_file_times(path, atime, mtime)?;
    }
    Ok(())
}
