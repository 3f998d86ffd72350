//! Deterministic tar.zst bundles and single-file zstd compression.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

const ZSTD_LEVEL: i32 = 3;

/// Archive `src_dir` as `<root_name>/...` into `out_path`.
///
/// Entries are sorted and carry zeroed mtime and ownership, so the same tree
/// always produces the same archive bytes.
pub fn create_tar_zst(src_dir: &Path, root_name: &str, out_path: &Path) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .map(|ent| ent.into_path())
        .collect();
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy();
        ra.cmp(&rb)
    });

    for p in entries {
        let rel = p.strip_prefix(src_dir).unwrap_or(&p);
        let name = if rel.as_os_str().is_empty() {
            PathBuf::from(root_name)
        } else {
            Path::new(root_name).join(rel)
        };

        let md = fs::symlink_metadata(&p)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(md.permissions().mode());
        }

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, &name, io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&p)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(&target)?;
            header.set_cksum();
            builder.append_data(&mut header, &name, io::empty())?;
        } else if md.is_file() {
            let mut f = File::open(&p)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            builder.append_data(&mut header, &name, &mut f)?;
        }
    }

    let encoder = builder
        .into_inner()
        .with_context(|| "Failed to finalize tar builder")?;
    encoder.finish()?;
    Ok(())
}

/// Compress `src` to `dst` with zstd.
pub fn compress_file(src: &Path, dst: &Path) -> Result<()> {
    let input = File::open(src).with_context(|| format!("Failed to open {}", src.display()))?;
    let output =
        File::create(dst).with_context(|| format!("Failed to create {}", dst.display()))?;
    zstd::stream::copy_encode(BufReader::new(input), output, ZSTD_LEVEL)
        .with_context(|| format!("compressing {} to {}", src.display(), dst.display()))?;
    Ok(())
}
