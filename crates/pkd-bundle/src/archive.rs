//! tar and tar.gz packing and unpacking

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{Error, Result};

/// Container format of an archive, derived from its file name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip-wrapped tar (`.tar.gz`, `.tgz`)
    TarGz,
    /// Plain tar (`.tar`)
    Tar,
}

impl ArchiveFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".tar") {
            Ok(Self::Tar)
        } else {
            Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    }
}

/// Write `source_dir` as a gzip-compressed tar into `writer`
///
/// Entries are named relative to the parent of `source_dir`, so the
/// directory's own name is the first component of every path. Directories
/// precede their contents and siblings are sorted by name. Returns the
/// number of entries written.
pub fn pack<W: Write>(source_dir: &Path, writer: W) -> Result<usize> {
    let source_dir = fs::canonicalize(source_dir).map_err(|e| Error::io(source_dir, e))?;
    let base = match (source_dir.parent(), source_dir.file_name()) {
        (Some(parent), Some(_)) => parent.to_path_buf(),
        _ => {
            return Err(Error::format(
                source_dir.display().to_string(),
                "cannot pack a filesystem root",
            ))
        }
    };

    let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));
    builder.follow_symlinks(false);

    let mut entries = 0;
    for entry in WalkDir::new(&source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source_dir.as_path()).to_path_buf();
            Error::io(path, io::Error::from(e))
        })?;
        let path = entry.path();
        let name = entry_name(path, &base)?;

        builder
            .append_path_with_name(path, &name)
            .map_err(|e| Error::io(path, e))?;
        entries += 1;
    }

    // tar trailer first, then the gzip footer
    let encoder = builder
        .into_inner()
        .map_err(|e| Error::io(&source_dir, e))?;
    encoder.finish().map_err(|e| Error::io(&source_dir, e))?;

    debug!(source = %source_dir.display(), entries, "packed archive");
    Ok(entries)
}

/// Pack `source_dir` into a new file at `dest`
pub fn pack_to_file(source_dir: &Path, dest: &Path) -> Result<usize> {
    let file = File::create(dest).map_err(|e| Error::io(dest, e))?;
    let mut writer = BufWriter::new(file);
    let entries = pack(source_dir, &mut writer)?;
    writer.flush().map_err(|e| Error::io(dest, e))?;

    info!(archive = %dest.display(), entries, "wrote bundle");
    Ok(entries)
}

/// Forward-slash path of `path` relative to `base`
fn entry_name(path: &Path, base: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| {
        Error::format(
            path.display().to_string(),
            format!("not under {}", base.display()),
        )
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Extract an archive stream into `dest`
///
/// Directories are created, regular files are written (replacing existing
/// ones) with their recorded mode on unix, and other entry types are
/// skipped. A regular file without a directory component, or any entry
/// escaping `dest`, is an error. Returns the number of files written.
pub fn unpack<R: Read>(reader: R, format: ArchiveFormat, dest: &Path) -> Result<usize> {
    unpack_with(reader, format, dest, Layout::Rooted)
}

/// Open `path` and unpack it into `dest`, detecting the format by name
pub fn unpack_file(path: &Path, dest: &Path) -> Result<usize> {
    open_and_unpack(path, dest, Layout::Rooted)
}

/// Like [`unpack_file`], but files may sit at the top of the archive
///
/// Release tarballs ship their binaries without a wrapping directory.
pub fn extract_file(path: &Path, dest: &Path) -> Result<usize> {
    open_and_unpack(path, dest, Layout::Flat)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    /// Every file lives under a top-level directory
    Rooted,
    /// Top-level files are allowed
    Flat,
}

fn open_and_unpack(path: &Path, dest: &Path, layout: Layout) -> Result<usize> {
    let format = ArchiveFormat::from_path(path)?;
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let files = unpack_with(BufReader::new(file), format, dest, layout)?;

    info!(archive = %path.display(), dest = %dest.display(), files, "extracted archive");
    Ok(files)
}

fn unpack_with<R: Read>(
    reader: R,
    format: ArchiveFormat,
    dest: &Path,
    layout: Layout,
) -> Result<usize> {
    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;
    match format {
        ArchiveFormat::TarGz => extract(Archive::new(GzDecoder::new(reader)), dest, layout),
        ArchiveFormat::Tar => extract(Archive::new(reader), dest, layout),
    }
}

fn extract<R: Read>(mut archive: Archive<R>, dest: &Path, layout: Layout) -> Result<usize> {
    let mut files = 0;
    for entry in archive.entries().map_err(|e| Error::io(dest, e))? {
        let mut entry = entry.map_err(|e| Error::io(dest, e))?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let target = dest.join(sanitize(&raw)?);

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if layout == Layout::Rooted && !raw.contains('/') {
                    return Err(Error::format(raw, "file entry has no directory component"));
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                }

                remove_existing(&target)?;
                let mut file = File::create(&target).map_err(|e| Error::io(&target, e))?;
                io::copy(&mut entry, &mut file).map_err(|e| Error::io(&target, e))?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = entry.header().mode().map_err(|e| Error::io(&target, e))?;
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
                        .map_err(|e| Error::io(&target, e))?;
                }
                files += 1;
            }
            other => {
                debug!(entry = %raw, kind = ?other, "skipping archive entry");
            }
        }
    }

    debug!(dest = %dest.display(), files, "unpacked archive");
    Ok(files)
}

/// Drop a file left by an earlier unpack, which may be read-only
fn remove_existing(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(target).map_err(|e| Error::io(target, e)),
        _ => Ok(()),
    }
}

/// Relative path for an entry, rejecting anything that could escape
fn sanitize(raw: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::format(raw, "path escapes the destination"));
            }
        }
    }
    if path.as_os_str().is_empty() {
        return Err(Error::format(raw, "empty path"));
    }
    Ok(path)
}
