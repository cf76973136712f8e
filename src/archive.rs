// Unpacking downloaded archives into a scratch directory
use crate::error::{BisectError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[cfg(unix)]
const S_IFMT: u32 = 0o170_000;
#[cfg(unix)]
const S_IFLNK: u32 = 0o120_000;

/// Extracts a zip or gzip'd tar archive into `dest`, detected by content.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    log::debug!("Extracting {} into {}", archive.display(), dest.display());
    fs::create_dir_all(dest)?;
    let mut magic = [0u8; 2];
    let is_gzip = match File::open(archive)?.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    if is_gzip {
        extract_tar_gz(archive, dest)
    } else {
        extract_zip(archive, dest)
    }
}

/// Runs [`extract`] on the blocking pool.
pub async fn extract_async(archive: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || extract(&archive, &dest))
        .await
        .map_err(|e| BisectError::InternalInvariantViolation(format!("extract task failed: {}", e)))?
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let decoder = GzDecoder::new(File::open(archive)?);
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| BisectError::Archive(format!("{}: {}", archive.display(), e)))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        // Entries escaping the destination are skipped.
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("Skipping unsafe zip entry {}", entry.name());
            continue;
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode()
            && mode & S_IFMT == S_IFLNK
        {
            // App bundles carry framework symlinks.
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            std::os::unix::fs::symlink(&target, &out)?;
            continue;
        }

        let mut file = File::create(&out)?;
        io::copy(&mut entry, &mut file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }
    Ok(())
}

/// The single path matching `pattern`. No match and several matches are
/// both errors naming `what`.
pub fn glob_unique(what: &str, pattern: &str) -> Result<PathBuf> {
    let paths = glob::glob(pattern)
        .map_err(|e| BisectError::InternalInvariantViolation(format!("bad glob {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect::<Vec<_>>();
    match paths.as_slice() {
        [] => Err(BisectError::Archive(format!(
            "Can not find the {} binary matching {}",
            what, pattern
        ))),
        [one] => Ok(std::path::absolute(one).unwrap_or_else(|_| one.clone())),
        many => Err(BisectError::Archive(format!(
            "Multiple {} executables found: {:?}",
            what, many
        ))),
    }
}

/// Glob pattern text for `dir` joined with `tail`, with glob metacharacters
/// in `dir` escaped.
pub fn glob_in(dir: &Path, tail: &str) -> String {
    format!("{}/{}", glob::Pattern::escape(&dir.display().to_string()), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        zip.add_directory("chrome-linux/", options).unwrap();
        zip.start_file("chrome-linux/chrome", options).unwrap();
        zip.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_zip_keeps_mode() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chrome-linux.zip");
        write_zip(&archive);
        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        let binary = out.join("chrome-linux/chrome");
        assert!(binary.is_file());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&binary).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Chromium.tar.gz");
        {
            let encoder = flate2::write::GzEncoder::new(
                File::create(&archive).unwrap(),
                flate2::Compression::default(),
            );
            let mut builder = tar::Builder::new(encoder);
            let data = b"<plist/>";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "Chromium.app/Info.plist", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let out = dir.path().join("out");
        extract(&archive, &out).unwrap();
        assert!(out.join("Chromium.app/Info.plist").is_file());
    }

    #[test]
    fn test_glob_unique() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/chrome"), b"").unwrap();
        let found = glob_unique("chrome", &glob_in(dir.path(), "*/chrome")).unwrap();
        assert!(found.ends_with("a/chrome"));

        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/chrome"), b"").unwrap();
        assert!(glob_unique("chrome", &glob_in(dir.path(), "*/chrome")).is_err());
        assert!(glob_unique("chromedriver", &glob_in(dir.path(), "*/chromedriver")).is_err());
    }
}
