use anyhow::{Context, Result, bail};
use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::catalog::{Category, HymnNumber, split_entry_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub path: PathBuf,
    pub member: String,
    pub reused: bool,
}

/// Name of the archive member holding `number` in `category`, if any.
pub fn find_member(
    archive_path: &Path,
    category: Category,
    number: HymnNumber,
    extension: &str,
) -> Result<Option<String>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    // SAFETY: The file is opened read-only and outlives the mapping.
    let mmap = unsafe {
        Mmap::map(&file).with_context(|| format!("mmap failed: {}", archive_path.display()))?
    };
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip structure: {}", archive_path.display()))?;

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let parts = split_entry_name(entry.name());
        if parts.category == Some(category) && parts.number == number && parts.extension == extension {
            return Ok(Some(entry.name().to_string()));
        }
    }
    Ok(None)
}

/// Copies one hymn out of the archive into `temp_dir`, dropping the
/// category folder from its name. An already extracted copy is reused.
pub fn extract_hymn(
    archive_path: &Path,
    category: Category,
    number: HymnNumber,
    extension: &str,
    temp_dir: &Path,
) -> Result<Extracted> {
    let Some(member) = find_member(archive_path, category, number, extension)? else {
        bail!("Hymn #{number} ({category}) is not in {}", archive_path.display());
    };

    let stripped: String = member.chars().skip(3).collect();
    let Some(file_name) = Path::new(&stripped).file_name() else {
        bail!("Archive member {member:?} has no file name");
    };
    let dest = temp_dir.join(file_name);

    if dest.exists() {
        debug!("Reusing extracted {}", dest.display());
        return Ok(Extracted {
            path: dest,
            member,
            reused: true,
        });
    }

    std::fs::create_dir_all(temp_dir)
        .with_context(|| format!("Failed to create temp directory: {}", temp_dir.display()))?;

    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip structure: {}", archive_path.display()))?;
    let mut source = archive
        .by_name(&member)
        .with_context(|| format!("Failed to locate {member:?} in archive"))?;

    write_member(&mut source, &dest).with_context(|| format!("Failed to extract {member:?}"))?;

    info!("Extracted {member:?} to {}", dest.display());
    Ok(Extracted {
        path: dest,
        member,
        reused: false,
    })
}

/// Streams into `<dest>.part` and renames it into place. The partial file is
/// removed when either step fails.
fn write_member(source: &mut impl Read, dest: &Path) -> Result<()> {
    let mut tmp_os = dest.as_os_str().to_os_string();
    tmp_os.push(".part");
    let tmp = PathBuf::from(tmp_os);

    let written = (|| -> Result<()> {
        let mut out = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
        std::io::copy(source, &mut out)?;
        drop(out);
        std::fs::rename(&tmp, dest).with_context(|| format!("Failed to move into {}", dest.display()))?;
        Ok(())
    })();
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::write_archive;

    #[test]
    fn extracts_member_without_category_folder() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("hymns.sda");
        write_archive(&archive, &["EN/", "EN/001 First.pptx", "TL/002 Una.pptx"])?;
        let temp = dir.path().join("temp");

        let first = extract_hymn(&archive, Category::Secondary, HymnNumber(2), "pptx", &temp)?;
        assert_eq!(first.path, temp.join("002 Una.pptx"));
        assert_eq!(first.member, "TL/002 Una.pptx");
        assert!(!first.reused);
        assert_eq!(std::fs::read_to_string(&first.path)?, "slides for TL/002 Una.pptx");

        let again = extract_hymn(&archive, Category::Secondary, HymnNumber(2), "pptx", &temp)?;
        assert!(again.reused);
        Ok(())
    }

    #[test]
    fn find_member_matches_category_and_number() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("hymns.sda");
        write_archive(&archive, &["EN 003 Three.pptx", "TL 003 Tatlo.pptx", "EN 004 Notes.txt"])?;

        assert_eq!(
            find_member(&archive, Category::Secondary, HymnNumber(3), "pptx")?.as_deref(),
            Some("TL 003 Tatlo.pptx")
        );
        assert_eq!(find_member(&archive, Category::Primary, HymnNumber(4), "pptx")?, None);
        assert!(extract_hymn(&archive, Category::Primary, HymnNumber(9), "pptx", dir.path()).is_err());
        Ok(())
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("archive truncated"))
        }
    }

    #[test]
    fn failed_copy_leaves_no_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("001 First.pptx");

        assert!(write_member(&mut BrokenReader, &dest).is_err());
        assert!(!dest.exists());
        assert!(!dir.path().join("001 First.pptx.part").exists());
        Ok(())
    }
}
