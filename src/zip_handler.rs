use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::Result;

/// 入力ディレクトリ配下のZIPアーカイブを展開する。
/// 基盤地図情報のダウンロードデータは FG-GML-*.xml をZIPで配布しているため、
/// 展開先を入力ツリーに加えてからインデックスを作る。
/// アーカイブが無ければ None を返す。展開先は戻り値が生きている間だけ有効
pub fn expand_archives(root: &Path) -> Result<Option<TempDir>> {
    let mut archives = Vec::new();
    collect_archives(root, &mut archives)?;
    if archives.is_empty() {
        return Ok(None);
    }

    let temp_dir = TempDir::new()?;
    let mut extracted = 0usize;
    for archive_path in &archives {
        extracted += extract_dem_entries(archive_path, temp_dir.path())?;
    }
    info!(
        "Extracted {} DEM file(s) from {} archive(s)",
        extracted,
        archives.len()
    );
    Ok(Some(temp_dir))
}

fn collect_archives(dir: &Path, archives: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_archives(&path, archives)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("zip") {
            archives.push(path);
        }
    }
    Ok(())
}

/// アーカイブ内の FG-GML-*.xml をフラットに展開する。
/// 同名エントリは最初のものを残す (重複解決はインデックス側の仕事)
fn extract_dem_entries(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut extracted = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = Path::new(entry.name())
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            continue;
        };
        if !name.starts_with("FG-GML-") || !name.ends_with(".xml") {
            debug!("ignoring archive entry: {}", entry.name());
            continue;
        }
        let dest_path = dest.join(&name);
        if dest_path.exists() {
            debug!("already extracted, skipping: {name}");
            continue;
        }
        let mut out = File::create(&dest_path)?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn make_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_no_archives_returns_none() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("FG-GML-5339-12-DEM10A.xml"), "x").unwrap();
        assert!(expand_archives(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_extracts_dem_entries_only() {
        let dir = TempDir::new().unwrap();
        make_zip(
            &dir.path().join("FG-GML-5339-12-DEM10A.zip"),
            &[
                ("FG-GML-5339-12-DEM10A-20161001.xml", "<Dataset/>"),
                ("metadata.txt", "not a dem"),
            ],
        );

        let extracted = expand_archives(dir.path()).unwrap().unwrap();
        assert!(extracted
            .path()
            .join("FG-GML-5339-12-DEM10A-20161001.xml")
            .exists());
        assert!(!extracted.path().join("metadata.txt").exists());
    }

    #[test]
    fn test_nested_entry_names_are_flattened() {
        let dir = TempDir::new().unwrap();
        make_zip(
            &dir.path().join("pack.zip"),
            &[(
                "FG-GML-5339-12/FG-GML-5339-12-00-DEM5A-20161001.xml",
                "<Dataset/>",
            )],
        );

        let extracted = expand_archives(dir.path()).unwrap().unwrap();
        assert!(extracted
            .path()
            .join("FG-GML-5339-12-00-DEM5A-20161001.xml")
            .exists());
    }

    #[test]
    fn test_archives_found_in_subdirectories() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("download");
        fs::create_dir_all(&sub).unwrap();
        make_zip(
            &sub.join("pack.zip"),
            &[("FG-GML-5440-01-DEM10B-20161001.xml", "<Dataset/>")],
        );

        let extracted = expand_archives(dir.path()).unwrap().unwrap();
        assert!(extracted
            .path()
            .join("FG-GML-5440-01-DEM10B-20161001.xml")
            .exists());
    }
}
