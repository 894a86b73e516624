use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{DemError, Result};

/// 2次メッシュ1枚あたりの3次メッシュ分割数 (10x10)
pub const MESH_GRID: usize = 10;

/// 2次メッシュ単位の取得結果。DEM10ファイル1つと、配下のDEM5ファイル10x10
#[derive(Debug, Clone)]
pub struct MeshUnit {
    /// 2次メッシュコード (例: "5339-12")
    pub mesh2: String,
    pub dem10_path: PathBuf,
    /// [y][x]、y=0 が南端。None はその位置のDEM5が存在しない
    pub dem5_paths: [[Option<PathBuf>; MESH_GRID]; MESH_GRID],
}

impl MeshUnit {
    pub fn dem5_count(&self) -> usize {
        self.dem5_paths
            .iter()
            .flatten()
            .filter(|p| p.is_some())
            .count()
    }
}

/// DEM5ファイル名: FG-GML-<2次メッシュ>-<3次位置2桁>-<タイプ>...
fn dem5_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^FG-GML-(\d{4}-\d{2})-(\d{2})-(\w+).+\.xml$").unwrap())
}

/// DEM10ファイル名: FG-GML-<2次メッシュ>-<タイプ>...
fn dem10_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^FG-GML-(\d{4}-\d{2})-(\w+).+\.xml$").unwrap())
}

fn mesh2_filter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}$").unwrap())
}

/// タイプタグ (大文字化済み) とパスの組。同一キーの重複解決に使う
type Candidate = (String, PathBuf);

/// 重複するメッシュキーは、タイプタグの辞書順で最小のものを残す。
/// タグまで同じ場合はパスの辞書順で決める (走査順に依存させない)
fn choose(slot: &mut Option<Candidate>, new: Candidate) {
    match slot {
        None => *slot = Some(new),
        Some(old) => {
            if new < *old {
                debug!(
                    "duplicate mesh key: keeping {}, discarding {}",
                    new.1.display(),
                    old.1.display()
                );
                *slot = Some(new);
            } else {
                debug!(
                    "duplicate mesh key: keeping {}, discarding {}",
                    old.1.display(),
                    new.1.display()
                );
            }
        }
    }
}

/// 指定ディレクトリ配下のDEMファイルをDEM10単位にまとめて取得する。
/// ファイルは任意の階層に存在可能。どのパターンにも一致しないファイルは無視する。
/// 戻り値は2次メッシュコード順だが、順序は契約ではない。
pub fn enumerate(roots: &[PathBuf]) -> Result<Vec<MeshUnit>> {
    let mut files5: BTreeMap<(String, String), Option<Candidate>> = BTreeMap::new();
    let mut files10: BTreeMap<String, Option<Candidate>> = BTreeMap::new();

    for root in roots {
        walk(root, &mut files5, &mut files10)?;
    }

    // 3次メッシュを2次メッシュ毎の10x10配列に配置する
    let mut map10_5: BTreeMap<String, [[Option<PathBuf>; MESH_GRID]; MESH_GRID]> = BTreeMap::new();
    for ((mesh2, mesh3), candidate) in files5 {
        let Some((_, path)) = candidate else { continue };
        let mut digits = mesh3.chars();
        let y = digits.next().and_then(|c| c.to_digit(10)).unwrap_or(0) as usize;
        let x = digits.next().and_then(|c| c.to_digit(10)).unwrap_or(0) as usize;
        map10_5.entry(mesh2).or_default()[y][x] = Some(path);
    }

    let mut units = Vec::with_capacity(files10.len());
    for (mesh2, candidate) in files10 {
        let Some((_, dem10_path)) = candidate else { continue };
        let dem5_paths = map10_5.remove(&mesh2).unwrap_or_default();
        units.push(MeshUnit {
            mesh2,
            dem10_path,
            dem5_paths,
        });
    }

    // DEM5 だけ存在して DEM10 が見つからなかったメッシュは出力から落ちる
    for mesh2 in map10_5.keys() {
        warn!("mesh {mesh2} has DEM5 files but no DEM10 file; skipped");
    }

    Ok(units)
}

fn walk(
    dir: &Path,
    files5: &mut BTreeMap<(String, String), Option<Candidate>>,
    files10: &mut BTreeMap<String, Option<Candidate>>,
) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files5, files10)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // DEM5 のパターンを先に試す。DEM10 のパターンは3次位置の2桁も
        // タイプタグとして拾ってしまうため、順序に意味がある
        if let Some(caps) = dem5_pattern().captures(name) {
            let key = (caps[1].to_string(), caps[2].to_string());
            let candidate = (caps[3].to_ascii_uppercase(), path.clone());
            choose(files5.entry(key).or_default(), candidate);
        } else if let Some(caps) = dem10_pattern().captures(name) {
            let key = caps[1].to_string();
            let candidate = (caps[2].to_ascii_uppercase(), path.clone());
            choose(files10.entry(key).or_default(), candidate);
        } else {
            debug!("ignoring non-DEM file: {}", path.display());
        }
    }
    Ok(())
}

/// メッシュ指定は 9999-99 形式のみ受け付ける。ファイルI/Oの前に検証すること
pub fn validate_mesh_filters(filters: &[String]) -> Result<()> {
    for filter in filters {
        if !mesh2_filter_pattern().is_match(filter) {
            return Err(DemError::InvalidMeshFilter(filter.clone()));
        }
    }
    Ok(())
}

/// 明示的に要求されたメッシュにDEM10が解決されていることを確認する
pub fn require_meshes(units: &[MeshUnit], filters: &[String]) -> Result<()> {
    for filter in filters {
        if !units.iter().any(|u| &u.mesh2 == filter) {
            return Err(DemError::MissingDem10(filter.clone()));
        }
    }
    Ok(())
}
