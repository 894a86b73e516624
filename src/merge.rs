use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::DemError;
use crate::index::{MeshUnit, MESH_GRID};
use crate::model::{Metadata, Raster};
use crate::parser::{decode_file, DecodeOptions, DecodedDem};

/// 3次メッシュDEM5の規定セル数 (横)
pub const DEM5_XSIZE: usize = 225;
/// 3次メッシュDEM5の規定セル数 (縦)
pub const DEM5_YSIZE: usize = 150;

/// マージ出力の選択。出力系はアセンブル済みラスタを、
/// プレビュー系は Terrain-RGB レンダリングを書き出す
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// 2次メッシュ単位のGeoTIFFを出力
    pub output_mesh2: bool,
    /// 3次メッシュ単位のGeoTIFFを出力
    pub output_mesh3: bool,
    /// 2次メッシュのプレビューを出力
    pub preview_mesh2: bool,
    /// 3次メッシュのプレビューを出力
    pub preview_mesh3: bool,
}

/// 1メッシュのマージで読み書きしたファイル数。呼び出し側で合算する
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub dem10_read: usize,
    pub dem5_read: usize,
    pub mesh2_written: usize,
    pub mesh3_written: usize,
}

impl std::ops::AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.dem10_read += other.dem10_read;
        self.dem5_read += other.dem5_read;
        self.mesh2_written += other.mesh2_written;
        self.mesh3_written += other.mesh3_written;
    }
}

/// マージ結果の受け取り先。GeoTIFF書き出しはこの境界の外側にある
pub trait RasterSink {
    fn write_mesh2(&self, mesh2: &str, raster: &Raster, meta: &Metadata) -> Result<()>;

    fn write_mesh3(
        &self,
        mesh2: &str,
        y: usize,
        x: usize,
        raster: &Raster,
        meta: &Metadata,
    ) -> Result<()>;

    fn preview_mesh2(&self, _mesh2: &str, _raster: &Raster, _meta: &Metadata) -> Result<()> {
        Ok(())
    }

    fn preview_mesh3(
        &self,
        _mesh2: &str,
        _y: usize,
        _x: usize,
        _raster: &Raster,
        _meta: &Metadata,
    ) -> Result<()> {
        Ok(())
    }
}

/// DEM10 の上に DEM5 をマージする。
///
/// 1. DEM10 のデータを縦横2倍にする (DEM5 の間隔に合わせる)
/// 2. 10 x 10 の DEM5 イメージ全てを同位置の DEM10 の場所で
///    2.1  DEM5 から DEM10 へ欠落値でないものをコピーする
///    2.2  コピーされた先の DEM10 の欠落値を 0 で埋める (海域 = 標高0m)
///    2.3  output_mesh3 であれば3次メッシュの元ラスタを出力する
/// 3. output_mesh2 であれば2次メッシュの処理結果を出力する
///
/// DEM10 の読み込み失敗はこのメッシュ全体の失敗、DEM5 の読み込み失敗は
/// このメッシュのマージを打ち切る。出力済みの3次メッシュはロールバックしない。
pub fn merge_mesh(
    unit: &MeshUnit,
    opts: &MergeOptions,
    sink: &dyn RasterSink,
) -> Result<MergeStats> {
    info!("Processing DEM10: {}", unit.dem10_path.display());

    let decode_opts = DecodeOptions::default();
    let DecodedDem {
        raster: dem10,
        metadata: meta10,
    } = decode_file(&unit.dem10_path, &decode_opts)
        .with_context(|| format!("failed to decode {}", unit.dem10_path.display()))?;

    let mut stats = MergeStats {
        dem10_read: 1,
        ..Default::default()
    };

    let mut work = dem10.upsample2();
    let (rows, cols) = work.shape();
    if rows % MESH_GRID != 0 || cols % MESH_GRID != 0 {
        return Err(DemError::extent(
            &unit.dem10_path.display().to_string(),
            format!("upsampled grid {rows}x{cols} cannot host a 10x10 tile arrangement"),
        )
        .into());
    }
    // タイル窓の寸法。本番データでは規定の 150x225 に一致する
    let tile_h = rows / MESH_GRID;
    let tile_w = cols / MESH_GRID;
    if (tile_h, tile_w) != (DEM5_YSIZE, DEM5_XSIZE) {
        debug!("tile window {tile_h}x{tile_w} differs from nominal {DEM5_YSIZE}x{DEM5_XSIZE}");
    }

    for y in (0..MESH_GRID).rev() {
        let mut row_progress = String::with_capacity(MESH_GRID * 3);
        for x in 0..MESH_GRID {
            // 行0が最北端なので、南端タイル y=0 はラスタの最下段にあたる
            let ys = (MESH_GRID - 1 - y) * tile_h;
            let xs = x * tile_w;

            if let Some(dem5_path) = &unit.dem5_paths[y][x] {
                let DecodedDem {
                    raster: dem5,
                    metadata: meta5,
                } = decode_file(dem5_path, &decode_opts)
                    .with_context(|| format!("failed to decode {}", dem5_path.display()))?;
                stats.dem5_read += 1;

                if dem5.shape() != (tile_h, tile_w) {
                    return Err(DemError::extent(
                        &dem5_path.display().to_string(),
                        format!(
                            "DEM5 shape {}x{} does not fit tile window {tile_h}x{tile_w}",
                            dem5.rows(),
                            dem5.cols()
                        ),
                    )
                    .into());
                }

                overlay_window(&mut work, &dem5, ys, xs);
                fill_window(&mut work, ys, xs, tile_h, tile_w);
                row_progress.push('■');

                // 3次メッシュ出力はマージ前の元ラスタを書く (元データ保全)
                if opts.output_mesh3 {
                    sink.write_mesh3(&unit.mesh2, y, x, &dem5, &meta5)?;
                    stats.mesh3_written += 1;
                }
                if opts.preview_mesh3 {
                    let merged = copy_window(&work, ys, xs, tile_h, tile_w);
                    sink.preview_mesh3(&unit.mesh2, y, x, &merged, &meta5)?;
                }
            } else {
                fill_window(&mut work, ys, xs, tile_h, tile_w);
                row_progress.push('□');
            }
        }
        info!("{}  {}", unit.mesh2, row_progress);
    }

    if opts.output_mesh2 {
        sink.write_mesh2(&unit.mesh2, &work, &meta10)?;
        stats.mesh2_written += 1;
    }
    if opts.preview_mesh2 {
        sink.preview_mesh2(&unit.mesh2, &work, &meta10)?;
    }

    Ok(stats)
}

/// タイル窓へDEM5の欠落値でないセルをコピーする
fn overlay_window(work: &mut Raster, dem5: &Raster, ys: usize, xs: usize) {
    for r in 0..dem5.rows() {
        for c in 0..dem5.cols() {
            let v = dem5.get(r, c);
            if !v.is_nan() {
                work.set(ys + r, xs + c, v);
            }
        }
    }
}

/// タイル窓に残った欠落値を標高0mで埋める
fn fill_window(work: &mut Raster, ys: usize, xs: usize, tile_h: usize, tile_w: usize) {
    for r in ys..ys + tile_h {
        for c in xs..xs + tile_w {
            if work.get(r, c).is_nan() {
                work.set(r, c, 0.0);
            }
        }
    }
}

fn copy_window(work: &Raster, ys: usize, xs: usize, tile_h: usize, tile_w: usize) -> Raster {
    let mut values = Vec::with_capacity(tile_h * tile_w);
    for r in ys..ys + tile_h {
        for c in xs..xs + tile_w {
            values.push(work.get(r, c));
        }
    }
    Raster::from_vec(tile_h, tile_w, values)
}
