use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{DriverManager, Metadata as _};
use std::fs;
use std::path::{Path, PathBuf};

use crate::merge::RasterSink;
use crate::model::{Metadata, Raster};
use crate::terrain_rgb::elevation_to_rgb;

const NODATA_VALUE: f64 = -9999.0;

/// マージ結果をGeoTIFFとして書き出す。出力パスの命名規則:
///   2次メッシュ: <output>/FG-GML-<mesh2>.tiff
///   3次メッシュ: <output>/<mesh2>/FG-GML-<mesh2>-<yx>.tiff
/// プレビューは末尾に -preview を付けた Terrain-RGB 版
pub struct GeoTiffWriter {
    output_dir: PathBuf,
}

impl GeoTiffWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn write(&self, raster: &Raster, meta: &Metadata, output_path: &Path) -> Result<()> {
        // 座標系はこの境界で確定させる。未知のトークンはここでエラー
        let epsg = meta
            .epsg()
            .with_context(|| format!("unknown CRS identifier: {}", meta.crs_identifier))?;

        // GTiffドライバーを取得
        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        let (rows, cols) = raster.shape();
        let mut dataset = driver
            .create_with_band_type::<f32, _>(output_path, cols, rows, 1)
            .context("Failed to create dataset")?;

        self.set_geo_metadata(&mut dataset, raster, meta, epsg)?;

        // バンドにデータを書き込み。欠落値マーカーはセンチネルに戻す
        let mut band = dataset.rasterband(1).context("Failed to get raster band")?;
        band.set_no_data_value(Some(NODATA_VALUE))
            .context("Failed to set no data value")?;

        let values: Vec<f32> = raster
            .values()
            .iter()
            .map(|&v| if v.is_nan() { NODATA_VALUE as f32 } else { v })
            .collect();
        let mut buffer = Buffer::new((cols, rows), values);
        band.write((0, 0), (cols, rows), &mut buffer)
            .context("Failed to write raster data")?;

        Ok(())
    }

    pub fn write_terrain_rgb(
        &self,
        raster: &Raster,
        meta: &Metadata,
        output_path: &Path,
    ) -> Result<()> {
        let epsg = meta
            .epsg()
            .with_context(|| format!("unknown CRS identifier: {}", meta.crs_identifier))?;

        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        let (rows, cols) = raster.shape();
        // 8-bit RGB GeoTIFFを作成
        let mut dataset = driver
            .create_with_band_type::<u8, _>(output_path, cols, rows, 3)
            .context("Failed to create dataset")?;

        self.set_geo_metadata(&mut dataset, raster, meta, epsg)?;

        let mut r_band = vec![0u8; cols * rows];
        let mut g_band = vec![0u8; cols * rows];
        let mut b_band = vec![0u8; cols * rows];

        for (i, &elevation) in raster.values().iter().enumerate() {
            // 欠落値は黒のまま
            if !elevation.is_nan() && elevation != NODATA_VALUE as f32 {
                let (r, g, b) = elevation_to_rgb(elevation);
                r_band[i] = r;
                g_band[i] = g;
                b_band[i] = b;
            }
        }

        for (band_index, data) in [r_band, g_band, b_band].into_iter().enumerate() {
            let mut band = dataset
                .rasterband(band_index + 1)
                .with_context(|| format!("Failed to get raster band {}", band_index + 1))?;
            let mut buffer = Buffer::new((cols, rows), data);
            band.write((0, 0), (cols, rows), &mut buffer)
                .with_context(|| format!("Failed to write band {}", band_index + 1))?;
        }

        Ok(())
    }

    fn set_geo_metadata(
        &self,
        dataset: &mut gdal::Dataset,
        raster: &Raster,
        meta: &Metadata,
        epsg: u32,
    ) -> Result<()> {
        // ジオトランスフォームは実ラスタの形状から求める
        // (マージ後のラスタは宣言された格子の2倍の解像度を持つ)
        dataset
            .set_geo_transform(&geo_transform(raster, meta))
            .context("Failed to set geo transform")?;

        let srs = SpatialRef::from_epsg(epsg)
            .with_context(|| format!("Failed to create SpatialRef from EPSG:{}", epsg))?;
        let wkt = srs
            .to_wkt()
            .context("Failed to convert SpatialRef to WKT")?;
        dataset
            .set_projection(&wkt)
            .context("Failed to set projection")?;

        dataset
            .set_metadata_item("MESHCODE", &meta.mesh_code, "")
            .context("Failed to set meshcode metadata")?;
        dataset
            .set_metadata_item("DEM_TYPE", &meta.dem_type, "")
            .context("Failed to set dem_type metadata")?;

        Ok(())
    }

    fn mesh2_path(&self, mesh2: &str, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("FG-GML-{mesh2}{suffix}.tiff"))
    }

    fn mesh3_path(&self, mesh2: &str, y: usize, x: usize, suffix: &str) -> PathBuf {
        self.output_dir
            .join(mesh2)
            .join(format!("FG-GML-{mesh2}-{y}{x}{suffix}.tiff"))
    }
}

impl RasterSink for GeoTiffWriter {
    fn write_mesh2(&self, mesh2: &str, raster: &Raster, meta: &Metadata) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        self.write(raster, meta, &self.mesh2_path(mesh2, ""))
    }

    fn write_mesh3(
        &self,
        mesh2: &str,
        y: usize,
        x: usize,
        raster: &Raster,
        meta: &Metadata,
    ) -> Result<()> {
        fs::create_dir_all(self.output_dir.join(mesh2))?;
        self.write(raster, meta, &self.mesh3_path(mesh2, y, x, ""))
    }

    fn preview_mesh2(&self, mesh2: &str, raster: &Raster, meta: &Metadata) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        self.write_terrain_rgb(raster, meta, &self.mesh2_path(mesh2, "-preview"))
    }

    fn preview_mesh3(
        &self,
        mesh2: &str,
        y: usize,
        x: usize,
        raster: &Raster,
        meta: &Metadata,
    ) -> Result<()> {
        fs::create_dir_all(self.output_dir.join(mesh2))?;
        self.write_terrain_rgb(raster, meta, &self.mesh3_path(mesh2, y, x, "-preview"))
    }
}

fn geo_transform(raster: &Raster, meta: &Metadata) -> [f64; 6] {
    let x_res = (meta.east - meta.west) / raster.cols() as f64;
    let y_res = (meta.north - meta.south) / raster.rows() as f64;
    [meta.west, x_res, 0.0, meta.north, 0.0, -y_res]
}
