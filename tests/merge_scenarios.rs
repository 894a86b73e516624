//! 2次メッシュ1枚ぶんのマージをエンドツーエンドで確認する。
//! 入力は本番と同寸法の FGD GML (DEM10: 750x1125 の縮小版ではなく
//! 150x225 の合成データ、DEM5: 対応するタイル窓寸法) を使う。

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use tempfile::TempDir;

use fgd_dem::index::enumerate;
use fgd_dem::merge::{merge_mesh, MergeOptions, MergeStats, RasterSink};
use fgd_dem::model::{Metadata, Raster};
use fgd_dem::validate_mesh_filters;
use fgd_dem::DemError;

fn dem_xml(mesh: &str, dem_type: &str, high: (i64, i64), tuples: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Dataset xmlns:gml="http://www.opengis.net/gml/3.2"
    xmlns="http://fgd.gsi.go.jp/spec/2008/FGD_GMLSchema" gml:id="Dataset1">
    <DEM gml:id="DEM001">
        <type>{dem_type}</type>
        <mesh>{mesh}</mesh>
        <coverage gml:id="DEM001-3">
            <gml:boundedBy>
                <gml:Envelope srsName="fguuid:jgd2011.bl">
                    <gml:lowerCorner>35.0 135.0</gml:lowerCorner>
                    <gml:upperCorner>35.083333333 135.125</gml:upperCorner>
                </gml:Envelope>
            </gml:boundedBy>
            <gml:gridDomain>
                <gml:Grid dimension="2" gml:id="DEM001-4">
                    <gml:limits>
                        <gml:GridEnvelope>
                            <gml:low>0 0</gml:low>
                            <gml:high>{hx} {hy}</gml:high>
                        </gml:GridEnvelope>
                    </gml:limits>
                    <gml:axisLabels>x y</gml:axisLabels>
                </gml:Grid>
            </gml:gridDomain>
            <gml:rangeSet>
                <gml:DataBlock>
                    <gml:tupleList>
{tuples}
                    </gml:tupleList>
                </gml:DataBlock>
            </gml:rangeSet>
            <gml:coverageFunction>
                <gml:GridFunction>
                    <gml:sequenceRule order="+x-y">Linear</gml:sequenceRule>
                    <gml:startPoint>0 0</gml:startPoint>
                </gml:GridFunction>
            </gml:coverageFunction>
        </coverage>
    </DEM>
</Dataset>"#,
        hx = high.0,
        hy = high.1,
    )
}

fn constant_tuples(value: f32, count: usize) -> String {
    format!("地表面,{value:.2}\n").repeat(count)
}

/// 150x225 の DEM10 を書く (2次メッシュ1枚の合成データ)
fn write_dem10(dir: &Path, mesh2: &str, tuples: &str) {
    let name = format!("FG-GML-{mesh2}-DEM10A-20161001.xml");
    let code = mesh2.replace('-', "");
    fs::write(
        dir.join(name),
        dem_xml(&code, "10mメッシュ（標高）", (224, 149), tuples),
    )
    .unwrap();
}

/// 30x45 の DEM5 を書く (上の DEM10 をアップサンプルした際のタイル窓寸法)
fn write_dem5(dir: &Path, mesh2: &str, y: usize, x: usize, tuples: &str) {
    let name = format!("FG-GML-{mesh2}-{y}{x}-DEM5A-20161001.xml");
    let code = format!("{}{y}{x}", mesh2.replace('-', ""));
    fs::write(
        dir.join(name),
        dem_xml(&code, "5mメッシュ（標高）", (44, 29), tuples),
    )
    .unwrap();
}

#[derive(Default)]
struct RecordingSink {
    mesh2: Mutex<Vec<(String, Raster, Metadata)>>,
    mesh3: Mutex<Vec<(String, usize, usize, Raster)>>,
}

impl RasterSink for RecordingSink {
    fn write_mesh2(&self, mesh2: &str, raster: &Raster, meta: &Metadata) -> anyhow::Result<()> {
        self.mesh2
            .lock()
            .unwrap()
            .push((mesh2.to_string(), raster.clone(), meta.clone()));
        Ok(())
    }

    fn write_mesh3(
        &self,
        mesh2: &str,
        y: usize,
        x: usize,
        raster: &Raster,
        _meta: &Metadata,
    ) -> anyhow::Result<()> {
        self.mesh3
            .lock()
            .unwrap()
            .push((mesh2.to_string(), y, x, raster.clone()));
        Ok(())
    }
}

fn single_unit(dir: &Path) -> fgd_dem::MeshUnit {
    let mut units = enumerate(&[dir.to_path_buf()]).unwrap();
    assert_eq!(units.len(), 1);
    units.remove(0)
}

#[test]
fn merge_without_dem5_doubles_and_keeps_values() {
    let dir = TempDir::new().unwrap();
    write_dem10(dir.path(), "5339-12", &constant_tuples(100.0, 150 * 225));

    let sink = RecordingSink::default();
    let opts = MergeOptions {
        output_mesh2: true,
        ..Default::default()
    };
    let stats = merge_mesh(&single_unit(dir.path()), &opts, &sink).unwrap();

    assert_eq!(
        stats,
        MergeStats {
            dem10_read: 1,
            dem5_read: 0,
            mesh2_written: 1,
            mesh3_written: 0,
        }
    );

    let written = sink.mesh2.lock().unwrap();
    let (mesh2, raster, meta) = &written[0];
    assert_eq!(mesh2, "5339-12");
    assert_eq!(raster.shape(), (300, 450));
    assert!(raster.values().iter().all(|&v| v == 100.0));
    assert_eq!(meta.mesh_code, "533912");
}

#[test]
fn merge_places_single_dem5_tile_in_its_window() {
    let dir = TempDir::new().unwrap();
    write_dem10(dir.path(), "5339-12", &constant_tuples(100.0, 150 * 225));
    write_dem5(dir.path(), "5339-12", 3, 4, &constant_tuples(50.0, 30 * 45));

    let sink = RecordingSink::default();
    let opts = MergeOptions {
        output_mesh2: true,
        output_mesh3: true,
        ..Default::default()
    };
    let stats = merge_mesh(&single_unit(dir.path()), &opts, &sink).unwrap();
    assert_eq!(stats.dem5_read, 1);
    assert_eq!(stats.mesh3_written, 1);

    let written = sink.mesh2.lock().unwrap();
    let raster = &written[0].1;
    assert_eq!(raster.shape(), (300, 450));

    // タイル (y=3, x=4) の窓: 行 (9-3)*30=180..210、列 4*45=180..225
    for r in 0..300 {
        for c in 0..450 {
            let in_window = (180..210).contains(&r) && (180..225).contains(&c);
            let expected = if in_window { 50.0 } else { 100.0 };
            assert_eq!(raster.get(r, c), expected, "({r},{c})");
        }
    }

    // 3次メッシュ出力はマージ前の元ラスタ
    let tiles = sink.mesh3.lock().unwrap();
    let (_, y, x, tile) = &tiles[0];
    assert_eq!((*y, *x), (3, 4));
    assert_eq!(tile.shape(), (30, 45));
    assert!(tile.values().iter().all(|&v| v == 50.0));
}

#[test]
fn merge_fills_ocean_with_sea_level() {
    let dir = TempDir::new().unwrap();
    // 左半分が欠落値の DEM10
    let mut tuples = String::new();
    for _ in 0..150 {
        tuples.push_str(&constant_tuples(-9999.0, 112));
        tuples.push_str(&constant_tuples(80.0, 113));
    }
    write_dem10(dir.path(), "5339-12", &tuples);

    let sink = RecordingSink::default();
    let opts = MergeOptions {
        output_mesh2: true,
        ..Default::default()
    };
    merge_mesh(&single_unit(dir.path()), &opts, &sink).unwrap();

    let written = sink.mesh2.lock().unwrap();
    let raster = &written[0].1;
    // 未初期化セルは存在せず、欠落値は海面高 0.0 になる
    for r in 0..300 {
        for c in 0..450 {
            let expected = if c < 224 { 0.0 } else { 80.0 };
            assert_eq!(raster.get(r, c), expected, "({r},{c})");
        }
    }
}

#[test]
fn invalid_mesh_filter_fails_before_any_io() {
    let err = validate_mesh_filters(&["99-9".to_string()]).unwrap_err();
    assert!(matches!(err, DemError::InvalidMeshFilter(_)), "{err}");
}

#[test]
fn enumerate_and_merge_full_mesh_unit() {
    let dir = TempDir::new().unwrap();
    write_dem10(dir.path(), "5339-12", &constant_tuples(100.0, 150 * 225));
    for y in 0..10 {
        for x in 0..10 {
            write_dem5(
                dir.path(),
                "5339-12",
                y,
                x,
                &constant_tuples((y * 10 + x) as f32, 30 * 45),
            );
        }
    }

    let unit = single_unit(dir.path());
    assert_eq!(unit.dem5_count(), 100);

    let sink = RecordingSink::default();
    let opts = MergeOptions {
        output_mesh2: true,
        output_mesh3: true,
        ..Default::default()
    };
    let stats = merge_mesh(&unit, &opts, &sink).unwrap();
    assert_eq!(stats.dem5_read, 100);
    assert_eq!(stats.mesh3_written, 100);

    let written = sink.mesh2.lock().unwrap();
    let raster = &written[0].1;
    // 各タイル窓はそのタイルの値で埋まる
    for y in 0..10usize {
        for x in 0..10usize {
            let r = (9 - y) * 30;
            let c = x * 45;
            assert_eq!(raster.get(r, c), (y * 10 + x) as f32, "tile ({y},{x})");
        }
    }
}
