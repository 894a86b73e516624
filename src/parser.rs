use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{DemError, Result};
use crate::model::{Metadata, Raster, NODATA_SENTINEL};

/// デコードオプション
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// ラスタに書き込む欠落値マーカー (既定は NaN、-9999.0 を渡すと生値のまま)
    pub nodata: f32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { nodata: f32::NAN }
    }
}

/// デコード結果。ラスタとメタデータの組
#[derive(Debug, Clone)]
pub struct DecodedDem {
    pub raster: Raster,
    pub metadata: Metadata,
}

/// DEMファイルを読み込み、ラスタとメタデータを作る
pub fn decode_file(path: &Path, opts: &DecodeOptions) -> Result<DecodedDem> {
    let file = File::open(path)?;
    let label = path.display().to_string();
    let (raster, metadata) = decode_impl(BufReader::new(file), opts.nodata, false, &label)?;
    Ok(DecodedDem {
        // metadata_only=false なので必ず構築されている
        raster: raster.ok_or_else(|| DemError::malformed(&label, "raster was not materialized"))?,
        metadata,
    })
}

/// 任意のリーダーからデコードする (テスト・メモリ上のデータ用)
pub fn decode_reader<R: BufRead>(reader: R, opts: &DecodeOptions) -> Result<DecodedDem> {
    let label = "<memory>";
    let (raster, metadata) = decode_impl(reader, opts.nodata, false, label)?;
    Ok(DecodedDem {
        raster: raster.ok_or_else(|| DemError::malformed(label, "raster was not materialized"))?,
        metadata,
    })
}

/// メタデータのみを読み込む。ラスタは構築せず nodata_count は None のまま
pub fn read_metadata(path: &Path) -> Result<Metadata> {
    let file = File::open(path)?;
    let label = path.display().to_string();
    let (_, metadata) = decode_impl(BufReader::new(file), f32::NAN, true, &label)?;
    Ok(metadata)
}

pub fn read_metadata_reader<R: BufRead>(reader: R) -> Result<Metadata> {
    let (_, metadata) = decode_impl(reader, f32::NAN, true, "<memory>")?;
    Ok(metadata)
}

/// テキストを拾う対象の要素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    DemType,
    MeshCode,
    LowerCorner,
    UpperCorner,
    GridLow,
    GridHigh,
    StartPoint,
    TupleList,
}

fn decode_impl<R: BufRead>(
    reader: R,
    nodata: f32,
    metadata_only: bool,
    label: &str,
) -> Result<(Option<Raster>, Metadata)> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut buf = Vec::new();

    let mut dem_type: Option<String> = None;
    let mut mesh_code: Option<String> = None;
    let mut srs: Option<String> = None;
    let mut lower: Option<(f64, f64)> = None; // 南 西
    let mut upper: Option<(f64, f64)> = None; // 北 東
    let mut grid_low: Option<(i64, i64)> = None;
    let mut grid_high: Option<(i64, i64)> = None;
    let mut start_point: Option<(i64, i64)> = None;
    let mut samples: Vec<f32> = Vec::new();
    let mut seen_tuple_list = false;

    let mut in_grid_envelope = false;
    let mut current: Option<Field> = None;

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                match e.local_name().as_ref() {
                    b"type" if dem_type.is_none() => current = Some(Field::DemType),
                    b"mesh" if mesh_code.is_none() => current = Some(Field::MeshCode),
                    b"Envelope" => {
                        if let Some(attr) = e
                            .try_get_attribute("srsName")
                            .map_err(quick_xml::Error::from)?
                        {
                            srs = Some(
                                attr.unescape_value()
                                    .map_err(quick_xml::Error::from)?
                                    .into_owned(),
                            );
                        }
                    }
                    b"lowerCorner" => current = Some(Field::LowerCorner),
                    b"upperCorner" => current = Some(Field::UpperCorner),
                    b"GridEnvelope" => in_grid_envelope = true,
                    b"low" if in_grid_envelope => current = Some(Field::GridLow),
                    b"high" if in_grid_envelope => current = Some(Field::GridHigh),
                    b"startPoint" => current = Some(Field::StartPoint),
                    b"tupleList" if !seen_tuple_list => {
                        seen_tuple_list = true;
                        current = Some(Field::TupleList);
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some(field) = current.take() {
                    let text = t.unescape().map_err(quick_xml::Error::from)?;
                    match field {
                        Field::DemType => dem_type = Some(text.into_owned()),
                        Field::MeshCode => mesh_code = Some(text.into_owned()),
                        Field::LowerCorner => {
                            lower = Some(parse_pair(&text).ok_or_else(|| {
                                DemError::malformed(label, "invalid <gml:lowerCorner>")
                            })?)
                        }
                        Field::UpperCorner => {
                            upper = Some(parse_pair(&text).ok_or_else(|| {
                                DemError::malformed(label, "invalid <gml:upperCorner>")
                            })?)
                        }
                        Field::GridLow => {
                            grid_low =
                                Some(parse_pair(&text).ok_or_else(|| {
                                    DemError::malformed(label, "invalid <gml:low>")
                                })?)
                        }
                        Field::GridHigh => {
                            grid_high =
                                Some(parse_pair(&text).ok_or_else(|| {
                                    DemError::malformed(label, "invalid <gml:high>")
                                })?)
                        }
                        Field::StartPoint => {
                            start_point = Some(parse_pair(&text).ok_or_else(|| {
                                DemError::malformed(label, "invalid <gml:startPoint>")
                            })?)
                        }
                        Field::TupleList => {
                            if !metadata_only {
                                parse_tuple_list(&text, &mut samples, label)?;
                            }
                        }
                    }
                }
            }
            Event::End(ref e) => {
                match e.local_name().as_ref() {
                    b"GridEnvelope" => in_grid_envelope = false,
                    // ファイルが複数のDEM要素を持つ場合は先頭のみ読む
                    b"DEM" => break,
                    _ => {}
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let dem_type = dem_type.ok_or_else(|| DemError::malformed(label, "missing <type>"))?;
    let mesh_code = mesh_code.ok_or_else(|| DemError::malformed(label, "missing <mesh>"))?;
    let srs = srs.ok_or_else(|| DemError::malformed(label, "missing <gml:Envelope srsName>"))?;
    let (south, west) = lower.ok_or_else(|| DemError::malformed(label, "missing <gml:lowerCorner>"))?;
    let (north, east) = upper.ok_or_else(|| DemError::malformed(label, "missing <gml:upperCorner>"))?;
    let (low_x, low_y) = grid_low.ok_or_else(|| DemError::malformed(label, "missing <gml:low>"))?;
    let (high_x, high_y) =
        grid_high.ok_or_else(|| DemError::malformed(label, "missing <gml:high>"))?;
    let (start_x, start_y) =
        start_point.ok_or_else(|| DemError::malformed(label, "missing <gml:startPoint>"))?;
    if !seen_tuple_list {
        return Err(DemError::malformed(label, "missing <gml:tupleList>"));
    }

    if high_x < low_x || high_y < low_y {
        return Err(DemError::malformed(
            label,
            format!("invalid grid envelope ({low_x},{low_y})-({high_x},{high_y})"),
        ));
    }
    if start_x < 0 || start_y < 0 {
        return Err(DemError::malformed(
            label,
            format!("invalid start point ({start_x},{start_y})"),
        ));
    }

    let mut metadata = Metadata {
        dem_type,
        mesh_code,
        crs_identifier: srs,
        south,
        north,
        west,
        east,
        low_x,
        low_y,
        high_x,
        high_y,
        nodata_count: None,
    };

    if metadata_only {
        return Ok((None, metadata));
    }

    let rows = metadata.rows();
    let cols = metadata.cols();
    let capacity = rows * cols;
    // 先頭値の配置位置。スキャン開始点ぶんだけ前方が欠落値で埋まる
    let offset = ((high_x + 1) * start_y + start_x) as usize;
    if offset + samples.len() > capacity {
        return Err(DemError::extent(
            label,
            format!(
                "start point ({start_x},{start_y}) plus {} samples overflows {rows}x{cols} grid",
                samples.len()
            ),
        ));
    }

    let mut values = vec![nodata; capacity];
    let mut valid = 0usize;
    for (i, &raw) in samples.iter().enumerate() {
        if raw == NODATA_SENTINEL {
            values[offset + i] = nodata;
        } else {
            values[offset + i] = raw;
            valid += 1;
        }
    }
    // 欠落値 = センチネル + 開始点より前 + 末尾の未供給セル
    metadata.nodata_count = Some(capacity - valid);

    Ok((Some(Raster::from_vec(rows, cols, values)), metadata))
}

/// "地表面,360.97" 形式の行を値列へ追加する
fn parse_tuple_list(text: &str, samples: &mut Vec<f32>, label: &str) -> Result<()> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (_, value) = line.split_once(',').ok_or_else(|| {
            DemError::malformed(label, format!("sample line without separator: {line:?}"))
        })?;
        let value: f32 = value.trim().parse().map_err(|_| {
            DemError::malformed(label, format!("non-numeric sample: {value:?}"))
        })?;
        samples.push(value);
    }
    Ok(())
}

fn parse_pair<T: FromStr>(text: &str) -> Option<(T, T)> {
    let mut parts = text.split_whitespace();
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    Some((a, b))
}
