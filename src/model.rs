use std::fmt;

/// DEMファイルの欠落値 (ファイル規定のセンチネル)
pub const NODATA_SENTINEL: f32 = -9999.0;

/// DEMファイルから読み込まれたメタデータ
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// 測量タイプ (例: "5mメッシュ（標高）")
    pub dem_type: String,
    /// メッシュコード (ファイル内容に記載されたもの)
    pub mesh_code: String,
    /// 空間参照系トークン (例: "fguuid:jgd2011.bl")
    pub crs_identifier: String,
    /// 南端緯度
    pub south: f64,
    /// 北端緯度
    pub north: f64,
    /// 西端経度
    pub west: f64,
    /// 東端経度
    pub east: f64,
    /// 左端ピクセル位置
    pub low_x: i64,
    /// 下端ピクセル位置
    pub low_y: i64,
    /// 右端ピクセル位置
    pub high_x: i64,
    /// 上端ピクセル位置
    pub high_y: i64,
    /// 欠落値セル数 (ラスタを構築した場合のみ)
    pub nodata_count: Option<usize>,
}

impl Metadata {
    pub fn rows(&self) -> usize {
        (self.high_y - self.low_y + 1) as usize
    }

    pub fn cols(&self) -> usize {
        (self.high_x - self.low_x + 1) as usize
    }

    /// 空間参照系トークンからEPSGコードを求める。
    /// 既知のトークン以外は出力境界でエラーにするため None を返す。
    pub fn epsg(&self) -> Option<u32> {
        match self.crs_identifier.as_str() {
            "fguuid:jgd2011.bl" => Some(6668),
            "fguuid:jgd2000.bl" => Some(4612),
            _ => None,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{},{},{},{}]({},{})-({},{})",
            self.mesh_code,
            self.north,
            self.east,
            self.south,
            self.west,
            self.low_x,
            self.low_y,
            self.high_x,
            self.high_y
        )
    }
}

/// 行優先・北から南へ並ぶ標高ラスタ。行0が最北端。
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl Raster {
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            values: vec![value; rows * cols],
        }
    }

    /// 要素数は rows * cols と一致していなければならない
    pub fn from_vec(rows: usize, cols: usize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), rows * cols);
        Self { rows, cols, values }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.cols + col] = value;
    }

    /// 最近傍で縦横2倍に拡大する (各セルが2x2ブロックになる)
    pub fn upsample2(&self) -> Raster {
        let mut values = Vec::with_capacity(self.rows * self.cols * 4);
        for row in self.values.chunks_exact(self.cols) {
            let mut doubled = Vec::with_capacity(self.cols * 2);
            for &v in row {
                doubled.push(v);
                doubled.push(v);
            }
            values.extend_from_slice(&doubled);
            values.extend_from_slice(&doubled);
        }
        Raster {
            rows: self.rows * 2,
            cols: self.cols * 2,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_shape_and_epsg() {
        let meta = Metadata {
            dem_type: "5mメッシュ（標高）".to_string(),
            mesh_code: "50302300".to_string(),
            crs_identifier: "fguuid:jgd2011.bl".to_string(),
            south: 33.5,
            north: 33.508333333,
            west: 130.375,
            east: 130.3875,
            low_x: 0,
            low_y: 0,
            high_x: 224,
            high_y: 149,
            nodata_count: None,
        };
        assert_eq!(meta.rows(), 150);
        assert_eq!(meta.cols(), 225);
        assert_eq!(meta.epsg(), Some(6668));

        let jgd2000 = Metadata {
            crs_identifier: "fguuid:jgd2000.bl".to_string(),
            ..meta.clone()
        };
        assert_eq!(jgd2000.epsg(), Some(4612));

        let unknown = Metadata {
            crs_identifier: "fguuid:wgs84.bl".to_string(),
            ..meta
        };
        assert_eq!(unknown.epsg(), None);
    }

    #[test]
    fn test_metadata_display() {
        let meta = Metadata {
            dem_type: "10mメッシュ（標高）".to_string(),
            mesh_code: "5030".to_string(),
            crs_identifier: "fguuid:jgd2011.bl".to_string(),
            south: 33.0,
            north: 34.0,
            west: 130.0,
            east: 131.0,
            low_x: 0,
            low_y: 0,
            high_x: 1124,
            high_y: 749,
            nodata_count: None,
        };
        assert_eq!(meta.to_string(), "5030[34,131,33,130](0,0)-(1124,749)");
    }

    #[test]
    fn test_raster_indexing() {
        let mut raster = Raster::filled(2, 3, 0.0);
        raster.set(0, 2, 5.5);
        raster.set(1, 0, -1.0);
        assert_eq!(raster.get(0, 2), 5.5);
        assert_eq!(raster.get(1, 0), -1.0);
        assert_eq!(raster.values(), &[0.0, 0.0, 5.5, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_upsample2_replicates_blocks() {
        let raster = Raster::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let up = raster.upsample2();
        assert_eq!(up.shape(), (4, 4));
        #[rustfmt::skip]
        let expected = vec![
            1.0, 1.0, 2.0, 2.0,
            1.0, 1.0, 2.0, 2.0,
            3.0, 3.0, 4.0, 4.0,
            3.0, 3.0, 4.0, 4.0,
        ];
        assert_eq!(up.values(), expected.as_slice());
    }
}
