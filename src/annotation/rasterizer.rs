//! 多角形アノテーションからクラスマスクを生成
//!
//! 入力順に図形を塗りつぶし、重なった領域は後の図形で上書きする（last-write-wins）。
//! 塗りつぶしは内部 + 輪郭線で、画像範囲外はクリップされる。

use crate::annotation::annotation_file::Shape;
use crate::types::{PixelClass, MASK_UNLABELED};

/// 画素ごとのクラスマスク（0 = 未ラベル, 1 = 光, 2 = 影）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ClassMask {
    /// 全画素が未ラベルのマスクを作成
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![MASK_UNLABELED; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// 行優先のマスク値
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// ラベル付き画素の数
    pub fn labeled_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != MASK_UNLABELED).count()
    }

    /// 指定クラスの画素数
    pub fn count(&self, class: PixelClass) -> usize {
        let value = class.mask_value();
        self.data.iter().filter(|&&v| v == value).count()
    }

    fn set(&mut self, x: i64, y: i64, value: u8) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    fn fill_span(&mut self, y: i64, x0: i64, x1: i64, value: u8) {
        if y < 0 || y >= self.height as i64 {
            return;
        }
        let x0 = x0.max(0);
        let x1 = x1.min(self.width as i64 - 1);
        if x0 > x1 {
            return;
        }
        let row = y as usize * self.width as usize;
        self.data[row + x0 as usize..=row + x1 as usize].fill(value);
    }

    /// 多角形を塗りつぶす
    ///
    /// 頂点が3未満、または全頂点が一直線上にある多角形は何も塗らない。
    /// 自己交差する多角形（蝶ネクタイ型など）は偶奇規則で塗る。
    /// 座標は i32 の範囲に丸めてから扱う。
    pub fn fill_polygon(&mut self, points: &[(i64, i64)], value: u8) {
        let points: Vec<(i64, i64)> = points
            .iter()
            .map(|&(x, y)| (clamp_coord(x), clamp_coord(y)))
            .collect();
        if points.len() < 3 || is_collinear(&points) {
            return;
        }
        let points = points.as_slice();

        let y_min = points.iter().map(|p| p.1).min().unwrap_or(0).max(0);
        let y_max = points
            .iter()
            .map(|p| p.1)
            .max()
            .unwrap_or(0)
            .min(self.height as i64 - 1);

        // 走査線ごとに辺との交点を求め、偶奇規則で塗る
        let mut crossings: Vec<f64> = Vec::with_capacity(points.len());
        for y in y_min..=y_max {
            crossings.clear();
            for i in 0..points.len() {
                let (x0, y0) = points[i];
                let (x1, y1) = points[(i + 1) % points.len()];
                if y0 == y1 {
                    continue;
                }
                let (lo, hi) = if y0 < y1 { (y0, y1) } else { (y1, y0) };
                // 半開区間 [lo, hi) で頂点の二重カウントを防ぐ
                if y < lo || y >= hi {
                    continue;
                }
                let t = (y - y0) as f64 / (y1 - y0) as f64;
                crossings.push(x0 as f64 + t * (x1 - x0) as f64);
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for pair in crossings.chunks_exact(2) {
                let start = pair[0].ceil() as i64;
                let end = pair[1].floor() as i64;
                self.fill_span(y, start, end, value);
            }
        }

        // 輪郭線（水平な辺や境界上の画素を含める）
        for i in 0..points.len() {
            let a = points[i];
            let b = points[(i + 1) % points.len()];
            self.draw_line(a, b, value);
        }
    }

    /// 線分を画像範囲に切り詰める（Liang-Barsky）。範囲内の線分はそのまま返す
    fn clip_segment(&self, from: (i64, i64), to: (i64, i64)) -> Option<((i64, i64), (i64, i64))> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let (x_max, y_max) = (self.width as i64 - 1, self.height as i64 - 1);
        let inside = |(x, y): (i64, i64)| (0..=x_max).contains(&x) && (0..=y_max).contains(&y);
        if inside(from) && inside(to) {
            return Some((from, to));
        }

        let (x0, y0) = (from.0 as f64, from.1 as f64);
        let (dx, dy) = (to.0 as f64 - x0, to.1 as f64 - y0);
        let (mut t0, mut t1) = (0.0f64, 1.0f64);
        let bounds = [
            (-dx, x0),
            (dx, x_max as f64 - x0),
            (-dy, y0),
            (dy, y_max as f64 - y0),
        ];
        for (p, q) in bounds {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
            if t0 > t1 {
                return None;
            }
        }

        let point = |t: f64| {
            (
                ((x0 + t * dx).round() as i64).clamp(0, x_max),
                ((y0 + t * dy).round() as i64).clamp(0, y_max),
            )
        };
        Some((point(t0), point(t1)))
    }

    fn draw_line(&mut self, from: (i64, i64), to: (i64, i64), value: u8) {
        let Some((from, to)) = self.clip_segment(from, to) else {
            return;
        };
        let (mut x, mut y) = from;
        let dx = (to.0 - from.0).abs();
        let dy = -(to.1 - from.1).abs();
        let sx = if from.0 < to.0 { 1 } else { -1 };
        let sy = if from.1 < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.set(x, y, value);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }
}

fn clamp_coord(v: i64) -> i64 {
    v.clamp(i32::MIN as i64, i32::MAX as i64)
}

/// 全頂点が一直線上（または1点）にあるか
fn is_collinear(points: &[(i64, i64)]) -> bool {
    let origin = points[0];
    let Some(&dir) = points.iter().find(|&&p| p != origin) else {
        return true;
    };
    let (dx, dy) = ((dir.0 - origin.0) as i128, (dir.1 - origin.1) as i128);
    points.iter().all(|&(x, y)| {
        let (px, py) = ((x - origin.0) as i128, (y - origin.1) as i128);
        dx * py - dy * px == 0
    })
}

/// 図形リストからクラスマスクを生成
///
/// 対象外ラベルの図形は無視される。図形の順序は重なりの解決に使われる。
pub fn rasterize(width: u32, height: u32, shapes: &[Shape]) -> ClassMask {
    let mut mask = ClassMask::new(width, height);
    for shape in shapes {
        let Some(class) = shape.class() else {
            continue;
        };
        mask.fill_polygon(&shape.pixel_points(), class.mask_value());
    }
    mask
}
