// ページボックスとブリード（裁ち落とし）マージン
//
// ブリードマージンの導出はこのモジュールの PageGeometry::from_boxes だけが行う。
// 下流（品質検査・ルール評価）は min_bleed / bleed_margins / has_bleed を読むだけ。

use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};

use crate::config::settings::MissingBleedPolicy;

/// 1pt = 1/72 inch, 1 inch = 25.4 mm
pub const POINTS_PER_MM: f64 = 72.0 / 25.4;

pub fn points_to_mm(points: f64) -> f64 {
    points / POINTS_PER_MM
}

/// PDFユーザー空間の矩形。常に `llx <= urx`, `lly <= ury` に正規化される。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub llx: f64,
    pub lly: f64,
    pub urx: f64,
    pub ury: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Rect {
            llx: x0.min(x1),
            lly: y0.min(y1),
            urx: x0.max(x1),
            ury: y0.max(y1),
        }
    }

    /// `[x0 y0 x1 y1]` 配列から矩形を読み取る。要素不足・非数値は `None`。
    pub fn from_object(doc: &Document, obj: &Object) -> Option<Rect> {
        let arr = super::resolve(doc, obj)?.as_array().ok()?;
        if arr.len() < 4 {
            return None;
        }
        let mut vals = [0.0f64; 4];
        for (slot, item) in vals.iter_mut().zip(arr.iter()) {
            *slot = super::number(super::resolve(doc, item)?)?;
        }
        let rect = Rect::new(vals[0], vals[1], vals[2], vals[3]);
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return None;
        }
        Some(rect)
    }

    pub fn width(&self) -> f64 {
        self.urx - self.llx
    }

    pub fn height(&self) -> f64 {
        self.ury - self.lly
    }
}

/// トリムボックスの各辺からブリードボックスの辺までの距離（pt）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BleedMargins {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl BleedMargins {
    pub const ZERO: BleedMargins = BleedMargins {
        left: 0.0,
        bottom: 0.0,
        right: 0.0,
        top: 0.0,
    };

    pub fn min(&self) -> f64 {
        self.left.min(self.bottom).min(self.right).min(self.top)
    }
}

/// ページ単位の幾何情報。構造解析で一度だけ生成され、以降は読み取り専用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    media_box: Rect,
    crop_box: Rect,
    trim_box: Rect,
    bleed_box: Option<Rect>,
    rotation: u16,
    has_bleed: bool,
    bleed_margins: Option<BleedMargins>,
    min_bleed: f64,
}

impl PageGeometry {
    /// ボックス定義からページ幾何とブリードマージンを導出する。
    ///
    /// - CropBox未指定はMediaBox、TrimBox未指定はCropBoxを使う
    /// - BleedBoxがなければ `has_bleed = false`, `min_bleed = 0`、
    ///   マージンは `policy` に従い0またはNone
    /// - マージン = |ブリード辺 − トリム辺|、`min_bleed` はその最小値
    pub fn from_boxes(
        media_box: Rect,
        crop_box: Option<Rect>,
        trim_box: Option<Rect>,
        bleed_box: Option<Rect>,
        rotation: i64,
        policy: MissingBleedPolicy,
    ) -> Self {
        let crop_box = crop_box.unwrap_or(media_box);
        let trim_box = trim_box.unwrap_or(crop_box);

        let (has_bleed, bleed_margins) = match bleed_box {
            Some(bleed) => (
                true,
                Some(BleedMargins {
                    left: (trim_box.llx - bleed.llx).abs(),
                    bottom: (trim_box.lly - bleed.lly).abs(),
                    right: (bleed.urx - trim_box.urx).abs(),
                    top: (bleed.ury - trim_box.ury).abs(),
                }),
            ),
            None => match policy {
                MissingBleedPolicy::Zero => (false, Some(BleedMargins::ZERO)),
                MissingBleedPolicy::Undefined => (false, None),
            },
        };
        let min_bleed = bleed_margins.map(|m| m.min()).unwrap_or(0.0);

        PageGeometry {
            media_box,
            crop_box,
            trim_box,
            bleed_box,
            rotation: normalize_rotation(rotation),
            has_bleed,
            bleed_margins,
            min_bleed,
        }
    }

    pub fn media_box(&self) -> Rect {
        self.media_box
    }

    pub fn crop_box(&self) -> Rect {
        self.crop_box
    }

    pub fn trim_box(&self) -> Rect {
        self.trim_box
    }

    pub fn bleed_box(&self) -> Option<Rect> {
        self.bleed_box
    }

    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    pub fn has_bleed(&self) -> bool {
        self.has_bleed
    }

    pub fn bleed_margins(&self) -> Option<BleedMargins> {
        self.bleed_margins
    }

    /// 4辺のうち最小のブリードマージン（pt）。
    pub fn min_bleed(&self) -> f64 {
        self.min_bleed
    }

    pub fn min_bleed_mm(&self) -> f64 {
        points_to_mm(self.min_bleed)
    }

    /// 回転を考慮した仕上がりサイズ（幅, 高さ）mm。
    pub fn trim_size_mm(&self) -> (f64, f64) {
        let w = points_to_mm(self.trim_box.width());
        let h = points_to_mm(self.trim_box.height());
        if self.rotation == 90 || self.rotation == 270 {
            (h, w)
        } else {
            (w, h)
        }
    }
}

/// /Rotate を 0/90/180/270 に正規化する。90の倍数でなければ0。
fn normalize_rotation(rotation: i64) -> u16 {
    if rotation % 90 != 0 {
        return 0;
    }
    rotation.rem_euclid(360) as u16
}
