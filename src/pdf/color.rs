// 色空間の解釈とCMYK換算
//
// RGB/Gray -> CMYK は減法混色の近似（単純GCR）:
//   K = 1 - max(R, G, B)
//   C = (1 - R - K) / (1 - K), M, Y も同様（K = 1 のときは 0）
//   Gray g -> (0, 0, 0, 1 - g)

use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};

use super::{name_str, number, resolve};

/// 色空間配列をたどる最大深さ（Indexed -> ICCBased -> ... の入れ子対策）
const MAX_COLOR_SPACE_DEPTH: usize = 8;

/// CMYK値。各成分 0.0〜1.0。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cmyk {
    pub c: f64,
    pub m: f64,
    pub y: f64,
    pub k: f64,
}

impl Cmyk {
    pub const WHITE: Cmyk = Cmyk {
        c: 0.0,
        m: 0.0,
        y: 0.0,
        k: 0.0,
    };

    pub fn new(c: f64, m: f64, y: f64, k: f64) -> Self {
        Cmyk {
            c: c.clamp(0.0, 1.0),
            m: m.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
            k: k.clamp(0.0, 1.0),
        }
    }

    /// 0〜100スケールの成分。
    pub fn percentages(&self) -> [f64; 4] {
        [self.c * 100.0, self.m * 100.0, self.y * 100.0, self.k * 100.0]
    }

    /// C+M+Y+K の合計（0〜400%）。
    pub fn total_percent(&self) -> f64 {
        self.percentages().iter().sum()
    }
}

pub fn rgb_to_cmyk(r: f64, g: f64, b: f64) -> Cmyk {
    let (r, g, b) = (r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0));
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 {
        return Cmyk::new(0.0, 0.0, 0.0, 1.0);
    }
    Cmyk::new(
        (1.0 - r - k) / (1.0 - k),
        (1.0 - g - k) / (1.0 - k),
        (1.0 - b - k) / (1.0 - k),
        k,
    )
}

pub fn gray_to_cmyk(g: f64) -> Cmyk {
    Cmyk::new(0.0, 0.0, 0.0, 1.0 - g.clamp(0.0, 1.0))
}

/// 色空間の大分類。ページの色使用状況の記録に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpaceFamily {
    Gray,
    Rgb,
    Cmyk,
    Lab,
    Spot,
    Pattern,
}

/// Separation/DeviceN の tint transform。
#[derive(Debug, Clone, PartialEq)]
pub enum TintTransform {
    /// Type 2 (exponential) 関数: out = C0 + t^N * (C1 - C0)
    Exponential {
        c0: Vec<f64>,
        c1: Vec<f64>,
        n: f64,
        alternate: Box<ColorSpace>,
    },
    /// 評価できない関数。tintをK版の濃度として近似する。
    Opaque,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Lab,
    Separation {
        name: String,
        tint: TintTransform,
    },
    DeviceN {
        names: Vec<String>,
    },
    Indexed {
        base: Box<ColorSpace>,
        hival: u32,
        lookup: Vec<u8>,
    },
    Pattern,
}

/// 特色として数えないSeparation/DeviceNの色名。
const NON_SPOT_NAMES: &[&str] = &["None", "All", "Cyan", "Magenta", "Yellow", "Black"];

impl ColorSpace {
    /// 色空間オブジェクト（名前または配列）を解釈する。
    ///
    /// 解釈できない構造は `UnsupportedFeatureError` を返す。
    pub fn parse(doc: &Document, obj: &Object) -> crate::error::Result<ColorSpace> {
        parse_depth(doc, obj, 0)
    }

    /// デバイス色空間名（リソース参照なしで使える名前）を解釈する。
    pub fn from_device_name(name: &[u8]) -> Option<ColorSpace> {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => Some(ColorSpace::Gray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Some(ColorSpace::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(ColorSpace::Cmyk),
            b"Pattern" => Some(ColorSpace::Pattern),
            _ => None,
        }
    }

    pub fn family(&self) -> ColorSpaceFamily {
        match self {
            ColorSpace::Gray => ColorSpaceFamily::Gray,
            ColorSpace::Rgb => ColorSpaceFamily::Rgb,
            ColorSpace::Cmyk => ColorSpaceFamily::Cmyk,
            ColorSpace::Lab => ColorSpaceFamily::Lab,
            ColorSpace::Separation { .. } | ColorSpace::DeviceN { .. } => ColorSpaceFamily::Spot,
            ColorSpace::Indexed { base, .. } => base.family(),
            ColorSpace::Pattern => ColorSpaceFamily::Pattern,
        }
    }

    /// 特色名（プロセスカラー名やAll/Noneを除く）。
    pub fn spot_names(&self) -> Vec<String> {
        let names: Vec<&String> = match self {
            ColorSpace::Separation { name, .. } => vec![name],
            ColorSpace::DeviceN { names } => names.iter().collect(),
            ColorSpace::Indexed { base, .. } => return base.spot_names(),
            _ => Vec::new(),
        };
        names
            .into_iter()
            .filter(|n| !NON_SPOT_NAMES.contains(&n.as_str()))
            .cloned()
            .collect()
    }

    /// 色成分数。
    pub fn components(&self) -> usize {
        match self {
            ColorSpace::Gray | ColorSpace::Separation { .. } | ColorSpace::Indexed { .. } => 1,
            ColorSpace::Rgb | ColorSpace::Lab => 3,
            ColorSpace::Cmyk => 4,
            ColorSpace::DeviceN { names } => names.len(),
            ColorSpace::Pattern => 0,
        }
    }

    /// `cs`/`CS` 直後の初期色。
    pub fn initial_color(&self) -> Vec<f64> {
        match self {
            ColorSpace::Cmyk => vec![0.0, 0.0, 0.0, 1.0],
            ColorSpace::Separation { .. } => vec![1.0],
            ColorSpace::DeviceN { names } => vec![1.0; names.len()],
            other => vec![0.0; other.components()],
        }
    }

    /// 色成分をCMYKに換算する。換算できない（Pattern等）場合は `None`。
    pub fn to_cmyk(&self, comps: &[f64]) -> Option<Cmyk> {
        let at = |i: usize| comps.get(i).copied().unwrap_or(0.0);
        match self {
            ColorSpace::Gray => Some(gray_to_cmyk(at(0))),
            ColorSpace::Rgb => Some(rgb_to_cmyk(at(0), at(1), at(2))),
            ColorSpace::Cmyk => Some(Cmyk::new(at(0), at(1), at(2), at(3))),
            // L* のみを明度として使う近似
            ColorSpace::Lab => Some(gray_to_cmyk(at(0) / 100.0)),
            ColorSpace::Separation { tint, .. } => Some(apply_tint(tint, at(0))),
            ColorSpace::DeviceN { names } => Some(device_n_to_cmyk(names, comps)),
            ColorSpace::Indexed {
                base,
                hival,
                lookup,
            } => {
                let index = (at(0).round().max(0.0) as u32).min(*hival) as usize;
                let n = base.components();
                let start = index * n;
                let entry = lookup.get(start..start + n)?;
                let base_comps: Vec<f64> = entry.iter().map(|b| *b as f64 / 255.0).collect();
                base.to_cmyk(&base_comps)
            }
            ColorSpace::Pattern => None,
        }
    }
}

fn apply_tint(tint: &TintTransform, t: f64) -> Cmyk {
    let t = t.clamp(0.0, 1.0);
    match tint {
        TintTransform::Exponential {
            c0,
            c1,
            n,
            alternate,
        } => {
            let out: Vec<f64> = c0
                .iter()
                .zip(c1.iter())
                .map(|(a, b)| a + t.powf(*n) * (b - a))
                .collect();
            alternate
                .to_cmyk(&out)
                .unwrap_or_else(|| Cmyk::new(0.0, 0.0, 0.0, t))
        }
        TintTransform::Opaque => Cmyk::new(0.0, 0.0, 0.0, t),
    }
}

/// DeviceN: プロセス色名はそのチャンネルへ、それ以外の色はK版へ寄せる近似。
fn device_n_to_cmyk(names: &[String], comps: &[f64]) -> Cmyk {
    let mut cmyk = [0.0f64; 4];
    for (name, value) in names.iter().zip(comps.iter()) {
        let slot = match name.as_str() {
            "Cyan" => 0,
            "Magenta" => 1,
            "Yellow" => 2,
            "None" => continue,
            _ => 3,
        };
        cmyk[slot] += value;
    }
    Cmyk::new(cmyk[0], cmyk[1], cmyk[2], cmyk[3])
}

fn parse_depth(doc: &Document, obj: &Object, depth: usize) -> crate::error::Result<ColorSpace> {
    if depth > MAX_COLOR_SPACE_DEPTH {
        return Err(crate::error::PreflightError::unsupported(
            "color space nesting too deep",
        ));
    }
    let obj = resolve(doc, obj)
        .ok_or_else(|| crate::error::PreflightError::unsupported("broken color space reference"))?;

    if let Object::Name(name) = obj {
        return ColorSpace::from_device_name(name).ok_or_else(|| {
            crate::error::PreflightError::unsupported(format!(
                "unknown color space name: {}",
                String::from_utf8_lossy(name)
            ))
        });
    }

    let arr = obj.as_array().map_err(|_| {
        crate::error::PreflightError::unsupported(format!("unexpected color space object: {obj:?}"))
    })?;
    let family = arr
        .first()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_name().ok())
        .ok_or_else(|| crate::error::PreflightError::unsupported("empty color space array"))?;

    match family {
        b"CalGray" => Ok(ColorSpace::Gray),
        b"CalRGB" => Ok(ColorSpace::Rgb),
        b"CalCMYK" => Ok(ColorSpace::Cmyk),
        b"Lab" => Ok(ColorSpace::Lab),
        b"ICCBased" => parse_icc_based(doc, arr, depth),
        b"Separation" => parse_separation(doc, arr, depth),
        b"DeviceN" => parse_device_n(doc, arr),
        b"Indexed" | b"I" => parse_indexed(doc, arr, depth),
        b"Pattern" => Ok(ColorSpace::Pattern),
        other => ColorSpace::from_device_name(other).ok_or_else(|| {
            crate::error::PreflightError::unsupported(format!(
                "unsupported color space family: {}",
                String::from_utf8_lossy(other)
            ))
        }),
    }
}

fn parse_icc_based(doc: &Document, arr: &[Object], depth: usize) -> crate::error::Result<ColorSpace> {
    let stream = arr
        .get(1)
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_stream().ok())
        .ok_or_else(|| crate::error::PreflightError::unsupported("ICCBased without profile stream"))?;

    match stream.dict.get(b"N").ok().and_then(number).map(|n| n as i64) {
        Some(1) => Ok(ColorSpace::Gray),
        Some(3) => Ok(ColorSpace::Rgb),
        Some(4) => Ok(ColorSpace::Cmyk),
        _ => match stream.dict.get(b"Alternate") {
            Ok(alt) => parse_depth(doc, alt, depth + 1),
            Err(_) => Err(crate::error::PreflightError::unsupported(
                "ICCBased profile with unknown component count",
            )),
        },
    }
}

fn parse_separation(doc: &Document, arr: &[Object], depth: usize) -> crate::error::Result<ColorSpace> {
    let name = arr
        .get(1)
        .and_then(|o| resolve(doc, o))
        .and_then(name_str)
        .ok_or_else(|| crate::error::PreflightError::unsupported("Separation without colorant name"))?;

    let alternate = arr.get(2).map(|o| parse_depth(doc, o, depth + 1));
    let tint = match (alternate, arr.get(3)) {
        (Some(Ok(alt)), Some(func)) => parse_exponential(doc, func, alt),
        _ => TintTransform::Opaque,
    };
    Ok(ColorSpace::Separation { name, tint })
}

fn parse_exponential(doc: &Document, func: &Object, alternate: ColorSpace) -> TintTransform {
    let Some(dict) = resolve(doc, func).and_then(|o| match o {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }) else {
        return TintTransform::Opaque;
    };
    if dict.get(b"FunctionType").ok().and_then(number) != Some(2.0) {
        return TintTransform::Opaque;
    }

    let read_array = |key: &[u8], default: Vec<f64>| -> Vec<f64> {
        dict.get(key)
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok())
            .map(|a| a.iter().filter_map(number).collect())
            .unwrap_or(default)
    };
    let c0 = read_array(b"C0", vec![0.0]);
    let c1 = read_array(b"C1", vec![1.0]);
    let n = dict.get(b"N").ok().and_then(number).unwrap_or(1.0);

    TintTransform::Exponential {
        c0,
        c1,
        n,
        alternate: Box::new(alternate),
    }
}

fn parse_device_n(doc: &Document, arr: &[Object]) -> crate::error::Result<ColorSpace> {
    let names: Vec<String> = arr
        .get(1)
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .map(|a| a.iter().filter_map(|n| resolve(doc, n).and_then(name_str)).collect())
        .ok_or_else(|| crate::error::PreflightError::unsupported("DeviceN without colorant names"))?;
    if names.is_empty() {
        return Err(crate::error::PreflightError::unsupported(
            "DeviceN with empty colorant list",
        ));
    }
    Ok(ColorSpace::DeviceN { names })
}

fn parse_indexed(doc: &Document, arr: &[Object], depth: usize) -> crate::error::Result<ColorSpace> {
    let base = arr
        .get(1)
        .ok_or_else(|| crate::error::PreflightError::unsupported("Indexed without base"))
        .and_then(|o| parse_depth(doc, o, depth + 1))?;
    let hival = arr
        .get(2)
        .and_then(|o| resolve(doc, o))
        .and_then(number)
        .map(|v| v.clamp(0.0, 255.0) as u32)
        .unwrap_or(0);
    let lookup = match arr.get(3).and_then(|o| resolve(doc, o)) {
        Some(Object::String(bytes, _)) => bytes.clone(),
        Some(Object::Stream(s)) => s
            .decompressed_content()
            .unwrap_or_else(|_| s.content.clone()),
        _ => Vec::new(),
    };
    Ok(ColorSpace::Indexed {
        base: Box::new(base),
        hival,
        lookup,
    })
}
