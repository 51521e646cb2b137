// 画像XObjectのメタデータ読み取りとCMYKサンプルへのデコード

use std::io::Read;

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, Stream};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace as JpegColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;
use zune_jpeg::errors::DecodeErrors;

use super::color::{Cmyk, ColorSpace};
use super::content_stream::Matrix;
use super::{name_str, resolve};
use crate::error::PreflightError;

/// 画像XObjectのメタデータ
#[derive(Debug, Clone)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    /// 解釈できなかった場合は `None`（ImageMaskも `None`）
    pub color_space: Option<ColorSpace>,
    pub image_mask: bool,
    pub has_soft_mask: bool,
    pub filter: Option<String>,
}

/// デコード済み画像。1ピクセルあたりC,M,Y,Kの4バイト、上の行から順。
/// ImageMaskでは塗られない画素が `None`。
#[derive(Debug, Clone)]
pub struct CmykImage {
    pub width: u32,
    pub height: u32,
    pixels: Vec<Option<[u8; 4]>>,
}

impl CmykImage {
    /// 画像座標 (x, y)（y=0が上端）の画素。
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get((y as usize) * (self.width as usize) + x as usize)
            .copied()
            .flatten()
    }
}

/// 画像XObjectのストリームから画像メタデータを読み取る。
pub fn read_image_meta(doc: &Document, stream: &Stream) -> crate::error::Result<ImageMeta> {
    let dict = &stream.dict;

    let width = dict_get_u32(dict, b"Width")?;
    let height = dict_get_u32(dict, b"Height")?;
    let image_mask = dict
        .get(b"ImageMask")
        .ok()
        .and_then(|o| o.as_bool().ok())
        .unwrap_or(false);
    // BitsPerComponent: missing keyの場合のみデフォルト（ImageMaskは1, それ以外は8）
    let bits_per_component = match dict.get(b"BitsPerComponent") {
        Ok(_) => dict_get_u32(dict, b"BitsPerComponent")? as u8,
        Err(_) if image_mask => 1,
        Err(_) => 8,
    };

    let color_space = if image_mask {
        None
    } else {
        dict.get(b"ColorSpace")
            .ok()
            .and_then(|obj| ColorSpace::parse(doc, obj).ok())
    };

    let has_soft_mask = match dict.get(b"SMask") {
        Ok(Object::Name(n)) => n.as_slice() != b"None",
        Ok(_) => true,
        Err(_) => false,
    };

    let filter = match dict.get(b"Filter").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Name(name)) => Some(String::from_utf8_lossy(name).to_string()),
        // フィルタ連鎖: 最初のフィルタを取得
        Some(Object::Array(arr)) => arr.first().and_then(name_str),
        _ => None,
    };

    Ok(ImageMeta {
        width,
        height,
        bits_per_component,
        color_space,
        image_mask,
        has_soft_mask,
        filter,
    })
}

/// 辞書からu32値を取得するヘルパー（負の値はエラー）
fn dict_get_u32(dict: &Dictionary, key: &[u8]) -> crate::error::Result<u32> {
    let key_str = String::from_utf8_lossy(key);
    match dict.get(key) {
        Ok(Object::Integer(i)) => {
            let val = *i;
            if val < 0 || val > u32::MAX as i64 {
                Err(PreflightError::unsupported(format!(
                    "value out of u32 range for {key_str}: {val}"
                )))
            } else {
                Ok(val as u32)
            }
        }
        Ok(Object::Real(f)) => {
            let val = *f;
            if val < 0.0 || val > u32::MAX as f32 {
                Err(PreflightError::unsupported(format!(
                    "value out of u32 range for {key_str}: {val}"
                )))
            } else {
                Ok(val as u32)
            }
        }
        Ok(other) => Err(PreflightError::unsupported(format!(
            "expected integer for {key_str}, got {other:?}"
        ))),
        Err(_) => Err(PreflightError::unsupported(format!(
            "missing required key: {key_str}"
        ))),
    }
}

/// 配置行列から画像の実効解像度（横, 縦）ppi を計算する。
///
/// 行列の列ベクトル長が配置サイズ（pt）。回転・傾斜配置でも正しい。
pub fn effective_ppi(meta: &ImageMeta, ctm: &Matrix) -> Option<(f64, f64)> {
    let placed_w = (ctm.a * ctm.a + ctm.b * ctm.b).sqrt();
    let placed_h = (ctm.c * ctm.c + ctm.d * ctm.d).sqrt();
    if placed_w <= f64::EPSILON || placed_h <= f64::EPSILON {
        return None;
    }
    Some((
        meta.width as f64 * 72.0 / placed_w,
        meta.height as f64 * 72.0 / placed_h,
    ))
}

/// 画像XObjectをデコードしCMYK画素列に変換する。
///
/// `fill` はImageMaskの塗り色（現在の塗り色）。
pub fn decode_to_cmyk(
    doc: &Document,
    stream: &Stream,
    meta: &ImageMeta,
    fill: Option<Cmyk>,
) -> crate::error::Result<CmykImage> {
    let pixel_count = (meta.width as usize)
        .checked_mul(meta.height as usize)
        .ok_or_else(|| PreflightError::unsupported("image dimensions overflow"))?;

    if meta.filter.as_deref() == Some("DCTDecode") {
        return decode_jpeg(doc, stream, meta);
    }

    let raw = decode_stream_bytes(stream, meta)?;

    if meta.image_mask {
        let paint = fill.map(to_bytes);
        // Decode [0 1]（既定）では0のビットが塗られる
        let inverted = decode_is_inverted(doc, &stream.dict);
        let samples = unpack_samples(&raw, meta.width, meta.height, 1, 1)?;
        let pixels = samples
            .into_iter()
            .map(|s| if (s == 0) != inverted { paint } else { None })
            .collect();
        return Ok(CmykImage {
            width: meta.width,
            height: meta.height,
            pixels,
        });
    }

    let space = meta
        .color_space
        .as_ref()
        .ok_or_else(|| PreflightError::unsupported("image color space not resolvable"))?;
    let n = space.components().max(1);
    let bpc = meta.bits_per_component;
    let samples = unpack_samples(&raw, meta.width, meta.height, n, bpc)?;

    let max = ((1u32 << bpc.min(16)) - 1) as f64;
    let indexed = matches!(space, ColorSpace::Indexed { .. });
    let ranges = if indexed {
        None
    } else {
        decode_ranges(doc, &stream.dict, n)
    };
    let mut pixels = Vec::with_capacity(pixel_count);
    for chunk in samples.chunks(n) {
        let comps: Vec<f64> = chunk
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if indexed {
                    *s as f64
                } else {
                    apply_decode(*s as f64 / max, ranges.as_deref(), i)
                }
            })
            .collect();
        pixels.push(space.to_cmyk(&comps).map(to_bytes));
    }
    pixels.resize(pixel_count, None);

    Ok(CmykImage {
        width: meta.width,
        height: meta.height,
        pixels,
    })
}

fn to_bytes(c: Cmyk) -> [u8; 4] {
    let q = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(c.c), q(c.m), q(c.y), q(c.k)]
}

fn decode_is_inverted(doc: &Document, dict: &Dictionary) -> bool {
    dict.get(b"Decode")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .and_then(|a| a.first())
        .and_then(super::number)
        .map(|v| v >= 1.0)
        .unwrap_or(false)
}

/// フィルタを外したサンプルバイト列。
///
/// 対応フィルタ:
/// - FlateDecode (zlib)
/// - 非圧縮
/// - その他はlopdfの解凍に任せる
fn decode_stream_bytes(stream: &Stream, meta: &ImageMeta) -> crate::error::Result<Vec<u8>> {
    match meta.filter.as_deref() {
        None => Ok(stream.content.clone()),
        Some("FlateDecode") => {
            let mut decoder = ZlibDecoder::new(stream.content.as_slice());
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| PreflightError::unsupported(format!("FlateDecode error: {e}")))?;
            Ok(decompressed)
        }
        Some(other) => stream.decompressed_content().map_err(|_| {
            PreflightError::unsupported(format!("unsupported image filter: {other}"))
        }),
    }
}

/// `/Decode` 配列を成分ごとの (Dmin, Dmax) として読む。
fn decode_ranges(doc: &Document, dict: &Dictionary, n: usize) -> Option<Vec<(f64, f64)>> {
    let values: Vec<f64> = dict
        .get(b"Decode")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())?
        .iter()
        .filter_map(super::number)
        .collect();
    if values.len() < 2 * n {
        return None;
    }
    Some(values.chunks(2).take(n).map(|p| (p[0], p[1])).collect())
}

/// 0..1 に正規化したサンプルを `/Decode` の範囲へ写す。
fn apply_decode(value: f64, ranges: Option<&[(f64, f64)]>, component: usize) -> f64 {
    match ranges.and_then(|r| r.get(component)) {
        Some(&(lo, hi)) => lo + value * (hi - lo),
        None => value,
    }
}

/// APP14 "Adobe" セグメントの有無。Adobe系のCMYK JPEGは値を反転して格納する。
fn has_adobe_marker(data: &[u8]) -> bool {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return false;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return false;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // SOS以降はエントロピー符号化データ
        if marker == 0xDA || marker == 0xD9 {
            return false;
        }
        if marker == 0xEE && data.get(pos + 4..pos + 9) == Some(b"Adobe".as_slice()) {
            return true;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + len;
    }
    false
}

fn jpeg_error(e: DecodeErrors) -> PreflightError {
    PreflightError::unsupported(format!("JPEG decode error: {e:?}"))
}

/// JPEGデータを元の成分数（Gray/RGB/CMYK）のままデコードし、
/// 画像の色空間を通してCMYKへ換算する。
fn decode_jpeg(doc: &Document, stream: &Stream, meta: &ImageMeta) -> crate::error::Result<CmykImage> {
    let data = stream.content.as_slice();

    let mut headers = JpegDecoder::new(ZCursor::new(data));
    headers.decode_headers().map_err(jpeg_error)?;
    let input = headers.input_colorspace();
    let out = match input {
        Some(JpegColorSpace::Luma | JpegColorSpace::LumaA) => JpegColorSpace::Luma,
        Some(JpegColorSpace::CMYK) => JpegColorSpace::CMYK,
        // YCCKはそのまま取り出し、YCC部分をこちらでRGBに戻す
        Some(JpegColorSpace::YCCK) => JpegColorSpace::YCCK,
        _ => JpegColorSpace::RGB,
    };

    let options = DecoderOptions::default().jpeg_set_out_colorspace(out);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let mut samples = decoder.decode().map_err(jpeg_error)?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| PreflightError::unsupported("JPEG dimensions unavailable"))?;

    let n = out.num_components();
    if out == JpegColorSpace::YCCK {
        for px in samples.chunks_exact_mut(4) {
            let [r, g, b] = ycc_to_rgb(px[0], px[1], px[2]);
            px[..3].copy_from_slice(&[r, g, b]);
        }
    }
    let device = match n {
        1 => ColorSpace::Gray,
        3 => ColorSpace::Rgb,
        _ => ColorSpace::Cmyk,
    };
    // 宣言された色空間の成分数が実データと合わない場合はデバイス色空間として扱う
    let space = match &meta.color_space {
        Some(space)
            if space.components() == n && !matches!(space, ColorSpace::Indexed { .. }) =>
        {
            space
        }
        _ => &device,
    };
    // Adobe形式の4成分JPEGは反転して格納されている
    let inverted = n == 4 && has_adobe_marker(data);
    let ranges = decode_ranges(doc, &stream.dict, n);

    let pixels = samples
        .chunks_exact(n)
        .take(width * height)
        .map(|px| {
            let comps: Vec<f64> = px
                .iter()
                .enumerate()
                .map(|(i, &b)| {
                    let b = if inverted { 255 - b } else { b };
                    apply_decode(b as f64 / 255.0, ranges.as_deref(), i)
                })
                .collect();
            space.to_cmyk(&comps).map(to_bytes)
        })
        .collect();

    Ok(CmykImage {
        width: width as u32,
        height: height as u32,
        pixels,
    })
}

/// JFIFのYCbCr → RGB。
fn ycc_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let (y, cb, cr) = (y as f64, cb as f64 - 128.0, cr as f64 - 128.0);
    let clamp = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * cr),
        clamp(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp(y + 1.772 * cb),
    ]
}

/// 行単位でパディングされたサンプル列を展開する。
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bpc: u8,
) -> crate::error::Result<Vec<u32>> {
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(PreflightError::unsupported(format!(
            "unsupported BitsPerComponent: {bpc}"
        )));
    }
    let per_row = width as usize * components;
    let row_bytes = (per_row * bpc as usize).div_ceil(8);
    let expected = row_bytes * height as usize;
    if data.len() < expected {
        return Err(PreflightError::unsupported(format!(
            "image data too short: expected {expected}, got {}",
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(per_row * height as usize);
    for row in data.chunks(row_bytes).take(height as usize) {
        for i in 0..per_row {
            let value = match bpc {
                8 => row[i] as u32,
                16 => u16::from_be_bytes([row[2 * i], row[2 * i + 1]]) as u32,
                _ => {
                    let bit = i * bpc as usize;
                    let byte = row[bit / 8];
                    let shift = 8 - bpc as usize - (bit % 8);
                    ((byte >> shift) as u32) & ((1u32 << bpc) - 1)
                }
            };
            out.push(value);
        }
    }
    Ok(out)
}
