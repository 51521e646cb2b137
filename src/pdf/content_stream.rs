// コンテンツストリームのインタプリタ
//
// グラフィックス状態（CTM, 塗り/線の色空間と色, オーバープリント）とパス構築を追跡し、
// 描画イベントを ContentVisitor に通知する。フォームXObjectは再帰的に展開する。
// 構造解析（オーバープリント検出・画像配置）とインク量ラスタライズの両方が使う。

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, Stream};
use serde::{Deserialize, Serialize};

use super::color::{Cmyk, ColorSpace};
use super::resources::Resources;
use super::{number, resolve};

/// フォームXObjectの入れ子の上限。自己参照フォーム対策。
const MAX_FORM_DEPTH: usize = 12;

/// ベジェ曲線の平坦化分割数
const CURVE_SEGMENTS: usize = 8;

/// 6要素アフィン変換行列 [a, b, c, d, e, f]
/// PDF仕様: [ a b 0 ]
///          [ c d 0 ]
///          [ e f 1 ]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    /// 単位行列を返す。
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    /// self * other (行列の右乗算)
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// 点 (x, y) を変換する。
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// 逆行列。特異行列なら `None`。
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 {
            return None;
        }
        Some(Matrix {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        if operands.len() != 6 {
            return None;
        }
        let vals: Vec<f64> = operands.iter().filter_map(number).collect();
        if vals.len() != 6 {
            return None;
        }
        Some(Matrix {
            a: vals[0],
            b: vals[1],
            c: vals[2],
            d: vals[3],
            e: vals[4],
            f: vals[5],
        })
    }
}

/// 矩形領域を表すバウンディングボックス。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// CTMからBBoxを計算する。
/// 単位正方形 [0,0]-[1,1] の4頂点をCTMで変換し、min/maxを取る。
pub fn ctm_to_bbox(ctm: &Matrix) -> BBox {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
    let transformed: Vec<(f64, f64)> = corners.iter().map(|&(x, y)| ctm.apply(x, y)).collect();

    let x_min = transformed.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let y_min = transformed.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let x_max = transformed
        .iter()
        .map(|p| p.0)
        .fold(f64::NEG_INFINITY, f64::max);
    let y_max = transformed
        .iter()
        .map(|p| p.1)
        .fold(f64::NEG_INFINITY, f64::max);

    BBox {
        x_min,
        y_min,
        x_max,
        y_max,
    }
}

/// lopdfのObjectから数値をf64として取得する。
pub fn operand_to_f64(obj: &Object) -> crate::error::Result<f64> {
    number(obj).ok_or_else(|| {
        crate::error::PreflightError::unsupported(format!(
            "expected numeric operand, got {:?}",
            obj
        ))
    })
}

/// 描画オブジェクトの所在（ページ内の何番目の演算子か、どのフォームの中か）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub operator: String,
    pub index: usize,
    /// フォームXObjectの入れ子パス（例: "Fm1/Fm2"）。ページ直下は `None`。
    pub form: Option<String>,
}

/// 塗り/線の現在色。色空間が解釈できなかった場合 `space` は `None`。
#[derive(Debug, Clone, PartialEq)]
pub struct PaintColor {
    pub space: Option<ColorSpace>,
    pub comps: Vec<f64>,
}

impl PaintColor {
    fn default_black() -> Self {
        PaintColor {
            space: Some(ColorSpace::Gray),
            comps: vec![0.0],
        }
    }

    pub fn cmyk(&self) -> Option<Cmyk> {
        self.space.as_ref().and_then(|s| s.to_cmyk(&self.comps))
    }
}

#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub fill: PaintColor,
    pub stroke: PaintColor,
    pub fill_overprint: bool,
    pub stroke_overprint: bool,
    pub overprint_mode: u8,
    pub text_render_mode: i64,
    /// `Tf` のフォントサイズ（テキスト空間単位）。
    pub font_size: f64,
    pub text_leading: f64,
    /// 現在のテキスト行列。テキスト表示イベントの時点の値が入る。
    pub text_matrix: Matrix,
}

impl GraphicsState {
    pub fn new(ctm: Matrix) -> Self {
        GraphicsState {
            ctm,
            fill: PaintColor::default_black(),
            stroke: PaintColor::default_black(),
            fill_overprint: false,
            stroke_overprint: false,
            overprint_mode: 0,
            text_render_mode: 0,
            font_size: 0.0,
            text_leading: 0.0,
            text_matrix: Matrix::identity(),
        }
    }

    /// ページ上でのフォントの高さ（pt）。テキスト行列とCTMの縦方向の拡大率を掛ける。
    pub fn effective_font_size(&self) -> f64 {
        let m = self.text_matrix.multiply(&self.ctm);
        self.font_size.abs() * (m.c * m.c + m.d * m.d).sqrt()
    }

    /// ExtGState辞書のオーバープリント関連キーを適用する。
    ///
    /// `op` が無い場合、`OP` の値が塗りにも適用される。
    fn apply_ext_gstate(&mut self, dict: &Dictionary) {
        let op_stroke = dict.get(b"OP").ok().and_then(flag_value);
        let op_fill = dict.get(b"op").ok().and_then(flag_value);
        if let Some(v) = op_stroke {
            self.stroke_overprint = v;
            if op_fill.is_none() {
                self.fill_overprint = v;
            }
        }
        if let Some(v) = op_fill {
            self.fill_overprint = v;
        }
        if let Some(mode) = dict.get(b"OPM").ok().and_then(number) {
            self.overprint_mode = if mode >= 1.0 { 1 } else { 0 };
        }
    }
}

/// 真偽値のエントリ。整数で書かれたもの（0/1）も受け付ける。
fn flag_value(obj: &Object) -> Option<bool> {
    match obj {
        Object::Boolean(b) => Some(*b),
        Object::Integer(i) => Some(*i != 0),
        _ => None,
    }
}

/// 平行移動行列。
fn translation(tx: f64, ty: f64) -> Matrix {
    Matrix {
        e: tx,
        f: ty,
        ..Matrix::identity()
    }
}

/// ページ座標系（デフォルトユーザー空間）の折れ線サブパス。
#[derive(Debug, Clone, PartialEq)]
pub struct Subpath {
    pub points: Vec<(f64, f64)>,
    pub closed: bool,
}

/// インタプリタからの描画イベント通知先。
///
/// 既定実装は何もしない。`Err` を返すと解釈全体が中断される。
pub trait ContentVisitor {
    fn checkpoint(&mut self) -> crate::error::Result<()> {
        Ok(())
    }

    fn fill_path(
        &mut self,
        _state: &GraphicsState,
        _path: &[Subpath],
        _even_odd: bool,
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        Ok(())
    }

    fn stroke_path(
        &mut self,
        _state: &GraphicsState,
        _path: &[Subpath],
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        Ok(())
    }

    fn paint_image(
        &mut self,
        _state: &GraphicsState,
        _name: &str,
        _image: &Stream,
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        Ok(())
    }

    fn show_text(&mut self, _state: &GraphicsState, _at: &ObjectRef) -> crate::error::Result<()> {
        Ok(())
    }

    fn paint_shading(
        &mut self,
        _state: &GraphicsState,
        _at: &ObjectRef,
    ) -> crate::error::Result<()> {
        Ok(())
    }

    fn color_space_used(&mut self, _space: &ColorSpace) {}

    fn ext_gstate(&mut self, _name: &str, _dict: &Dictionary) {}

    fn form_entered(&mut self, _name: &str, _form: &Dictionary) {}

    fn unsupported(&mut self, _message: String) {}
}

/// コンテンツストリームを解釈し、描画イベントを `visitor` に通知する。
///
/// コンテンツ自体がデコードできない場合は `UnsupportedFeatureError`。
/// 個々の演算子の不正なオペランドは `visitor.unsupported` に報告して読み飛ばす。
pub fn interpret<V: ContentVisitor>(
    resources: &Resources<'_>,
    content_bytes: &[u8],
    initial_ctm: Matrix,
    visitor: &mut V,
) -> crate::error::Result<()> {
    run(
        resources,
        content_bytes,
        GraphicsState::new(initial_ctm),
        None,
        0,
        visitor,
    )
}

fn run<V: ContentVisitor>(
    resources: &Resources<'_>,
    content_bytes: &[u8],
    initial: GraphicsState,
    form_path: Option<&str>,
    depth: usize,
    visitor: &mut V,
) -> crate::error::Result<()> {
    // 空バイト列の場合、lopdfのパーサがエラーを返す可能性があるため特別扱い
    if content_bytes.is_empty() {
        return Ok(());
    }

    let content = Content::decode(content_bytes)
        .map_err(|e| crate::error::PreflightError::unsupported(format!("content stream: {e}")))?;

    let mut stack: Vec<GraphicsState> = Vec::new();
    let mut state = initial;
    let mut path: Vec<Subpath> = Vec::new();
    let mut current: Option<(f64, f64)> = None;
    // テキスト行列と行頭行列はグラフィックス状態に含まれない（BTで初期化）
    let mut text_matrix = Matrix::identity();
    let mut line_matrix = Matrix::identity();

    let operations: &[Operation] = content.operations.as_ref();
    for (index, op) in operations.iter().enumerate() {
        visitor.checkpoint()?;
        let at = || ObjectRef {
            operator: op.operator.clone(),
            index,
            form: form_path.map(str::to_string),
        };
        let nums = || -> Option<Vec<f64>> { op.operands.iter().map(number).collect() };

        match op.operator.as_str() {
            "q" => stack.push(state.clone()),
            "Q" => {
                if let Some(saved) = stack.pop() {
                    state = saved;
                }
            }
            "cm" => match Matrix::from_operands(&op.operands) {
                Some(m) => state.ctm = m.multiply(&state.ctm),
                None => visitor.unsupported(format!("op {index}: invalid cm operands")),
            },
            "gs" => {
                let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                    continue;
                };
                match resources
                    .get(b"ExtGState", name)
                    .and_then(|o| o.as_dict().ok())
                {
                    Some(dict) => {
                        state.apply_ext_gstate(dict);
                        visitor.ext_gstate(&String::from_utf8_lossy(name), dict);
                    }
                    None => visitor.unsupported(format!(
                        "op {index}: ExtGState /{} not found",
                        String::from_utf8_lossy(name)
                    )),
                }
            }
            "Tr" => {
                if let Some(mode) = op.operands.first().and_then(number) {
                    state.text_render_mode = mode as i64;
                }
            }

            // --- テキスト状態 ---
            "BT" => {
                text_matrix = Matrix::identity();
                line_matrix = Matrix::identity();
            }
            "Tf" => match op.operands.get(1).and_then(number) {
                Some(size) => state.font_size = size,
                None => visitor.unsupported(format!("op {index}: invalid Tf operands")),
            },
            "TL" => {
                if let Some(leading) = op.operands.first().and_then(number) {
                    state.text_leading = leading;
                }
            }
            "Tm" => match Matrix::from_operands(&op.operands) {
                Some(m) => {
                    text_matrix = m;
                    line_matrix = m;
                }
                None => visitor.unsupported(format!("op {index}: invalid Tm operands")),
            },
            "Td" | "TD" => match nums().filter(|v| v.len() == 2) {
                Some(v) => {
                    if op.operator == "TD" {
                        state.text_leading = -v[1];
                    }
                    line_matrix = translation(v[0], v[1]).multiply(&line_matrix);
                    text_matrix = line_matrix;
                }
                None => visitor.unsupported(format!("op {index}: invalid {} operands", op.operator)),
            },
            "T*" => {
                line_matrix = translation(0.0, -state.text_leading).multiply(&line_matrix);
                text_matrix = line_matrix;
            }

            // --- 色 ---
            "CS" | "cs" => {
                let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                    continue;
                };
                let space = lookup_color_space(resources, name, visitor, index);
                if let Some(s) = &space {
                    visitor.color_space_used(s);
                }
                let color = PaintColor {
                    comps: space.as_ref().map(|s| s.initial_color()).unwrap_or_default(),
                    space,
                };
                if op.operator == "CS" {
                    state.stroke = color;
                } else {
                    state.fill = color;
                }
            }
            "SC" | "SCN" | "sc" | "scn" => {
                // パターン名付きのscnは数値部分だけを使う
                let comps: Vec<f64> = op.operands.iter().filter_map(number).collect();
                let target = if op.operator.starts_with('S') {
                    &mut state.stroke
                } else {
                    &mut state.fill
                };
                target.comps = comps;
            }
            "G" | "g" | "RG" | "rg" | "K" | "k" => {
                let (space, expected) = match op.operator.to_ascii_lowercase().as_str() {
                    "g" => (ColorSpace::Gray, 1),
                    "rg" => (ColorSpace::Rgb, 3),
                    _ => (ColorSpace::Cmyk, 4),
                };
                let Some(comps) = nums().filter(|c| c.len() == expected) else {
                    visitor.unsupported(format!("op {index}: invalid {} operands", op.operator));
                    continue;
                };
                visitor.color_space_used(&space);
                let color = PaintColor {
                    space: Some(space),
                    comps,
                };
                if op.operator.chars().all(|c| c.is_ascii_uppercase()) {
                    state.stroke = color;
                } else {
                    state.fill = color;
                }
            }

            // --- パス構築 ---
            "m" => match nums().filter(|v| v.len() == 2) {
                Some(v) => {
                    let p = state.ctm.apply(v[0], v[1]);
                    path.push(Subpath {
                        points: vec![p],
                        closed: false,
                    });
                    current = Some(p);
                }
                None => visitor.unsupported(format!("op {index}: invalid m operands")),
            },
            "l" => match (nums().filter(|v| v.len() == 2), path.last_mut()) {
                (Some(v), Some(sub)) => {
                    let p = state.ctm.apply(v[0], v[1]);
                    sub.points.push(p);
                    current = Some(p);
                }
                _ => visitor.unsupported(format!("op {index}: invalid l operands")),
            },
            "c" | "v" | "y" => {
                let expected = if op.operator == "c" { 6 } else { 4 };
                match (nums().filter(|v| v.len() == expected), current, path.last_mut()) {
                    (Some(v), Some(p0), Some(sub)) => {
                        let pts: Vec<(f64, f64)> = v
                            .chunks(2)
                            .map(|xy| state.ctm.apply(xy[0], xy[1]))
                            .collect();
                        let (p1, p2, p3) = match op.operator.as_str() {
                            "c" => (pts[0], pts[1], pts[2]),
                            "v" => (p0, pts[0], pts[1]),
                            _ => (pts[0], pts[1], pts[1]),
                        };
                        sub.points.extend(flatten_cubic(p0, p1, p2, p3));
                        current = Some(p3);
                    }
                    _ => visitor.unsupported(format!("op {index}: invalid curve operands")),
                }
            }
            "h" => {
                if let Some(sub) = path.last_mut() {
                    sub.closed = true;
                    current = sub.points.first().copied();
                }
            }
            "re" => match nums().filter(|v| v.len() == 4) {
                Some(v) => {
                    let (x, y, w, h) = (v[0], v[1], v[2], v[3]);
                    let points = vec![
                        state.ctm.apply(x, y),
                        state.ctm.apply(x + w, y),
                        state.ctm.apply(x + w, y + h),
                        state.ctm.apply(x, y + h),
                    ];
                    current = Some(points[0]);
                    path.push(Subpath {
                        points,
                        closed: true,
                    });
                }
                None => visitor.unsupported(format!("op {index}: invalid re operands")),
            },

            // --- パス描画 ---
            "f" | "F" | "f*" => {
                visitor.fill_path(&state, &path, op.operator == "f*", &at())?;
                path.clear();
                current = None;
            }
            "B" | "B*" | "b" | "b*" => {
                if op.operator.starts_with('b')
                    && let Some(sub) = path.last_mut()
                {
                    sub.closed = true;
                }
                visitor.fill_path(&state, &path, op.operator.ends_with('*'), &at())?;
                visitor.stroke_path(&state, &path, &at())?;
                path.clear();
                current = None;
            }
            "S" | "s" => {
                if op.operator == "s"
                    && let Some(sub) = path.last_mut()
                {
                    sub.closed = true;
                }
                visitor.stroke_path(&state, &path, &at())?;
                path.clear();
                current = None;
            }
            "n" => {
                path.clear();
                current = None;
            }

            // --- テキスト・シェーディング ---
            "Tj" | "TJ" | "'" | "\"" => {
                if op.operator == "'" || op.operator == "\"" {
                    line_matrix = translation(0.0, -state.text_leading).multiply(&line_matrix);
                    text_matrix = line_matrix;
                }
                if state.text_render_mode != 3 && state.text_render_mode != 7 {
                    state.text_matrix = text_matrix;
                    visitor.show_text(&state, &at())?;
                }
            }
            "sh" => visitor.paint_shading(&state, &at())?,

            // --- XObject ---
            "Do" => {
                let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                    continue;
                };
                let name_str = String::from_utf8_lossy(name).into_owned();
                let Some(stream) = resources
                    .get(b"XObject", name)
                    .and_then(|o| o.as_stream().ok())
                else {
                    visitor.unsupported(format!("op {index}: XObject /{name_str} not found"));
                    continue;
                };
                let subtype = stream.dict.get(b"Subtype").ok().and_then(|o| o.as_name().ok());
                match subtype {
                    Some(b"Image") => {
                        visitor.paint_image(&state, &name_str, stream, &at())?;
                    }
                    Some(b"Form") => {
                        if depth + 1 > MAX_FORM_DEPTH {
                            visitor.unsupported(format!(
                                "form XObject /{name_str} nested too deeply"
                            ));
                            continue;
                        }
                        visitor.form_entered(&name_str, &stream.dict);
                        let form_matrix = stream
                            .dict
                            .get(b"Matrix")
                            .ok()
                            .and_then(|o| resolve(resources.document(), o))
                            .and_then(|o| o.as_array().ok())
                            .and_then(|a| Matrix::from_operands(a))
                            .unwrap_or_else(Matrix::identity);
                        let mut form_state = state.clone();
                        form_state.ctm = form_matrix.multiply(&state.ctm);

                        let bytes = stream
                            .decompressed_content()
                            .unwrap_or_else(|_| stream.content.clone());
                        let nested_path = match form_path {
                            Some(parent) => format!("{parent}/{name_str}"),
                            None => name_str.clone(),
                        };
                        let form_resources = resources.for_form(&stream.dict);
                        match run(
                            &form_resources,
                            &bytes,
                            form_state,
                            Some(&nested_path),
                            depth + 1,
                            visitor,
                        ) {
                            Ok(()) => {}
                            Err(e) if matches!(
                                e,
                                crate::error::PreflightError::UnsupportedFeatureError(_)
                            ) =>
                            {
                                visitor.unsupported(format!("form /{nested_path}: {e}"));
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    _ => {}
                }
            }
            _ => {
                // その他のオペレータ（文字間隔、クリップ等）は無視
            }
        }
    }

    Ok(())
}

/// `cs /Name` の解決: デバイス色空間名、なければColorSpaceリソース。
fn lookup_color_space<V: ContentVisitor>(
    resources: &Resources<'_>,
    name: &[u8],
    visitor: &mut V,
    index: usize,
) -> Option<ColorSpace> {
    if let Some(space) = ColorSpace::from_device_name(name) {
        return Some(space);
    }
    let display = String::from_utf8_lossy(name);
    let Some(obj) = resources.get(b"ColorSpace", name) else {
        visitor.unsupported(format!("op {index}: color space /{display} not found"));
        return None;
    };
    match ColorSpace::parse(resources.document(), obj) {
        Ok(space) => Some(space),
        Err(e) => {
            visitor.unsupported(format!("op {index}: color space /{display}: {e}"));
            None
        }
    }
}

/// 3次ベジェ曲線を折れ線に近似する（始点は含まない）。
fn flatten_cubic(
    p0: (f64, f64),
    p1: (f64, f64),
    p2: (f64, f64),
    p3: (f64, f64),
) -> Vec<(f64, f64)> {
    (1..=CURVE_SEGMENTS)
        .map(|i| {
            let t = i as f64 / CURVE_SEGMENTS as f64;
            let mt = 1.0 - t;
            let a = mt * mt * mt;
            let b = 3.0 * mt * mt * t;
            let c = 3.0 * mt * t * t;
            let d = t * t * t;
            (
                a * p0.0 + b * p1.0 + c * p2.0 + d * p3.0,
                a * p0.1 + b * p1.1 + c * p2.1 + d * p3.1,
            )
        })
        .collect()
}
