// 構造解析テスト: ボックス/ブリード、色空間、特色、透明、フォント、画像

mod common;

use common::{A4, MM, TestPage, build_pdf, grow, overprint_resources, overprinted_rect};
use lopdf::{Object, Stream, dictionary};
use pdf_preflight::config::merged::AnalysisConfig;
use pdf_preflight::config::settings::MissingBleedPolicy;
use pdf_preflight::error::PreflightError;
use pdf_preflight::pdf::color::{Cmyk, ColorSpaceFamily};
use pdf_preflight::pdf::reader::PdfReader;
use pdf_preflight::structure::{
    OverprintObjectKind, PaintTarget, StructuralReport, analyze_structure,
};

fn analyze(pages: Vec<TestPage>) -> StructuralReport {
    analyze_with(pages, &AnalysisConfig::default())
}

fn analyze_with(pages: Vec<TestPage>, config: &AnalysisConfig) -> StructuralReport {
    let bytes = build_pdf(pages);
    let reader = PdfReader::from_bytes(&bytes).expect("test PDF should open");
    analyze_structure(&reader, config)
}

fn separation(name: &str) -> Object {
    Object::Array(vec![
        "Separation".into(),
        Object::Name(name.as_bytes().to_vec()),
        "DeviceCMYK".into(),
        Object::Dictionary(dictionary! {
            "FunctionType" => 2,
            "Domain" => vec![Object::Integer(0), Object::Integer(1)],
            "C0" => vec![Object::Integer(0); 4],
            "C1" => vec![Object::Integer(0), Object::Real(1.0), Object::Real(0.8), Object::Integer(0)],
            "N" => 1,
        }),
    ])
}

// ============================================================
// 1. ページ幾何とブリード
// ============================================================

#[test]
fn test_bleed_margins_derived_once_from_boxes() {
    let report = analyze(vec![TestPage::new("").with_bleed(3.0)]);
    let geometry = &report.pages[0].geometry;
    assert!(geometry.has_bleed());
    let margins = geometry.bleed_margins().unwrap();
    for side in [margins.left, margins.bottom, margins.right, margins.top] {
        assert!((side - 3.0 * MM).abs() < 1e-3, "side margin {side}");
    }
    assert!((geometry.min_bleed_mm() - 3.0).abs() < 1e-3);
}

#[test]
fn test_uneven_bleed_uses_minimum_side() {
    let mut page = TestPage::new("").with_bleed(3.0);
    let mut bleed = grow(A4, 3.0);
    bleed[3] = A4[3] + 1.0 * MM; // top only 1mm
    page.bleed_box = Some(bleed);
    let report = analyze(vec![page]);
    assert!((report.pages[0].geometry.min_bleed_mm() - 1.0).abs() < 1e-3);
}

#[test]
fn test_missing_bleed_box_zero_policy() {
    let report = analyze(vec![TestPage::new("").with_trim(A4)]);
    let geometry = &report.pages[0].geometry;
    assert!(!geometry.has_bleed());
    assert_eq!(geometry.min_bleed(), 0.0);
    let margins = geometry.bleed_margins().expect("zero policy records margins");
    assert_eq!(margins.min(), 0.0);
}

#[test]
fn test_missing_bleed_box_undefined_policy() {
    let mut config = AnalysisConfig::default();
    config.bleed.missing_bleed = MissingBleedPolicy::Undefined;
    let report = analyze_with(vec![TestPage::new("")], &config);
    let geometry = &report.pages[0].geometry;
    assert!(!geometry.has_bleed());
    assert!(geometry.bleed_margins().is_none());
    assert_eq!(geometry.min_bleed(), 0.0);
}

#[test]
fn test_trim_defaults_to_media_box() {
    let report = analyze(vec![TestPage::new("")]);
    let (w, h) = report.pages[0].geometry.trim_size_mm();
    assert!((w - 210.0).abs() < 0.1, "width {w}");
    assert!((h - 297.0).abs() < 0.1, "height {h}");
    assert!(!report.pages[0].degraded);
}

// ============================================================
// 2. 色空間・特色
// ============================================================

#[test]
fn test_device_color_operators_record_color_spaces() {
    let report = analyze(vec![TestPage::new(
        "1 0 0 rg 0 0 10 10 re f 0 0 0 1 k 0 0 10 10 re f 0.5 g 0 0 10 10 re f",
    )]);
    let spaces = &report.pages[0].color.color_spaces;
    assert!(spaces.contains(&ColorSpaceFamily::Rgb));
    assert!(spaces.contains(&ColorSpaceFamily::Cmyk));
    assert!(spaces.contains(&ColorSpaceFamily::Gray));
}

#[test]
fn test_spot_colors_deduplicated_across_pages() {
    let resources = || {
        dictionary! {
            "ColorSpace" => dictionary! {
                "CS0" => separation("PANTONE 185 C"),
                "CS1" => separation("Varnish"),
            },
        }
    };
    let report = analyze(vec![
        TestPage::new("/CS0 cs 1 scn 0 0 10 10 re f").with_resources(resources()),
        TestPage::new("").with_resources(resources()),
        TestPage::new(""),
    ]);

    assert_eq!(report.spot_colors.len(), 2);
    let pantone = report
        .spot_colors
        .iter()
        .find(|s| s.name == "PANTONE 185 C")
        .unwrap();
    assert!(pantone.is_pantone);
    assert_eq!(pantone.pages, vec![1, 2]);
    let varnish = report.spot_colors.iter().find(|s| s.name == "Varnish").unwrap();
    assert!(!varnish.is_pantone);
    assert!(report.pages[0].color.color_spaces.contains(&ColorSpaceFamily::Spot));
}

#[test]
fn test_spot_names_are_case_sensitive() {
    let resources = dictionary! {
        "ColorSpace" => dictionary! {
            "CS0" => separation("Gold"),
            "CS1" => separation("GOLD"),
        },
    };
    let report = analyze(vec![TestPage::new("").with_resources(resources)]);
    assert_eq!(report.spot_colors.len(), 2);
}

#[test]
fn test_process_separation_is_not_a_spot() {
    let resources = dictionary! {
        "ColorSpace" => dictionary! { "CS0" => separation("Black") },
    };
    let report = analyze(vec![TestPage::new("").with_resources(resources)]);
    assert!(report.spot_colors.is_empty());
}

#[test]
fn test_uninterpretable_color_space_degrades_page() {
    let resources = dictionary! {
        "ColorSpace" => dictionary! {
            "CS0" => Object::Array(vec!["FancySpace".into()]),
        },
    };
    let report = analyze(vec![
        TestPage::new("0 0 0 1 k 0 0 10 10 re f").with_resources(resources),
    ]);
    let page = &report.pages[0];
    assert!(page.degraded);
    assert!(!page.geometry_unavailable, "geometry is still usable");
    assert!(!page.caveats.is_empty());
    assert!(page.color.color_spaces.contains(&ColorSpaceFamily::Cmyk));
}

// ============================================================
// 3. 透明
// ============================================================

#[test]
fn test_ext_gstate_alpha_marks_transparency() {
    let resources = dictionary! {
        "ExtGState" => dictionary! {
            "GS0" => dictionary! { "ca" => Object::Real(0.5) },
        },
    };
    let report = analyze(vec![
        TestPage::new("/GS0 gs 0 0 10 10 re f").with_resources(resources),
        TestPage::new("0 0 10 10 re f"),
    ]);
    assert!(report.pages[0].color.has_transparency);
    assert!(!report.pages[1].color.has_transparency);
}

#[test]
fn test_normal_blend_mode_is_not_transparency() {
    let resources = dictionary! {
        "ExtGState" => dictionary! {
            "GS0" => dictionary! { "BM" => "Normal", "CA" => 1, "SMask" => "None" },
        },
    };
    let report = analyze(vec![TestPage::new("/GS0 gs").with_resources(resources)]);
    assert!(!report.pages[0].color.has_transparency);
}

#[test]
fn test_page_transparency_group() {
    let bytes = build_pdf(vec![TestPage::new("")]);
    let mut doc = lopdf::Document::load_mem(&bytes).unwrap();
    let page_id = *doc.get_pages().get(&1).unwrap();
    doc.get_dictionary_mut(page_id).unwrap().set(
        "Group",
        dictionary! { "S" => "Transparency", "CS" => "DeviceCMYK" },
    );
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();

    let reader = PdfReader::from_bytes(&out).unwrap();
    let report = analyze_structure(&reader, &AnalysisConfig::default());
    assert!(report.pages[0].color.has_transparency);
}

// ============================================================
// 4. オーバープリントフラグ（分類は品質検査側）
// ============================================================

#[test]
fn test_overprint_flags_carry_cmyk_and_object() {
    let content = format!(
        "{} 0 0 0 1 k 0 0 10 10 re f {}",
        overprinted_rect(0.0, 0.0, 0.0, 0.0),
        overprinted_rect(0.0, 0.0, 0.0, 0.8)
    );
    let report = analyze(vec![TestPage::new(&content).with_resources(overprint_resources())]);
    let flags = &report.pages[0].overprint_flags;
    assert_eq!(flags.len(), 2, "the non-overprinted fill is not flagged");
    assert_eq!(flags[0].color, Some(Cmyk::new(0.0, 0.0, 0.0, 0.0)));
    assert_eq!(flags[1].color, Some(Cmyk::new(0.0, 0.0, 0.0, 0.8)));
    assert_eq!(flags[0].target, PaintTarget::Fill);
    assert_eq!(flags[0].overprint_mode, 1);
    assert_eq!(flags[0].object.operator, "f");
    assert!(flags[0].object.index < flags[1].object.index);
}

#[test]
fn test_overprint_flag_ends_with_q() {
    let content = format!("{} 0 0 0 0 k 0 0 10 10 re f", overprinted_rect(0.0, 0.0, 0.0, 1.0));
    let report = analyze(vec![TestPage::new(&content).with_resources(overprint_resources())]);
    assert_eq!(report.pages[0].overprint_flags.len(), 1);
}

#[test]
fn test_stroke_overprint_uses_stroke_color() {
    let resources = dictionary! {
        "ExtGState" => dictionary! {
            "GSs" => dictionary! { "OP" => true, "op" => false },
        },
    };
    let report = analyze(vec![
        TestPage::new("/GSs gs 0 0 0 0 K 1 0 0 0 k 0 0 10 10 re B").with_resources(resources),
    ]);
    let flags = &report.pages[0].overprint_flags;
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].target, PaintTarget::Stroke);
    assert_eq!(flags[0].color, Some(Cmyk::WHITE));
}

/// オーバープリント中の画像は画像として、ステンシルマスクは塗りとして記録する。
#[test]
fn test_overprint_flag_records_object_kind() {
    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceCMYK",
            "BitsPerComponent" => 8,
        },
        vec![0, 0, 0, 255],
    );
    let mask = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ImageMask" => true,
        },
        vec![0],
    );
    let mut resources = overprint_resources();
    resources.set(
        "XObject",
        dictionary! { "Im1" => Object::Stream(image), "Mk1" => Object::Stream(mask) },
    );
    let report = analyze(vec![
        TestPage::new("q /GSop gs 10 0 0 10 0 0 cm /Im1 Do 0 0 0 1 k /Mk1 Do Q")
            .with_resources(resources),
    ]);
    let flags = &report.pages[0].overprint_flags;
    assert_eq!(flags.len(), 2);
    assert_eq!(flags[0].object_kind, OverprintObjectKind::Image);
    assert_eq!(flags[0].color, None);
    assert_eq!(flags[1].object_kind, OverprintObjectKind::Vector);
    assert_eq!(flags[1].color, Some(Cmyk::new(0.0, 0.0, 0.0, 1.0)));
}

// ============================================================
// 5. フォント・画像
// ============================================================

#[test]
fn test_font_embedding_status() {
    // 埋め込み判定はFontFileキーの有無だけを見る
    let descriptor = dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => "ABCDEF+Body",
        "FontFile2" => Object::Reference((999, 0)),
    };
    let resources = dictionary! {
        "Font" => dictionary! {
            "F1" => dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" },
            "F2" => dictionary! { "Type" => "Font", "Subtype" => "TrueType", "BaseFont" => "FancySerif" },
            "F3" => dictionary! {
                "Type" => "Font",
                "Subtype" => "TrueType",
                "BaseFont" => "ABCDEF+Body",
                "FontDescriptor" => Object::Dictionary(descriptor),
            },
        },
    };
    let report = analyze(vec![TestPage::new("").with_resources(resources)]);
    let fonts = &report.pages[0].fonts;
    assert_eq!(fonts.len(), 3);

    let helvetica = fonts.iter().find(|f| f.base_font == "Helvetica").unwrap();
    assert!(helvetica.standard);
    assert!(!helvetica.is_missing_embedding());

    let fancy = fonts.iter().find(|f| f.base_font == "FancySerif").unwrap();
    assert!(!fancy.embedded);
    assert!(fancy.is_missing_embedding());

    let body = fonts.iter().find(|f| f.base_font == "ABCDEF+Body").unwrap();
    assert!(body.subset);
    assert!(body.embedded);
}

#[test]
fn test_image_placement_and_effective_ppi() {
    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 300,
            "Height" => 150,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        vec![0u8; 300 * 150 * 3],
    );
    let resources = dictionary! {
        "XObject" => dictionary! { "Im1" => Object::Stream(image) },
    };
    // 2in x 1in に配置 → 150 ppi
    let report = analyze(vec![
        TestPage::new("q 144 0 0 72 36 36 cm /Im1 Do Q").with_resources(resources),
    ]);
    let images = &report.pages[0].images;
    assert_eq!(images.len(), 1);
    let usage = &images[0];
    assert_eq!(usage.name, "Im1");
    assert_eq!((usage.pixel_width, usage.pixel_height), (300, 150));
    assert!((usage.placed_width_pt - 144.0).abs() < 1e-6);
    assert!((usage.effective_ppi.unwrap() - 150.0).abs() < 1e-6);
    assert_eq!(usage.color_space, Some(ColorSpaceFamily::Rgb));
    assert!(report.pages[0].color.color_spaces.contains(&ColorSpaceFamily::Rgb));
}

#[test]
fn test_image_records_filter_and_encoded_size() {
    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 100,
            "Height" => 100,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        vec![0u8; 2000],
    );
    let resources = dictionary! {
        "XObject" => dictionary! { "Im1" => Object::Stream(image) },
    };
    let report = analyze(vec![
        TestPage::new("q 72 0 0 72 0 0 cm /Im1 Do Q").with_resources(resources),
    ]);
    let usage = &report.pages[0].images[0];
    assert!(usage.is_jpeg());
    assert_eq!(usage.encoded_bytes, 2000);
    assert!((usage.bytes_per_pixel().unwrap() - 0.2).abs() < 1e-9);
}

/// 文字サイズはTf × テキスト行列 × CTM。不可視テキストは数えない。
#[test]
fn test_smallest_visible_text_size() {
    let resources = dictionary! {
        "Font" => dictionary! {
            "F1" => dictionary! { "Type" => "Font", "Subtype" => "Type1", "BaseFont" => "Helvetica" },
        },
    };
    let content = "BT /F1 12 Tf (a) Tj ET \
                   q 0.5 0 0 0.5 0 0 cm BT /F1 6 Tf (b) Tj ET Q \
                   BT /F1 1 Tf 3 Tr (c) Tj ET";
    let report = analyze(vec![
        TestPage::new(content).with_resources(resources),
        TestPage::new(""),
    ]);
    let text = &report.pages[0].text;
    assert_eq!(text.runs, 2);
    assert!((text.min_size_pt.unwrap() - 3.0).abs() < 1e-6);
    assert_eq!(report.pages[1].text.min_size_pt, None);
}

// ============================================================
// 6. 文書レベルのエラー
// ============================================================

#[test]
fn test_garbage_bytes_are_malformed() {
    let err = PdfReader::from_bytes(b"not a pdf at all").err().unwrap();
    assert!(matches!(err, PreflightError::MalformedDocumentError(_)));
    assert!(!err.is_recoverable());
}

#[test]
fn test_zero_page_document_is_malformed() {
    let mut doc = lopdf::Document::with_version("1.6");
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => Vec::<Object>::new(),
        "Count" => 0,
    });
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();

    let err = PdfReader::from_bytes(&bytes).err().unwrap();
    assert!(matches!(err, PreflightError::MalformedDocumentError(_)));
}
