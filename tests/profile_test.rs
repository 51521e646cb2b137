// プリフライトプロファイル読込テスト

use pdf_preflight::error::PreflightError;
use pdf_preflight::rules::profile::parse_profiles_json;
use pdf_preflight::rules::{CheckType, PreflightProfile, PreflightRule, ProfileCatalog, Severity, Threshold};

fn config_error(json: &str) -> String {
    match parse_profiles_json(json) {
        Err(PreflightError::ConfigurationError(msg)) => msg,
        other => panic!("expected ConfigurationError, got {other:?}"),
    }
}

#[test]
fn test_builtin_catalog_has_offset_and_digital() {
    let catalog = ProfileCatalog::builtin();
    assert_eq!(catalog.names(), vec!["offset", "digital"]);

    let offset = catalog.get("offset").unwrap();
    let bleed = offset.rule(CheckType::BleedMargin).unwrap();
    assert_eq!(bleed.threshold, Some(Threshold::Number(3.0)));
    assert_eq!(bleed.severity, Severity::Error);
    // インク量の閾値は設定値に委ねる
    assert_eq!(offset.rule(CheckType::InkCoverageMax).unwrap().threshold, None);
    assert_eq!(offset.rule(CheckType::InkCoverageWarning).unwrap().threshold, None);
    let digital = catalog.get("digital").unwrap();
    assert_eq!(digital.rule(CheckType::InkCoverageMax).unwrap().threshold, None);
    assert_eq!(
        offset.rule(CheckType::OverprintWhite).unwrap().severity,
        Severity::Error
    );
}

#[test]
fn test_unknown_profile_is_configuration_error() {
    let err = ProfileCatalog::builtin().get("newspaper").unwrap_err();
    assert!(matches!(err, PreflightError::ConfigurationError(_)));
    assert!(err.to_string().contains("newspaper"));
}

#[test]
fn test_parse_profiles_keeps_rule_order() {
    let json = r#"{
        "poster": {
            "ink": {"check_type": "ink_coverage_max", "threshold": 320, "severity": "warning"},
            "bleed": {"check_type": "bleed_margin", "threshold": 5.0, "severity": "error"},
            "mode": {"check_type": "color_mode", "threshold": "cmyk", "severity": "info"},
            "white": {"check_type": "overprint_white", "severity": "error"}
        }
    }"#;
    let profiles = parse_profiles_json(json).unwrap();
    assert_eq!(profiles.len(), 1);
    let poster = &profiles[0];
    assert_eq!(poster.name, "poster");
    let names: Vec<&str> = poster.rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["ink", "bleed", "mode", "white"]);
    assert_eq!(poster.rules[0].threshold, Some(Threshold::Number(320.0)));
    assert_eq!(poster.rules[2].threshold, Some(Threshold::Text("cmyk".to_string())));
    assert_eq!(poster.rules[3].threshold, None);
}

#[test]
fn test_unknown_check_type_rejected() {
    let msg = config_error(r#"{"p": {"r": {"check_type": "minimum_text", "severity": "error"}}}"#);
    assert!(msg.contains("unknown check_type 'minimum_text'"), "got: {msg}");
}

#[test]
fn test_unknown_severity_rejected() {
    let msg = config_error(r#"{"p": {"r": {"check_type": "bleed_margin", "severity": "fatal"}}}"#);
    assert!(msg.contains("unknown severity"), "got: {msg}");
}

#[test]
fn test_duplicate_check_type_rejected() {
    let msg = config_error(
        r#"{"p": {
            "a": {"check_type": "bleed_margin", "threshold": 3, "severity": "error"},
            "b": {"check_type": "bleed_margin", "threshold": 1, "severity": "warning"}
        }}"#,
    );
    assert!(msg.contains("duplicate check_type"), "got: {msg}");
}

#[test]
fn test_wrong_threshold_kind_rejected() {
    config_error(r#"{"p": {"r": {"check_type": "bleed_margin", "threshold": "3mm", "severity": "error"}}}"#);
    config_error(r#"{"p": {"r": {"check_type": "color_mode", "threshold": 1, "severity": "error"}}}"#);
    config_error(r#"{"p": {"r": {"check_type": "color_mode", "threshold": "rgb", "severity": "error"}}}"#);
    config_error(r#"{"p": {"r": {"check_type": "overprint_white", "threshold": 1, "severity": "error"}}}"#);
    config_error(r#"{"p": {"r": {"check_type": "bleed_margin", "threshold": -1, "severity": "error"}}}"#);
}

#[test]
fn test_unknown_rule_key_rejected() {
    config_error(r#"{"p": {"r": {"check_type": "bleed_margin", "severity": "error", "limit": 3}}}"#);
}

#[test]
fn test_profile_must_be_object() {
    config_error(r#"{"p": ["bleed_margin"]}"#);
}

#[test]
fn test_invalid_json_rejected() {
    assert!(parse_profiles_json("{not json").is_err());
}

#[test]
fn test_catalog_load_overrides_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profiles.json");
    std::fs::write(
        &path,
        r#"{
            "offset": {"bleed": {"check_type": "bleed_margin", "threshold": 5, "severity": "warning"}},
            "newspaper": {"fonts": {"check_type": "font_embedded", "severity": "error"}}
        }"#,
    )
    .unwrap();

    let catalog = ProfileCatalog::load(Some(path.as_path())).unwrap();
    assert_eq!(catalog.names(), vec!["offset", "digital", "newspaper"]);
    let offset = catalog.get("offset").unwrap();
    assert_eq!(offset.rules.len(), 1);
    assert_eq!(offset.rules[0].severity, Severity::Warning);
    assert!(catalog.get("newspaper").is_ok());
}

#[test]
fn test_catalog_load_missing_file_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ProfileCatalog::load(Some(dir.path().join("nope.json").as_path())).unwrap_err();
    assert!(matches!(err, PreflightError::ConfigurationError(_)));
}

#[test]
fn test_profile_new_validates() {
    let rule = |name: &str| PreflightRule {
        name: name.to_string(),
        check_type: CheckType::TransparencyPresent,
        threshold: None,
        severity: Severity::Info,
    };
    assert!(PreflightProfile::new("ok", vec![rule("a")]).is_ok());
    assert!(PreflightProfile::new("dup", vec![rule("a"), rule("b")]).is_err());
    assert!(PreflightProfile::new(" ", vec![]).is_err());
}
