use journey_core::layout::{FIXED_HEADERS, FIXED_UNITS};
use journey_core::{Cell, MetricDictionary};
use journey_ingest::{detect_canonical, IngestConfig};

fn row(fixed: &[&str], metrics: &[&str]) -> Vec<Cell> {
    fixed
        .iter()
        .chain(metrics)
        .map(|value| {
            if value.is_empty() {
                Cell::Empty
            } else {
                Cell::text(*value)
            }
        })
        .collect()
}

fn units() -> Vec<Cell> {
    row(&FIXED_UNITS, &["KG", "<5", "mtm/ml", "<35", "<7"])
}

fn check(headers: &[Cell], units: &[Cell]) -> bool {
    detect_canonical(
        headers,
        units,
        &MetricDictionary::standard(),
        &IngestConfig::default(),
    )
    .is_canonical
}

#[test]
fn canonical_headers_with_fingerprint() {
    let headers = row(&FIXED_HEADERS, &["Weight", "CEA", "MRD", "CA125", "AFP"]);
    assert!(check(&headers, &units()));
}

#[test]
fn one_fixed_header_may_differ() {
    let mut fixed = FIXED_HEADERS;
    fixed[6] = "备注";
    let headers = row(&fixed, &["Weight", "CEA", "MRD", "CA125", "AFP"]);
    assert!(check(&headers, &units()));

    fixed[5] = "事件记录";
    let headers = row(&fixed, &["Weight", "CEA", "MRD", "CA125", "AFP"]);
    assert!(!check(&headers, &units()));
}

#[test]
fn too_few_canonical_metrics() {
    let headers = row(&FIXED_HEADERS, &["Weight", "CEA", "MRD", "CA125", "Ki67"]);
    assert!(!check(&headers, &units()));
}

#[test]
fn missing_unit_fingerprint() {
    let headers = row(&FIXED_HEADERS, &["Weight", "CEA", "MRD", "CA125", "AFP"]);
    let bare = row(&["", "", "", "", "", "", ""], &["KG", "<5", "mtm/ml", "<35", "<7"]);
    assert!(!check(&headers, &bare));
}

#[test]
fn alias_spelling_disqualifies() {
    let headers = row(&FIXED_HEADERS, &["体重", "CEA", "MRD", "CA125", "AFP", "HE4"]);
    let result = detect_canonical(
        &headers,
        &units(),
        &MetricDictionary::standard(),
        &IngestConfig::default(),
    );
    assert!(!result.is_canonical);
    assert_eq!(result.rejected_header.as_deref(), Some("体重"));
}

#[test]
fn blacklisted_header_disqualifies() {
    let headers = row(
        &FIXED_HEADERS,
        &["Weight", "CEA", "MRD", "CA125", "AFP", "Tumor Size"],
    );
    assert!(!check(&headers, &units()));

    let relaxed = IngestConfig {
        canonical_header_blacklist: Vec::new(),
        ..IngestConfig::default()
    };
    let result = detect_canonical(&headers, &units(), &MetricDictionary::standard(), &relaxed);
    assert!(result.is_canonical);
}
