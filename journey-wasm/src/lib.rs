//! Bridge WASM <-> JavaScript cho bộ chuẩn hóa bảng điều trị và dựng timeline.

use journey_core::{CanonicalTable, MetricDictionary, TimelineConfig};
use journey_ingest::source::read_json_value;
use journey_ingest::template::{canonical_template, list_metrics, TemplateMetrics, TemplateOptions};
use journey_ingest::{IngestConfig, IngestFailure, IngestOptions, Pipeline};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::prelude::*;

/// Cấu hình từng phần từ JavaScript; trường bỏ trống giữ giá trị mặc định.
#[derive(Deserialize, Default)]
struct JsIngestConfig {
    #[serde(default)]
    header_search_rows: Option<usize>,
    #[serde(default)]
    canonical_min_metric_matches: Option<usize>,
    #[serde(default)]
    mapping_confidence_threshold: Option<f64>,
    #[serde(default)]
    default_phase_days: Option<i64>,
    #[serde(default)]
    display_band: Option<f64>,
    #[serde(default)]
    surgical_markers: Option<Vec<String>>,
    #[serde(default)]
    extended_dictionary: bool,
}

impl From<&JsIngestConfig> for TimelineConfig {
    fn from(cfg: &JsIngestConfig) -> Self {
        let mut base = TimelineConfig::default();
        if let Some(days) = cfg.default_phase_days {
            base.default_phase_days = days;
        }
        if let Some(band) = cfg.display_band {
            base.display_band = band;
        }
        if let Some(markers) = &cfg.surgical_markers {
            base.surgical_markers = markers.clone();
        }
        base
    }
}

impl From<&JsIngestConfig> for IngestConfig {
    fn from(cfg: &JsIngestConfig) -> Self {
        let mut base = IngestConfig::default();
        if let Some(rows) = cfg.header_search_rows {
            base.header_search_rows = rows;
        }
        if let Some(matches) = cfg.canonical_min_metric_matches {
            base.canonical_min_metric_matches = matches;
        }
        if let Some(threshold) = cfg.mapping_confidence_threshold {
            base.mapping_confidence_threshold = threshold;
        }
        base.timeline = TimelineConfig::from(cfg);
        base
    }
}

impl JsIngestConfig {
    fn dictionary(&self) -> MetricDictionary {
        if self.extended_dictionary {
            MetricDictionary::with_dynamic_markers()
        } else {
            MetricDictionary::standard()
        }
    }
}

#[derive(Deserialize, Default)]
struct JsTemplateOptions {
    #[serde(default)]
    patient_name: Option<String>,
    #[serde(default)]
    metrics: Option<Vec<String>>,
    #[serde(default)]
    minimal: bool,
    #[serde(default)]
    empty_rows: Option<usize>,
}

fn read_config(config: Option<JsValue>) -> Result<JsIngestConfig, JsValue> {
    match config {
        Some(js_cfg) if !js_cfg.is_undefined() && !js_cfg.is_null() => from_value(js_cfg)
            .map_err(|err| JsValue::from_str(&format!("Không đọc được config: {err}"))),
        _ => Ok(JsIngestConfig::default()),
    }
}

fn read_rows(rows: JsValue) -> Result<journey_core::RawTable, JsValue> {
    let value = from_value::<serde_json::Value>(rows)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được bảng JSON: {err}")))?;
    read_json_value(&value).map_err(|err| JsValue::from_str(&format!("Bảng không hợp lệ: {err}")))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}

/// Chuẩn hóa bảng thô (mảng hàng hoặc mảng object) thành bảng chuẩn kèm timeline.
/// Trong trình duyệt không gọi dịch vụ ánh xạ ngữ nghĩa, luôn dùng heuristic.
#[wasm_bindgen]
pub fn normalize_table(
    rows: JsValue,
    options: Option<JsValue>,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let table = read_rows(rows)?;
    let options: IngestOptions = match options {
        Some(js_opts) if !js_opts.is_undefined() && !js_opts.is_null() => from_value(js_opts)
            .map_err(|err| JsValue::from_str(&format!("Không đọc được tùy chọn: {err}")))?,
        _ => IngestOptions::default(),
    };
    let cfg = read_config(config)?;

    let pipeline = Pipeline::new(cfg.dictionary(), IngestConfig::from(&cfg));
    let outcome = pipeline
        .ingest_offline(&table, &options)
        .map_err(|err| JsValue::from_str(&format_ingest_failure(&err)))?;

    to_js(&outcome)
}

/// Dựng timeline từ bảng đã ở bố cục chuẩn.
#[wasm_bindgen]
pub fn build_timeline(canonical_rows: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let table = CanonicalTable::new(read_rows(canonical_rows)?.rows);
    let cfg = read_config(config)?;

    let timeline = journey_core::build_timeline(&table, &cfg.dictionary(), &TimelineConfig::from(&cfg));
    to_js(&timeline)
}

#[wasm_bindgen]
pub fn template_rows(options: Option<JsValue>) -> Result<JsValue, JsValue> {
    let opts: JsTemplateOptions = match options {
        Some(js_opts) if !js_opts.is_undefined() && !js_opts.is_null() => from_value(js_opts)
            .map_err(|err| JsValue::from_str(&format!("Không đọc được tùy chọn mẫu: {err}")))?,
        _ => JsTemplateOptions::default(),
    };

    let metrics = match opts.metrics {
        Some(names) => TemplateMetrics::Named(names),
        None if opts.minimal => TemplateMetrics::Minimal,
        None => TemplateMetrics::All,
    };
    let mut template_options = TemplateOptions {
        patient_name: opts.patient_name,
        metrics,
        ..TemplateOptions::default()
    };
    if let Some(rows) = opts.empty_rows {
        template_options.empty_rows = rows;
    }

    to_js(&canonical_template(&MetricDictionary::standard(), &template_options))
}

#[wasm_bindgen]
pub fn metric_catalog(extended: bool) -> Result<JsValue, JsValue> {
    let dictionary = if extended {
        MetricDictionary::with_dynamic_markers()
    } else {
        MetricDictionary::standard()
    };
    to_js(&list_metrics(&dictionary))
}

fn format_ingest_failure(err: &IngestFailure) -> String {
    format!("Chuẩn hóa thất bại: {err}")
}
