//! Logic lõi cho hành trình điều trị ung thư: mô hình bảng, từ điển chỉ số và dựng timeline.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod dates;
pub mod dictionary;
pub mod layout;
pub mod segment;
pub mod table;

pub use dictionary::{MetricCategory, MetricDefinition, MetricDictionary};
pub use layout::FixedColumn;
pub use segment::build_timeline;
pub use table::{parse_numeric_text, CanonicalTable, Cell, RawTable};

/// Cấu hình dựng timeline và thang hiển thị.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelineConfig {
    /// Độ dài tối thiểu (ngày) của giai đoạn cuối cùng còn mở.
    pub default_phase_days: i64,
    /// Dải hiển thị mà khoảng [min, max] của mỗi chỉ số được co giãn vào.
    pub display_band: f64,
    /// Tâm của dải hiển thị.
    pub display_center: f64,
    /// Dấu hiệu nhận biết thủ thuật/phẫu thuật trong nhãn giai đoạn.
    pub surgical_markers: Vec<String>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            default_phase_days: 21,
            display_band: 60.0,
            display_center: 50.0,
            surgical_markers: vec!["术".to_string(), "腹腔镜".to_string()],
        }
    }
}

impl TimelineConfig {
    pub fn is_surgical(&self, label: &str) -> bool {
        self.surgical_markers
            .iter()
            .any(|marker| !marker.is_empty() && label.contains(marker.as_str()))
    }
}

/// Loại giai đoạn điều trị.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseKind {
    Medication,
    Surgery,
}

/// Một khoảng điều trị liên tục trên timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub label: String,
    pub cycle_tag: Option<String>,
    pub scheme: Option<String>,
    pub duration_days: i64,
    pub kind: PhaseKind,
}

/// Mốc sự kiện lâm sàng (xử trí) tại một ngày.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMarker {
    pub date: NaiveDate,
    pub label: String,
    /// Thứ tự trong nhóm các sự kiện cùng ngày, bắt đầu từ 0.
    pub overlap_index: usize,
}

/// Một điểm đo của chỉ số.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub is_alert: bool,
}

/// Chuỗi giá trị của một chỉ số kèm thông số co giãn hiển thị.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSeries {
    pub canonical_name: String,
    pub unit: String,
    pub threshold: Option<f64>,
    pub points: Vec<SeriesPoint>,
    pub range_min: f64,
    pub range_max: f64,
    pub midpoint: f64,
    pub display_scale: f64,
    pub display_offset: f64,
}

impl MetricSeries {
    /// Dựng chuỗi từ các điểm thô; cảnh báo và thang hiển thị được tính lại toàn bộ.
    pub fn from_points(
        canonical_name: impl Into<String>,
        unit: impl Into<String>,
        threshold: Option<f64>,
        points: Vec<(NaiveDate, f64)>,
        config: &TimelineConfig,
    ) -> Self {
        let mut series = Self {
            canonical_name: canonical_name.into(),
            unit: unit.into(),
            threshold,
            points: Vec::new(),
            range_min: 0.0,
            range_max: 0.0,
            midpoint: 0.0,
            display_scale: 1.0,
            display_offset: 0.0,
        };
        series.replace_points(points, config);
        series
    }

    /// Thay toàn bộ điểm đo và tính lại cảnh báo, khoảng giá trị, thang hiển thị.
    pub fn replace_points(&mut self, points: Vec<(NaiveDate, f64)>, config: &TimelineConfig) {
        let threshold = self.threshold;
        self.points = points
            .into_iter()
            .map(|(date, value)| SeriesPoint {
                date,
                value,
                is_alert: threshold.is_some_and(|limit| value > limit),
            })
            .collect();

        let Some(first) = self.points.first().map(|point| point.value) else {
            self.range_min = 0.0;
            self.range_max = 0.0;
            self.midpoint = 0.0;
            self.display_scale = 1.0;
            self.display_offset = 0.0;
            return;
        };

        let (min, max) = self
            .points
            .iter()
            .fold((first, first), |(lo, hi), point| {
                (lo.min(point.value), hi.max(point.value))
            });
        let midpoint = (min + max) / 2.0;
        let scale = if max == min {
            1.0
        } else {
            round_to(config.display_band / (max - min), 3)
        };

        self.range_min = min;
        self.range_max = max;
        self.midpoint = midpoint;
        self.display_scale = scale;
        self.display_offset = (config.display_center - midpoint).round();
    }

    pub fn alert_count(&self) -> usize {
        self.points.iter().filter(|point| point.is_alert).count()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Kết quả dựng timeline: giai đoạn hiển thị, mốc sự kiện và chuỗi chỉ số.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Timeline {
    pub phases: Vec<Phase>,
    pub events: Vec<EventMarker>,
    pub series: Vec<MetricSeries>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.first_date.is_none()
    }

    /// Chuỗi chỉ số mặc định được bật khi mở biểu đồ.
    pub fn default_active_series(&self) -> Vec<&str> {
        const PREFERRED: [&str; 6] = ["Weight", "体重", "CEA", "CA125", "MRD", "AFP"];

        let preferred: Vec<&str> = self
            .series
            .iter()
            .map(|series| series.canonical_name.as_str())
            .filter(|name| PREFERRED.contains(name))
            .collect();
        if !preferred.is_empty() {
            return preferred;
        }

        self.series
            .iter()
            .take(5)
            .map(|series| series.canonical_name.as_str())
            .collect()
    }
}

/// Nhóm quan sát gửi sang hệ thống lưu trữ lâm sàng.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationCategory {
    TumorMarker,
    Laboratory,
}

impl ObservationCategory {
    pub fn for_metric(category: MetricCategory) -> Self {
        match category {
            MetricCategory::Molecular => Self::TumorMarker,
            _ => Self::Laboratory,
        }
    }
}

/// Một giá trị đo dạng quan sát lâm sàng, mỗi ô chỉ số khác rỗng sinh ra một bản ghi.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub category: ObservationCategory,
    pub canonical_code: String,
    pub display_label: String,
    pub numeric_value: Option<f64>,
    pub text_value: Option<String>,
}

/// Cảnh báo không làm dừng quá trình xử lý.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    MappingDegraded { reason: String },
    RowSkipped { row: usize, reason: String },
    CellSkipped { row: usize, column: usize, reason: String },
    UnmappedColumn { index: usize, header: String },
    DuplicateMetric { name: String, index: usize },
    EmptyTimeline,
    Structure { message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappingDegraded { reason } => write!(f, "mapping degraded: {reason}"),
            Self::RowSkipped { row, reason } => write!(f, "row {row} skipped: {reason}"),
            Self::CellSkipped {
                row,
                column,
                reason,
            } => write!(f, "cell ({row}, {column}) skipped: {reason}"),
            Self::UnmappedColumn { index, header } => {
                write!(f, "column {index} ({header:?}) left unmapped")
            }
            Self::DuplicateMetric { name, index } => {
                write!(f, "column {index} duplicates metric {name}")
            }
            Self::EmptyTimeline => write!(f, "no dated rows, timeline is empty"),
            Self::Structure { message } => write!(f, "{message}"),
        }
    }
}

/// Lỗi chung của phần lõi.
#[derive(Debug, thiserror::Error)]
pub enum JourneyError {
    #[error("Alias \"{alias}\" trỏ tới cả {first} và {second}")]
    AliasConflict {
        alias: String,
        first: String,
        second: String,
    },
    #[error("Từ điển chỉ số không có định nghĩa nào")]
    EmptyDictionary,
}
