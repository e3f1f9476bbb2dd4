//! Dựng timeline từ bảng chuẩn: phân đoạn giai đoạn điều trị, mốc sự kiện, chuỗi chỉ số.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{Days, NaiveDate};
use regex::Regex;
use tracing::debug;

use crate::dates::cell_date;
use crate::layout::FixedColumn;
use crate::{
    CanonicalTable, Cell, EventMarker, MetricDictionary, MetricSeries, Phase, PhaseKind,
    Timeline, TimelineConfig,
};

const SURVEILLANCE_TAG: &str = "AS";
const FALLBACK_PHASE_LABEL: &str = "Treatment";

fn cycle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"C\d+|AS\d+").expect("cycle pattern compiles"))
}

fn threshold_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[<>]\s*([\d.]+)").expect("threshold pattern compiles"))
}

/// Mã chu kỳ của ô "周期": "C3D1" -> "C3", "AS2" -> "AS2", còn lại giữ nguyên.
pub fn extract_cycle_tag(raw: &str) -> String {
    cycle_pattern()
        .find(raw)
        .map(|found| found.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Ngưỡng số ghi trong ô đơn vị, ví dụ "<5" hay "> 3.3".
pub fn parse_threshold(unit: &str) -> Option<f64> {
    threshold_pattern()
        .captures(unit)
        .and_then(|caps| caps.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok())
}

/// Dựng timeline từ bảng chuẩn. Bảng không có hàng nào đọc được ngày cho timeline rỗng.
pub fn build_timeline(
    table: &CanonicalTable,
    dictionary: &MetricDictionary,
    config: &TimelineConfig,
) -> Timeline {
    let mut rows: Vec<(NaiveDate, &[Cell])> = table
        .data_rows()
        .iter()
        .filter_map(|row| {
            let date = row.get(FixedColumn::Date.index()).and_then(cell_date)?;
            Some((date, row.as_slice()))
        })
        .collect();

    if rows.is_empty() {
        debug!("no dated rows in canonical table");
        return Timeline::default();
    }

    rows.sort_by_key(|(date, _)| *date);

    let mut tracker = PhaseTracker::default();
    let mut events = Vec::new();
    for (date, row) in &rows {
        let row = RowFields::read(row);
        if let Some(label) = row.event.as_deref() {
            events.push((*date, label.to_string()));
        }
        tracker.observe(*date, &row, config);
    }

    let first_date = rows.first().map(|(date, _)| *date);
    let last_date = rows.last().map(|(date, _)| *date);
    let phases = last_date
        .map(|last| tracker.finish(last, config))
        .unwrap_or_default();

    Timeline {
        phases: phases.into_iter().filter(is_displayed).collect(),
        events: stack_events(events),
        series: collect_series(table, &rows, dictionary, config),
        first_date,
        last_date,
    }
}

fn is_displayed(phase: &Phase) -> bool {
    phase.cycle_tag.is_some() || phase.kind == PhaseKind::Surgery
}

struct RowFields {
    label: Option<String>,
    cycle: Option<String>,
    scheme: Option<String>,
    event: Option<String>,
}

impl RowFields {
    fn read(row: &[Cell]) -> Self {
        let text = |column: FixedColumn| {
            row.get(column.index())
                .and_then(Cell::as_text)
                .map(|value| value.into_owned())
        };
        Self {
            label: text(FixedColumn::Phase),
            cycle: text(FixedColumn::Cycle),
            scheme: text(FixedColumn::Scheme),
            event: text(FixedColumn::Event),
        }
    }
}

struct OpenPhase {
    start: NaiveDate,
    label: String,
    cycle_tag: Option<String>,
    scheme: Option<String>,
    kind: PhaseKind,
    surveillance: bool,
}

impl OpenPhase {
    fn close(self, end: NaiveDate) -> Phase {
        Phase {
            duration_days: end.signed_duration_since(self.start).num_days(),
            start: self.start,
            end,
            label: self.label,
            cycle_tag: self.cycle_tag,
            scheme: self.scheme,
            kind: self.kind,
        }
    }
}

/// Máy trạng thái Đóng -> Mở: tại mỗi ranh giới, giai đoạn đang mở được đóng
/// ở ngày của hàng hiện tại rồi mở giai đoạn mới.
#[derive(Default)]
struct PhaseTracker {
    open: Option<OpenPhase>,
    closed: Vec<Phase>,
}

impl PhaseTracker {
    fn observe(&mut self, date: NaiveDate, row: &RowFields, config: &TimelineConfig) {
        let cycle_tag = row.cycle.as_deref().map(extract_cycle_tag);
        let surveillance = cycle_tag
            .as_deref()
            .is_some_and(|tag| tag.starts_with(SURVEILLANCE_TAG));

        if self.is_boundary(row, cycle_tag.as_deref(), surveillance, config) {
            let previous = self.open.take();
            let (prev_label, prev_scheme) = match previous {
                Some(phase) => {
                    let label = phase.label.clone();
                    let scheme = phase.scheme.clone();
                    self.closed.push(phase.close(date));
                    (Some(label), scheme)
                }
                None => (None, None),
            };

            let opened = if surveillance {
                OpenPhase {
                    start: date,
                    label: SURVEILLANCE_TAG.to_string(),
                    cycle_tag: Some(SURVEILLANCE_TAG.to_string()),
                    scheme: None,
                    kind: PhaseKind::Medication,
                    surveillance: true,
                }
            } else {
                let surgical = row
                    .label
                    .as_deref()
                    .is_some_and(|label| config.is_surgical(label));
                let label = row
                    .label
                    .clone()
                    .or(prev_label)
                    .unwrap_or_else(|| FALLBACK_PHASE_LABEL.to_string());
                let kind = if surgical {
                    PhaseKind::Surgery
                } else {
                    PhaseKind::Medication
                };
                OpenPhase {
                    start: date,
                    label,
                    cycle_tag,
                    scheme: row.scheme.clone().or(prev_scheme),
                    kind,
                    surveillance: false,
                }
            };

            debug!(%date, label = %opened.label, cycle = ?opened.cycle_tag, "phase opened");
            self.open = Some(opened);
            return;
        }

        if let (Some(scheme), Some(open)) = (row.scheme.as_ref(), self.open.as_mut()) {
            if !open.surveillance {
                open.scheme = Some(scheme.clone());
            }
        }
    }

    fn is_boundary(
        &self,
        row: &RowFields,
        cycle_tag: Option<&str>,
        surveillance: bool,
        config: &TimelineConfig,
    ) -> bool {
        if surveillance {
            return !self.open.as_ref().is_some_and(|open| open.surveillance);
        }

        if let Some(tag) = cycle_tag {
            return self
                .open
                .as_ref()
                .map_or(true, |open| open.cycle_tag.as_deref() != Some(tag));
        }

        let Some(label) = row.label.as_deref() else {
            return false;
        };
        if row.event.as_deref() == Some(label) {
            return false;
        }
        // A surgical label splits even an open cycle-tagged phase; other labels never do.
        match &self.open {
            None => true,
            Some(open) => open.label != label && config.is_surgical(label),
        }
    }

    fn finish(mut self, last_date: NaiveDate, config: &TimelineConfig) -> Vec<Phase> {
        if let Some(open) = self.open.take() {
            let minimum = open
                .start
                .checked_add_days(Days::new(config.default_phase_days.max(0) as u64))
                .unwrap_or(open.start);
            self.closed.push(open.close(minimum.max(last_date)));
        }
        self.closed
    }
}

fn stack_events(mut events: Vec<(NaiveDate, String)>) -> Vec<EventMarker> {
    events.sort_by_key(|(date, _)| *date);

    let mut markers: Vec<EventMarker> = Vec::with_capacity(events.len());
    for (date, label) in events {
        let overlap_index = match markers.last() {
            Some(previous) if previous.date == date => previous.overlap_index + 1,
            _ => 0,
        };
        markers.push(EventMarker {
            date,
            label,
            overlap_index,
        });
    }
    markers
}

#[derive(Default)]
struct SeriesAccumulator {
    unit_text: String,
    points: Vec<(NaiveDate, f64)>,
}

fn collect_series(
    table: &CanonicalTable,
    rows: &[(NaiveDate, &[Cell])],
    dictionary: &MetricDictionary,
    config: &TimelineConfig,
) -> Vec<MetricSeries> {
    let columns = table.metric_columns();
    let mut order: Vec<String> = Vec::new();
    let mut accumulators: HashMap<String, SeriesAccumulator> = HashMap::new();

    for (column, name) in &columns {
        let acc = accumulators.entry(name.clone()).or_insert_with(|| {
            order.push(name.clone());
            SeriesAccumulator::default()
        });
        if acc.unit_text.is_empty() {
            if let Some(unit) = table.unit_row().get(*column).and_then(Cell::as_text) {
                acc.unit_text = unit.into_owned();
            }
        }

        for (date, row) in rows {
            let Some(cell) = row.get(*column) else {
                continue;
            };
            if cell.is_blank() {
                continue;
            }
            match cell.as_number() {
                Some(value) => acc.points.push((*date, value)),
                None => debug!(metric = %name, %date, "non-numeric value dropped from series"),
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| {
            let mut acc = accumulators.remove(&name)?;
            acc.points.sort_by_key(|(date, _)| *date);
            let definition = dictionary.lookup(&name);
            let threshold = definition
                .and_then(|definition| definition.threshold)
                .or_else(|| parse_threshold(&acc.unit_text));
            let unit = match definition {
                Some(definition) => definition.unit.clone(),
                None => acc.unit_text,
            };
            Some(MetricSeries::from_points(name, unit, threshold, acc.points, config))
        })
        .collect()
}
