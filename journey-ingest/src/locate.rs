//! Finds the header row, the units row and where data starts in an arbitrary sheet.

use std::sync::OnceLock;

use journey_core::{dates, Cell, MetricDictionary, RawTable};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{IngestConfig, IngestError};

/// Metric headers as they show up in real sheets, matched as substrings.
const METRIC_HEADER_HINTS: [&str; 21] = [
    "Weight", "Handgrip", "ECOG", "MRD", "aMRD", "CEA", "HE4", "CA19-9", "CA125", "CA724", "AFP",
    "ROMA", "白细胞", "血小板", "中性粒细胞", "谷草转氨酶", "谷丙转氨酶", "肺", "肝脏", "淋巴",
    "盆腔",
];

const FIXED_HEADER_KEYWORDS: [&str; 11] = [
    "子类", "项目", "周期", "方案", "处置", "日期", "date", "phase", "cycle", "scheme", "event",
];

const UNIT_TOKENS: [&str; 14] = [
    "kg", "mm", "cm", "mtm/ml", "ng/ml", "u/ml", "u/l", "pmol/l", "mmol/l", "g/l", "%", "10^9/l",
    "当下周期", "前序周期",
];

/// Serial numbers this far apart cover 1954 to 2119, wide enough for any treatment record.
const PLAUSIBLE_SERIAL_RANGE: (f64, f64) = (20_000.0, 80_000.0);

fn threshold_cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[<>≤≥]\s*\d").expect("threshold pattern compiles"))
}

/// Where the header, units and data sit in a raw table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableStructure {
    pub header_row: usize,
    pub unit_row: Option<usize>,
    pub data_start: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RowSignals {
    non_empty: usize,
    metric_hits: usize,
    fixed_hits: usize,
    unit_hits: usize,
}

impl RowSignals {
    fn read(row: &[Cell], dictionary: &MetricDictionary) -> Self {
        let texts: Vec<String> = row
            .iter()
            .filter_map(Cell::as_text)
            .map(|text| text.into_owned())
            .collect();

        let metric_hits = texts
            .iter()
            .filter(|text| {
                dictionary.is_known(text)
                    || METRIC_HEADER_HINTS.iter().any(|hint| text.contains(hint))
            })
            .count();

        let lowered: Vec<String> = texts.iter().map(|text| text.to_lowercase()).collect();
        let fixed_hits = FIXED_HEADER_KEYWORDS
            .iter()
            .filter(|keyword| lowered.iter().any(|text| text.contains(*keyword)))
            .count();

        Self {
            non_empty: texts.len(),
            metric_hits,
            fixed_hits,
            unit_hits: count_unit_cells(&texts),
        }
    }

    fn looks_like_header(&self, config: &IngestConfig) -> bool {
        self.non_empty >= config.min_header_cells
            && (self.metric_hits > 0 || self.fixed_hits >= 2)
            && self.unit_hits < config.unit_row_min_hits
    }
}

fn count_unit_cells(texts: &[String]) -> usize {
    texts
        .iter()
        .filter(|text| {
            let lowered = text.to_lowercase();
            text.as_str() == journey_core::layout::UNIT_ROW_DATE_LABEL
                || threshold_cell_pattern().is_match(text)
                || UNIT_TOKENS.contains(&lowered.as_str())
        })
        .count()
}

/// Scans the top of the sheet for the header row. The row beneath it is taken as
/// the units row when it holds no date-like value and either carries unit markers
/// or no numbers at all.
pub fn locate_structure(
    table: &RawTable,
    dictionary: &MetricDictionary,
    config: &IngestConfig,
) -> Result<TableStructure, IngestError> {
    let window = config.header_search_rows.min(table.len());

    let header_row = (0..window)
        .find(|index| {
            let signals = RowSignals::read(table.row(*index), dictionary);
            debug!(row = index, ?signals, "header candidate");
            signals.looks_like_header(config)
        })
        .ok_or(IngestError::HeaderNotFound {
            window: config.header_search_rows,
        })?;

    let below = header_row + 1;
    let unit_row = (below < table.len() && is_unit_row(table.row(below), dictionary)).then_some(below);
    let data_start = unit_row.map_or(below, |row| row + 1);

    info!(header_row, ?unit_row, data_start, "table structure located");
    Ok(TableStructure {
        header_row,
        unit_row,
        data_start,
    })
}

/// A row holding a date-like value is data, whatever comparator cells it carries.
/// Undated rows with measurements stay data too so they surface as skipped rows.
fn is_unit_row(row: &[Cell], dictionary: &MetricDictionary) -> bool {
    if row.iter().any(is_date_like) {
        return false;
    }
    RowSignals::read(row, dictionary).unit_hits > 0
        || !row.iter().any(|cell| matches!(cell, Cell::Number(_)))
}

pub(crate) fn is_date_like(cell: &Cell) -> bool {
    match cell {
        Cell::Number(value) => (PLAUSIBLE_SERIAL_RANGE.0..PLAUSIBLE_SERIAL_RANGE.1).contains(value),
        Cell::Text(text) => dates::parse_calendar_date(text).is_some(),
        Cell::Empty => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<Cell> {
        values
            .iter()
            .map(|value| {
                if value.is_empty() {
                    Cell::Empty
                } else {
                    Cell::text(*value)
                }
            })
            .collect()
    }

    #[test]
    fn header_after_title_rows() {
        let table = RawTable::new(vec![
            texts(&["肿瘤病程周期表"]),
            texts(&["分类", "节拍", "", "", "", "事件", "", "体能负荷"]),
            texts(&["子类", "项目", "周期", "", "方案", "处置", "方案", "Weight", "CEA"]),
            texts(&["日期\\单位", "", "当下周期", "前序周期", "", "", "", "KG", "<5"]),
            vec![Cell::Number(45449.0), Cell::text("化疗")],
        ]);
        let structure =
            locate_structure(&table, &MetricDictionary::standard(), &IngestConfig::default())
                .unwrap();
        assert_eq!(
            structure,
            TableStructure {
                header_row: 2,
                unit_row: Some(3),
                data_start: 4
            }
        );
    }

    #[test]
    fn data_directly_below_header() {
        let table = RawTable::new(vec![
            texts(&["日期", "体重", "方案"]),
            vec![Cell::text("2024-06-06"), Cell::Number(52.0), Cell::text("TC")],
        ]);
        let structure =
            locate_structure(&table, &MetricDictionary::standard(), &IngestConfig::default())
                .unwrap();
        assert_eq!(structure.header_row, 0);
        assert_eq!(structure.unit_row, None);
        assert_eq!(structure.data_start, 1);
    }

    #[test]
    fn comparator_in_first_data_row_is_not_a_unit_row() {
        let table = RawTable::new(vec![
            texts(&["日期", "项目", "体重", "CEA"]),
            vec![Cell::Number(45449.0), Cell::text("化疗"), Cell::Number(61.5), Cell::text("<5")],
            vec![Cell::Number(45470.0), Cell::text("化疗"), Cell::Number(61.0), Cell::Number(6.0)],
        ]);
        let structure =
            locate_structure(&table, &MetricDictionary::standard(), &IngestConfig::default())
                .unwrap();
        assert_eq!(structure.unit_row, None);
        assert_eq!(structure.data_start, 1);
    }

    #[test]
    fn blank_row_below_header_is_a_unit_row() {
        let table = RawTable::new(vec![
            texts(&["日期", "体重"]),
            vec![],
            vec![Cell::text("2024-06-06"), Cell::Number(52.0)],
        ]);
        let structure =
            locate_structure(&table, &MetricDictionary::standard(), &IngestConfig::default())
                .unwrap();
        assert_eq!(structure.unit_row, Some(1));
        assert_eq!(structure.data_start, 2);
    }

    #[test]
    fn missing_header_names_the_window() {
        let table = RawTable::new(vec![texts(&["a", "b", "c"]); 30]);
        let err = locate_structure(&table, &MetricDictionary::standard(), &IngestConfig::default())
            .unwrap_err();
        assert_eq!(err, IngestError::HeaderNotFound { window: 20 });
    }

    #[test]
    fn unit_rows_are_not_headers() {
        let signals = RowSignals::read(
            &texts(&["日期\\单位", "", "当下周期", "前序周期", "KG", "<5"]),
            &MetricDictionary::standard(),
        );
        assert!(signals.unit_hits >= 2);
        assert!(!signals.looks_like_header(&IngestConfig::default()));
    }
}
