//! Canonical Transformer: rewrites a mapped table into the canonical layout.

use journey_core::dates::cell_serial;
use journey_core::layout::{
    self, FixedColumn, FIRST_METRIC_COLUMN, FIXED_CATEGORY_LABELS, FIXED_HEADERS, FIXED_UNITS,
};
use journey_core::{CanonicalTable, Cell, MetricCategory, MetricDictionary, RawTable, Warning};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::locate::TableStructure;
use crate::mapping::ColumnMapping;
use crate::IngestError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformStats {
    pub source_rows: usize,
    pub data_rows: usize,
    pub skipped_rows: usize,
    pub metrics_found: usize,
    pub custom_metrics: usize,
    pub events_found: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub table: CanonicalTable,
    pub stats: TransformStats,
    pub warnings: Vec<Warning>,
}

/// One metric column of the canonical layout.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSlot {
    pub name: String,
    pub category: MetricCategory,
    pub unit_label: String,
    canonical_column: Option<usize>,
    sources: Vec<usize>,
}

impl MetricSlot {
    pub fn new(name: &str, dictionary: &MetricDictionary) -> Self {
        let definition = dictionary.lookup(name);
        Self {
            name: definition.map_or_else(|| name.to_string(), |d| d.canonical_name.clone()),
            category: definition.map_or(MetricCategory::Custom, |d| d.category),
            unit_label: definition.map(|d| d.unit_label()).unwrap_or_default(),
            canonical_column: definition.and_then(|d| d.canonical_column),
            sources: Vec::new(),
        }
    }

    fn sort_key(&self) -> (MetricCategory, usize) {
        (self.category, self.canonical_column.unwrap_or(usize::MAX))
    }
}

/// Orders metric columns by category, then canonical column; ties keep source order.
pub fn order_slots(slots: &mut [MetricSlot]) {
    slots.sort_by_key(MetricSlot::sort_key);
}

fn text_cell(value: &str) -> Cell {
    if value.is_empty() {
        Cell::Empty
    } else {
        Cell::text(value)
    }
}

/// Title, category, header and unit rows for the given metric columns.
pub fn canonical_header_rows(slots: &[MetricSlot], patient_name: Option<&str>) -> Vec<Vec<Cell>> {
    let mut categories: Vec<Cell> = FIXED_CATEGORY_LABELS.iter().map(|label| text_cell(label)).collect();
    let mut headers: Vec<Cell> = FIXED_HEADERS.iter().map(|header| text_cell(header)).collect();
    let mut units: Vec<Cell> = FIXED_UNITS.iter().map(|unit| text_cell(unit)).collect();

    let mut previous: Option<MetricCategory> = None;
    for slot in slots {
        if previous != Some(slot.category) {
            categories.push(Cell::text(slot.category.label()));
            previous = Some(slot.category);
        } else {
            categories.push(Cell::Empty);
        }
        headers.push(Cell::text(slot.name.as_str()));
        units.push(text_cell(&slot.unit_label));
    }

    vec![
        vec![Cell::Text(layout::title(patient_name))],
        categories,
        headers,
        units,
    ]
}

/// Groups mapped metrics into canonical columns; later duplicates of a name feed the
/// same column and are reported.
fn collect_slots(mapping: &ColumnMapping, dictionary: &MetricDictionary) -> (Vec<MetricSlot>, Vec<Warning>) {
    let mut slots: Vec<MetricSlot> = Vec::new();
    let mut warnings = Vec::new();

    for metric in &mapping.metrics {
        let slot_name = dictionary.resolve(&metric.canonical_name).to_string();
        match slots.iter_mut().find(|slot| slot.name == slot_name) {
            Some(slot) => {
                slot.sources.push(metric.source_index);
                warnings.push(Warning::DuplicateMetric {
                    name: slot_name,
                    index: metric.source_index,
                });
            }
            None => {
                let mut slot = MetricSlot::new(&metric.canonical_name, dictionary);
                slot.sources.push(metric.source_index);
                slots.push(slot);
            }
        }
    }

    order_slots(&mut slots);
    (slots, warnings)
}

/// Rewrites `table` into the canonical layout. Rows without a parseable date are
/// skipped with a warning; no dated rows at all is an error.
pub fn transform(
    table: &RawTable,
    structure: &TableStructure,
    mapping: &ColumnMapping,
    dictionary: &MetricDictionary,
    patient_name: Option<&str>,
) -> Result<TransformOutput, IngestError> {
    let (slots, mut warnings) = collect_slots(mapping, dictionary);
    let mut rows = canonical_header_rows(&slots, patient_name);
    let mut stats = TransformStats {
        metrics_found: slots.len(),
        custom_metrics: slots
            .iter()
            .filter(|slot| slot.category == MetricCategory::Custom)
            .count(),
        ..TransformStats::default()
    };

    let fixed_sources: Vec<Option<usize>> = FixedColumn::ALL
        .iter()
        .skip(1)
        .map(|column| mapping.fixed.get(*column))
        .collect();

    for row_index in structure.data_start..table.len() {
        let source = table.row(row_index);
        if source.iter().all(Cell::is_blank) {
            continue;
        }
        stats.source_rows += 1;

        let date_cell = table.cell(row_index, mapping.date_column);
        let Some(serial) = cell_serial(date_cell) else {
            debug!(row = row_index, cell = %date_cell, "row without a parseable date");
            stats.skipped_rows += 1;
            warnings.push(Warning::RowSkipped {
                row: row_index,
                reason: format!("date cell {:?} is not a date", date_cell.to_string()),
            });
            continue;
        };

        let mut out = Vec::with_capacity(FIRST_METRIC_COLUMN + slots.len());
        out.push(Cell::Number(serial));
        for column in &fixed_sources {
            out.push(column.map_or(Cell::Empty, |index| table.cell(row_index, index).clone()));
        }
        for slot in &slots {
            let value = slot
                .sources
                .iter()
                .map(|index| table.cell(row_index, *index))
                .find(|cell| !cell.is_blank())
                .cloned()
                .unwrap_or_default();
            out.push(value);
        }

        if !out[FixedColumn::Event.index()].is_blank() {
            stats.events_found += 1;
        }
        stats.data_rows += 1;
        rows.push(out);
    }

    if stats.data_rows == 0 {
        return Err(IngestError::NoDataRows);
    }

    info!(
        data_rows = stats.data_rows,
        skipped = stats.skipped_rows,
        metrics = stats.metrics_found,
        "table transformed to canonical layout"
    );

    Ok(TransformOutput {
        table: CanonicalTable::new(rows),
        stats,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_label_marks_first_column_of_each_run() {
        let dictionary = MetricDictionary::standard();
        let mut slots = vec![
            MetricSlot::new("HPV", &dictionary),
            MetricSlot::new("CEA", &dictionary),
            MetricSlot::new("体重", &dictionary),
            MetricSlot::new("MRD", &dictionary),
        ];
        order_slots(&mut slots);
        let names: Vec<&str> = slots.iter().map(|slot| slot.name.as_str()).collect();
        assert_eq!(names, vec!["Weight", "MRD", "CEA", "HPV"]);

        let rows = canonical_header_rows(&slots, Some("张三"));
        assert_eq!(rows[0], vec![Cell::text("张三 - 肿瘤病程周期表")]);
        assert_eq!(
            &rows[1][7..],
            &[
                Cell::text("体能负荷"),
                Cell::text("分子负荷"),
                Cell::Empty,
                Cell::text("其他指标")
            ]
        );
        assert_eq!(&rows[3][7..], &[Cell::text("KG"), Cell::text("mtm/ml"), Cell::text("<5"), Cell::Empty]);
        assert_eq!(rows[2][0], Cell::text("子类"));
        assert_eq!(rows[2][3], Cell::Empty);
    }
}
