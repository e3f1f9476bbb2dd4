//! Canonical Validator: structural sanity checks on a canonical table.

use journey_core::dates::cell_date;
use journey_core::layout::{self, FixedColumn, DATA_START_ROW};
use journey_core::{CanonicalTable, Cell};
use serde::{Deserialize, Serialize};

const DATE_HEADERS: [&str; 2] = ["子类", "Date"];
const PHASE_HEADERS: [&str; 2] = ["项目", "Phase"];
const TITLE_MARKER: &str = "病程";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub dated_rows: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_canonical(table: &CanonicalTable) -> ValidationReport {
    let mut report = ValidationReport::default();

    if table.rows.len() <= DATA_START_ROW {
        report.errors.push(format!(
            "expected title, category, header and unit rows followed by data, found {} rows",
            table.rows.len()
        ));
    }

    let header = |column: FixedColumn| -> String {
        table
            .header_row()
            .get(column.index())
            .and_then(Cell::as_text)
            .map(|text| text.into_owned())
            .unwrap_or_default()
    };

    let date_header = header(FixedColumn::Date);
    if !DATE_HEADERS.contains(&date_header.as_str()) {
        report
            .errors
            .push(format!("first header should be 子类 or Date, found {date_header:?}"));
    }
    let phase_header = header(FixedColumn::Phase);
    if !PHASE_HEADERS.contains(&phase_header.as_str()) {
        report
            .errors
            .push(format!("second header should be 项目 or Phase, found {phase_header:?}"));
    }

    if !table
        .title()
        .is_some_and(|title| title.contains(TITLE_MARKER))
    {
        report
            .warnings
            .push(format!("title should name the {} table", layout::TITLE_SUFFIX));
    }

    let unit_label = table
        .unit_row()
        .first()
        .and_then(Cell::as_text)
        .map(|text| text.into_owned())
        .unwrap_or_default();
    if unit_label != layout::UNIT_ROW_DATE_LABEL {
        report.warnings.push(format!(
            "units row should start with {:?}, found {unit_label:?}",
            layout::UNIT_ROW_DATE_LABEL
        ));
    }

    report.dated_rows = table
        .data_rows()
        .iter()
        .filter(|row| row.first().and_then(cell_date).is_some())
        .count();
    if report.dated_rows == 0 && table.rows.len() > DATA_START_ROW {
        report.errors.push("no data row has a parseable date".to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_table_is_invalid() {
        let table = CanonicalTable::new(vec![vec![Cell::text("肿瘤病程周期表")]]);
        let report = validate_canonical(&table);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("found 1 rows"));
    }
}
