//! Reading raw tables from JSON and CSV exports, writing canonical tables back out.

use std::path::Path;

use journey_core::{CanonicalTable, Cell, MetricDefinition, MetricDictionary, RawTable};
use serde_json::{Map, Value};

use crate::IngestError;

const LEGACY_DATASET_KEY: &str = "FormalDataset";
const LEGACY_COLUMN_PREFIX: &str = "Unnamed: ";
const LEGACY_MAX_COLUMNS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Ok(Self::Json),
            "csv" | "txt" => Ok(Self::Csv),
            other => Err(IngestError::UnsupportedFormat(format!(
                "{} (extension {other:?})",
                path.display()
            ))),
        }
    }
}

pub fn read_table_str(input: &str, format: InputFormat) -> Result<RawTable, IngestError> {
    match format {
        InputFormat::Json => read_json_str(input),
        InputFormat::Csv => read_csv_str(input),
    }
}

pub fn read_json_str(input: &str) -> Result<RawTable, IngestError> {
    let value: Value =
        serde_json::from_str(input).map_err(|err| IngestError::Read(err.to_string()))?;
    read_json_value(&value)
}

/// Accepts an array of row arrays, an array of row objects, or the legacy
/// `{"FormalDataset": [{"Unnamed: 0": ..}, ..]}` export.
pub fn read_json_value(value: &Value) -> Result<RawTable, IngestError> {
    if let Some(dataset) = value.get(LEGACY_DATASET_KEY).and_then(Value::as_array) {
        return read_legacy_dataset(dataset);
    }

    let rows = value
        .as_array()
        .ok_or_else(|| IngestError::Read("expected a JSON array of rows".to_string()))?;

    if rows.iter().any(Value::is_object) {
        return read_object_rows(rows);
    }

    let rows = rows
        .iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Array(cells) => cells.iter().map(cell_from_json).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(IngestError::Read(format!(
                "row {index} is not an array: {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RawTable::new(rows))
}

/// Object rows become `[[], [], headers, [], data...]` so the header lands where
/// a spreadsheet export would put it, with an empty units row beneath.
fn read_object_rows(rows: &[Value]) -> Result<RawTable, IngestError> {
    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        let Some(object) = row.as_object() else {
            return Err(IngestError::Read(
                "mixed object and array rows".to_string(),
            ));
        };
        for key in object.keys() {
            if !headers.iter().any(|known| known == key) {
                headers.push(key.clone());
            }
        }
    }

    let mut table = vec![
        Vec::new(),
        Vec::new(),
        headers.iter().map(|header| Cell::text(header.as_str())).collect(),
        Vec::new(),
    ];
    for row in rows.iter().filter_map(Value::as_object) {
        table.push(object_cells(row, &headers)?);
    }
    Ok(RawTable::new(table))
}

fn object_cells(row: &Map<String, Value>, headers: &[String]) -> Result<Vec<Cell>, IngestError> {
    headers
        .iter()
        .map(|header| row.get(header).map_or(Ok(Cell::Empty), cell_from_json))
        .collect()
}

fn read_legacy_dataset(rows: &[Value]) -> Result<RawTable, IngestError> {
    let mut table = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(object) = row.as_object() else {
            return Err(IngestError::Read(format!(
                "{LEGACY_DATASET_KEY} rows must be objects"
            )));
        };

        let mut cells: Vec<(usize, Cell)> = Vec::new();
        for (key, value) in object {
            let Some(index) = key
                .strip_prefix(LEGACY_COLUMN_PREFIX)
                .and_then(|suffix| suffix.trim().parse::<usize>().ok())
            else {
                continue;
            };
            if index >= LEGACY_MAX_COLUMNS {
                return Err(IngestError::Read(format!(
                    "column `{key}` is beyond the {LEGACY_MAX_COLUMNS}-column limit"
                )));
            }
            cells.push((index, cell_from_json(value)?));
        }

        let width = cells.iter().map(|(index, _)| index + 1).max().unwrap_or(0);
        let mut dense = vec![Cell::Empty; width];
        for (index, cell) in cells {
            dense[index] = cell;
        }
        table.push(dense);
    }
    Ok(RawTable::new(table))
}

pub fn cell_from_json(value: &Value) -> Result<Cell, IngestError> {
    match value {
        Value::Null => Ok(Cell::Empty),
        Value::Number(number) => number
            .as_f64()
            .map(Cell::Number)
            .ok_or_else(|| IngestError::Read(format!("number out of range: {number}"))),
        Value::String(text) if text.trim().is_empty() => Ok(Cell::Empty),
        Value::String(text) => Ok(Cell::Text(text.clone())),
        Value::Bool(flag) => Ok(Cell::Text(flag.to_string())),
        other => Err(IngestError::Read(format!("nested value in cell: {other}"))),
    }
}

/// CSV export of the first sheet; rows may be ragged.
pub fn read_csv_str(input: &str) -> Result<RawTable, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input.trim_start_matches('\u{feff}').as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| IngestError::Read(err.to_string()))?;
        rows.push(record.iter().map(infer_cell).collect());
    }
    Ok(RawTable::new(rows))
}

/// Blank text is empty, text that parses as a float is a number.
pub fn infer_cell(text: &str) -> Cell {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Cell::Empty;
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Cell::Number(value),
        _ => Cell::Text(text.to_string()),
    }
}

pub fn write_csv(table: &CanonicalTable) -> Result<String, IngestError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for row in &table.rows {
        writer
            .write_record(row.iter().map(ToString::to_string))
            .map_err(|err| IngestError::Read(err.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| IngestError::Read(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| IngestError::Read(err.to_string()))
}

pub fn write_json(table: &CanonicalTable) -> Result<String, IngestError> {
    serde_json::to_string_pretty(table).map_err(|err| IngestError::Read(err.to_string()))
}

/// Replacement dictionary from a JSON array of metric definitions.
pub fn read_dictionary_str(input: &str) -> Result<MetricDictionary, IngestError> {
    let definitions: Vec<MetricDefinition> =
        serde_json::from_str(input).map_err(|err| IngestError::Read(err.to_string()))?;
    Ok(MetricDictionary::from_definitions(definitions)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_rows_get_a_synthetic_header_block() {
        let table = read_json_str(
            r#"[{"日期": 45449, "体重": "52.5", "项目": "化疗"},
                {"日期": 45470, "体重": 53, "备注": true}]"#,
        )
        .unwrap();

        assert_eq!(table.len(), 6);
        assert!(table.row(0).is_empty());
        assert_eq!(
            table.row(2),
            &[
                Cell::text("日期"),
                Cell::text("体重"),
                Cell::text("项目"),
                Cell::text("备注")
            ]
        );
        assert_eq!(table.cell(4, 0), &Cell::Number(45449.0));
        assert_eq!(table.cell(5, 2), &Cell::Empty);
        assert_eq!(table.cell(5, 3), &Cell::text("true"));
    }

    #[test]
    fn legacy_dataset_orders_columns_by_suffix() {
        let table = read_json_str(
            r#"{"FormalDataset": [{"Unnamed: 2": "C1D1", "Unnamed: 0": 45449}]}"#,
        )
        .unwrap();
        assert_eq!(
            table.row(0),
            &[Cell::Number(45449.0), Cell::Empty, Cell::text("C1D1")]
        );
    }

    #[test]
    fn legacy_column_suffix_is_bounded() {
        let err = read_json_str(r#"{"FormalDataset": [{"Unnamed: 0": 45449, "Unnamed: 900000000": 1}]}"#)
            .unwrap_err();
        assert!(matches!(err, IngestError::Read(message) if message.contains("Unnamed: 900000000")));

        let table = read_json_str(r#"{"FormalDataset": [{"Unnamed: 4095": 1}]}"#).unwrap();
        assert_eq!(table.row(0).len(), 4096);
    }

    #[test]
    fn dictionary_file_with_clashing_alias() {
        let input = r#"[
            {"canonical_name": "CEA", "display_name": "癌胚抗原", "unit": "ng/ml", "threshold": 5.0,
             "category": "MOLECULAR", "canonical_column": 12, "aliases": ["marker"]},
            {"canonical_name": "AFP", "display_name": "甲胎蛋白", "unit": "ng/ml", "threshold": 7.0,
             "category": "MOLECULAR", "canonical_column": 19, "aliases": ["Marker"]}
        ]"#;
        let err = read_dictionary_str(input).unwrap_err();
        assert!(matches!(err, IngestError::Dictionary(_)));

        let dictionary = read_dictionary_str(&input.replace("\"Marker\"", "\"甲胎\"")).unwrap();
        assert_eq!(dictionary.resolve("marker"), "CEA");
        assert_eq!(dictionary.resolve("甲胎"), "AFP");
    }

    #[test]
    fn nested_cells_are_rejected() {
        let err = read_json_str(r#"[[1, [2]]]"#).unwrap_err();
        assert!(matches!(err, IngestError::Read(_)));
    }

    #[test]
    fn csv_cells_are_typed() {
        let table = read_csv_str("子类,项目,CEA\n45449,化疗,<5\n,,\n").unwrap();
        assert_eq!(table.cell(1, 0), &Cell::Number(45449.0));
        assert_eq!(table.cell(1, 2), &Cell::text("<5"));
        assert!(table.row(2).iter().all(Cell::is_blank));
    }

    #[test]
    fn csv_writer_keeps_ragged_rows() {
        let table = CanonicalTable::new(vec![
            vec![Cell::text("肿瘤病程周期表")],
            vec![Cell::Number(45449.0), Cell::Empty, Cell::Number(3.5)],
        ]);
        assert_eq!(write_csv(&table).unwrap(), "肿瘤病程周期表\n45449,,3.5\n");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(InputFormat::from_path(Path::new("a/b.JSON")).unwrap(), InputFormat::Json);
        assert_eq!(InputFormat::from_path(Path::new("b.csv")).unwrap(), InputFormat::Csv);
        assert!(InputFormat::from_path(Path::new("b.xlsx")).is_err());
    }
}
