//! Ô và bảng dữ liệu, bảng thô lẫn bảng chuẩn.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::layout;

/// Giá trị của một ô bảng tính.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Ô rỗng hoặc chỉ chứa khoảng trắng.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Number(_) => false,
            Self::Text(text) => text.trim().is_empty(),
        }
    }

    /// Nội dung dạng chuỗi đã cắt khoảng trắng; `None` với ô rỗng.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Empty => None,
            Self::Number(value) => Some(Cow::Owned(value.to_string())),
            Self::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then_some(Cow::Borrowed(trimmed))
            }
        }
    }

    /// Giá trị số sau khi bỏ dấu phân cách nghìn và ký hiệu so sánh.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Number(value) => value.is_finite().then_some(*value),
            Self::Text(text) => parse_numeric_text(text),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Đọc số từ chuỗi như "1,234", "<5" hay "> 3.3".
pub fn parse_numeric_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|ch| !matches!(ch, ',' | '<' | '>' | '≤' | '≥'))
        .collect();
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Bảng thô dạng lưới, các hàng có thể dài ngắn khác nhau.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RawTable {
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &[Cell] {
        self.rows.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ô tại (hàng, cột); ngoài phạm vi trả về ô rỗng.
    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Bảng theo bố cục chuẩn: tiêu đề, nhóm, tiêu đề cột, đơn vị, rồi các hàng dữ liệu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct CanonicalTable {
    pub rows: Vec<Vec<Cell>>,
}

impl CanonicalTable {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn title(&self) -> Option<Cow<'_, str>> {
        self.row(layout::TITLE_ROW).first().and_then(Cell::as_text)
    }

    pub fn header_row(&self) -> &[Cell] {
        self.row(layout::HEADER_ROW)
    }

    pub fn unit_row(&self) -> &[Cell] {
        self.row(layout::UNIT_ROW)
    }

    pub fn data_rows(&self) -> &[Vec<Cell>] {
        self.rows.get(layout::DATA_START_ROW..).unwrap_or(&[])
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Các cột chỉ số (chỉ số cột, tên chuẩn) theo thứ tự xuất hiện.
    pub fn metric_columns(&self) -> Vec<(usize, String)> {
        self.header_row()
            .iter()
            .enumerate()
            .skip(layout::FIRST_METRIC_COLUMN)
            .filter_map(|(index, cell)| cell.as_text().map(|name| (index, name.into_owned())))
            .collect()
    }

    /// Thay tiêu đề bảng bằng tiêu đề có tên bệnh nhân.
    pub fn set_patient_title(&mut self, patient_name: &str) {
        let title = layout::title(Some(patient_name));
        match self.rows.get_mut(layout::TITLE_ROW) {
            Some(row) if row.is_empty() => row.push(Cell::Text(title)),
            Some(row) => row[0] = Cell::Text(title),
            None => self.rows.push(vec![Cell::Text(title)]),
        }
    }

    fn row(&self, index: usize) -> &[Cell] {
        self.rows.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_text_strips_separators_and_comparators() {
        assert_eq!(parse_numeric_text("1,234.5"), Some(1234.5));
        assert_eq!(parse_numeric_text("<5"), Some(5.0));
        assert_eq!(parse_numeric_text(" > 3.3 "), Some(3.3));
        assert_eq!(parse_numeric_text("阴性"), None);
        assert_eq!(parse_numeric_text(""), None);
    }

    #[test]
    fn blank_text_counts_as_empty() {
        assert!(Cell::text("   ").is_blank());
        assert!(Cell::Empty.as_text().is_none());
        assert_eq!(Cell::Number(45449.0).as_text().as_deref(), Some("45449"));
    }

    #[test]
    fn cells_deserialize_from_json_scalars() {
        let cells: Vec<Cell> = serde_json::from_str(r#"[null, 12, 3.5, "CEA"]"#).unwrap();
        assert_eq!(
            cells,
            vec![
                Cell::Empty,
                Cell::Number(12.0),
                Cell::Number(3.5),
                Cell::text("CEA")
            ]
        );
    }

    #[test]
    fn out_of_range_cells_are_empty() {
        let table = RawTable::new(vec![vec![Cell::Number(1.0)]]);
        assert_eq!(table.cell(0, 0), &Cell::Number(1.0));
        assert_eq!(table.cell(5, 5), &Cell::Empty);
        assert_eq!(table.width(), 1);
    }
}
