//! Bố cục bảng chuẩn "肿瘤病程周期表".

use serde::{Deserialize, Serialize};

pub const TITLE_ROW: usize = 0;
pub const CATEGORY_ROW: usize = 1;
pub const HEADER_ROW: usize = 2;
pub const UNIT_ROW: usize = 3;
pub const DATA_START_ROW: usize = 4;

pub const FIRST_METRIC_COLUMN: usize = 7;
pub const TITLE_SUFFIX: &str = "肿瘤病程周期表";

pub const FIXED_HEADERS: [&str; FIRST_METRIC_COLUMN] = ["子类", "项目", "周期", "", "方案", "处置", "方案"];
pub const FIXED_UNITS: [&str; FIRST_METRIC_COLUMN] = ["日期\\单位", "", "当下周期", "前序周期", "", "", ""];
pub const FIXED_CATEGORY_LABELS: [&str; FIRST_METRIC_COLUMN] = ["分类", "节拍", "", "", "", "事件", ""];

pub const UNIT_ROW_DATE_LABEL: &str = FIXED_UNITS[0];
pub const CURRENT_CYCLE_LABEL: &str = FIXED_UNITS[2];
pub const PREVIOUS_CYCLE_LABEL: &str = FIXED_UNITS[3];

/// Cột cố định ở đầu bảng chuẩn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FixedColumn {
    Date,
    Phase,
    Cycle,
    PrevCycle,
    Scheme,
    Event,
    SchemeDetail,
}

impl FixedColumn {
    pub const ALL: [FixedColumn; FIRST_METRIC_COLUMN] = [
        Self::Date,
        Self::Phase,
        Self::Cycle,
        Self::PrevCycle,
        Self::Scheme,
        Self::Event,
        Self::SchemeDetail,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Date => 0,
            Self::Phase => 1,
            Self::Cycle => 2,
            Self::PrevCycle => 3,
            Self::Scheme => 4,
            Self::Event => 5,
            Self::SchemeDetail => 6,
        }
    }

    pub fn header(self) -> &'static str {
        FIXED_HEADERS[self.index()]
    }

    pub fn unit(self) -> &'static str {
        FIXED_UNITS[self.index()]
    }
}

/// Tiêu đề bảng, có tên bệnh nhân nếu biết.
pub fn title(patient_name: Option<&str>) -> String {
    match patient_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("{name} - {TITLE_SUFFIX}"),
        None => TITLE_SUFFIX.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_columns_follow_header_order() {
        for column in FixedColumn::ALL {
            assert_eq!(FIXED_HEADERS[column.index()], column.header());
        }
        assert_eq!(FixedColumn::Cycle.unit(), "当下周期");
        assert_eq!(FixedColumn::PrevCycle.header(), "");
    }

    #[test]
    fn title_includes_patient_when_known() {
        assert_eq!(title(None), "肿瘤病程周期表");
        assert_eq!(title(Some("  ")), "肿瘤病程周期表");
        assert_eq!(title(Some("张三")), "张三 - 肿瘤病程周期表");
    }
}
