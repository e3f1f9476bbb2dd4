//! Từ điển alias chỉ số: mọi cách viết tiêu đề quy về một tên chuẩn.

use std::collections::{hash_map::Entry, HashMap};

use serde::{Deserialize, Serialize};

use crate::JourneyError;

/// Nhóm chỉ số, quyết định thứ tự cột và nhãn nhóm trên bảng chuẩn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricCategory {
    Performance,
    Molecular,
    Imaging,
    SideEffects,
    Custom,
}

impl MetricCategory {
    pub const ALL: [MetricCategory; 5] = [
        Self::Performance,
        Self::Molecular,
        Self::Imaging,
        Self::SideEffects,
        Self::Custom,
    ];

    /// Nhãn nhóm ghi ở hàng phân loại.
    pub fn label(self) -> &'static str {
        match self {
            Self::Performance => "体能负荷",
            Self::Molecular => "分子负荷",
            Self::Imaging => "影像负荷",
            Self::SideEffects => "副作用",
            Self::Custom => "其他指标",
        }
    }
}

/// Định nghĩa một chỉ số chuẩn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDefinition {
    pub canonical_name: String,
    pub display_name: String,
    pub unit: String,
    pub threshold: Option<f64>,
    pub category: MetricCategory,
    /// Vị trí cột trong bố cục đầy đủ; `None` với chỉ số không có cột cố định.
    pub canonical_column: Option<usize>,
    pub aliases: Vec<String>,
}

impl MetricDefinition {
    /// Nội dung ô đơn vị: ngưỡng nếu có ("<5"), ngược lại là đơn vị.
    pub fn unit_label(&self) -> String {
        match self.threshold {
            Some(limit) => format!("<{limit}"),
            None => self.unit.clone(),
        }
    }
}

struct Seed {
    canonical: &'static str,
    display: &'static str,
    unit: &'static str,
    threshold: Option<f64>,
    category: MetricCategory,
    column: Option<usize>,
    aliases: &'static [&'static str],
}

impl Seed {
    fn to_definition(&self) -> MetricDefinition {
        MetricDefinition {
            canonical_name: self.canonical.to_string(),
            display_name: self.display.to_string(),
            unit: self.unit.to_string(),
            threshold: self.threshold,
            category: self.category,
            canonical_column: self.column,
            aliases: self.aliases.iter().map(|alias| alias.to_string()).collect(),
        }
    }
}

use MetricCategory::{Imaging, Molecular, Performance, SideEffects};

const STANDARD_SEEDS: [Seed; 22] = [
    Seed { canonical: "Weight", display: "体重", unit: "KG", threshold: None, category: Performance, column: Some(7), aliases: &["体重", "weight", "wt", "BW", "body weight", "重量"] },
    Seed { canonical: "Handgrip", display: "握力", unit: "KG", threshold: None, category: Performance, column: Some(8), aliases: &["握力", "handgrip", "grip strength", "hand grip", "手握力"] },
    Seed { canonical: "ECOG", display: "ECOG评分", unit: "", threshold: None, category: Performance, column: Some(9), aliases: &["ecog", "ECOG评分", "PS评分", "performance status", "ECOG PS"] },
    Seed { canonical: "MRD", display: "MRD", unit: "mtm/ml", threshold: None, category: Molecular, column: Some(10), aliases: &["mrd", "微小残留病灶", "minimal residual disease", "Molecular Residual Disease"] },
    Seed { canonical: "aMRD", display: "aMRD", unit: "mtm/ml", threshold: None, category: Molecular, column: Some(11), aliases: &["amrd", "adjusted MRD"] },
    Seed { canonical: "CEA", display: "癌胚抗原", unit: "ng/ml", threshold: Some(5.0), category: Molecular, column: Some(12), aliases: &["cea", "癌胚抗原", "carcinoembryonic antigen"] },
    Seed { canonical: "HE4", display: "HE4", unit: "pmol/L", threshold: Some(76.2), category: Molecular, column: Some(13), aliases: &["he4", "Human Epididymis Protein 4", "人附睾蛋白4"] },
    Seed { canonical: "CA19-9", display: "糖类抗原19-9", unit: "U/ml", threshold: Some(30.0), category: Molecular, column: Some(14), aliases: &["CA199", "ca19-9", "糖类抗原19-9", "carbohydrate antigen 19-9"] },
    Seed { canonical: "CA724", display: "糖类抗原724", unit: "U/ml", threshold: Some(8.94), category: Molecular, column: Some(15), aliases: &["CA72-4", "糖类抗原724", "糖类抗原72-4"] },
    Seed { canonical: "ROMA绝经后指数", display: "ROMA绝经后指数", unit: "%", threshold: Some(29.9), category: Molecular, column: Some(16), aliases: &["ROMA postmenopausal", "ROMA post", "ROMA绝经后"] },
    Seed { canonical: "ROMA绝经前指数", display: "ROMA绝经前指数", unit: "%", threshold: Some(11.4), category: Molecular, column: Some(17), aliases: &["ROMA premenopausal", "ROMA pre", "ROMA绝经前"] },
    Seed { canonical: "CA125", display: "糖类抗原125", unit: "U/ml", threshold: Some(35.0), category: Molecular, column: Some(18), aliases: &["CA-125", "糖类抗原125", "卵巢癌抗原"] },
    Seed { canonical: "AFP", display: "甲胎蛋白", unit: "ng/ml", threshold: Some(7.0), category: Molecular, column: Some(19), aliases: &["甲胎蛋白", "alpha-fetoprotein", "Alpha Fetoprotein"] },
    Seed { canonical: "肺", display: "肺部病灶", unit: "mm", threshold: None, category: Imaging, column: Some(20), aliases: &["Lung", "肺部", "肺部病灶", "pulmonary", "lung lesion"] },
    Seed { canonical: "肝脏", display: "肝脏病灶", unit: "mm", threshold: None, category: Imaging, column: Some(21), aliases: &["Liver", "肝", "肝脏病灶", "hepatic", "liver lesion"] },
    Seed { canonical: "淋巴", display: "淋巴结", unit: "mm", threshold: None, category: Imaging, column: Some(22), aliases: &["Lymph", "淋巴结", "lymph node", "LN", "lymphatic"] },
    Seed { canonical: "盆腔", display: "盆腔病灶", unit: "mm", threshold: None, category: Imaging, column: Some(23), aliases: &["Pelvic", "盆腔病灶", "pelvis", "pelvic lesion"] },
    Seed { canonical: "白细胞", display: "白细胞计数", unit: "10^9/L", threshold: None, category: SideEffects, column: Some(24), aliases: &["WBC", "White Blood Cell", "leukocyte", "白细胞计数"] },
    Seed { canonical: "血小板", display: "血小板计数", unit: "10^9/L", threshold: None, category: SideEffects, column: Some(25), aliases: &["PLT", "Platelet", "血小板计数", "thrombocyte"] },
    Seed { canonical: "中性粒细胞", display: "中性粒细胞计数", unit: "10^9/L", threshold: None, category: SideEffects, column: Some(26), aliases: &["NEU", "Neutrophil", "ANC", "中性粒细胞计数"] },
    Seed { canonical: "谷草转氨酶", display: "谷草转氨酶", unit: "U/L", threshold: None, category: SideEffects, column: Some(27), aliases: &["AST", "GOT", "aspartate aminotransferase", "SGOT"] },
    Seed { canonical: "谷丙转氨酶", display: "谷丙转氨酶", unit: "U/L", threshold: None, category: SideEffects, column: Some(28), aliases: &["ALT", "GPT", "alanine aminotransferase", "SGPT"] },
];

/// Các chất chỉ điểm không có cột cố định trong bố cục chuẩn.
const DYNAMIC_MARKER_SEEDS: [Seed; 3] = [
    Seed { canonical: "CYFRA21-1", display: "细胞角蛋白19片段", unit: "ng/ml", threshold: Some(3.3), category: Molecular, column: None, aliases: &["CYFRA", "细胞角蛋白19片段", "角蛋白19", "Cytokeratin 19 fragment"] },
    Seed { canonical: "NSE", display: "神经元特异性烯醇化酶", unit: "ng/ml", threshold: Some(16.3), category: Molecular, column: None, aliases: &["神经元特异性烯醇化酶", "Neuron-specific enolase"] },
    Seed { canonical: "SCC", display: "鳞状细胞癌抗原", unit: "ng/ml", threshold: Some(1.5), category: Molecular, column: None, aliases: &["SCCA", "鳞状细胞癌抗原", "Squamous cell carcinoma antigen"] },
];

/// Từ điển bất biến, dựng một lần rồi truyền tường minh cho các bước xử lý.
#[derive(Debug, Clone)]
pub struct MetricDictionary {
    definitions: Vec<MetricDefinition>,
    index: HashMap<String, usize>,
}

impl MetricDictionary {
    /// Từ điển chuẩn gồm các chỉ số có cột cố định.
    pub fn standard() -> Self {
        Self::from_seeds(STANDARD_SEEDS.iter())
    }

    /// Từ điển chuẩn cộng thêm CYFRA21-1, NSE, SCC.
    pub fn with_dynamic_markers() -> Self {
        Self::from_seeds(STANDARD_SEEDS.iter().chain(DYNAMIC_MARKER_SEEDS.iter()))
    }

    fn from_seeds<'a>(seeds: impl Iterator<Item = &'a Seed>) -> Self {
        let definitions: Vec<MetricDefinition> = seeds.map(Seed::to_definition).collect();
        let mut index = HashMap::new();
        for (position, definition) in definitions.iter().enumerate() {
            for key in lookup_keys(definition) {
                index.entry(key).or_insert(position);
            }
        }
        Self { definitions, index }
    }

    /// Dựng từ danh sách tuỳ chỉnh; alias trùng giữa hai chỉ số là lỗi.
    pub fn from_definitions(definitions: Vec<MetricDefinition>) -> Result<Self, JourneyError> {
        if definitions.is_empty() {
            return Err(JourneyError::EmptyDictionary);
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (position, definition) in definitions.iter().enumerate() {
            for key in lookup_keys(definition) {
                match index.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(position);
                    }
                    Entry::Occupied(slot) if *slot.get() != position => {
                        return Err(JourneyError::AliasConflict {
                            alias: slot.key().clone(),
                            first: definitions[*slot.get()].canonical_name.clone(),
                            second: definition.canonical_name.clone(),
                        });
                    }
                    Entry::Occupied(_) => {}
                }
            }
        }

        Ok(Self { definitions, index })
    }

    /// Tên chuẩn của một tiêu đề; tiêu đề lạ được trả lại nguyên văn.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.lookup(name)
            .map(|definition| definition.canonical_name.as_str())
            .unwrap_or(name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<&MetricDefinition> {
        let key = normalize_key(name);
        if key.is_empty() {
            return None;
        }
        self.index
            .get(&key)
            .and_then(|position| self.definitions.get(*position))
    }

    /// Định nghĩa theo đúng cách viết tên chuẩn (không qua alias).
    pub fn canonical(&self, name: &str) -> Option<&MetricDefinition> {
        let name = name.trim();
        self.definitions
            .iter()
            .find(|definition| definition.canonical_name == name)
    }

    pub fn by_category(&self, category: MetricCategory) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions
            .iter()
            .filter(move |definition| definition.category == category)
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    /// Tên chuẩn theo thứ tự cột của bố cục đầy đủ.
    pub fn canonical_order(&self) -> Vec<&str> {
        let mut ordered: Vec<&MetricDefinition> = self
            .definitions
            .iter()
            .filter(|definition| definition.canonical_column.is_some())
            .collect();
        ordered.sort_by_key(|definition| definition.canonical_column);
        ordered
            .into_iter()
            .map(|definition| definition.canonical_name.as_str())
            .collect()
    }
}

impl Default for MetricDictionary {
    fn default() -> Self {
        Self::standard()
    }
}

fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn lookup_keys(definition: &MetricDefinition) -> impl Iterator<Item = String> + '_ {
    std::iter::once(definition.canonical_name.as_str())
        .chain(definition.aliases.iter().map(String::as_str))
        .map(normalize_key)
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_case_insensitively() {
        let dictionary = MetricDictionary::standard();
        assert_eq!(dictionary.resolve("体重"), "Weight");
        assert_eq!(dictionary.resolve("  body WEIGHT "), "Weight");
        assert_eq!(dictionary.resolve("CA-125"), "CA125");
        assert_eq!(dictionary.resolve("ca199"), "CA19-9");
    }

    #[test]
    fn canonical_names_resolve_to_themselves() {
        let dictionary = MetricDictionary::with_dynamic_markers();
        for definition in dictionary.definitions() {
            assert_eq!(dictionary.resolve(&definition.canonical_name), definition.canonical_name);
        }
    }

    #[test]
    fn unknown_names_pass_through() {
        let dictionary = MetricDictionary::standard();
        assert_eq!(dictionary.resolve("细胞角蛋白19片段"), "细胞角蛋白19片段");
        assert!(!dictionary.is_known("细胞角蛋白19片段"));
        assert!(!dictionary.is_known(""));
    }

    #[test]
    fn dynamic_markers_are_opt_in() {
        let dictionary = MetricDictionary::with_dynamic_markers();
        assert_eq!(dictionary.resolve("细胞角蛋白19片段"), "CYFRA21-1");
        assert!(dictionary.canonical_order().iter().all(|name| *name != "CYFRA21-1"));
    }

    #[test]
    fn canonical_order_follows_columns() {
        let dictionary = MetricDictionary::standard();
        let order = dictionary.canonical_order();
        assert_eq!(order.first(), Some(&"Weight"));
        assert_eq!(order.get(5), Some(&"CEA"));
        assert_eq!(order.last(), Some(&"谷丙转氨酶"));
        assert_eq!(order.len(), 22);
    }

    #[test]
    fn unit_label_prefers_threshold() {
        let dictionary = MetricDictionary::standard();
        assert_eq!(dictionary.lookup("CEA").unwrap().unit_label(), "<5");
        assert_eq!(dictionary.lookup("HE4").unwrap().unit_label(), "<76.2");
        assert_eq!(dictionary.lookup("Weight").unwrap().unit_label(), "KG");
    }

    #[test]
    fn conflicting_aliases_are_rejected() {
        let mut definitions = MetricDictionary::standard().definitions().to_vec();
        definitions[1].aliases.push("wt".to_string());
        let err = MetricDictionary::from_definitions(definitions).unwrap_err();
        assert!(matches!(err, JourneyError::AliasConflict { .. }));
    }
}
