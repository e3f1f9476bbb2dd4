//! Blank canonical tables for manual data entry, and the metric listing.

use journey_core::{CanonicalTable, Cell, MetricCategory, MetricDictionary};
use serde::{Deserialize, Serialize};

use crate::transform::{canonical_header_rows, order_slots, MetricSlot};

const MINIMAL_METRICS: [&str; 6] = ["Weight", "ECOG", "MRD", "CEA", "CA125", "AFP"];

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateMetrics {
    All,
    Minimal,
    Category(MetricCategory),
    Named(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOptions {
    pub patient_name: Option<String>,
    pub metrics: TemplateMetrics,
    pub empty_rows: usize,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            patient_name: None,
            metrics: TemplateMetrics::All,
            empty_rows: 20,
        }
    }
}

pub fn canonical_template(dictionary: &MetricDictionary, options: &TemplateOptions) -> CanonicalTable {
    let names: Vec<String> = match &options.metrics {
        TemplateMetrics::All => dictionary
            .canonical_order()
            .into_iter()
            .map(str::to_string)
            .collect(),
        TemplateMetrics::Minimal => MINIMAL_METRICS.iter().map(|name| name.to_string()).collect(),
        TemplateMetrics::Category(category) => dictionary
            .by_category(*category)
            .map(|definition| definition.canonical_name.clone())
            .collect(),
        TemplateMetrics::Named(names) => names.clone(),
    };

    let mut slots: Vec<MetricSlot> = Vec::new();
    for name in names.iter().map(|name| name.trim()).filter(|name| !name.is_empty()) {
        let slot = MetricSlot::new(name, dictionary);
        if !slots.iter().any(|existing| existing.name == slot.name) {
            slots.push(slot);
        }
    }
    order_slots(&mut slots);

    let width = journey_core::layout::FIRST_METRIC_COLUMN + slots.len();
    let mut rows = canonical_header_rows(&slots, options.patient_name.as_deref());
    rows.extend(std::iter::repeat(vec![Cell::Empty; width]).take(options.empty_rows));
    CanonicalTable::new(rows)
}

/// One line of the metric listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricListing {
    pub canonical_name: String,
    pub display_name: String,
    pub category: MetricCategory,
    pub category_label: String,
    pub unit: String,
    pub aliases: Vec<String>,
}

pub fn list_metrics(dictionary: &MetricDictionary) -> Vec<MetricListing> {
    dictionary
        .definitions()
        .iter()
        .map(|definition| MetricListing {
            canonical_name: definition.canonical_name.clone(),
            display_name: definition.display_name.clone(),
            category: definition.category,
            category_label: definition.category.label().to_string(),
            unit: definition.unit_label(),
            aliases: definition.aliases.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_template_has_six_metrics_in_canonical_order() {
        let table = canonical_template(
            &MetricDictionary::standard(),
            &TemplateOptions {
                patient_name: Some("李四".to_string()),
                metrics: TemplateMetrics::Minimal,
                empty_rows: 2,
            },
        );
        let names: Vec<String> = table.metric_columns().into_iter().map(|(_, name)| name).collect();
        assert_eq!(names, vec!["Weight", "ECOG", "MRD", "CEA", "CA125", "AFP"]);
        assert_eq!(table.rows.len(), 6);
        assert_eq!(table.title().as_deref(), Some("李四 - 肿瘤病程周期表"));
        assert!(table.data_rows().iter().all(|row| row.iter().all(Cell::is_blank)));
    }

    #[test]
    fn named_template_keeps_unknown_metrics_last() {
        let table = canonical_template(
            &MetricDictionary::standard(),
            &TemplateOptions {
                metrics: TemplateMetrics::Named(vec!["HPV".into(), "ca-125".into(), "体重".into()]),
                ..TemplateOptions::default()
            },
        );
        let names: Vec<String> = table.metric_columns().into_iter().map(|(_, name)| name).collect();
        assert_eq!(names, vec!["Weight", "CA125", "HPV"]);
    }
}
