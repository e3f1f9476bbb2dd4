//! Observation records for the clinical store, one per non-empty metric cell.

use journey_core::dates::{cell_date, start_of_day};
use journey_core::{
    CanonicalTable, Cell, MetricCategory, MetricDictionary, Observation, ObservationCategory,
};

pub fn extract_observations(
    table: &CanonicalTable,
    subject_id: &str,
    dictionary: &MetricDictionary,
) -> Vec<Observation> {
    let columns = table.metric_columns();
    let mut observations = Vec::new();

    for row in table.data_rows() {
        let Some(date) = row.first().and_then(cell_date) else {
            continue;
        };
        let timestamp = start_of_day(date);

        for (index, name) in &columns {
            let Some(cell) = row.get(*index).filter(|cell| !cell.is_blank()) else {
                continue;
            };
            let definition = dictionary.lookup(name);
            let category = definition.map_or(MetricCategory::Custom, |d| d.category);

            observations.push(Observation {
                subject_id: subject_id.to_string(),
                timestamp,
                category: ObservationCategory::for_metric(category),
                canonical_code: name.clone(),
                display_label: definition.map_or_else(|| name.clone(), |d| d.display_name.clone()),
                numeric_value: cell.as_number(),
                text_value: match cell {
                    Cell::Text(text) => Some(text.trim().to_string()),
                    _ => None,
                },
            });
        }
    }

    observations
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::layout::{FIXED_HEADERS, FIXED_UNITS};

    #[test]
    fn markers_and_labs_are_told_apart() {
        let mut header: Vec<Cell> = FIXED_HEADERS.iter().map(|h| Cell::text(*h)).collect();
        header.extend([Cell::text("CEA"), Cell::text("白细胞"), Cell::text("HPV")]);
        let units: Vec<Cell> = FIXED_UNITS.iter().map(|u| Cell::text(*u)).collect();
        let mut data = vec![Cell::Number(45449.0)];
        data.extend(std::iter::repeat(Cell::Empty).take(6));
        data.extend([Cell::text("<5"), Cell::Number(4.2), Cell::text("阴性")]);
        let table = CanonicalTable::new(vec![vec![], vec![], header, units, data]);

        let observations = extract_observations(&table, "p-001", &MetricDictionary::standard());
        assert_eq!(observations.len(), 3);

        let cea = &observations[0];
        assert_eq!(cea.category, ObservationCategory::TumorMarker);
        assert_eq!(cea.display_label, "癌胚抗原");
        assert_eq!(cea.numeric_value, Some(5.0));
        assert_eq!(cea.text_value.as_deref(), Some("<5"));
        assert_eq!(cea.timestamp.to_rfc3339(), "2024-06-06T00:00:00+00:00");

        assert_eq!(observations[1].category, ObservationCategory::Laboratory);
        assert_eq!(observations[1].text_value, None);
        assert_eq!(observations[2].display_label, "HPV");
        assert_eq!(observations[2].numeric_value, None);
    }
}
