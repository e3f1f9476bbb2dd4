//! Prompt text and value-shape hints for the semantic mapper.

use std::sync::OnceLock;

use journey_core::layout::{FIXED_HEADERS, FIXED_UNITS, TITLE_SUFFIX};
use journey_core::{Cell, MetricCategory, MetricDictionary};
use regex::Regex;

use crate::collaborator::MappingRequest;

const SMALL_VALUE_LIMIT: f64 = 1000.0;

fn cycle_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(C\d+D\d+|AS\d+)").expect("cycle code pattern compiles"))
}

/// Dictionary rendered per category: canonical name, localized name, unit, aliases.
pub fn metric_reference(dictionary: &MetricDictionary) -> String {
    let mut out = String::new();
    for category in MetricCategory::ALL {
        let mut definitions = dictionary.by_category(category).peekable();
        if definitions.peek().is_none() {
            continue;
        }
        out.push_str(&format!("{category:?} ({}):\n", category.label()));
        for definition in definitions {
            let unit = definition.unit_label();
            out.push_str(&format!(
                "  - {} / {}{} aliases: {}\n",
                definition.canonical_name,
                definition.display_name,
                if unit.is_empty() {
                    String::new()
                } else {
                    format!(" [{unit}]")
                },
                definition.aliases.join(", ")
            ));
        }
    }
    out
}

/// Describes value shapes of each sampled column so the mapper does not have to guess.
pub fn column_hints(headers: &[Cell], samples: &[Vec<Cell>], dictionary: &MetricDictionary) -> Vec<String> {
    let width = headers
        .len()
        .max(samples.iter().map(Vec::len).max().unwrap_or(0));
    let mut hints = Vec::new();

    for index in 0..width {
        let header = headers
            .get(index)
            .and_then(Cell::as_text)
            .map(|text| text.into_owned())
            .unwrap_or_default();
        let values: Vec<&Cell> = samples
            .iter()
            .filter_map(|row| row.get(index))
            .filter(|cell| !cell.is_blank())
            .collect();

        let numbers: Vec<f64> = values
            .iter()
            .filter_map(|cell| match cell {
                Cell::Number(value) => Some(*value),
                _ => None,
            })
            .collect();
        if !numbers.is_empty() && numbers.len() == values.len() {
            let average = numbers.iter().sum::<f64>() / numbers.len() as f64;
            if average > 40_000.0 && average < 50_000.0 {
                hints.push(format!(
                    "column {index} ({header:?}): numbers look like spreadsheet serial dates"
                ));
            } else if numbers.iter().all(|value| value.abs() < SMALL_VALUE_LIMIT) {
                hints.push(format!(
                    "column {index} ({header:?}): small numbers, likely laboratory values"
                ));
            }
        }

        let cycle_codes = values.iter().any(|cell| match cell {
            Cell::Text(text) => cycle_code_pattern().is_match(text.trim()),
            _ => false,
        });
        if cycle_codes {
            hints.push(format!(
                "column {index} ({header:?}): cycle codes such as C1D1 or AS1"
            ));
        }

        if let Some(definition) = dictionary.lookup(&header) {
            hints.push(format!(
                "column {index} ({header:?}): dictionary alias of {}",
                definition.canonical_name
            ));
        }
    }

    hints
}

pub fn system_prompt(dictionary: &MetricDictionary) -> String {
    let fixed: Vec<String> = FIXED_HEADERS
        .iter()
        .zip(FIXED_UNITS.iter())
        .enumerate()
        .map(|(index, (header, unit))| format!("  {index}: header {header:?}, unit row {unit:?}"))
        .collect();

    format!(
        "You map columns of oncology treatment-history spreadsheets onto the canonical \
         \"{TITLE_SUFFIX}\" layout.\n\n\
         Fixed columns of the canonical layout:\n{}\n\n\
         Metric columns follow from index 7, grouped by category. Known metrics:\n{}\n\
         Rules:\n\
         - Identify the date column; values are usually spreadsheet serial numbers or calendar dates.\n\
         - Map phase (项目), current cycle (周期, codes like C1D1 or AS1), previous cycle, \
           scheme (方案), event (处置) and a second scheme detail column when present.\n\
         - For every other column propose a canonical metric name from the list above. \
           If the column is a real measurement that is not in the list, set isCustomMetric \
           to true and keep its original name.\n\
         - Confidence is a number between 0 and 1.\n\n\
         Answer with a single JSON object and nothing else:\n\
         {{\"dateColumn\": {{\"sourceIndex\": 0, \"sourceName\": \"...\", \"confidence\": 0.9}},\n \
          \"fixedColumnMappings\": {{\"phase\": null, \"cycle\": null, \"prevCycle\": null, \
         \"scheme\": null, \"event\": null, \"schemeDetail\": null}},\n \
          \"metricMappings\": [{{\"sourceIndex\": 3, \"canonicalName\": \"CEA\", \
         \"category\": \"MOLECULAR\", \"confidence\": 0.95, \"isCustomMetric\": false, \
         \"reasoning\": \"...\"}}],\n \
          \"warnings\": []}}\n\
         Each fixed mapping is null or {{\"sourceIndex\": n, \"sourceName\": \"...\", \"confidence\": c}}. \
         Categories: PERFORMANCE, MOLECULAR, IMAGING, SIDE_EFFECTS, CUSTOM.",
        fixed.join("\n"),
        metric_reference(dictionary)
    )
}

pub fn user_prompt(request: &MappingRequest) -> Result<String, serde_json::Error> {
    let headers = serde_json::to_string(&request.headers)?;
    let samples = serde_json::to_string(&request.sample_rows)?;
    let hints = if request.hints.is_empty() {
        "  (none)".to_string()
    } else {
        request
            .hints
            .iter()
            .map(|hint| format!("  - {hint}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    Ok(format!(
        "Headers (null = already mapped, leave it out):\n{headers}\n\n\
         Sample rows:\n{samples}\n\n\
         Pre-analysis:\n{hints}\n"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_flag_dates_lab_values_and_cycles() {
        let headers = vec![Cell::text("Datum"), Cell::text("Marker"), Cell::text("Kur"), Cell::text("体重")];
        let samples = vec![
            vec![Cell::Number(45449.0), Cell::Number(3.2), Cell::text("C1D1"), Cell::Number(52.0)],
            vec![Cell::Number(45470.0), Cell::Number(4.8), Cell::text("C2D1"), Cell::Number(51.0)],
        ];
        let hints = column_hints(&headers, &samples, &MetricDictionary::standard());

        assert!(hints.iter().any(|h| h.starts_with("column 0") && h.contains("serial dates")));
        assert!(hints.iter().any(|h| h.starts_with("column 1") && h.contains("laboratory")));
        assert!(hints.iter().any(|h| h.starts_with("column 2") && h.contains("cycle codes")));
        assert!(hints.iter().any(|h| h.starts_with("column 3") && h.contains("alias of Weight")));
    }

    #[test]
    fn reference_lists_every_category_present() {
        let reference = metric_reference(&MetricDictionary::standard());
        assert!(reference.contains("Molecular (分子负荷)"));
        assert!(reference.contains("CEA / 癌胚抗原 [<5]"));
        assert!(!reference.contains("Custom"));
    }
}
