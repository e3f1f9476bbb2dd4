//! Decides whether a table already follows the canonical layout and can skip mapping.

use journey_core::layout::{self, FixedColumn, FIRST_METRIC_COLUMN};
use journey_core::{Cell, MetricDictionary};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::IngestConfig;

/// Outcome of the canonical-layout check with the evidence behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalCheck {
    pub is_canonical: bool,
    pub fixed_matches: usize,
    pub metric_matches: usize,
    pub unit_fingerprint: bool,
    /// First header that rules the layout out (blacklisted or an alias spelling).
    pub rejected_header: Option<String>,
}

pub fn detect_canonical(
    headers: &[Cell],
    units: &[Cell],
    dictionary: &MetricDictionary,
    config: &IngestConfig,
) -> CanonicalCheck {
    let header_text = |index: usize| -> String {
        headers
            .get(index)
            .and_then(Cell::as_text)
            .map(|text| text.into_owned())
            .unwrap_or_default()
    };
    let unit_text = |index: usize| -> String {
        units
            .get(index)
            .and_then(Cell::as_text)
            .map(|text| text.into_owned())
            .unwrap_or_default()
    };

    let fixed_matches = FixedColumn::ALL
        .iter()
        .filter(|column| header_text(column.index()) == column.header())
        .count();

    let metric_matches = (FIRST_METRIC_COLUMN..headers.len())
        .filter(|index| dictionary.canonical(&header_text(*index)).is_some())
        .count();

    let unit_fingerprint = unit_text(0) == layout::UNIT_ROW_DATE_LABEL
        || (unit_text(FixedColumn::Cycle.index()) == layout::CURRENT_CYCLE_LABEL
            && unit_text(FixedColumn::PrevCycle.index()) == layout::PREVIOUS_CYCLE_LABEL);

    let rejected_header = (0..headers.len()).map(header_text).find(|header| {
        if header.is_empty() {
            return false;
        }
        config
            .canonical_header_blacklist
            .iter()
            .any(|banned| banned == header)
            || dictionary
                .lookup(header)
                .is_some_and(|definition| definition.canonical_name != *header)
    });

    let is_canonical = headers.len() >= config.canonical_min_columns
        && fixed_matches >= config.canonical_min_fixed_matches
        && metric_matches >= config.canonical_min_metric_matches
        && unit_fingerprint
        && rejected_header.is_none();

    info!(
        is_canonical,
        fixed_matches,
        metric_matches,
        unit_fingerprint,
        rejected = ?rejected_header,
        "canonical layout check"
    );

    CanonicalCheck {
        is_canonical,
        fixed_matches,
        metric_matches,
        unit_fingerprint,
        rejected_header,
    }
}
