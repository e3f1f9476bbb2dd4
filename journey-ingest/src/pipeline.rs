//! End-to-end ingestion: locate, detect, map, transform, validate, segment.

#[cfg(feature = "remote")]
use std::sync::Arc;

use journey_core::dates::cell_date;
use journey_core::layout::{DATA_START_ROW, HEADER_ROW};
use journey_core::{
    build_timeline, CanonicalTable, Cell, MetricDictionary, Observation, RawTable, Timeline, Warning,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::{detect_canonical, CanonicalCheck};
use crate::locate::{locate_structure, TableStructure};
use crate::mapping::{map_columns_offline, ColumnMapping, DateHint, MappingOutcome};
use crate::observe::extract_observations;
use crate::transform::{transform, TransformStats};
use crate::validate::validate_canonical;
use crate::{IngestConfig, IngestError, IngestFailure};

#[cfg(feature = "remote")]
use crate::SemanticMapper;

const UNKNOWN_SUBJECT: &str = "unknown";

/// Per-run caller choices.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestOptions {
    pub patient_name: Option<String>,
    /// Subject id stamped on observations; falls back to the patient name.
    pub subject_id: Option<String>,
    pub date_column: Option<usize>,
    pub date_header: Option<String>,
}

impl IngestOptions {
    fn date_hint(&self) -> DateHint {
        DateHint {
            index: self.date_column,
            header: self.date_header.clone(),
        }
    }

    fn subject(&self) -> &str {
        self.subject_id
            .as_deref()
            .or(self.patient_name.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_SUBJECT)
    }
}

/// Everything a successful run produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestOutcome {
    pub canonical: CanonicalTable,
    pub timeline: Timeline,
    pub observations: Vec<Observation>,
    pub warnings: Vec<Warning>,
    pub structure: TableStructure,
    pub canonical_check: CanonicalCheck,
    /// Absent when the input was already canonical.
    pub mapping: Option<ColumnMapping>,
    pub stats: Option<TransformStats>,
}

impl IngestOutcome {
    pub fn was_canonical(&self) -> bool {
        self.canonical_check.is_canonical
    }
}

struct Located {
    structure: TableStructure,
    check: CanonicalCheck,
}

struct Draft {
    canonical: CanonicalTable,
    warnings: Vec<Warning>,
    located: Located,
    mapping: Option<ColumnMapping>,
    stats: Option<TransformStats>,
}

pub struct Pipeline {
    dictionary: MetricDictionary,
    config: IngestConfig,
    #[cfg(feature = "remote")]
    mapper: Option<Arc<dyn SemanticMapper>>,
}

impl Pipeline {
    pub fn new(dictionary: MetricDictionary, config: IngestConfig) -> Self {
        Self {
            dictionary,
            config,
            #[cfg(feature = "remote")]
            mapper: None,
        }
    }

    #[cfg(feature = "remote")]
    pub fn with_mapper(mut self, mapper: Arc<dyn SemanticMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn dictionary(&self) -> &MetricDictionary {
        &self.dictionary
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Runs the whole pipeline with heuristic column mapping only.
    pub fn ingest_offline(
        &self,
        table: &RawTable,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestFailure> {
        let located = self.locate(table)?;
        if located.check.is_canonical {
            return self.finish(passthrough(table, located, options), options);
        }

        let (headers, data) = split(table, &located.structure);
        let outcome = map_columns_offline(headers, data, &self.dictionary, &options.date_hint());
        self.transform_mapped(table, located, outcome, options)
    }

    /// Runs the whole pipeline, asking the semantic mapper (if any) for column roles.
    #[cfg(feature = "remote")]
    pub async fn ingest(
        &self,
        table: &RawTable,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestFailure> {
        let located = self.locate(table)?;
        if located.check.is_canonical {
            return self.finish(passthrough(table, located, options), options);
        }

        let (headers, data) = split(table, &located.structure);
        let outcome = crate::mapping::map_columns(
            headers,
            data,
            &self.dictionary,
            self.mapper.as_deref(),
            &self.config,
            &options.date_hint(),
        )
        .await;
        self.transform_mapped(table, located, outcome, options)
    }

    fn locate(&self, table: &RawTable) -> Result<Located, IngestFailure> {
        let structure = locate_structure(table, &self.dictionary, &self.config)
            .map_err(|err| IngestFailure::new(err, Vec::new()))?;
        let units = structure
            .unit_row
            .map_or(&[][..], |row| table.row(row));
        let check = detect_canonical(
            table.row(structure.header_row),
            units,
            &self.dictionary,
            &self.config,
        );
        Ok(Located { structure, check })
    }

    fn transform_mapped(
        &self,
        table: &RawTable,
        located: Located,
        outcome: MappingOutcome,
        options: &IngestOptions,
    ) -> Result<IngestOutcome, IngestFailure> {
        let MappingOutcome {
            mapping,
            mut warnings,
        } = outcome;

        let output = match transform(
            table,
            &located.structure,
            &mapping,
            &self.dictionary,
            options.patient_name.as_deref(),
        ) {
            Ok(output) => output,
            Err(err) => return Err(IngestFailure::new(err, warnings)),
        };
        warnings.extend(output.warnings);

        self.finish(
            Draft {
                canonical: output.table,
                warnings,
                located,
                mapping: Some(mapping),
                stats: Some(output.stats),
            },
            options,
        )
    }

    fn finish(&self, draft: Draft, options: &IngestOptions) -> Result<IngestOutcome, IngestFailure> {
        let Draft {
            canonical,
            mut warnings,
            located,
            mapping,
            stats,
        } = draft;

        let report = validate_canonical(&canonical);
        warnings.extend(
            report
                .warnings.clone()
                .into_iter()
                .map(|message| Warning::Structure { message }),
        );
        if !report.is_valid() {
            warn!(errors = report.errors.len(), "canonical table failed validation");
            return Err(IngestFailure {
                errors: report.errors.into_iter().map(IngestError::Validation).collect(),
                warnings,
            });
        }

        warnings.extend(unplotted_cells(&canonical));

        let timeline = build_timeline(&canonical, &self.dictionary, &self.config.timeline);
        if timeline.is_empty() {
            warnings.push(Warning::EmptyTimeline);
        }
        let observations = extract_observations(&canonical, options.subject(), &self.dictionary);

        info!(
            canonical_input = located.check.is_canonical,
            phases = timeline.phases.len(),
            events = timeline.events.len(),
            series = timeline.series.len(),
            observations = observations.len(),
            warnings = warnings.len(),
            "ingestion finished"
        );

        Ok(IngestOutcome {
            canonical,
            timeline,
            observations,
            warnings,
            structure: located.structure,
            canonical_check: located.check,
            mapping,
            stats,
        })
    }
}

fn split<'a>(table: &'a RawTable, structure: &TableStructure) -> (&'a [Cell], &'a [Vec<Cell>]) {
    let data = table.rows.get(structure.data_start..).unwrap_or(&[]);
    (table.row(structure.header_row), data)
}

/// Re-anchors an already canonical table so its header sits on the canonical
/// header row, padding missing title rows.
fn passthrough(table: &RawTable, located: Located, options: &IngestOptions) -> Draft {
    let start = located.structure.header_row.saturating_sub(HEADER_ROW);
    let padding = HEADER_ROW.saturating_sub(located.structure.header_row);

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); padding];
    rows.extend(table.rows.iter().skip(start).cloned());
    let mut canonical = CanonicalTable::new(rows);
    if let Some(name) = options.patient_name.as_deref().filter(|name| !name.trim().is_empty()) {
        canonical.set_patient_title(name.trim());
    }

    let warnings = canonical
        .data_rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| row.iter().any(|cell| !cell.is_blank()))
        .filter(|(_, row)| row.first().and_then(cell_date).is_none())
        .map(|(offset, row)| Warning::RowSkipped {
            row: start + DATA_START_ROW + offset - padding,
            reason: format!(
                "date cell {:?} is not a date",
                row.first().map(ToString::to_string).unwrap_or_default()
            ),
        })
        .collect();

    info!(header_row = located.structure.header_row, "canonical input passed through");
    Draft {
        canonical,
        warnings,
        located,
        mapping: None,
        stats: None,
    }
}

/// Metric cells on dated rows that carry text with no numeric reading. They stay
/// in the canonical table but cannot be charted.
fn unplotted_cells(table: &CanonicalTable) -> Vec<Warning> {
    let columns = table.metric_columns();
    let mut warnings = Vec::new();

    for (offset, row) in table.data_rows().iter().enumerate() {
        if row.first().and_then(cell_date).is_none() {
            continue;
        }
        for (column, name) in &columns {
            let Some(cell) = row.get(*column).filter(|cell| !cell.is_blank()) else {
                continue;
            };
            if cell.as_number().is_none() {
                debug!(row = DATA_START_ROW + offset, metric = %name, "non-numeric metric value");
                warnings.push(Warning::CellSkipped {
                    row: DATA_START_ROW + offset,
                    column: *column,
                    reason: format!("{name} value {:?} is not numeric and is left out of the chart", cell.to_string()),
                });
            }
        }
    }

    warnings
}
