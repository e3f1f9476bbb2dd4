//! Treatment-history spreadsheets to the canonical oncology cycle table and its timeline.

use journey_core::{JourneyError, TimelineConfig, Warning};
use serde::{Deserialize, Serialize};

#[cfg(feature = "remote")]
pub mod chat;
pub mod collaborator;
pub mod detect;
pub mod locate;
pub mod mapping;
pub mod observe;
pub mod pipeline;
pub mod prompt;
pub mod source;
pub mod template;
pub mod transform;
pub mod validate;

pub use collaborator::{MapperError, MappingRequest, MappingResponse, SemanticMapper};
pub use detect::{detect_canonical, CanonicalCheck};
pub use locate::{locate_structure, TableStructure};
pub use mapping::{ColumnMapping, DateHint, FixedColumns, MappingOutcome, MappingSource, MetricColumn};
pub use pipeline::{IngestOptions, IngestOutcome, Pipeline};
pub use source::{read_table_str, InputFormat};
pub use transform::{transform, TransformOutput, TransformStats};
pub use validate::{validate_canonical, ValidationReport};

/// Tunable thresholds for every heuristic stage of ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Rows scanned from the top of the sheet when looking for the header row.
    pub header_search_rows: usize,
    /// Non-empty cells a row needs before it is considered as a header.
    pub min_header_cells: usize,
    /// Unit-like cells that mark a row as the units row rather than headers.
    pub unit_row_min_hits: usize,
    pub canonical_min_columns: usize,
    pub canonical_min_fixed_matches: usize,
    pub canonical_min_metric_matches: usize,
    /// Headers that never appear in a canonical table.
    pub canonical_header_blacklist: Vec<String>,
    /// Minimum confidence for a collaborator proposal that is not flagged custom.
    pub mapping_confidence_threshold: f64,
    /// Data rows sent along with the headers to the semantic mapper.
    pub sample_rows: usize,
    pub mapper_timeout_ms: u64,
    pub timeline: TimelineConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            header_search_rows: 20,
            min_header_cells: 2,
            unit_row_min_hits: 2,
            canonical_min_columns: 10,
            canonical_min_fixed_matches: 6,
            canonical_min_metric_matches: 5,
            canonical_header_blacklist: [
                "Lab Result",
                "Tumor Burden",
                "Tumor Size",
                "Performance Status",
                "Date",
                "Phase",
                "Cycle",
                "Scheme",
                "Event",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            mapping_confidence_threshold: 0.5,
            sample_rows: 3,
            mapper_timeout_ms: 30_000,
            timeline: TimelineConfig::default(),
        }
    }
}

/// Fatal ingestion errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("header row not found in the first {window} rows")]
    HeaderNotFound { window: usize },
    #[error("no data rows with a parseable date")]
    NoDataRows,
    #[error("canonical validation failed: {0}")]
    Validation(String),
    #[error("could not read input table: {0}")]
    Read(String),
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("dictionary error: {0}")]
    Dictionary(String),
}

impl From<JourneyError> for IngestError {
    fn from(err: JourneyError) -> Self {
        Self::Dictionary(err.to_string())
    }
}

/// A failed run: at least one error, plus the warnings gathered before it stopped.
#[derive(Debug, Clone, thiserror::Error)]
#[error("ingestion failed: {}", join_errors(.errors))]
pub struct IngestFailure {
    pub errors: Vec<IngestError>,
    pub warnings: Vec<Warning>,
}

impl IngestFailure {
    pub fn new(error: IngestError, warnings: Vec<Warning>) -> Self {
        Self {
            errors: vec![error],
            warnings,
        }
    }
}

fn join_errors(errors: &[IngestError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
