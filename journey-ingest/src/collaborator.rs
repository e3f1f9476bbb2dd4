//! Contract with the external semantic column mapper.

use std::time::Duration;

use async_trait::async_trait;
use journey_core::{Cell, MetricCategory};
use serde::{Deserialize, Serialize};

/// Sent to the mapper: headers already resolved by the dictionary are nulled out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingRequest {
    pub headers: Vec<Option<String>>,
    pub sample_rows: Vec<Vec<Cell>>,
    /// Observations about column value shapes, e.g. serial-date-like numbers.
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProposal {
    pub source_index: usize,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FixedProposals {
    #[serde(default)]
    pub phase: Option<ColumnProposal>,
    #[serde(default)]
    pub cycle: Option<ColumnProposal>,
    #[serde(default)]
    pub prev_cycle: Option<ColumnProposal>,
    #[serde(default)]
    pub scheme: Option<ColumnProposal>,
    #[serde(default)]
    pub event: Option<ColumnProposal>,
    #[serde(default)]
    pub scheme_detail: Option<ColumnProposal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricProposal {
    pub source_index: usize,
    #[serde(default)]
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub category: Option<MetricCategory>,
    pub confidence: f64,
    #[serde(default)]
    pub is_custom_metric: bool,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MappingResponse {
    #[serde(default)]
    pub date_column: Option<ColumnProposal>,
    #[serde(default)]
    pub fixed_column_mappings: FixedProposals,
    #[serde(default)]
    pub metric_mappings: Vec<MetricProposal>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl MappingResponse {
    /// Rejects indices outside the header row and confidences outside [0, 1].
    pub fn check(&self, header_count: usize) -> Result<(), MapperError> {
        let fixed = &self.fixed_column_mappings;
        let columns = [
            self.date_column.as_ref(),
            fixed.phase.as_ref(),
            fixed.cycle.as_ref(),
            fixed.prev_cycle.as_ref(),
            fixed.scheme.as_ref(),
            fixed.event.as_ref(),
            fixed.scheme_detail.as_ref(),
        ];
        for proposal in columns.into_iter().flatten() {
            check_index(proposal.source_index, header_count)?;
            check_confidence(proposal.confidence)?;
        }
        for proposal in &self.metric_mappings {
            check_index(proposal.source_index, header_count)?;
            check_confidence(proposal.confidence)?;
        }
        Ok(())
    }
}

fn check_index(index: usize, header_count: usize) -> Result<(), MapperError> {
    if index < header_count {
        Ok(())
    } else {
        Err(MapperError::Malformed(format!(
            "column index {index} outside {header_count} headers"
        )))
    }
}

fn check_confidence(confidence: f64) -> Result<(), MapperError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(MapperError::Malformed(format!(
            "confidence {confidence} outside [0, 1]"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MapperError {
    #[error("semantic mapper unavailable: {0}")]
    Unavailable(String),
    #[error("semantic mapper timed out after {0:?}")]
    Timeout(Duration),
    #[error("semantic mapper returned a malformed response: {0}")]
    Malformed(String),
    #[error("semantic mapper request failed: {0}")]
    Http(String),
}

/// An external service that proposes column mappings from headers and sample rows.
#[async_trait]
pub trait SemanticMapper: Send + Sync {
    async fn propose(&self, request: &MappingRequest) -> Result<MappingResponse, MapperError>;
}

/// Parses a model reply into a response; code fences and surrounding prose are tolerated,
/// anything that is not a JSON object is a hard failure.
pub fn parse_response_text(text: &str) -> Result<MappingResponse, MapperError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(MapperError::Malformed(
                "no JSON object in response".to_string(),
            ))
        }
    };
    serde_json::from_str(body).map_err(|err| MapperError::Malformed(err.to_string()))
}
