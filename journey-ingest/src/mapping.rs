//! Column Mapper: assigns every source column at most one role (date, fixed, metric).
//!
//! Headers known to the dictionary are mapped directly. The rest go to the
//! semantic mapper when one is configured; if it is absent, fails, times out or
//! answers with garbage, a keyword and value-shape heuristic takes over and the
//! run carries a `MappingDegraded` warning. Headed columns nobody claimed but
//! holding numbers are kept as custom metrics.

use journey_core::layout::FixedColumn;
use journey_core::{Cell, MetricCategory, MetricDefinition, MetricDictionary, Warning};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborator::{ColumnProposal, MapperError, MappingRequest, MappingResponse};
use crate::locate::is_date_like;
use crate::{prompt, IngestConfig};

const DATE_KEYWORDS: [&str; 5] = ["日期", "date", "time", "时间", "子类"];
const NON_DATE_HEADERS: [&str; 8] = ["项目", "Phase", "处置", "Event", "周期", "Cycle", "方案", "Scheme"];
const FIRST_COLUMN_HINTS: [&str; 3] = ["column_0", "Unnamed: 0", ""];

const PREV_CYCLE_KEYWORDS: [&str; 3] = ["前序周期", "previous cycle", "prev cycle"];
const CYCLE_KEYWORDS: [&str; 3] = ["当下周期", "周期", "cycle"];
const PHASE_KEYWORDS: [&str; 3] = ["项目", "phase", "阶段"];
const EVENT_KEYWORDS: [&str; 3] = ["处置", "event", "事件"];
const SCHEME_KEYWORDS: [&str; 3] = ["方案", "scheme", "regimen"];

/// Early columns whose numbers average in this range are taken for serial dates.
const SERIAL_DATE_AVERAGE: (f64, f64) = (40_000.0, 50_000.0);
const DATE_SCAN_COLUMNS: usize = 10;

const MIN_EXPECTED_METRICS: usize = 3;

/// Source column indices of the fixed roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedColumns {
    pub phase: Option<usize>,
    pub cycle: Option<usize>,
    pub prev_cycle: Option<usize>,
    pub scheme: Option<usize>,
    pub event: Option<usize>,
    pub scheme_detail: Option<usize>,
}

impl FixedColumns {
    pub fn get(&self, column: FixedColumn) -> Option<usize> {
        match column {
            FixedColumn::Date => None,
            FixedColumn::Phase => self.phase,
            FixedColumn::Cycle => self.cycle,
            FixedColumn::PrevCycle => self.prev_cycle,
            FixedColumn::Scheme => self.scheme,
            FixedColumn::Event => self.event,
            FixedColumn::SchemeDetail => self.scheme_detail,
        }
    }

    fn slot(&mut self, column: FixedColumn) -> Option<&mut Option<usize>> {
        match column {
            FixedColumn::Date => None,
            FixedColumn::Phase => Some(&mut self.phase),
            FixedColumn::Cycle => Some(&mut self.cycle),
            FixedColumn::PrevCycle => Some(&mut self.prev_cycle),
            FixedColumn::Scheme => Some(&mut self.scheme),
            FixedColumn::Event => Some(&mut self.event),
            FixedColumn::SchemeDetail => Some(&mut self.scheme_detail),
        }
    }

    fn contains(&self, index: usize) -> bool {
        FixedColumn::ALL
            .iter()
            .any(|column| self.get(*column) == Some(index))
    }
}

/// A source column feeding one canonical metric column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricColumn {
    pub source_index: usize,
    pub canonical_name: String,
    pub category: MetricCategory,
    pub is_custom: bool,
    pub confidence: f64,
}

impl MetricColumn {
    fn known(source_index: usize, definition: &MetricDefinition, confidence: f64) -> Self {
        Self {
            source_index,
            canonical_name: definition.canonical_name.clone(),
            category: definition.category,
            is_custom: false,
            confidence,
        }
    }

    fn custom(source_index: usize, name: impl Into<String>, confidence: f64) -> Self {
        Self {
            source_index,
            canonical_name: name.into(),
            category: MetricCategory::Custom,
            is_custom: true,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Collaborator,
    Heuristic,
}

/// Role assignment for the source columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMapping {
    pub date_column: usize,
    pub fixed: FixedColumns,
    pub metrics: Vec<MetricColumn>,
    pub source: MappingSource,
}

impl ColumnMapping {
    pub fn new(date_column: usize, source: MappingSource) -> Self {
        Self {
            date_column,
            fixed: FixedColumns::default(),
            metrics: Vec::new(),
            source,
        }
    }

    pub fn is_claimed(&self, index: usize) -> bool {
        self.date_column == index
            || self.fixed.contains(index)
            || self.metrics.iter().any(|metric| metric.source_index == index)
    }

    /// Gives `index` a fixed role unless the column or the role is already taken.
    /// A second scheme column becomes the scheme detail.
    fn claim_fixed(&mut self, role: FixedColumn, index: usize) -> bool {
        if self.is_claimed(index) {
            return false;
        }
        let role = match role {
            FixedColumn::Scheme if self.fixed.scheme.is_some() => FixedColumn::SchemeDetail,
            other => other,
        };
        match self.fixed.slot(role) {
            Some(slot) if slot.is_none() => {
                *slot = Some(index);
                true
            }
            _ => false,
        }
    }

    fn claim_metric(&mut self, metric: MetricColumn) -> bool {
        if self.is_claimed(metric.source_index) {
            return false;
        }
        self.metrics.push(metric);
        true
    }
}

/// Date column supplied by the caller, by index or by header name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateHint {
    pub index: Option<usize>,
    pub header: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingOutcome {
    pub mapping: ColumnMapping,
    pub warnings: Vec<Warning>,
}

fn header_texts(headers: &[Cell]) -> impl Iterator<Item = (usize, String)> + '_ {
    headers
        .iter()
        .enumerate()
        .filter_map(|(index, cell)| cell.as_text().map(|text| (index, text.into_owned())))
}

fn header_text(headers: &[Cell], index: usize) -> String {
    headers
        .get(index)
        .and_then(Cell::as_text)
        .map(|text| text.into_owned())
        .unwrap_or_default()
}

fn is_date_header(name: &str) -> bool {
    let lowered = name.to_lowercase();
    DATE_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

fn is_non_date_header(name: &str) -> bool {
    let name = name.trim();
    NON_DATE_HEADERS
        .iter()
        .any(|banned| banned.eq_ignore_ascii_case(name))
}

/// Date column by priority: explicit index, then hinted header name, then a
/// date keyword in the headers, then column 0.
pub fn resolve_date_column(headers: &[Cell], explicit: Option<usize>, hint: Option<&str>) -> usize {
    named_date_column(headers, explicit, hint).unwrap_or(0)
}

fn named_date_column(headers: &[Cell], explicit: Option<usize>, hint: Option<&str>) -> Option<usize> {
    if let Some(index) = explicit.filter(|index| *index < headers.len().max(1)) {
        return Some(index);
    }

    if let Some(hint) = hint.map(str::trim) {
        if FIRST_COLUMN_HINTS.contains(&hint) {
            return Some(0);
        }
        if !is_non_date_header(hint) {
            if let Some((index, _)) = header_texts(headers).find(|(_, header)| header == hint) {
                return Some(index);
            }
        }
    }

    header_texts(headers)
        .find(|(_, header)| is_date_header(header))
        .map(|(index, _)| index)
}

/// Fixed role implied by keywords in a header.
pub fn fixed_role_for(header: &str) -> Option<FixedColumn> {
    let lowered = header.to_lowercase();
    let has = |keywords: &[&str]| keywords.iter().any(|keyword| lowered.contains(keyword));

    if has(&PREV_CYCLE_KEYWORDS) {
        Some(FixedColumn::PrevCycle)
    } else if has(&CYCLE_KEYWORDS) {
        Some(FixedColumn::Cycle)
    } else if has(&PHASE_KEYWORDS) {
        Some(FixedColumn::Phase)
    } else if has(&EVENT_KEYWORDS) {
        Some(FixedColumn::Event)
    } else if has(&SCHEME_KEYWORDS) {
        Some(FixedColumn::Scheme)
    } else {
        None
    }
}

fn column_cells<'a>(data: &'a [Vec<Cell>], index: usize) -> impl Iterator<Item = &'a Cell> + 'a {
    data.iter()
        .filter_map(move |row| row.get(index))
        .filter(|cell| !cell.is_blank())
}

fn column_has_numeric(data: &[Vec<Cell>], index: usize) -> bool {
    column_cells(data, index).any(|cell| cell.as_number().is_some())
}

fn column_is_mostly_numeric(data: &[Vec<Cell>], index: usize) -> bool {
    let (numeric, total) = column_cells(data, index).fold((0usize, 0usize), |(n, t), cell| {
        (n + usize::from(cell.as_number().is_some()), t + 1)
    });
    numeric > 0 && numeric * 2 > total
}

/// First early column whose values look like dates: serial numbers averaging in a
/// plausible range, or mostly calendar-date text.
fn scan_date_column(headers: &[Cell], data: &[Vec<Cell>]) -> Option<usize> {
    let width = headers.len().min(DATE_SCAN_COLUMNS);
    (0..width).find(|index| {
        let numbers: Vec<f64> = column_cells(data, *index)
            .filter_map(|cell| match cell {
                Cell::Number(value) => Some(*value),
                _ => None,
            })
            .collect();
        if !numbers.is_empty() {
            let average = numbers.iter().sum::<f64>() / numbers.len() as f64;
            if average > SERIAL_DATE_AVERAGE.0 && average < SERIAL_DATE_AVERAGE.1 {
                return true;
            }
        }

        let (dated, total) = column_cells(data, *index).fold((0usize, 0usize), |(d, t), cell| {
            let text_date = matches!(cell, Cell::Text(_)) && is_date_like(cell);
            (d + usize::from(text_date), t + 1)
        });
        dated > 0 && dated * 2 > total
    })
}

/// Keyword and value-shape mapping used when the semantic mapper cannot help.
pub fn heuristic_mapping(
    headers: &[Cell],
    data: &[Vec<Cell>],
    dictionary: &MetricDictionary,
    hint: &DateHint,
) -> ColumnMapping {
    // Value shapes only decide when no index, hint or keyword names the column.
    let date_column = named_date_column(headers, hint.index, hint.header.as_deref())
        .or_else(|| scan_date_column(headers, data))
        .unwrap_or(0);
    let mut mapping = ColumnMapping::new(date_column, MappingSource::Heuristic);

    for (index, header) in header_texts(headers) {
        if index == date_column {
            continue;
        }
        if let Some(role) = fixed_role_for(&header) {
            mapping.claim_fixed(role, index);
        } else if let Some(definition) = dictionary.lookup(&header) {
            mapping.claim_metric(MetricColumn::known(index, definition, 1.0));
        } else if !is_date_header(&header) && column_is_mostly_numeric(data, index) {
            mapping.claim_metric(MetricColumn::custom(index, header, 0.0));
        }
    }

    mapping
}

/// Builds the collaborator request. Dictionary-resolved headers are sent as nulls.
pub fn build_request(
    headers: &[Cell],
    data: &[Vec<Cell>],
    dictionary: &MetricDictionary,
    config: &IngestConfig,
) -> MappingRequest {
    let sample_rows: Vec<Vec<Cell>> = data
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.is_blank()))
        .take(config.sample_rows)
        .cloned()
        .collect();

    MappingRequest {
        headers: headers
            .iter()
            .map(|cell| {
                cell.as_text()
                    .filter(|text| !dictionary.is_known(text))
                    .map(|text| text.into_owned())
            })
            .collect(),
        hints: prompt::column_hints(headers, &sample_rows, dictionary),
        sample_rows,
    }
}

/// Turns a collaborator response into a mapping. Dictionary matches always win,
/// proposals below the confidence threshold are dropped unless flagged custom.
pub fn apply_response(
    response: &MappingResponse,
    headers: &[Cell],
    dictionary: &MetricDictionary,
    config: &IngestConfig,
    hint: &DateHint,
) -> Result<ColumnMapping, MapperError> {
    response.check(headers.len())?;

    let proposed_date = response.date_column.as_ref().filter(|proposal| {
        let name = proposal
            .source_name
            .clone()
            .unwrap_or_else(|| header_text(headers, proposal.source_index));
        !is_non_date_header(&name)
    });
    let explicit = hint.index.or(proposed_date.map(|proposal| proposal.source_index));
    let hinted_header = hint
        .header
        .clone()
        .or_else(|| proposed_date.and_then(|proposal| proposal.source_name.clone()));
    let date_column = resolve_date_column(headers, explicit, hinted_header.as_deref());
    let mut mapping = ColumnMapping::new(date_column, MappingSource::Collaborator);

    for (index, header) in header_texts(headers) {
        if let Some(definition) = dictionary.lookup(&header) {
            mapping.claim_metric(MetricColumn::known(index, definition, 1.0));
        }
    }

    let fixed = &response.fixed_column_mappings;
    let proposals: [(FixedColumn, Option<&ColumnProposal>); 6] = [
        (FixedColumn::Phase, fixed.phase.as_ref()),
        (FixedColumn::Cycle, fixed.cycle.as_ref()),
        (FixedColumn::PrevCycle, fixed.prev_cycle.as_ref()),
        (FixedColumn::Scheme, fixed.scheme.as_ref()),
        (FixedColumn::Event, fixed.event.as_ref()),
        (FixedColumn::SchemeDetail, fixed.scheme_detail.as_ref()),
    ];
    for (role, proposal) in proposals {
        if let Some(proposal) = proposal {
            mapping.claim_fixed(role, proposal.source_index);
        }
    }
    for (index, header) in header_texts(headers) {
        if let Some(role) = fixed_role_for(&header) {
            if mapping.fixed.get(role).is_none() || role == FixedColumn::Scheme {
                mapping.claim_fixed(role, index);
            }
        }
    }

    for proposal in &response.metric_mappings {
        if mapping.is_claimed(proposal.source_index) {
            continue;
        }
        if proposal.confidence < config.mapping_confidence_threshold && !proposal.is_custom_metric {
            debug!(
                column = proposal.source_index,
                confidence = proposal.confidence,
                "low-confidence proposal dropped"
            );
            continue;
        }

        let proposed = proposal
            .canonical_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| {
                proposal
                    .is_custom_metric
                    .then(|| header_text(headers, proposal.source_index))
                    .filter(|name| !name.is_empty())
            });
        let Some(name) = proposed else {
            continue;
        };

        let metric = match dictionary.lookup(&name) {
            Some(definition) => MetricColumn::known(proposal.source_index, definition, proposal.confidence),
            None => MetricColumn::custom(proposal.source_index, name, proposal.confidence),
        };
        mapping.claim_metric(metric);
    }

    Ok(mapping)
}

/// Keeps unclaimed numeric columns as custom metrics and reports what was left out.
fn settle(mut mapping: ColumnMapping, headers: &[Cell], data: &[Vec<Cell>]) -> MappingOutcome {
    let mut warnings = Vec::new();

    for (index, cell) in headers.iter().enumerate() {
        if mapping.is_claimed(index) {
            continue;
        }
        let header = cell.as_text().map(|text| text.into_owned()).unwrap_or_default();
        if !header.is_empty() && !is_date_header(&header) && column_has_numeric(data, index) {
            debug!(column = index, %header, "unclaimed numeric column kept as custom metric");
            mapping.metrics.push(MetricColumn::custom(index, header, 0.0));
        } else if !header.is_empty() || column_cells(data, index).next().is_some() {
            warnings.push(Warning::UnmappedColumn { index, header });
        }
    }

    match mapping.metrics.len() {
        0 => warnings.push(Warning::Structure {
            message: "no metric columns were mapped".to_string(),
        }),
        n if n < MIN_EXPECTED_METRICS => warnings.push(Warning::Structure {
            message: format!("only {n} metric columns were mapped"),
        }),
        _ => {}
    }

    info!(
        source = ?mapping.source,
        date_column = mapping.date_column,
        metrics = mapping.metrics.len(),
        "columns mapped"
    );
    MappingOutcome { mapping, warnings }
}

fn degraded(
    reason: String,
    headers: &[Cell],
    data: &[Vec<Cell>],
    dictionary: &MetricDictionary,
    hint: &DateHint,
) -> MappingOutcome {
    warn!(%reason, "falling back to heuristic column mapping");
    let mut outcome = settle(heuristic_mapping(headers, data, dictionary, hint), headers, data);
    outcome.warnings.insert(0, Warning::MappingDegraded { reason });
    outcome
}

/// Maps columns without a semantic mapper.
pub fn map_columns_offline(
    headers: &[Cell],
    data: &[Vec<Cell>],
    dictionary: &MetricDictionary,
    hint: &DateHint,
) -> MappingOutcome {
    degraded(
        "no semantic mapper configured".to_string(),
        headers,
        data,
        dictionary,
        hint,
    )
}

/// Maps columns with the semantic mapper, bounded by the configured timeout.
#[cfg(feature = "remote")]
pub async fn map_columns(
    headers: &[Cell],
    data: &[Vec<Cell>],
    dictionary: &MetricDictionary,
    mapper: Option<&dyn crate::SemanticMapper>,
    config: &IngestConfig,
    hint: &DateHint,
) -> MappingOutcome {
    let Some(mapper) = mapper else {
        return map_columns_offline(headers, data, dictionary, hint);
    };

    let request = build_request(headers, data, dictionary, config);
    let limit = std::time::Duration::from_millis(config.mapper_timeout_ms);
    let response = match tokio::time::timeout(limit, mapper.propose(&request)).await {
        Ok(result) => result,
        Err(_) => Err(MapperError::Timeout(limit)),
    };

    match response.and_then(|response| apply_response(&response, headers, dictionary, config, hint)) {
        Ok(mapping) => settle(mapping, headers, data),
        Err(err) => degraded(err.to_string(), headers, data, dictionary, hint),
    }
}
