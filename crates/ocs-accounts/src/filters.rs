//! Inline filter evaluation
//!
//! Evaluates filters written inline as `*type:path:value1;value2`, the form
//! balances carry for simple eligibility rules. Filter profiles stored by
//! reference need a full filter service and are reported as evaluation
//! errors here.

use async_trait::async_trait;
use ocs_core::{
    models::{event::OPTS_PREFIX, event::REQ_PREFIX, ChargingEvent},
    traits::FilterService,
    ChargingError, ChargingResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKind {
    String,
    Prefix,
    Exists,
}

/// Parsed inline filter
#[derive(Debug, Clone, PartialEq, Eq)]
struct InlineFilter<'a> {
    kind: FilterKind,
    negated: bool,
    path: &'a str,
    values: Vec<&'a str>,
}

impl<'a> InlineFilter<'a> {
    fn parse(filter_id: &'a str) -> ChargingResult<Self> {
        if !filter_id.starts_with('*') {
            return Err(ChargingError::Filter(format!(
                "filter profile not available: {}",
                filter_id
            )));
        }
        let mut parts = filter_id.splitn(3, ':');
        let kind = parts.next().unwrap_or_default();
        let path = parts
            .next()
            .filter(|p| p.starts_with(REQ_PREFIX) || p.starts_with(OPTS_PREFIX))
            .ok_or_else(|| ChargingError::MalformedFilter(filter_id.to_string()))?;
        let values: Vec<&str> = parts
            .next()
            .map(|v| v.split(';').filter(|v| !v.is_empty()).collect())
            .unwrap_or_default();

        let (kind, negated) = match kind {
            "*string" => (FilterKind::String, false),
            "*notstring" => (FilterKind::String, true),
            "*prefix" => (FilterKind::Prefix, false),
            "*notprefix" => (FilterKind::Prefix, true),
            "*exists" => (FilterKind::Exists, false),
            "*notexists" => (FilterKind::Exists, true),
            _ => return Err(ChargingError::MalformedFilter(filter_id.to_string())),
        };
        if kind != FilterKind::Exists && values.is_empty() {
            return Err(ChargingError::MalformedFilter(filter_id.to_string()));
        }

        Ok(Self {
            kind,
            negated,
            path,
            values,
        })
    }

    fn matches(&self, event: &ChargingEvent) -> bool {
        let field = event.field_as_string(self.path);
        let matched = match (self.kind, field) {
            (FilterKind::Exists, field) => field.is_some(),
            (_, None) => false,
            (FilterKind::String, Some(field)) => self.values.iter().any(|v| *v == field),
            (FilterKind::Prefix, Some(field)) => {
                self.values.iter().any(|v| field.starts_with(v))
            }
        };
        matched != self.negated
    }
}

/// Filter service evaluating inline filters only
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineFilters;

impl InlineFilters {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FilterService for InlineFilters {
    async fn pass(
        &self,
        _tenant: &str,
        filter_ids: &[String],
        event: &ChargingEvent,
    ) -> ChargingResult<bool> {
        for filter_id in filter_ids {
            if !InlineFilter::parse(filter_id)?.matches(event) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
