//! Built-in feature definitions

use std::sync::Arc;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{Feature, FeatureEmitter};
use crate::error::Result;
use crate::merge::SubjectGroup;
use crate::records::Value;

/// Join the non-empty parts with `-`, replacing spaces with `_`
///
/// ```
/// use relfeat::features::make_identifier;
///
/// assert_eq!(make_identifier(["labs", "", "blood pressure"]), "labs-blood_pressure");
/// ```
#[must_use]
pub fn make_identifier<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .filter(|p| !p.as_ref().is_empty())
        .map(|p| p.as_ref().replace(' ', "_"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Numeric reading of a value; dates count days since 1970-01-01 and
/// datetimes count seconds
#[allow(clippy::cast_precision_loss)]
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Date(d) => {
            NaiveDate::from_ymd_opt(1970, 1, 1).map(|epoch| (*d - epoch).num_days() as f64)
        }
        Value::DateTime(dt) => Some(dt.and_utc().timestamp() as f64),
        other => other.as_f64(),
    }
}

/// The feature set used when none is configured
#[must_use]
pub fn default_features() -> Vec<Arc<dyn Feature>> {
    vec![
        Arc::new(FactValues),
        Arc::new(EventIndicators::default()),
        Arc::new(ValueEventStats::default()),
    ]
}

/// Facts as features: numbers as-is, text one-hot as `table-field-value`
#[derive(Debug, Clone, Copy, Default)]
pub struct FactValues;

impl Feature for FactValues {
    fn name(&self) -> &str {
        "fact_values"
    }

    fn compute(&self, group: &SubjectGroup<'_>, out: &mut FeatureEmitter) -> Result<()> {
        for fact in &group.facts {
            match numeric(&fact.data) {
                Some(x) => {
                    out.emit(make_identifier([fact.table.as_ref(), fact.fact_type.as_str()]), x);
                }
                None => out.emit(
                    make_identifier([
                        fact.table.as_ref(),
                        fact.fact_type.as_str(),
                        fact.data.to_string().as_str(),
                    ]),
                    1.0,
                ),
            }
        }
        Ok(())
    }
}

/// One feature per `table-event_type`: 1 if it occurred, or the count
#[derive(Debug, Clone, Copy, Default)]
pub struct EventIndicators {
    pub counts: bool,
}

impl Feature for EventIndicators {
    fn name(&self) -> &str {
        "event_indicators"
    }

    #[allow(clippy::cast_precision_loss)]
    fn compute(&self, group: &SubjectGroup<'_>, out: &mut FeatureEmitter) -> Result<()> {
        let mut order = Vec::new();
        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for event in &group.events {
            let id = make_identifier([event.table.as_ref(), event.event_type.as_str()]);
            let n = counts.entry(id.clone()).or_insert(0);
            if *n == 0 {
                order.push(id);
            }
            *n += 1;
        }
        for id in order {
            let value = if self.counts { counts[&id] as f64 } else { 1.0 };
            out.emit(id, value);
        }
        Ok(())
    }
}

/// Aggregate over a subject's value events of one type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Last,
    Mean,
    Min,
    Max,
}

impl Statistic {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn of(self, xs: &[f64]) -> Option<f64> {
        match self {
            Self::Last => xs.last().copied(),
            Self::Mean => (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / xs.len() as f64),
            Self::Min => xs.iter().copied().reduce(f64::min),
            Self::Max => xs.iter().copied().reduce(f64::max),
        }
    }
}

/// Window statistics of numeric value events, keyed `table-event_type-stat`
///
/// Text values are one-hot encoded as `table-event_type-value` instead.
#[derive(Debug, Clone)]
pub struct ValueEventStats {
    pub statistics: Vec<Statistic>,
}

impl Default for ValueEventStats {
    fn default() -> Self {
        Self {
            statistics: vec![Statistic::Last, Statistic::Mean, Statistic::Min, Statistic::Max],
        }
    }
}

impl Feature for ValueEventStats {
    fn name(&self) -> &str {
        "value_event_stats"
    }

    fn compute(&self, group: &SubjectGroup<'_>, out: &mut FeatureEmitter) -> Result<()> {
        let mut order = Vec::new();
        let mut series: FxHashMap<String, Vec<f64>> = FxHashMap::default();
        for event in &group.events {
            let Some(value) = event.value() else { continue };
            if let Some(x) = numeric(value) {
                let id = make_identifier([event.table.as_ref(), event.event_type.as_str()]);
                series
                    .entry(id.clone())
                    .or_insert_with(|| {
                        order.push(id);
                        Vec::new()
                    })
                    .push(x);
            } else {
                out.emit(
                    make_identifier([
                        event.table.as_ref(),
                        event.event_type.as_str(),
                        value.to_string().as_str(),
                    ]),
                    1.0,
                );
            }
        }
        for id in order {
            let xs = &series[&id];
            for stat in &self.statistics {
                if let Some(x) = stat.of(xs) {
                    out.emit(make_identifier([id.as_str(), stat.name()]), x);
                }
            }
        }
        Ok(())
    }
}
