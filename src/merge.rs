//! Merge/collect: join observations against the study design
//!
//! Observations arrive in any order from any number of tables. Each one is
//! admitted only if its subject has an example and, for events, if its time
//! falls inside the example's window. Admitted observations are bucketed
//! per subject; [`MergeCollect::finish`] returns the buckets in example
//! order with events stably sorted by time.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::{Event, Example, Fact, Observation, SubjectId};
use crate::error::{Error, Result};
use crate::features::{FeatureVector, RunContext};
use crate::records::Value;

/// What to do when the study design lists a subject twice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the run
    #[default]
    Error,
    /// Keep the first example seen
    KeepFirst,
    /// Keep the last example seen, at the first one's position
    KeepLast,
}

/// Examples indexed by subject
#[derive(Debug, Clone, Default)]
pub struct StudyDesign {
    examples: Vec<Example>,
    index: FxHashMap<SubjectId, usize>,
}

impl StudyDesign {
    /// Build the design
    ///
    /// # Errors
    /// Returns `DuplicateSubject` under [`DuplicatePolicy::Error`]
    pub fn new(
        examples: impl IntoIterator<Item = Example>,
        policy: DuplicatePolicy,
    ) -> Result<Self> {
        let mut design = Self::default();
        for example in examples {
            match design.index.get(&example.subject) {
                None => {
                    design.index.insert(example.subject.clone(), design.examples.len());
                    design.examples.push(example);
                }
                Some(&i) => match policy {
                    DuplicatePolicy::Error => {
                        return Err(Error::DuplicateSubject(example.subject.to_string()))
                    }
                    DuplicatePolicy::KeepFirst => {
                        debug!(subject = %example.subject, "Ignoring duplicate example");
                    }
                    DuplicatePolicy::KeepLast => {
                        debug!(subject = %example.subject, "Replacing duplicate example");
                        design.examples[i] = example;
                    }
                },
            }
        }
        Ok(design)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    #[must_use]
    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    #[must_use]
    pub fn get(&self, subject: &SubjectId) -> Option<&Example> {
        self.position(subject).map(|i| &self.examples[i])
    }

    #[must_use]
    pub fn position(&self, subject: &SubjectId) -> Option<usize> {
        self.index.get(subject).copied()
    }
}

/// Everything admitted for one subject
#[derive(Debug, Clone)]
pub struct SubjectGroup<'d> {
    pub example: &'d Example,
    /// Facts in first-seen order
    pub facts: Vec<Fact>,
    /// Events in non-decreasing time order; ties keep arrival order
    pub events: Vec<Event>,
}

impl SubjectGroup<'_> {
    #[must_use]
    pub const fn subject(&self) -> &SubjectId {
        &self.example.subject
    }

    #[must_use]
    pub const fn label(&self) -> &Value {
        &self.example.label
    }
}

/// Counters describing what happened to each observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub facts: usize,
    pub events: usize,
    pub unknown_subject: usize,
    pub outside_window: usize,
    pub incomparable_time: usize,
}

/// Outcome of pushing one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    UnknownSubject,
    OutsideWindow,
    IncomparableTime,
}

/// Accumulates observations per subject
#[derive(Debug)]
pub struct MergeCollect<'d> {
    design: &'d StudyDesign,
    buckets: Vec<(Vec<Fact>, Vec<Event>)>,
    stats: CollectStats,
}

impl<'d> MergeCollect<'d> {
    #[must_use]
    pub fn new(design: &'d StudyDesign) -> Self {
        Self {
            design,
            buckets: vec![(Vec::new(), Vec::new()); design.len()],
            stats: CollectStats::default(),
        }
    }

    /// Admit or discard one observation
    pub fn push(&mut self, observation: Observation) -> Admission {
        let Some(position) = self.design.position(observation.subject()) else {
            debug!(
                subject = %observation.subject(),
                table = observation.table(),
                "Discarding observation for subject without example"
            );
            self.stats.unknown_subject += 1;
            return Admission::UnknownSubject;
        };
        match observation {
            Observation::Fact(fact) => {
                self.buckets[position].0.push(fact);
                self.stats.facts += 1;
            }
            Observation::Event(event) => {
                let example = &self.design.examples[position];
                match example.contains(&event.time) {
                    Some(true) => {
                        self.buckets[position].1.push(event);
                        self.stats.events += 1;
                    }
                    Some(false) => {
                        debug!(
                            subject = %event.subject,
                            time = %event.time,
                            "Discarding event outside window"
                        );
                        self.stats.outside_window += 1;
                        return Admission::OutsideWindow;
                    }
                    None => {
                        warn!(
                            subject = %event.subject,
                            table = %event.table,
                            time = %event.time,
                            "Discarding event whose time cannot be compared with the example window"
                        );
                        self.stats.incomparable_time += 1;
                        return Admission::IncomparableTime;
                    }
                }
            }
        }
        Admission::Admitted
    }

    /// Push every observation, stopping at the first error
    ///
    /// # Errors
    /// Returns the first error yielded by `observations`
    pub fn extend<I>(&mut self, observations: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<Observation>>,
    {
        for observation in observations {
            self.push(observation?);
        }
        Ok(())
    }

    #[must_use]
    pub const fn stats(&self) -> CollectStats {
        self.stats
    }

    /// Groups in example order
    #[must_use]
    pub fn finish(self) -> Vec<SubjectGroup<'d>> {
        self.design
            .examples
            .iter()
            .zip(self.buckets)
            .map(|(example, (facts, mut events))| {
                events.sort_by(|a, b| a.time.total_cmp(&b.time));
                SubjectGroup {
                    example,
                    facts,
                    events,
                }
            })
            .collect()
    }
}

/// Join observations against the design and build one vector per subject
///
/// # Errors
/// Returns the first error from `observations`, or a feature failure under
/// the fatal policy
pub fn merge_collect<I>(
    design: &StudyDesign,
    observations: I,
    context: &mut RunContext,
) -> Result<Vec<FeatureVector>>
where
    I: IntoIterator<Item = Result<Observation>>,
{
    let mut collector = MergeCollect::new(design);
    collector.extend(observations)?;
    let stats = collector.stats();
    debug!(?stats, "Collected observations");
    let groups = collector.finish();
    context.build_vectors(&groups)
}
