use std::collections::HashMap;
use tracing::{debug, warn};

use crate::models::{CanonicalJobRecord, RawCandidate};

/// Titles at least this similar under different slugs are probably one posting.
const NEAR_DUPLICATE_THRESHOLD: f64 = 0.92;

/// Collapse candidates sharing an identifier. The survivor has the longest
/// evidence; equal lengths fall back to strategy priority. First-seen order
/// of identifiers is kept.
pub fn dedup_candidates(candidates: Vec<RawCandidate>) -> Vec<RawCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, RawCandidate> = HashMap::new();

    for candidate in candidates {
        match best.get_mut(&candidate.identifier) {
            Some(current) => {
                if outranks(&candidate, current) {
                    debug!(
                        "{}: {} evidence replaces {}",
                        candidate.identifier, candidate.source_strategy, current.source_strategy
                    );
                    *current = candidate;
                }
            }
            None => {
                order.push(candidate.identifier.clone());
                best.insert(candidate.identifier.clone(), candidate);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| best.remove(&id))
        .collect()
}

fn outranks(challenger: &RawCandidate, current: &RawCandidate) -> bool {
    let key = |c: &RawCandidate| (c.evidence_text.chars().count(), c.source_strategy.priority());
    key(challenger) > key(current)
}

/// A freshly normalized record, plus the slug it replaces when the posting
/// was renamed since the last run.
#[derive(Debug, Clone)]
pub struct IncomingRecord {
    pub record: CanonicalJobRecord,
    pub supersedes: Option<String>,
}

impl IncomingRecord {
    pub fn new(record: CanonicalJobRecord, supersedes: Option<String>) -> Self {
        Self { record, supersedes }
    }
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub records: Vec<CanonicalJobRecord>,
    pub added: usize,
    pub updated: usize,
    pub superseded: usize,
    /// (incoming id, stored id) pairs whose titles nearly match
    pub near_duplicates: Vec<(String, String)>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.superseded > 0
    }
}

/// Fold incoming records into the stored list by `id`. A matching record is
/// replaced wholesale, hand-written keys included. Unmatched stored records
/// stay where they are and new ones are appended.
pub fn merge_records(stored: Vec<CanonicalJobRecord>, incoming: Vec<IncomingRecord>) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        near_duplicates: near_duplicates(&stored, &incoming),
        records: stored,
        ..MergeOutcome::default()
    };

    for IncomingRecord { record, supersedes } in incoming {
        let existing = outcome.records.iter().position(|r| r.id == record.id);
        let previous = supersedes
            .filter(|old| *old != record.id)
            .and_then(|old| outcome.records.iter().position(|r| r.id == old));

        match (existing, previous) {
            (Some(i), Some(j)) => {
                outcome.records[i] = record;
                outcome.records.remove(j);
                outcome.updated += 1;
                outcome.superseded += 1;
            }
            (Some(i), None) => {
                outcome.records[i] = record;
                outcome.updated += 1;
            }
            (None, Some(j)) => {
                debug!("{} supersedes {}", record.id, outcome.records[j].id);
                outcome.records[j] = record;
                outcome.superseded += 1;
            }
            (None, None) => {
                outcome.records.push(record);
                outcome.added += 1;
            }
        }
    }

    outcome
}

fn near_duplicates(stored: &[CanonicalJobRecord], incoming: &[IncomingRecord]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for IncomingRecord { record, supersedes } in incoming {
        let title = record.title.to_lowercase();
        for existing in stored {
            if existing.id == record.id || supersedes.as_deref() == Some(existing.id.as_str()) {
                continue;
            }
            let score = strsim::jaro_winkler(&title, &existing.title.to_lowercase());
            if score >= NEAR_DUPLICATE_THRESHOLD {
                warn!(
                    "'{}' looks like existing '{}' ({:.2}); both are kept",
                    record.title, existing.title, score
                );
                pairs.push((record.id.clone(), existing.id.clone()));
            }
        }
    }
    pairs
}
