//! Per-job record deduplication.

use std::collections::BTreeSet;

use crate::types::record::Record;

/// Counts from merging one page into a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    pub incoming: usize,
    pub appended: usize,
}

impl MergeStats {
    pub fn dropped(&self) -> usize {
        self.incoming - self.appended
    }

    /// The page had records but every one of them was already seen.
    pub fn is_duplicate_only(&self) -> bool {
        self.incoming > 0 && self.appended == 0
    }
}

/// View over a job's seen-id set and record list.
///
/// Records with an identifier already in the set are dropped. Everything
/// else is appended, and its identifier (if any) is remembered, so the
/// seen set always covers every identified record.
pub struct DedupIndex<'a> {
    seen: &'a mut BTreeSet<String>,
    records: &'a mut Vec<Record>,
}

impl<'a> DedupIndex<'a> {
    pub fn new(seen: &'a mut BTreeSet<String>, records: &'a mut Vec<Record>) -> Self {
        Self { seen, records }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn merge(&mut self, incoming: Vec<Record>) -> MergeStats {
        let mut stats = MergeStats {
            incoming: incoming.len(),
            appended: 0,
        };

        for record in incoming {
            if let Some(id) = &record.id {
                // insert() is false for ids seen earlier, including earlier
                // in this same page
                if !self.seen.insert(id.clone()) {
                    continue;
                }
            }
            self.records.push(record);
            stats.appended += 1;
        }

        stats
    }
}
