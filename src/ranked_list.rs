use crate::models::Candidate;
use crate::scoring::RANK_SCALE;

/// Candidates ranked below half of the scale are never admitted.
pub const ACCEPTANCE_THRESHOLD: u32 = RANK_SCALE / 2;

pub const DEFAULT_CAPACITY: usize = 20;

/// Bounded list of candidates kept in descending rank order.
#[derive(Debug, Clone)]
pub struct RankedCandidateList {
    entries: Vec<Candidate>,
    capacity: usize,
}

impl Default for RankedCandidateList {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RankedCandidateList {
    pub fn new(capacity: usize) -> Self {
        RankedCandidateList {
            entries: Vec::with_capacity(capacity.min(64) + 1),
            capacity,
        }
    }

    /// Inserts `candidate` at its rank position.
    ///
    /// Returns `false` when the candidate was rejected, either because it is
    /// below [`ACCEPTANCE_THRESHOLD`] or because it fell off the tail.
    /// Equal ranks keep the incumbent first.
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        if candidate.rank < ACCEPTANCE_THRESHOLD || self.capacity == 0 {
            return false;
        }

        let mut pos = self.entries.len();
        while pos > 0 && self.entries[pos - 1].rank < candidate.rank {
            pos -= 1;
        }

        if pos >= self.capacity {
            return false;
        }
        self.entries.insert(pos, candidate);
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
        true
    }

    /// Merges a batch in order, returning how many candidates were admitted.
    pub fn extend<I: IntoIterator<Item = Candidate>>(&mut self, batch: I) -> usize {
        batch
            .into_iter()
            .map(|candidate| self.insert(candidate))
            .filter(|admitted| *admitted)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.entries
    }
}
