//! Similarity scoring between a track query and an engine candidate.
//!
//! Ranks live on a fixed 0..=100000 scale. The title similarity is squared so
//! weak partial matches fall off quickly; the artist similarity is linear.
//! No case folding or normalisation happens before comparing: downstream
//! thresholds are tuned against the raw strings.

use crate::models::{Candidate, TrackQuery};

pub const RANK_SCALE: u32 = 100_000;

const TITLE_WEIGHT: f64 = 0.7;
const ARTIST_WEIGHT: f64 = 0.3;

/// Length of the longest common subsequence of `a` and `b`, compared by
/// Unicode scalar value.
pub fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // Two rolling rows of the classic n*m table.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `2 * lcs / (len(a) + len(b))`, or 0 when both strings are empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 0.0;
    }
    (2 * lcs_len(a, b)) as f64 / total as f64
}

fn field_similarity(query: Option<&str>, candidate: Option<&str>) -> f64 {
    match (query, candidate) {
        (Some(q), Some(c)) if !q.is_empty() && !c.is_empty() => similarity(q, c),
        _ => 0.0,
    }
}

/// Scores how well `candidate` matches `query`.
pub fn score(query: &TrackQuery, candidate: &Candidate) -> u32 {
    let title = field_similarity(query.title.as_deref(), candidate.title.as_deref());
    let artist = field_similarity(query.artist.as_deref(), candidate.artist.as_deref());

    let weighted = title * title * TITLE_WEIGHT + artist * ARTIST_WEIGHT;
    let rank = (weighted * RANK_SCALE as f64).round();
    rank.clamp(0.0, RANK_SCALE as f64) as u32
}

/// Overwrites the rank of every candidate with its score against `query`.
pub fn score_all(query: &TrackQuery, candidates: &mut [Candidate]) {
    for candidate in candidates.iter_mut() {
        candidate.rank = score(query, candidate);
    }
}
