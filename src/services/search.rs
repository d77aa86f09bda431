//! Fans a lyric query out to several engines and merges the answers.
//!
//! Every search gets one controller task. Only the controller touches the
//! task's [`RankedCandidateList`] and only it emits [`SearchEvent`]s; engine
//! workers run in their own tasks and report back over a channel, so merges
//! are serialized and observers never race with a merge.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

use crate::engines::{EngineRegistry, with_uri_metadata};
use crate::error::{LyricError, LyricResult};
use crate::models::{Candidate, EngineId, TrackQuery};
use crate::ports::lyric_engine::{LyricEngine, RequestHints};
use crate::ranked_list::RankedCandidateList;
use crate::scoring;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Created,
    Dispatching,
    Aggregating,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// At least one candidate made it into the merged list.
    Success,
    /// No engine produced a candidate above the acceptance threshold.
    Failure,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct EngineFailure {
    pub engine: EngineId,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub task_id: TaskId,
    pub status: SearchStatus,
    /// Merged candidates, best first.
    pub candidates: Vec<Candidate>,
    pub failures: Vec<EngineFailure>,
}

#[derive(Debug, Clone)]
pub enum SearchEvent {
    Started {
        task_id: TaskId,
        engine: EngineId,
    },
    /// One engine reported; `Ok` carries the number of candidates it returned.
    EngineFinished {
        task_id: TaskId,
        engine: EngineId,
        result: Result<usize, String>,
    },
    /// Fired exactly once, after everything else.
    Completed(SearchOutcome),
}

enum WorkerReport {
    Started(EngineId),
    Finished {
        engine: EngineId,
        prescored: bool,
        result: LyricResult<Vec<Candidate>>,
    },
}

/// Starts searches against the engines of a registry.
pub struct SearchOrchestrator {
    registry: Arc<EngineRegistry>,
    capacity: usize,
    hints: RequestHints,
    next_id: AtomicU64,
}

impl SearchOrchestrator {
    pub fn new(registry: Arc<EngineRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            capacity,
            hints: RequestHints::default(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_hints(mut self, hints: RequestHints) -> Self {
        self.hints = hints;
        self
    }

    /// Starts a search on `engine_ids` (every registered engine when empty).
    ///
    /// Fails only for a query with neither title nor uri; engine problems are
    /// reported through the task's events and outcome. Must be called from
    /// within a tokio runtime.
    pub fn search(&self, query: TrackQuery, engine_ids: &[EngineId]) -> LyricResult<SearchTask> {
        let query = query.normalized();
        query.validate()?;
        let query = with_uri_metadata(query);

        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let resolved = self.registry.resolve(engine_ids);
        for unknown in &resolved.unknown {
            tracing::warn!(task_id, engine = %unknown, "Search requested an unknown engine");
        }

        let (state_tx, state_rx) = watch::channel(SearchState::Created);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let controller = SearchController {
            task_id,
            query: Arc::new(query),
            hints: self.hints.clone(),
            engines: resolved.engines,
            list: RankedCandidateList::new(self.capacity),
            failures: resolved
                .unknown
                .into_iter()
                .map(|engine| EngineFailure {
                    message: LyricError::UnknownEngine(engine.clone()).to_string(),
                    engine,
                })
                .collect(),
            produced_results: false,
            cancel: cancel.clone(),
            state: state_tx,
            events: event_tx,
        };

        let span = tracing::info_span!("search_task", task_id);
        let join = tokio::spawn(controller.run().instrument(span));

        Ok(SearchTask {
            id: task_id,
            state: state_rx,
            events: event_rx,
            cancel,
            join,
        })
    }
}

/// Handle to a running search.
pub struct SearchTask {
    id: TaskId,
    state: watch::Receiver<SearchState>,
    events: mpsc::UnboundedReceiver<SearchEvent>,
    cancel: CancellationToken,
    join: JoinHandle<SearchOutcome>,
}

impl SearchTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> SearchState {
        *self.state.borrow()
    }

    /// Requests cancellation. Results arriving afterwards are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this search, for callers that hand `wait` off.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the task has completed and all events
    /// were delivered.
    pub async fn next_event(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    /// Waits for completion, discarding events not yet read.
    pub async fn wait(self) -> SearchOutcome {
        let task_id = self.id;
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(task_id, error = %e, "Search controller died");
                SearchOutcome {
                    task_id,
                    status: SearchStatus::Failure,
                    candidates: Vec::new(),
                    failures: Vec::new(),
                }
            }
        }
    }
}

struct SearchController {
    task_id: TaskId,
    query: Arc<TrackQuery>,
    hints: RequestHints,
    engines: Vec<Arc<dyn LyricEngine>>,
    list: RankedCandidateList,
    failures: Vec<EngineFailure>,
    produced_results: bool,
    cancel: CancellationToken,
    state: watch::Sender<SearchState>,
    events: mpsc::UnboundedSender<SearchEvent>,
}

impl SearchController {
    async fn run(mut self) -> SearchOutcome {
        if self.cancel.is_cancelled() {
            return self.finish(SearchStatus::Cancelled);
        }

        self.set_state(SearchState::Dispatching);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let mut pending: HashSet<EngineId> = HashSet::new();
        for engine in std::mem::take(&mut self.engines) {
            let id = engine.id();
            if !pending.insert(id.clone()) {
                continue;
            }
            tokio::spawn(
                run_engine(
                    engine,
                    self.query.clone(),
                    self.hints.clone(),
                    self.cancel.clone(),
                    report_tx.clone(),
                )
                .in_current_span(),
            );
        }
        drop(report_tx);
        tracing::debug!(engines = pending.len(), "Search dispatched");
        self.set_state(SearchState::Aggregating);

        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(outstanding = pending.len(), "Search cancelled");
                    return self.finish(SearchStatus::Cancelled);
                }
                report = report_rx.recv() => match report {
                    Some(WorkerReport::Started(engine)) => {
                        self.emit(SearchEvent::Started { task_id: self.task_id, engine });
                    }
                    Some(WorkerReport::Finished { engine, prescored, result }) => {
                        if pending.remove(&engine) {
                            self.merge(engine, prescored, result);
                        }
                    }
                    // Workers only vanish silently after cancellation, which
                    // the biased branch above already handled.
                    None => break,
                }
            }
        }

        let status = if self.produced_results {
            SearchStatus::Success
        } else {
            SearchStatus::Failure
        };
        self.finish(status)
    }

    fn merge(&mut self, engine: EngineId, prescored: bool, result: LyricResult<Vec<Candidate>>) {
        match result {
            Ok(mut batch) => {
                let returned = batch.len();
                if !prescored {
                    scoring::score_all(&self.query, &mut batch);
                }
                for candidate in batch.iter_mut() {
                    candidate.engine = engine.clone();
                }
                let admitted = self.list.extend(batch);
                if admitted > 0 {
                    self.produced_results = true;
                }
                tracing::debug!(%engine, returned, admitted, "Merged engine results");
                self.emit(SearchEvent::EngineFinished {
                    task_id: self.task_id,
                    engine,
                    result: Ok(returned),
                });
            }
            Err(e) => {
                tracing::warn!(%engine, error = %e, "Engine search failed");
                let message = e.to_string();
                self.failures.push(EngineFailure {
                    engine: engine.clone(),
                    message: message.clone(),
                });
                self.emit(SearchEvent::EngineFinished {
                    task_id: self.task_id,
                    engine,
                    result: Err(message),
                });
            }
        }
    }

    fn finish(&mut self, status: SearchStatus) -> SearchOutcome {
        self.set_state(match status {
            SearchStatus::Cancelled => SearchState::Cancelled,
            SearchStatus::Success | SearchStatus::Failure => SearchState::Completed,
        });
        let list = std::mem::take(&mut self.list);
        let outcome = SearchOutcome {
            task_id: self.task_id,
            status,
            candidates: list.into_vec(),
            failures: std::mem::take(&mut self.failures),
        };
        tracing::info!(
            status = ?outcome.status,
            candidates = outcome.candidates.len(),
            "Search finished"
        );
        self.emit(SearchEvent::Completed(outcome.clone()));
        outcome
    }

    fn set_state(&self, state: SearchState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: SearchEvent) {
        // Nobody listening is fine; the outcome is still returned by `wait`.
        let _ = self.events.send(event);
    }
}

/// One engine's unit of work. Dropping the engine future on cancellation is
/// the engine's cancel hook; a panicking engine is reported as a failure.
#[instrument(skip_all, fields(engine = %engine.id()))]
async fn run_engine(
    engine: Arc<dyn LyricEngine>,
    query: Arc<TrackQuery>,
    hints: RequestHints,
    cancel: CancellationToken,
    reports: mpsc::UnboundedSender<WorkerReport>,
) {
    let id = engine.id();
    let prescored = engine.scores_results();
    let _ = reports.send(WorkerReport::Started(id.clone()));

    // The call itself sits inside the future so a panic at call time is
    // caught as well.
    let search = AssertUnwindSafe(async { engine.search(&query, &hints).await }).catch_unwind();
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = search => result,
    };

    let result = result.unwrap_or_else(|_| {
        Err(LyricError::network(id.as_str(), "engine panicked during search"))
    });
    let _ = reports.send(WorkerReport::Finished {
        engine: id,
        prescored,
        result,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::lyric_engine::MockLyricEngine;
    use crate::ranked_list::ACCEPTANCE_THRESHOLD;
    use crate::test_utils::{PendingEngine, mock_engine};

    fn query() -> TrackQuery {
        TrackQuery::new().with_title("Hey Jude").with_artist("The Beatles")
    }

    fn hit(engine: &str, url: &str, title: &str, artist: &str) -> Candidate {
        Candidate::new(EngineId::new(engine), url)
            .with_title(title)
            .with_artist(artist)
    }

    fn orchestrator(engines: Vec<Arc<dyn LyricEngine>>) -> SearchOrchestrator {
        let mut registry = EngineRegistry::new();
        for engine in engines {
            registry.register(engine).unwrap();
        }
        SearchOrchestrator::new(Arc::new(registry), 10)
    }

    async fn drain(task: &mut SearchTask) -> Vec<SearchEvent> {
        let mut events = Vec::new();
        while let Some(event) = task.next_event().await {
            events.push(event);
        }
        events
    }

    fn completed(events: &[SearchEvent]) -> Vec<&SearchOutcome> {
        events
            .iter()
            .filter_map(|event| match event {
                SearchEvent::Completed(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected() {
        let orchestrator = orchestrator(vec![]);
        let result = orchestrator.search(TrackQuery::new().with_artist("x"), &[]);
        assert!(matches!(result, Err(LyricError::InvalidQuery)));
    }

    #[tokio::test]
    async fn test_task_ids_are_monotonic() {
        let orchestrator = orchestrator(vec![]);
        let first = orchestrator.search(query(), &[]).unwrap();
        let second = orchestrator.search(query(), &[]).unwrap();
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let mut e1 = mock_engine("e1");
        e1.expect_search().times(1).returning(|_, _| {
            Ok(vec![
                hit("e1", "e1/exact", "Hey Jude", "The Beatles"),
                hit("e1", "e1/close", "Hey Jude (Remastered)", "The Beatles"),
            ])
        });
        let mut e2 = mock_engine("e2");
        e2.expect_search()
            .times(1)
            .returning(|_, _| Err(LyricError::network("e2", "connection refused")));
        let mut e3 = mock_engine("e3");
        e3.expect_search().times(1).returning(|_, _| {
            Ok(vec![
                hit("e3", "e3/exact", "Hey Jude", "Beatles"),
                hit("e3", "e3/junk", "Yesterday", "Someone Else"),
            ])
        });

        let orchestrator = orchestrator(vec![Arc::new(e1), Arc::new(e2), Arc::new(e3)]);
        let mut task = orchestrator.search(query(), &[]).unwrap();
        let events = drain(&mut task).await;
        let outcome = task.wait().await;

        assert_eq!(outcome.status, SearchStatus::Success);
        assert!(
            outcome
                .candidates
                .iter()
                .all(|c| c.engine.as_str() == "e1" || c.engine.as_str() == "e3")
        );
        let urls: Vec<&str> = outcome.candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls[0], "e1/exact");
        assert!(urls.contains(&"e3/exact"));
        assert!(!urls.contains(&"e3/junk"));
        assert!(
            outcome
                .candidates
                .windows(2)
                .all(|w| w[0].rank >= w[1].rank)
        );
        assert!(outcome.candidates.iter().all(|c| c.rank >= ACCEPTANCE_THRESHOLD));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].engine, EngineId::new("e2"));

        assert_eq!(completed(&events).len(), 1);
        assert!(matches!(events.last(), Some(SearchEvent::Completed(_))));
        let started = events
            .iter()
            .filter(|e| matches!(e, SearchEvent::Started { .. }))
            .count();
        assert_eq!(started, 3);
    }

    #[tokio::test]
    async fn test_all_engines_failing_is_failure() {
        let mut e1 = mock_engine("e1");
        e1.expect_search()
            .returning(|_, _| Err(LyricError::parse("e1", "garbage")));
        let mut e2 = mock_engine("e2");
        e2.expect_search().returning(|_, _| Ok(Vec::new()));

        let orchestrator = orchestrator(vec![Arc::new(e1), Arc::new(e2)]);
        let outcome = orchestrator.search(query(), &[]).unwrap().wait().await;

        assert_eq!(outcome.status, SearchStatus::Failure);
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_no_known_engine_fails_immediately() {
        let orchestrator = orchestrator(vec![]);
        let mut task = orchestrator
            .search(query(), &[EngineId::new("nope")])
            .unwrap();
        let events = drain(&mut task).await;
        let outcome = task.wait().await;

        assert_eq!(outcome.status, SearchStatus::Failure);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(completed(&events).len(), 1);
    }

    #[tokio::test]
    async fn test_only_requested_engines_run() {
        let mut e1 = mock_engine("e1");
        e1.expect_search().never();
        let mut e2 = mock_engine("e2");
        e2.expect_search()
            .times(1)
            .returning(|_, _| Ok(vec![hit("e2", "e2/a", "Hey Jude", "The Beatles")]));

        let orchestrator = orchestrator(vec![Arc::new(e1), Arc::new(e2)]);
        let outcome = orchestrator
            .search(query(), &[EngineId::new("e2")])
            .unwrap()
            .wait()
            .await;

        assert_eq!(outcome.status, SearchStatus::Success);
        assert_eq!(outcome.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_prescored_results_keep_engine_rank() {
        let mut e1 = MockLyricEngine::new();
        e1.expect_id().return_const(EngineId::new("e1"));
        e1.expect_display_name().return_const("e1".to_string());
        e1.expect_scores_results().return_const(true);
        e1.expect_search().returning(|_, _| {
            // Would score 0 against the query if rescored.
            Ok(vec![Candidate::new(EngineId::new("e1"), "e1/a").with_rank(88_000)])
        });

        let orchestrator = orchestrator(vec![Arc::new(e1)]);
        let outcome = orchestrator.search(query(), &[]).unwrap().wait().await;

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].rank, 88_000);
    }

    #[tokio::test]
    async fn test_cancel_before_any_response() {
        let orchestrator = orchestrator(vec![
            Arc::new(PendingEngine::new("slow1")),
            Arc::new(PendingEngine::new("slow2")),
        ]);
        let mut task = orchestrator.search(query(), &[]).unwrap();
        task.cancel();

        let events = drain(&mut task).await;
        let state = task.state();
        let outcome = task.wait().await;

        let completions = completed(&events);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].status, SearchStatus::Cancelled);
        assert!(completions[0].candidates.is_empty());
        assert_eq!(outcome.status, SearchStatus::Cancelled);
        assert_eq!(state, SearchState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_engines_are_in_flight() {
        let orchestrator = orchestrator(vec![Arc::new(PendingEngine::new("slow"))]);
        let mut task = orchestrator.search(query(), &[]).unwrap();

        // Wait until the engine has actually started before cancelling.
        match task.next_event().await {
            Some(SearchEvent::Started { engine, .. }) => assert_eq!(engine.as_str(), "slow"),
            other => panic!("unexpected event: {other:?}"),
        }
        task.cancel();

        let events = drain(&mut task).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            SearchEvent::Completed(outcome) => {
                assert_eq!(outcome.status, SearchStatus::Cancelled);
                assert!(outcome.candidates.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_state_reaches_completed() {
        let mut e1 = mock_engine("e1");
        e1.expect_search()
            .returning(|_, _| Ok(vec![hit("e1", "e1/a", "Hey Jude", "The Beatles")]));
        let orchestrator = orchestrator(vec![Arc::new(e1)]);
        let mut task = orchestrator.search(query(), &[]).unwrap();
        drain(&mut task).await;
        assert_eq!(task.state(), SearchState::Completed);
    }

    #[tokio::test]
    async fn test_capacity_bounds_merged_list() {
        let mut e1 = mock_engine("e1");
        e1.expect_search().returning(|_, _| {
            Ok((0..8)
                .map(|i| hit("e1", &format!("e1/{i}"), "Hey Jude", "The Beatles"))
                .collect())
        });
        let mut e2 = mock_engine("e2");
        e2.expect_search().returning(|_, _| {
            Ok((0..8)
                .map(|i| hit("e2", &format!("e2/{i}"), "Hey Jude", "The Beatles"))
                .collect())
        });

        let outcome = orchestrator(vec![Arc::new(e1), Arc::new(e2)])
            .search(query(), &[])
            .unwrap()
            .wait()
            .await;
        assert_eq!(outcome.candidates.len(), 10);
    }

    #[tokio::test]
    async fn test_below_threshold_results_are_failure() {
        let mut e1 = mock_engine("e1");
        e1.expect_search()
            .times(1)
            .returning(|_, _| Ok(vec![hit("e1", "e1/junk", "zzzz", "nobody")]));

        let outcome = orchestrator(vec![Arc::new(e1)])
            .search(query(), &[])
            .unwrap()
            .wait()
            .await;

        assert_eq!(outcome.status, SearchStatus::Failure);
        assert!(outcome.candidates.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_uri_only_query_ranks_against_file_name() {
        let mut e1 = mock_engine("e1");
        e1.expect_search()
            .withf(|query, _| {
                query.title.as_deref() == Some("Bicycle Race")
                    && query.artist.as_deref() == Some("Queen")
            })
            .times(1)
            .returning(|_, _| Ok(vec![hit("e1", "e1/a", "Bicycle Race", "Queen")]));

        let outcome = orchestrator(vec![Arc::new(e1)])
            .search(
                TrackQuery::new().with_uri("file:///m/Queen%20-%20Bicycle%20Race.flac"),
                &[],
            )
            .unwrap()
            .wait()
            .await;

        assert_eq!(outcome.status, SearchStatus::Success);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].rank, 100_000);
    }

    #[tokio::test]
    async fn test_panicking_engine_is_isolated() {
        let mut broken = mock_engine("broken");
        broken
            .expect_search()
            .returning(|_, _| panic!("engine blew up"));
        let mut healthy = mock_engine("healthy");
        healthy
            .expect_search()
            .returning(|_, _| Ok(vec![hit("healthy", "h/a", "Hey Jude", "The Beatles")]));

        let outcome = orchestrator(vec![Arc::new(broken), Arc::new(healthy)])
            .search(query(), &[])
            .unwrap()
            .wait()
            .await;

        assert_eq!(outcome.status, SearchStatus::Success);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].engine, EngineId::new("broken"));
    }
}
