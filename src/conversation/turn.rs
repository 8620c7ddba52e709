//! Turn state and the reducer that folds canonical events into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalized::{CanonicalEvent, WebResult};
use crate::source::{Source, host_of};

/// Answer shown when a turn ends without a final answer.
pub const FAILURE_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// Progress phase of a turn. Ordered; a turn only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Search,
    Results,
    Crawl,
    Analyze,
    Answer,
    Done,
}

/// Identifier of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Search,
    Results,
    Crawl,
    Analyze,
    Answer,
}

impl StepId {
    /// All steps in plan order.
    pub const ALL: [StepId; 5] = [
        StepId::Search,
        StepId::Results,
        StepId::Crawl,
        StepId::Analyze,
        StepId::Answer,
    ];

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            StepId::Search => "Searching the web",
            StepId::Results => "Reading search results",
            StepId::Crawl => "Crawling sources",
            StepId::Analyze => "Analyzing sources",
            StepId::Answer => "Writing the answer",
        }
    }

    fn for_phase(phase: Phase) -> Option<StepId> {
        match phase {
            Phase::Search => Some(StepId::Search),
            Phase::Results => Some(StepId::Results),
            Phase::Crawl => Some(StepId::Crawl),
            Phase::Analyze => Some(StepId::Analyze),
            Phase::Answer => Some(StepId::Answer),
            Phase::Done => None,
        }
    }
}

/// Status of a plan step. Ordered; a step never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
}

/// A named milestone of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: StepId,
    pub label: String,
    pub status: StepStatus,
}

impl PlanStep {
    fn advance(&mut self, status: StepStatus) -> bool {
        if status > self.status {
            self.status = status;
            true
        } else {
            false
        }
    }
}

/// State of one question/answer exchange.
///
/// Owned by a [`TurnReducer`]; everything else only sees clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    /// Turn identifier.
    pub id: String,
    /// The user's question.
    pub question: String,
    /// When the turn was created.
    pub created_at: DateTime<Utc>,
    /// Current phase, `None` before the first event and after a failure.
    pub phase: Option<Phase>,
    /// Fixed, ordered plan.
    pub plan_steps: Vec<PlanStep>,
    /// Answer text so far.
    pub accumulated_text: String,
    /// Result hosts and crawled URLs, insertion ordered, without duplicates.
    pub urls: Vec<String>,
    /// Citation sources.
    pub sources: Vec<Source>,
    /// Whether the turn has reached a final state.
    pub terminal: bool,
    /// Failure reason when the turn ended without a final answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnState {
    /// Fresh state for `question` with every plan step pending.
    pub fn new(question: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), question)
    }

    /// Fresh state with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            created_at: Utc::now(),
            phase: None,
            plan_steps: StepId::ALL
                .iter()
                .map(|&id| PlanStep {
                    id,
                    label: id.label().to_string(),
                    status: StepStatus::Pending,
                })
                .collect(),
            accumulated_text: String::new(),
            urls: Vec::new(),
            sources: Vec::new(),
            terminal: false,
            error: None,
        }
    }

    /// Status of one plan step.
    pub fn step_status(&self, id: StepId) -> StepStatus {
        self.plan_steps
            .iter()
            .find(|s| s.id == id)
            .map_or(StepStatus::Pending, |s| s.status)
    }

    /// Whether the turn ended through the failure path.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Folds canonical events into a [`TurnState`], one at a time.
#[derive(Debug, Clone)]
pub struct TurnReducer {
    state: TurnState,
    late_citations_taken: bool,
}

impl TurnReducer {
    /// Start a turn for `question`.
    pub fn new(question: impl Into<String>) -> Self {
        Self::from_state(TurnState::new(question))
    }

    /// Start from an existing fresh state (e.g. one registered in a session).
    pub fn from_state(state: TurnState) -> Self {
        Self {
            state,
            late_citations_taken: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Read-only copy of the current state.
    pub fn snapshot(&self) -> TurnState {
        self.state.clone()
    }

    /// Consume the reducer, returning its state.
    pub fn into_state(self) -> TurnState {
        self.state
    }

    /// Apply one event. Returns whether the state changed.
    ///
    /// Out-of-order events are accepted; phase and step statuses never move
    /// backward. After the turn is terminal only a first late `Citations`
    /// event has any effect.
    pub fn apply(&mut self, event: &CanonicalEvent) -> bool {
        if self.state.terminal {
            return self.apply_after_terminal(event);
        }

        let changed = match event {
            CanonicalEvent::InitialQuery { .. } => self.enter(Phase::Search),
            CanonicalEvent::SearchWeb { .. } => self.enter(Phase::Results),
            CanonicalEvent::SearchResults { web_results } => {
                let entered = self.enter(Phase::Crawl);
                self.add_result_hosts(web_results) || entered
            }
            CanonicalEvent::UrlCrawlUpdate { url } => self.add_crawled(url),
            CanonicalEvent::ThoughtProcessUpdate => self.enter(Phase::Analyze),
            CanonicalEvent::TextChunk { text } => {
                let entered = self.enter(Phase::Answer);
                self.state.accumulated_text.push_str(text);
                entered || !text.is_empty()
            }
            CanonicalEvent::FinalAnswer { text } => {
                self.complete(text);
                true
            }
            CanonicalEvent::Citations { sources } => {
                self.state.sources.clone_from(sources);
                true
            }
        };

        tracing::trace!(
            name: "turn.event.applied",
            turn_id = %self.state.id,
            kind = event.kind(),
            changed,
            phase = ?self.state.phase,
            "Event applied"
        );
        changed
    }

    fn apply_after_terminal(&mut self, event: &CanonicalEvent) -> bool {
        match event {
            CanonicalEvent::Citations { sources } if !self.late_citations_taken => {
                self.late_citations_taken = true;
                self.state.sources.clone_from(sources);
                true
            }
            _ => {
                tracing::debug!(
                    name: "turn.event.ignored",
                    turn_id = %self.state.id,
                    kind = event.kind(),
                    "Ignoring event after terminal state"
                );
                false
            }
        }
    }

    /// Drive the turn to a terminal failure state.
    ///
    /// Has no effect on a turn that is already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state.terminal {
            return;
        }
        let reason = reason.into();
        tracing::warn!(
            name: "turn.failed",
            turn_id = %self.state.id,
            phase = ?self.state.phase,
            reason = %reason,
            "Turn ended without a final answer"
        );
        self.state.accumulated_text = FAILURE_MESSAGE.to_string();
        self.state.phase = None;
        self.state.terminal = true;
        self.state.error = Some(reason);
    }

    /// Signal the end of the event sequence.
    ///
    /// A turn that has not seen a final answer is failed.
    pub fn finish(&mut self) {
        if !self.state.terminal {
            self.fail("stream ended before a final answer");
        }
    }

    /// Move to `phase`: earlier steps complete, the phase's step activates.
    fn enter(&mut self, phase: Phase) -> bool {
        let mut changed = false;
        if self.state.phase.is_none_or(|current| phase > current) {
            self.state.phase = Some(phase);
            changed = true;
        }

        let Some(target) = StepId::for_phase(phase) else {
            return changed;
        };
        for step in &mut self.state.plan_steps {
            let status = if step.id < target {
                StepStatus::Completed
            } else if step.id == target {
                StepStatus::Active
            } else {
                continue;
            };
            changed |= step.advance(status);
        }
        changed
    }

    fn complete(&mut self, text: &str) {
        self.state.phase = Some(Phase::Done);
        for step in &mut self.state.plan_steps {
            step.advance(StepStatus::Completed);
        }
        self.state.accumulated_text = text.to_string();
        self.state.terminal = true;
        tracing::debug!(
            name: "turn.completed",
            turn_id = %self.state.id,
            answer_length = text.len(),
            urls = self.state.urls.len(),
            "Turn completed"
        );
    }

    fn add_result_hosts(&mut self, results: &[WebResult]) -> bool {
        let mut changed = false;
        for result in results {
            let Some(host) = host_of(&result.url) else {
                tracing::debug!(name: "turn.url.skipped", url = %result.url, "No host in URL");
                continue;
            };
            changed |= self.push_url(host);
        }
        changed
    }

    /// Crawl updates record the URL exactly as delivered.
    fn add_crawled(&mut self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() {
            return false;
        }
        self.push_url(url.to_string())
    }

    fn push_url(&mut self, url: String) -> bool {
        if self.state.urls.contains(&url) {
            return false;
        }
        self.state.urls.push(url);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn results(urls: &[&str]) -> CanonicalEvent {
        CanonicalEvent::SearchResults {
            web_results: urls
                .iter()
                .map(|u| WebResult {
                    url: (*u).to_string(),
                    ..WebResult::default()
                })
                .collect(),
        }
    }

    fn happy_path() -> Vec<CanonicalEvent> {
        vec![
            CanonicalEvent::InitialQuery { query: "q".to_string() },
            CanonicalEvent::SearchWeb { queries: vec![] },
            results(&["https://a.com"]),
            CanonicalEvent::ThoughtProcessUpdate,
            CanonicalEvent::TextChunk { text: "hi ".to_string() },
            CanonicalEvent::FinalAnswer { text: "hi there".to_string() },
        ]
    }

    #[test]
    fn test_new_turn_is_pending() {
        let state = TurnState::new("q");
        assert_eq!(state.phase, None);
        assert_eq!(state.plan_steps.len(), 5);
        assert!(state.plan_steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(!state.terminal);
    }

    #[test]
    fn test_happy_path() {
        let mut reducer = TurnReducer::new("q");
        for event in &happy_path() {
            reducer.apply(event);
        }

        let state = reducer.state();
        assert_eq!(state.phase, Some(Phase::Done));
        assert_eq!(state.accumulated_text, "hi there");
        assert_eq!(state.urls, vec!["a.com"]);
        assert!(state.plan_steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(state.terminal);
        assert!(!state.is_failed());
    }

    #[test]
    fn test_step_transitions() {
        let mut reducer = TurnReducer::new("q");

        reducer.apply(&CanonicalEvent::InitialQuery { query: "q".to_string() });
        assert_eq!(reducer.state().phase, Some(Phase::Search));
        assert_eq!(reducer.state().step_status(StepId::Search), StepStatus::Active);

        reducer.apply(&CanonicalEvent::SearchWeb { queries: vec![] });
        assert_eq!(reducer.state().phase, Some(Phase::Results));
        assert_eq!(reducer.state().step_status(StepId::Search), StepStatus::Completed);
        assert_eq!(reducer.state().step_status(StepId::Results), StepStatus::Active);

        reducer.apply(&results(&[]));
        assert_eq!(reducer.state().phase, Some(Phase::Crawl));
        assert_eq!(reducer.state().step_status(StepId::Crawl), StepStatus::Active);

        reducer.apply(&CanonicalEvent::ThoughtProcessUpdate);
        assert_eq!(reducer.state().step_status(StepId::Crawl), StepStatus::Completed);
        assert_eq!(reducer.state().step_status(StepId::Analyze), StepStatus::Active);

        reducer.apply(&CanonicalEvent::TextChunk { text: "a ".to_string() });
        reducer.apply(&CanonicalEvent::TextChunk { text: "b ".to_string() });
        assert_eq!(reducer.state().phase, Some(Phase::Answer));
        assert_eq!(reducer.state().step_status(StepId::Analyze), StepStatus::Completed);
        assert_eq!(reducer.state().step_status(StepId::Answer), StepStatus::Active);
        assert_eq!(reducer.state().accumulated_text, "a b ");
    }

    #[test]
    fn test_result_hosts_deduplicated_case_insensitive() {
        let mut reducer = TurnReducer::new("q");
        reducer.apply(&results(&[
            "https://A.com/x",
            "https://www.a.com/y",
            "https://b.org",
            "not a url",
        ]));
        assert_eq!(reducer.state().urls, vec!["a.com", "b.org"]);
    }

    #[test]
    fn test_crawl_update_idempotent() {
        let mut reducer = TurnReducer::new("q");
        let update = CanonicalEvent::UrlCrawlUpdate {
            url: "https://docs.rs/tokio".to_string(),
        };
        assert!(reducer.apply(&update));
        assert!(!reducer.apply(&update));
        assert_eq!(reducer.state().urls, vec!["https://docs.rs/tokio"]);
        assert_eq!(reducer.state().phase, None);
    }

    #[test]
    fn test_crawl_updates_keep_full_urls() {
        let mut reducer = TurnReducer::new("q");
        reducer.apply(&results(&["https://a.com"]));
        for url in ["https://a.com/x", "https://a.com/y", "intranet-page", "  "] {
            reducer.apply(&CanonicalEvent::UrlCrawlUpdate { url: url.to_string() });
        }
        assert_eq!(
            reducer.state().urls,
            vec!["a.com", "https://a.com/x", "https://a.com/y", "intranet-page"]
        );
    }

    #[test]
    fn test_post_terminal_immutability() {
        let mut reducer = TurnReducer::new("q");
        for event in &happy_path() {
            reducer.apply(event);
        }
        let before = reducer.snapshot();

        let late = [
            CanonicalEvent::SearchWeb { queries: vec![] },
            CanonicalEvent::TextChunk { text: "more".to_string() },
            CanonicalEvent::FinalAnswer { text: "other".to_string() },
            CanonicalEvent::ThoughtProcessUpdate,
            CanonicalEvent::UrlCrawlUpdate { url: "https://z.com".to_string() },
        ];
        for event in &late {
            assert!(!reducer.apply(event));
        }
        assert_eq!(reducer.state(), &before);
    }

    #[test]
    fn test_late_citations_accepted_once() {
        let mut reducer = TurnReducer::new("q");
        for event in &happy_path() {
            reducer.apply(event);
        }

        let first = vec![Source::new("A", "https://a.com", None, None)];
        let second = vec![Source::new("B", "https://b.com", None, None)];

        assert!(reducer.apply(&CanonicalEvent::Citations { sources: first.clone() }));
        assert!(!reducer.apply(&CanonicalEvent::Citations { sources: second }));
        assert_eq!(reducer.state().sources, first);
        assert_eq!(reducer.state().accumulated_text, "hi there");
    }

    #[test]
    fn test_out_of_order_does_not_regress() {
        let mut reducer = TurnReducer::new("q");
        reducer.apply(&CanonicalEvent::TextChunk { text: "x ".to_string() });
        let snapshot = reducer.snapshot();

        assert!(!reducer.apply(&CanonicalEvent::InitialQuery { query: "q".to_string() }));
        assert!(!reducer.apply(&CanonicalEvent::ThoughtProcessUpdate));
        assert_eq!(reducer.state(), &snapshot);
        assert_eq!(reducer.state().step_status(StepId::Search), StepStatus::Completed);
    }

    #[test]
    fn test_finish_without_final_fails() {
        let mut reducer = TurnReducer::new("q");
        reducer.apply(&CanonicalEvent::InitialQuery { query: "q".to_string() });
        reducer.apply(&results(&["https://a.com"]));
        reducer.finish();

        let state = reducer.state();
        assert!(state.terminal);
        assert!(state.is_failed());
        assert_eq!(state.phase, None);
        assert_eq!(state.accumulated_text, FAILURE_MESSAGE);
        assert_eq!(state.urls, vec!["a.com"]);
    }

    #[test]
    fn test_finish_after_final_is_noop() {
        let mut reducer = TurnReducer::new("q");
        for event in &happy_path() {
            reducer.apply(event);
        }
        reducer.finish();
        assert!(!reducer.state().is_failed());
        assert_eq!(reducer.state().phase, Some(Phase::Done));
    }

    fn arb_event() -> impl Strategy<Value = CanonicalEvent> {
        prop_oneof![
            Just(CanonicalEvent::InitialQuery { query: "q".to_string() }),
            Just(CanonicalEvent::SearchWeb { queries: vec![] }),
            "[a-c]{1,3}".prop_map(|h| results(&[format!("https://{h}.com").as_str()])),
            "[a-c]{1,3}".prop_map(|h| CanonicalEvent::UrlCrawlUpdate { url: format!("https://{h}.com") }),
            Just(CanonicalEvent::ThoughtProcessUpdate),
            "[a-z ]{0,6}".prop_map(|text| CanonicalEvent::TextChunk { text }),
            "[a-z ]{0,6}".prop_map(|text| CanonicalEvent::FinalAnswer { text }),
            Just(CanonicalEvent::Citations { sources: vec![] }),
        ]
    }

    proptest! {
        #[test]
        fn prop_phase_and_steps_are_monotonic(events in proptest::collection::vec(arb_event(), 0..24)) {
            let mut reducer = TurnReducer::new("q");
            let mut prev = reducer.snapshot();

            for event in &events {
                reducer.apply(event);
                let next = reducer.snapshot();

                prop_assert!(next.phase >= prev.phase);
                for (a, b) in prev.plan_steps.iter().zip(&next.plan_steps) {
                    prop_assert!(b.status >= a.status);
                }
                if prev.terminal {
                    prop_assert_eq!(&next.accumulated_text, &prev.accumulated_text);
                    prop_assert_eq!(next.phase, prev.phase);
                    prop_assert_eq!(&next.plan_steps, &prev.plan_steps);
                }
                let mut seen = std::collections::HashSet::new();
                prop_assert!(next.urls.iter().all(|u| seen.insert(u.clone())));
                prev = next;
            }
        }
    }
}
