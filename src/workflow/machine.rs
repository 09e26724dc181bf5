use crate::api::RefinedState;
use crate::stream::{UpdatePayload, WorkflowEvent};

use super::state::{ActiveTab, Message, Role, WorkflowSnapshot, WorkflowStatus};

/// Error text shown when a stream drops or carries garbage.
pub const CONNECTION_LOST: &str = "Connection lost";

/// The effect of applying one input to a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Absorbed without a status change.
    Stay,
    /// Moved to another phase within the turn.
    Phase(WorkflowStatus),
    /// The turn ended; carries the status the workflow settled in.
    TurnEnded(WorkflowStatus),
    /// The turn or request failed with the given message.
    Failed(String),
}

/// Pure transition rules for a [`WorkflowSnapshot`].
///
/// Every method mutates the snapshot in place and never performs I/O, so the
/// store can apply them under its publish step and tests can drive them
/// directly.
pub struct WorkflowMachine;

impl WorkflowMachine {
    /// Begin a fresh workflow. The transcript always restarts with the input.
    pub fn start(s: &mut WorkflowSnapshot, input: &str) {
        s.messages = vec![Message::user(input)];
        s.streaming_buffer.clear();
        s.error = None;
        s.status = WorkflowStatus::Clarifying;
        s.is_streaming = true;
    }

    /// Begin a continuation turn with the user's answer.
    pub fn answer(s: &mut WorkflowSnapshot, answer: &str) {
        s.messages.push(Message::user(answer));
        s.streaming_buffer.clear();
        s.error = None;
        s.status = WorkflowStatus::Clarifying;
        s.is_streaming = true;
    }

    /// Reconcile one stream event.
    pub fn apply(s: &mut WorkflowSnapshot, event: WorkflowEvent) -> Transition {
        match event {
            WorkflowEvent::Metadata { thread_id } => {
                s.thread_id = Some(thread_id);
                Transition::Stay
            }
            WorkflowEvent::Token { content } => {
                s.streaming_buffer.push_str(&content);
                Transition::Stay
            }
            WorkflowEvent::Status { status } => {
                let next = WorkflowStatus::from_server_phase(&status);
                s.status = next;
                Transition::Phase(next)
            }
            WorkflowEvent::Update(payload) => Self::end_turn(s, payload),
            WorkflowEvent::Error { detail } => Self::fail(s, detail),
        }
    }

    fn end_turn(s: &mut WorkflowSnapshot, payload: UpdatePayload) -> Transition {
        let completed = payload.is_completed();
        let UpdatePayload {
            message,
            questions,
            variants,
            evaluations,
            ..
        } = payload;

        if !s.streaming_buffer.is_empty() {
            let content = std::mem::take(&mut s.streaming_buffer);
            s.messages.push(Message::assistant(content));
        } else if let Some(message) = message.filter(|m| !m.is_empty()) {
            // Some turns produce no tokens at all; the final message stands in.
            if s.last_message().map(|m| m.role) != Some(Role::Assistant) {
                s.messages.push(Message::assistant(message));
            }
        }

        if let Some(variants) = variants {
            s.variants = variants;
        }
        if let Some(evaluations) = evaluations {
            s.evaluations = evaluations;
        }
        if let Some(questions) = questions {
            s.questions = questions;
        }

        s.is_streaming = false;
        if completed {
            s.status = WorkflowStatus::Completed;
            s.active_tab = ActiveTab::Arena;
        } else {
            s.status = WorkflowStatus::Clarifying;
        }
        Transition::TurnEnded(s.status)
    }

    /// Record a failure of the current turn.
    pub fn fail(s: &mut WorkflowSnapshot, detail: impl Into<String>) -> Transition {
        let detail = detail.into();
        s.error = Some(detail.clone());
        s.status = WorkflowStatus::Error;
        s.is_streaming = false;
        Transition::Failed(detail)
    }

    /// The stream ended without failing.
    pub fn stream_closed(s: &mut WorkflowSnapshot) {
        s.is_streaming = false;
    }

    /// Replace one variant's content. Returns false when `index` is out of range.
    pub fn update_variant(s: &mut WorkflowSnapshot, index: usize, content: String) -> bool {
        match s.variants.get_mut(index) {
            Some(variant) => {
                variant.content = content;
                true
            }
            None => false,
        }
    }

    pub fn begin_test(s: &mut WorkflowSnapshot) {
        s.is_testing = true;
    }

    pub fn test_succeeded(s: &mut WorkflowSnapshot, variant_id: String, output: String) {
        s.test_results.insert(variant_id, output);
        s.is_testing = false;
    }

    pub fn test_failed(s: &mut WorkflowSnapshot, detail: String) {
        s.error = Some(detail);
        s.is_testing = false;
    }

    pub fn begin_refine(s: &mut WorkflowSnapshot) {
        s.is_refining = true;
        s.status = WorkflowStatus::Generating;
    }

    /// Install the server's refined set wholesale.
    pub fn refine_succeeded(s: &mut WorkflowSnapshot, refined: RefinedState) -> Transition {
        s.variants = refined.generated_variants;
        s.evaluations = refined.evaluations;
        s.status = WorkflowStatus::Completed;
        s.is_refining = false;
        Transition::TurnEnded(WorkflowStatus::Completed)
    }

    pub fn refine_failed(s: &mut WorkflowSnapshot, detail: String) -> Transition {
        s.is_refining = false;
        Self::fail(s, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Variant;

    fn token(content: &str) -> WorkflowEvent {
        WorkflowEvent::Token {
            content: content.into(),
        }
    }

    fn update(status: &str) -> UpdatePayload {
        UpdatePayload {
            status: status.into(),
            message: None,
            questions: None,
            variants: None,
            evaluations: None,
        }
    }

    fn variant(title: &str, content: &str) -> Variant {
        Variant {
            title: title.into(),
            content: content.into(),
            model_used: None,
            evaluation: None,
        }
    }

    fn clarifying_snapshot() -> WorkflowSnapshot {
        let mut s = WorkflowSnapshot::default();
        WorkflowMachine::start(&mut s, "Write a support bot prompt");
        s
    }

    #[test]
    fn committed_message_is_token_concatenation() {
        let sequences: &[&[&str]] = &[
            &["a"],
            &["Sure", ", tell me ", "more."],
            &["", "x", "", "y"],
            &["multi\nline", " ✓ ", "unicode"],
        ];
        for tokens in sequences {
            let mut s = clarifying_snapshot();
            for t in *tokens {
                WorkflowMachine::apply(&mut s, token(t));
            }
            WorkflowMachine::apply(&mut s, WorkflowEvent::Update(update("clarifying")));

            let expected: String = tokens.concat();
            if expected.is_empty() {
                assert_eq!(s.messages.len(), 1);
            } else {
                assert_eq!(s.messages.last(), Some(&Message::assistant(expected)));
            }
            assert!(s.streaming_buffer.is_empty());
        }
    }

    #[test]
    fn start_resets_transcript_from_any_state() {
        let mut s = clarifying_snapshot();
        WorkflowMachine::apply(&mut s, token("partial"));
        WorkflowMachine::fail(&mut s, "boom");
        s.messages.push(Message::assistant("old"));

        WorkflowMachine::start(&mut s, "New idea");

        assert_eq!(s.messages, vec![Message::user("New idea")]);
        assert_eq!(s.status, WorkflowStatus::Clarifying);
        assert!(s.streaming_buffer.is_empty());
        assert!(s.error.is_none());
    }

    #[test]
    fn clarification_turn_scenario() {
        let mut s = clarifying_snapshot();

        let events = vec![
            WorkflowEvent::Metadata {
                thread_id: "t1".into(),
            },
            token("Sure"),
            token(", tell me more."),
            WorkflowEvent::Update(update("clarifying")),
        ];
        let transitions: Vec<Transition> = events
            .into_iter()
            .map(|e| WorkflowMachine::apply(&mut s, e))
            .collect();

        assert_eq!(
            transitions.last(),
            Some(&Transition::TurnEnded(WorkflowStatus::Clarifying))
        );
        assert_eq!(s.status, WorkflowStatus::Clarifying);
        assert_eq!(s.thread_id.as_deref(), Some("t1"));
        assert_eq!(
            s.messages,
            vec![
                Message::user("Write a support bot prompt"),
                Message::assistant("Sure, tell me more."),
            ]
        );
        assert!(s.streaming_buffer.is_empty());
        assert!(!s.is_streaming);
    }

    #[test]
    fn completion_turn_scenario() {
        let mut s = clarifying_snapshot();
        WorkflowMachine::apply(
            &mut s,
            WorkflowEvent::Metadata {
                thread_id: "t1".into(),
            },
        );
        WorkflowMachine::apply(&mut s, WorkflowEvent::Update(update("clarifying")));
        WorkflowMachine::answer(&mut s, "for refund requests");

        let t = WorkflowMachine::apply(
            &mut s,
            WorkflowEvent::Status {
                status: "generate".into(),
            },
        );
        assert_eq!(t, Transition::Phase(WorkflowStatus::Generating));
        assert_eq!(s.status, WorkflowStatus::Generating);

        let mut payload = update("completed");
        payload.variants = Some(vec![
            variant("A", "one"),
            variant("B", "two"),
            variant("C", "three"),
        ]);
        payload.evaluations = Some(
            [("A".to_string(), serde_json::json!({"clarity": 8}))]
                .into_iter()
                .collect(),
        );
        WorkflowMachine::apply(&mut s, WorkflowEvent::Update(payload));

        assert_eq!(s.status, WorkflowStatus::Completed);
        assert_eq!(s.active_tab, ActiveTab::Arena);
        assert_eq!(s.variants.len(), 3);
        assert_eq!(s.evaluations["A"]["clarity"], 8);
    }

    #[test]
    fn status_events_never_touch_transcript() {
        let mut s = clarifying_snapshot();
        WorkflowMachine::apply(&mut s, token("half"));
        for label in ["generate", "evaluate", "clarify", "weird"] {
            WorkflowMachine::apply(
                &mut s,
                WorkflowEvent::Status {
                    status: label.into(),
                },
            );
        }
        assert_eq!(s.messages.len(), 1);
        assert_eq!(s.streaming_buffer, "half");
        assert_eq!(s.status, WorkflowStatus::Clarifying);
    }

    #[test]
    fn fallback_message_used_when_no_tokens() {
        let mut s = clarifying_snapshot();
        let mut payload = update("clarifying");
        payload.message = Some("Who is the audience?".into());
        WorkflowMachine::apply(&mut s, WorkflowEvent::Update(payload));

        assert_eq!(
            s.messages.last(),
            Some(&Message::assistant("Who is the audience?"))
        );
    }

    #[test]
    fn fallback_message_skipped_after_assistant_entry() {
        let mut s = clarifying_snapshot();
        s.messages.push(Message::assistant("Already said"));
        let mut payload = update("clarifying");
        payload.message = Some("Said again".into());
        WorkflowMachine::apply(&mut s, WorkflowEvent::Update(payload));

        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[1].content, "Already said");
    }

    #[test]
    fn streamed_tokens_win_over_fallback_message() {
        let mut s = clarifying_snapshot();
        WorkflowMachine::apply(&mut s, token("streamed"));
        let mut payload = update("clarifying");
        payload.message = Some("final".into());
        WorkflowMachine::apply(&mut s, WorkflowEvent::Update(payload));

        assert_eq!(s.messages.len(), 2);
        assert_eq!(s.messages[1], Message::assistant("streamed"));
    }

    #[test]
    fn partial_update_keeps_prior_results() {
        let mut s = clarifying_snapshot();
        s.variants = vec![variant("A", "kept")];
        s.questions = vec!["q1".into()];

        WorkflowMachine::apply(&mut s, WorkflowEvent::Update(update("clarifying")));

        assert_eq!(s.variants, vec![variant("A", "kept")]);
        assert_eq!(s.questions, vec!["q1".to_string()]);
    }

    #[test]
    fn error_event_moves_to_error() {
        let mut s = clarifying_snapshot();
        let t = WorkflowMachine::apply(
            &mut s,
            WorkflowEvent::Error {
                detail: "LLM quota exceeded".into(),
            },
        );
        assert_eq!(t, Transition::Failed("LLM quota exceeded".into()));
        assert_eq!(s.status, WorkflowStatus::Error);
        assert_eq!(s.error.as_deref(), Some("LLM quota exceeded"));
        assert!(!s.is_streaming);
    }

    #[test]
    fn update_variant_touches_only_target() {
        let mut s = WorkflowSnapshot::default();
        s.variants = vec![variant("A", "one"), variant("B", "two"), variant("C", "three")];
        let before = s.variants.clone();

        assert!(WorkflowMachine::update_variant(&mut s, 1, "edited".into()));

        assert_eq!(s.variants[0], before[0]);
        assert_eq!(s.variants[2], before[2]);
        assert_eq!(s.variants[1].content, "edited");
        assert_eq!(s.variants[1].title, "B");
    }

    #[test]
    fn update_variant_out_of_range_is_noop() {
        let mut s = WorkflowSnapshot::default();
        s.variants = vec![variant("A", "one")];
        let before = s.clone();

        assert!(!WorkflowMachine::update_variant(&mut s, 5, "nope".into()));
        assert_eq!(s, before);
    }

    #[test]
    fn refine_success_replaces_results() {
        let mut s = WorkflowSnapshot::default();
        s.status = WorkflowStatus::Completed;
        s.variants = vec![variant("A", "old"), variant("B", "old")];

        WorkflowMachine::begin_refine(&mut s);
        assert!(s.is_refining);
        assert_eq!(s.status, WorkflowStatus::Generating);

        let t = WorkflowMachine::refine_succeeded(
            &mut s,
            RefinedState {
                generated_variants: vec![variant("A", "new")],
                evaluations: Default::default(),
            },
        );
        assert_eq!(t, Transition::TurnEnded(WorkflowStatus::Completed));
        assert_eq!(s.variants, vec![variant("A", "new")]);
        assert!(!s.is_refining);
        assert_eq!(s.status, WorkflowStatus::Completed);
    }

    #[test]
    fn refine_failure_moves_to_error() {
        let mut s = WorkflowSnapshot::default();
        s.status = WorkflowStatus::Completed;
        WorkflowMachine::begin_refine(&mut s);
        WorkflowMachine::refine_failed(&mut s, "API error (status 500): boom".into());

        assert!(!s.is_refining);
        assert_eq!(s.status, WorkflowStatus::Error);
        assert_eq!(s.error.as_deref(), Some("API error (status 500): boom"));
    }

    #[test]
    fn test_failure_leaves_results_untouched() {
        let mut s = WorkflowSnapshot::default();
        s.test_results.insert("v0".into(), "earlier".into());

        WorkflowMachine::begin_test(&mut s);
        assert!(s.is_testing);
        WorkflowMachine::test_failed(&mut s, "rejected".into());

        assert!(!s.is_testing);
        assert_eq!(s.error.as_deref(), Some("rejected"));
        assert_eq!(s.test_results.len(), 1);
        assert!(!s.test_results.contains_key("v1"));
    }
}
