//! Folding `cell-op` messages into a cell's runtime state.
//!
//! [`transition`] is a pure function: it never modifies its input and always
//! returns a fresh [`CellRuntimeState`]. Callers replace their stored state
//! wholesale with the result.

use serde::{Deserialize, Serialize};

use crate::cell::{CellChannel, CellMessage, Console, OutputMessage, RuntimeStatus};

/// Accumulated view of everything the kernel has reported about one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellRuntimeState {
    /// Latest reported status; `None` until the first status message.
    pub status: Option<RuntimeStatus>,
    /// Primary output (a value or an error).
    pub output: Option<OutputMessage>,
    /// Console outputs in arrival order.
    pub console_outputs: Vec<OutputMessage>,
    pub stale_inputs: bool,
    pub interrupted: bool,
    pub errored: bool,
    /// Kernel timestamp (seconds) of the current run's start.
    pub run_start_timestamp: Option<f64>,
    pub last_run_start_timestamp: Option<f64>,
    pub run_elapsed_ms: Option<f64>,
}

impl CellRuntimeState {
    /// True when the primary output is on the error channel.
    pub fn has_error_output(&self) -> bool {
        self.output.as_ref().is_some_and(OutputMessage::is_error)
    }
}

/// Fold one message into `state`, producing the next state.
pub fn transition(state: &CellRuntimeState, message: &CellMessage) -> CellRuntimeState {
    let mut next = state.clone();

    match message.status {
        Some(RuntimeStatus::Queued) => {
            next.interrupted = false;
            next.errored = false;
            next.run_elapsed_ms = None;
        }
        Some(RuntimeStatus::Running) => {
            next.interrupted = false;
            next.errored = false;
            next.run_elapsed_ms = None;
            next.run_start_timestamp = message.timestamp;
            next.last_run_start_timestamp = message.timestamp;
        }
        Some(RuntimeStatus::Idle) => {
            if let (Some(start), Some(end)) = (state.run_start_timestamp, message.timestamp) {
                next.run_elapsed_ms = Some((end - start) * 1000.0);
            }
            next.run_start_timestamp = None;
        }
        Some(RuntimeStatus::DisabledTransitively) => {
            next.run_elapsed_ms = None;
            next.run_start_timestamp = None;
        }
        Some(RuntimeStatus::Unknown) | None => {}
    }

    if let Some(status) = message.status {
        next.status = Some(status);
    }

    if let Some(output) = &message.output {
        if output.is_error() {
            next.errored = true;
            next.interrupted = output.is_interruption();
        }
        next.output = Some(output.clone());
    }

    if let Some(stale) = message.stale_inputs {
        next.stale_inputs = stale;
    }

    match &message.console {
        None => {}
        Some(Console::Many(entries)) if entries.is_empty() => next.console_outputs.clear(),
        Some(Console::Many(entries)) => {
            for entry in entries {
                append_console(&mut next.console_outputs, entry);
            }
        }
        Some(Console::One(entry)) => append_console(&mut next.console_outputs, entry),
    }

    next
}

/// Append a console entry, coalescing consecutive plain-text stdout/stderr writes.
fn append_console(outputs: &mut Vec<OutputMessage>, entry: &OutputMessage) {
    let coalescable = matches!(entry.channel, CellChannel::Stdout | CellChannel::Stderr)
        && entry.mimetype == "text/plain";

    if coalescable {
        if let Some(last) = outputs.last_mut() {
            if last.channel == entry.channel && last.mimetype == entry.mimetype {
                if let (Some(prev), Some(text)) = (last.data.as_str(), entry.data.as_str()) {
                    last.data = serde_json::Value::String(format!("{prev}{text}"));
                    last.timestamp = entry.timestamp.or(last.timestamp);
                    return;
                }
            }
        }
    }

    outputs.push(entry.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::MARIMO_ERROR_MIMETYPE;

    fn msg(status: RuntimeStatus) -> CellMessage {
        CellMessage::new("c1").with_status(status)
    }

    #[test]
    fn test_transition_does_not_modify_input() {
        let state = CellRuntimeState::default();
        let next = transition(&state, &msg(RuntimeStatus::Queued));
        assert_eq!(state, CellRuntimeState::default());
        assert_eq!(next.status, Some(RuntimeStatus::Queued));
    }

    #[test]
    fn test_running_then_idle_computes_elapsed() {
        let state = transition(
            &CellRuntimeState::default(),
            &msg(RuntimeStatus::Running).with_timestamp(1.0),
        );
        assert_eq!(state.run_start_timestamp, Some(1.0));

        let state = transition(&state, &msg(RuntimeStatus::Idle).with_timestamp(1.5));
        assert_eq!(state.run_elapsed_ms, Some(500.0));
        assert_eq!(state.run_start_timestamp, None);
        assert_eq!(state.last_run_start_timestamp, Some(1.0));
        assert_eq!(state.status, Some(RuntimeStatus::Idle));
    }

    #[test]
    fn test_status_kept_when_message_has_none() {
        let state = transition(&CellRuntimeState::default(), &msg(RuntimeStatus::Running));
        let state = transition(
            &state,
            &CellMessage::new("c1").with_output(OutputMessage::text(CellChannel::Output, "42")),
        );
        assert_eq!(state.status, Some(RuntimeStatus::Running));
        assert_eq!(state.output.unwrap().data, "42");
    }

    #[test]
    fn test_error_output_sets_errored() {
        let error = OutputMessage::new(
            CellChannel::MarimoError,
            MARIMO_ERROR_MIMETYPE,
            serde_json::json!([{"type": "exception"}]),
        );
        let state = transition(
            &CellRuntimeState::default(),
            &CellMessage::new("c1").with_output(error),
        );
        assert!(state.errored);
        assert!(!state.interrupted);
        assert!(state.has_error_output());

        let state = transition(&state, &msg(RuntimeStatus::Queued));
        assert!(!state.errored);
    }

    #[test]
    fn test_interruption_output_sets_interrupted() {
        let error = OutputMessage::new(
            CellChannel::MarimoError,
            MARIMO_ERROR_MIMETYPE,
            serde_json::json!([{"type": "interruption"}]),
        );
        let state = transition(
            &CellRuntimeState::default(),
            &CellMessage::new("c1").with_output(error),
        );
        assert!(state.interrupted);
    }

    #[test]
    fn test_stale_inputs_only_changes_when_present() {
        let state = transition(
            &CellRuntimeState::default(),
            &CellMessage::new("c1").with_stale_inputs(true),
        );
        assert!(state.stale_inputs);
        let state = transition(&state, &msg(RuntimeStatus::Running));
        assert!(state.stale_inputs);
        let state = transition(&state, &CellMessage::new("c1").with_stale_inputs(false));
        assert!(!state.stale_inputs);
    }

    #[test]
    fn test_console_appends_and_coalesces() {
        let state = transition(
            &CellRuntimeState::default(),
            &CellMessage::new("c1").with_console(vec![
                OutputMessage::text(CellChannel::Stdout, "a"),
                OutputMessage::text(CellChannel::Stdout, "b"),
                OutputMessage::text(CellChannel::Stderr, "c"),
            ]),
        );
        assert_eq!(state.console_outputs.len(), 2);
        assert_eq!(state.console_outputs[0].data, "ab");
        assert_eq!(state.console_outputs[1].data, "c");

        let mut single = CellMessage::new("c1");
        single.console = Some(Console::One(OutputMessage::text(CellChannel::Stderr, "d")));
        let state = transition(&state, &single);
        assert_eq!(state.console_outputs.len(), 2);
        assert_eq!(state.console_outputs[1].data, "cd");
    }

    #[test]
    fn test_empty_console_list_clears() {
        let state = transition(
            &CellRuntimeState::default(),
            &CellMessage::new("c1").with_console(vec![OutputMessage::text(CellChannel::Stdout, "a")]),
        );
        let state = transition(&state, &CellMessage::new("c1").with_console(vec![]));
        assert!(state.console_outputs.is_empty());
    }

    #[test]
    fn test_non_text_console_entries_are_not_merged() {
        let html = OutputMessage::new(CellChannel::Stdout, "text/html", "<b>x</b>");
        let state = transition(
            &CellRuntimeState::default(),
            &CellMessage::new("c1").with_console(vec![html.clone(), html]),
        );
        assert_eq!(state.console_outputs.len(), 2);
    }
}
