//! Converting a cell's runtime state into host output groups.
//!
//! Outputs are partitioned by channel: one group per channel that has
//! anything to show, each group holding only items from that channel.
//! Groups come out in a fixed order: value, error, stdout, stderr, stdin.
//! The stdout group only holds plain text; rich console items (media, rich
//! debugger output) are shown with the value.

use std::collections::BTreeMap;

use marimo_protocol::{CellChannel, CellRuntimeState, OutputMessage};
use serde::Serialize;

/// Mimetype the host renders as a stdout stream.
pub const STDOUT_MIME: &str = "application/vnd.code.notebook.stdout";
/// Mimetype the host renders as a stderr stream.
pub const STDERR_MIME: &str = "application/vnd.code.notebook.stderr";

/// Host-side output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    Value,
    Error,
    Stdout,
    Stderr,
    Stdin,
}

impl From<CellChannel> for OutputChannel {
    fn from(channel: CellChannel) -> Self {
        match channel {
            CellChannel::Output | CellChannel::Media => OutputChannel::Value,
            CellChannel::MarimoError => OutputChannel::Error,
            CellChannel::Stderr => OutputChannel::Stderr,
            CellChannel::Stdin => OutputChannel::Stdin,
            CellChannel::Stdout | CellChannel::Pdb | CellChannel::Unknown => OutputChannel::Stdout,
        }
    }
}

impl OutputChannel {
    fn for_output(output: &OutputMessage) -> Self {
        match OutputChannel::from(output.channel) {
            OutputChannel::Stdout if output.mimetype != "text/plain" => OutputChannel::Value,
            channel => channel,
        }
    }
}

/// One displayable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputItem {
    pub mime: String,
    pub data: String,
}

/// All items of one channel, displayed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellOutput {
    pub channel: OutputChannel,
    pub items: Vec<OutputItem>,
}

fn item_for(output: &OutputMessage, channel: OutputChannel) -> OutputItem {
    let mime = match (channel, output.mimetype.as_str()) {
        (OutputChannel::Stdout, "text/plain") => STDOUT_MIME.to_string(),
        (OutputChannel::Stderr, "text/plain") => STDERR_MIME.to_string(),
        (_, mime) => mime.to_string(),
    };
    OutputItem {
        mime,
        data: output.data_as_text(),
    }
}

/// Build the host outputs for a cell.
pub fn build_cell_outputs(state: &CellRuntimeState) -> Vec<CellOutput> {
    let mut groups: BTreeMap<OutputChannel, Vec<OutputItem>> = BTreeMap::new();

    let primary = state.output.iter().filter(|o| !o.is_empty());
    for output in primary.chain(state.console_outputs.iter()) {
        let channel = OutputChannel::for_output(output);
        groups
            .entry(channel)
            .or_default()
            .push(item_for(output, channel));
    }

    groups
        .into_iter()
        .map(|(channel, items)| CellOutput { channel, items })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marimo_protocol::MARIMO_ERROR_MIMETYPE;

    fn error_output() -> OutputMessage {
        OutputMessage::new(
            CellChannel::MarimoError,
            MARIMO_ERROR_MIMETYPE,
            serde_json::json!([{"type": "exception", "msg": "boom"}]),
        )
    }

    #[test]
    fn test_empty_state_has_no_outputs() {
        assert!(build_cell_outputs(&CellRuntimeState::default()).is_empty());
    }

    #[test]
    fn test_stdout_stderr_and_error_form_three_groups() {
        let state = CellRuntimeState {
            output: Some(error_output()),
            console_outputs: vec![
                OutputMessage::text(CellChannel::Stdout, "hello\n"),
                OutputMessage::text(CellChannel::Stderr, "warning\n"),
            ],
            ..Default::default()
        };

        let outputs = build_cell_outputs(&state);

        assert_eq!(outputs.len(), 3);
        let channels: Vec<_> = outputs.iter().map(|o| o.channel).collect();
        assert_eq!(
            channels,
            vec![
                OutputChannel::Error,
                OutputChannel::Stdout,
                OutputChannel::Stderr
            ]
        );
        assert_eq!(outputs[0].items[0].mime, MARIMO_ERROR_MIMETYPE);
        assert_eq!(
            outputs[1].items,
            vec![OutputItem {
                mime: STDOUT_MIME.to_string(),
                data: "hello\n".to_string()
            }]
        );
        assert_eq!(outputs[2].items.len(), 1);
        assert_eq!(outputs[2].items[0].mime, STDERR_MIME);
        assert_eq!(outputs[2].items[0].data, "warning\n");
    }

    #[test]
    fn test_value_output_comes_first() {
        let state = CellRuntimeState {
            output: Some(OutputMessage::new(CellChannel::Output, "text/html", "<b>42</b>")),
            console_outputs: vec![OutputMessage::text(CellChannel::Stdout, "log")],
            ..Default::default()
        };

        let outputs = build_cell_outputs(&state);
        assert_eq!(outputs[0].channel, OutputChannel::Value);
        assert_eq!(outputs[0].items[0].mime, "text/html");
        assert_eq!(outputs[0].items[0].data, "<b>42</b>");
    }

    #[test]
    fn test_empty_primary_output_is_skipped() {
        let state = CellRuntimeState {
            output: Some(OutputMessage::text(CellChannel::Output, "")),
            ..Default::default()
        };
        assert!(build_cell_outputs(&state).is_empty());
    }

    #[test]
    fn test_interleaved_console_entries_are_grouped_by_channel() {
        let state = CellRuntimeState {
            console_outputs: vec![
                OutputMessage::text(CellChannel::Stdout, "a"),
                OutputMessage::text(CellChannel::Stderr, "b"),
                OutputMessage::text(CellChannel::Stdout, "c"),
                OutputMessage::text(CellChannel::Stdin, "name?"),
            ],
            ..Default::default()
        };

        let outputs = build_cell_outputs(&state);
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].channel, OutputChannel::Stdout);
        let stdout: Vec<_> = outputs[0].items.iter().map(|i| i.data.as_str()).collect();
        assert_eq!(stdout, vec!["a", "c"]);
        assert_eq!(outputs[2].channel, OutputChannel::Stdin);
        assert_eq!(outputs[2].items[0].mime, "text/plain");
    }

    #[test]
    fn test_structured_data_is_serialized_as_json() {
        let outputs = build_cell_outputs(&CellRuntimeState {
            output: Some(error_output()),
            ..Default::default()
        });
        let parsed: serde_json::Value = serde_json::from_str(&outputs[0].items[0].data).unwrap();
        assert_eq!(parsed[0]["msg"], "boom");
    }

    #[test]
    fn test_rich_console_items_are_shown_with_the_value() {
        let state = CellRuntimeState {
            console_outputs: vec![
                OutputMessage::text(CellChannel::Stdout, "plotting\n"),
                OutputMessage::new(CellChannel::Media, "image/png", "iVBORw0KGgo="),
                OutputMessage::new(CellChannel::Pdb, "text/html", "<pre>(Pdb)</pre>"),
                OutputMessage::text(CellChannel::Pdb, "(Pdb) "),
            ],
            ..Default::default()
        };

        let outputs = build_cell_outputs(&state);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].channel, OutputChannel::Value);
        let value_mimes: Vec<_> = outputs[0].items.iter().map(|i| i.mime.as_str()).collect();
        assert_eq!(value_mimes, vec!["image/png", "text/html"]);
        assert_eq!(outputs[1].channel, OutputChannel::Stdout);
        assert!(outputs[1].items.iter().all(|i| i.mime == STDOUT_MIME));
        assert_eq!(outputs[1].items.len(), 2);
    }
}
