use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::app::Stumbler;
use crate::blocklist::Blocklist;
use crate::reporter::ScanEvent;
use crate::upload::{NetworkKind, UploadResult};

/// Requests that steer the running pipeline rather than feed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "camelCase")]
pub enum ControlCommand {
    UploadNow,
    Stats,
    SetNickname(Option<String>),
    SetWifiOnly(bool),
    SetNetwork(NetworkKind),
    ReplaceBlocklist(Blocklist),
}

/// One line of input: a scan event (`"type"`) or a control command
/// (`"command"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputLine {
    Event(ScanEvent),
    Control(ControlCommand),
}

pub fn parse_line(line: &str) -> Result<InputLine> {
    serde_json::from_str(line).with_context(|| format!("unrecognised input line: {line}"))
}

fn describe_upload(result: &UploadResult) -> Value {
    match result {
        UploadResult::Skipped(reason) => json!({ "status": "skipped", "reason": reason }),
        UploadResult::Completed(summary) => json!({ "status": "completed", "summary": summary }),
        UploadResult::Failed { summary, error } => json!({
            "status": "failed",
            "error": error.to_string(),
            "temporary": error.is_temporary(),
            "summary": summary,
        }),
        UploadResult::Cancelled(summary) => json!({ "status": "cancelled", "summary": summary }),
    }
}

/// Where command replies go; the reader loop prints them as they arrive.
pub type ReplySender = mpsc::UnboundedSender<Value>;

fn reply(replies: &ReplySender, value: Value) -> Result<()> {
    replies
        .send(value)
        .map_err(|_| anyhow!("reply channel closed"))
}

/// Applies `line` to the pipeline. Commands with a result send it on
/// `replies`; `uploadNow` answers once its cycle finishes, without holding
/// up the lines behind it.
pub async fn dispatch(app: &Stumbler, line: InputLine, replies: &ReplySender) -> Result<()> {
    match line {
        InputLine::Event(event) => app.reporter().send(event).await,
        InputLine::Control(ControlCommand::UploadNow) => {
            let upload = app.spawn_upload_now();
            let replies = replies.clone();
            tokio::spawn(async move {
                let value = match upload.await {
                    Ok(result) => describe_upload(&result),
                    Err(err) => json!({
                        "status": "failed",
                        "error": format!("upload task failed: {err}"),
                    }),
                };
                // the reader may already be gone during shutdown
                let _ = replies.send(value);
            });
            Ok(())
        }
        InputLine::Control(ControlCommand::Stats) => {
            let reporter = app.reporter_stats().await?;
            let storage = app.storage_stats().await?;
            reply(replies, json!({ "reporter": reporter, "storage": storage }))
        }
        InputLine::Control(ControlCommand::SetNickname(nickname)) => app.set_nickname(nickname),
        InputLine::Control(ControlCommand::SetWifiOnly(wifi_only)) => {
            app.set_wifi_only_upload_policy(wifi_only)
        }
        InputLine::Control(ControlCommand::SetNetwork(kind)) => {
            app.set_network(kind);
            Ok(())
        }
        InputLine::Control(ControlCommand::ReplaceBlocklist(lists)) => {
            app.replace_blocklist(lists);
            Ok(())
        }
    }
}
