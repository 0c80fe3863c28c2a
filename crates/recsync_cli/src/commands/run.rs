//! Run command implementation.
//!
//! Replays a JSON script of reads and writes against an in-memory store
//! configured from a server config, printing every reply and the version
//! notices the writes produced.

use super::{load_config, CliError};
use clap::ValueEnum;
use recsync_core::{RecordPointer, VersionNotice, WriteOperation, WriteTransaction};
use recsync_server::{Caller, GetRecordsRequest, RequestMessage, ResponseMessage, SyncServer};
use recsync_storage::MemoryStore;
use serde::Deserialize;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// One JSON document per line.
    Json,
}

/// A script of requests.
#[derive(Debug, Deserialize)]
pub struct Script {
    /// Steps, run in order.
    pub steps: Vec<Step>,
}

/// One scripted request.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    /// A write. `authorId` defaults to the caller, `transactionId` to a
    /// fresh UUID.
    #[serde(rename_all = "camelCase")]
    Write {
        /// Acting user; absent means unauthenticated.
        caller: Option<String>,
        /// Transaction id.
        transaction_id: Option<String>,
        /// Declared author.
        author_id: Option<String>,
        /// Operations.
        operations: Vec<WriteOperation>,
    },
    /// A read.
    #[serde(rename_all = "camelCase")]
    GetRecords {
        /// Acting user; absent means unauthenticated.
        caller: Option<String>,
        /// Records to fetch.
        pointers: Vec<RecordPointer>,
    },
}

impl Step {
    fn caller(&self) -> Option<&str> {
        match self {
            Step::Write { caller, .. } | Step::GetRecords { caller, .. } => caller.as_deref(),
        }
    }

    fn into_message(self) -> RequestMessage {
        match self {
            Step::Write {
                caller,
                transaction_id,
                author_id,
                operations,
            } => {
                let transaction_id =
                    transaction_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let author_id = author_id.or(caller).unwrap_or_default();
                RequestMessage::Write(WriteTransaction::new(transaction_id, author_id, operations))
            }
            Step::GetRecords { pointers, .. } => {
                RequestMessage::GetRecords(GetRecordsRequest::new(pointers))
            }
        }
    }
}

/// Result of a script run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Steps executed.
    pub steps: usize,
    /// Steps that returned an error reply.
    pub failed: usize,
    /// Notices published by the writes.
    pub notices: Vec<VersionNotice>,
    /// Notices that overflowed the notification buffer before printing.
    pub lagged: u64,
}

/// Runs the run command.
pub fn run(
    config_path: &Path,
    script_path: &Path,
    format: OutputFormat,
    strict: bool,
    out: &mut impl Write,
) -> Result<RunSummary, CliError> {
    let config = load_config(config_path)?;
    let script: Script = serde_json::from_str(&std::fs::read_to_string(script_path)?)?;

    let registry = config.build_registry()?;
    let store = Arc::new(MemoryStore::new());
    for table in registry.tables() {
        if let Some(physical) = registry.resolve(table) {
            store.create_table(physical);
        }
    }

    let auth = config.require_auth;
    let server = SyncServer::new(config, store)?;
    let mut notifications = server.subscribe();
    info!(steps = script.steps.len(), "running script");

    let mut summary = RunSummary::default();
    for (index, step) in script.steps.into_iter().enumerate() {
        let caller = match step.caller() {
            Some(user_id) => Some(authenticate(&server, user_id, auth)?),
            None => None,
        };
        let message = step.into_message();
        debug!(step = index + 1, "executing step");

        let response = server.handle_message(caller.as_ref(), message);
        summary.steps += 1;
        if matches!(response, ResponseMessage::Error(_)) {
            summary.failed += 1;
        }
        print_response(out, index + 1, &response, format)?;
    }

    server.flush_notifications();
    if let Some(rx) = notifications.as_mut() {
        loop {
            match rx.try_recv() {
                Ok(notice) => {
                    print_notice(out, &notice, format)?;
                    summary.notices.push(notice);
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification buffer overflowed, notices dropped");
                    summary.lagged += skipped;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
    server.shutdown();

    if strict && summary.failed > 0 {
        return Err(CliError::StepsFailed {
            failed: summary.failed,
            total: summary.steps,
        });
    }
    Ok(summary)
}

/// With auth enabled, goes through a real token; otherwise trusts the name.
fn authenticate(server: &SyncServer, user_id: &str, auth: bool) -> Result<Caller, CliError> {
    if auth {
        let token = server.issue_token(user_id)?;
        Ok(server.authenticate(&token)?)
    } else {
        Ok(Caller::new(user_id))
    }
}

fn print_response(
    out: &mut impl Write,
    step: usize,
    response: &ResponseMessage,
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", json!({ "step": step, "response": response }))?;
        }
        OutputFormat::Text => match response {
            ResponseMessage::GetRecords(reply) => {
                writeln!(
                    out,
                    "step {step}: read {} record(s) {}",
                    reply.record_map.len(),
                    serde_json::to_string(&reply.record_map)?
                )?;
            }
            ResponseMessage::Write(reply) => {
                let modified: Vec<String> =
                    reply.modified_records.iter().map(ToString::to_string).collect();
                writeln!(out, "step {step}: wrote [{}]", modified.join(", "))?;
            }
            ResponseMessage::Error(reply) => {
                write!(out, "step {step}: {} {}", reply.code, reply.message)?;
                if !reply.conflicting_records.is_empty() {
                    let records: Vec<String> = reply
                        .conflicting_records
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    write!(out, " [{}]", records.join(", "))?;
                }
                writeln!(out)?;
            }
        },
    }
    Ok(())
}

fn print_notice(
    out: &mut impl Write,
    notice: &VersionNotice,
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => writeln!(out, "{}", json!({ "notice": notice }))?,
        OutputFormat::Text if notice.deleted => {
            writeln!(out, "notice: {} deleted at v{}", notice.key, notice.version)?;
        }
        OutputFormat::Text => writeln!(out, "notice: {} v{}", notice.key, notice.version)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsync_testkit::json_file;

    fn config() -> tempfile::NamedTempFile {
        json_file(&json!({ "tables": [{ "name": "widgets", "physicalName": "app_widgets" }] }))
    }

    #[test]
    fn run_script() {
        let config = config();
        let script = json_file(&json!({
            "steps": [
                { "type": "write", "caller": "u1", "operations": [
                    { "type": "create", "table": "widgets", "id": "w1", "data": { "name": "A" } }
                ]},
                { "type": "write", "caller": "u1", "operations": [
                    { "type": "update", "table": "widgets", "id": "w1", "data": { "name": "B" } }
                ]},
                { "type": "getRecords", "caller": "u1", "pointers": [{ "table": "widgets", "id": "w1" }] },
                { "type": "write", "caller": "u1", "authorId": "u2", "operations": [] },
                { "type": "getRecords", "pointers": [] }
            ]
        }));

        let mut out = Vec::new();
        let summary = run(config.path(), script.path(), OutputFormat::Text, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(summary.steps, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.notices.len(), 2);
        assert_eq!(summary.notices[1].version, 2);
        assert!(text.contains("step 1: wrote [widgets:w1]"));
        assert!(text.contains(r#""name":"B""#));
        assert!(text.contains("step 4: FORBIDDEN"));
        assert!(text.contains("notice: widgets:w1 v2"));
    }

    #[test]
    fn small_notification_buffer_keeps_draining() {
        let config = json_file(&json!({
            "tables": [{ "name": "widgets" }],
            "notificationChannelCapacity": 1
        }));
        let script = json_file(&json!({
            "steps": [
                { "type": "write", "caller": "u1", "operations": [
                    { "type": "create", "table": "widgets", "id": "w1", "data": {} },
                    { "type": "create", "table": "widgets", "id": "w2", "data": {} },
                    { "type": "create", "table": "widgets", "id": "w3", "data": {} }
                ]}
            ]
        }));

        let mut out = Vec::new();
        let summary = run(config.path(), script.path(), OutputFormat::Text, false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(summary.lagged, 2);
        assert_eq!(summary.notices.len(), 1);
        assert!(text.contains("notice: widgets:w3 v1"));
    }

    #[test]
    fn json_output() {
        let config = config();
        let script = json_file(&json!({
            "steps": [
                { "type": "write", "caller": "u1", "transactionId": "t1", "operations": [
                    { "type": "delete", "table": "widgets", "id": "missing" }
                ]}
            ]
        }));

        let mut out = Vec::new();
        run(config.path(), script.path(), OutputFormat::Json, false, &mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();

        assert_eq!(value["step"], 1);
        assert_eq!(value["response"]["type"], "error");
        assert_eq!(value["response"]["body"]["code"], "BAD_REQUEST");
    }

    #[test]
    fn strict_mode_fails_on_error_replies() {
        let config = config();
        let script = json_file(&json!({
            "steps": [{ "type": "getRecords", "pointers": [] }]
        }));

        let mut out = Vec::new();
        let result = run(config.path(), script.path(), OutputFormat::Text, true, &mut out);
        assert!(matches!(result, Err(CliError::StepsFailed { failed: 1, total: 1 })));
    }

    #[test]
    fn authenticated_config_uses_tokens() {
        let config = json_file(&json!({
            "tables": [{ "name": "widgets" }],
            "requireAuth": true,
            "authSecret": "cli-secret"
        }));
        let script = json_file(&json!({
            "steps": [
                { "type": "write", "caller": "u1", "operations": [
                    { "type": "create", "table": "widgets", "id": "w1", "data": {} }
                ]}
            ]
        }));

        let mut out = Vec::new();
        let summary = run(config.path(), script.path(), OutputFormat::Text, true, &mut out).unwrap();
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn malformed_script() {
        let config = config();
        let script = json_file(&json!({ "steps": [{ "type": "explode" }] }));

        let mut out = Vec::new();
        let result = run(config.path(), script.path(), OutputFormat::Text, false, &mut out);
        assert!(matches!(result, Err(CliError::Script(_))));
    }
}
