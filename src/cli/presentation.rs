//! CLI presentation: text and json formatters per command.

use crate::error::RenderError;
use crate::events::{EventEnvelope, RenderEvent};
use crate::queue::{DeadLetter, QueueStats};
use crate::safety::SanitizedPrompt;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde_json::json;

/// Everything a batch run produced
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub events: Vec<EventEnvelope>,
    pub dead_letters: Vec<DeadLetter>,
    pub stats: QueueStats,
}

fn to_json_string(value: &serde_json::Value) -> Result<String, RenderError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| RenderError::Config(format!("Failed to render output: {}", e)))
}

/// Safety gate verdict. Shows only the hash and masked preview, never the text.
pub fn format_prompt_check(prompt: &SanitizedPrompt, format: &str) -> Result<String, RenderError> {
    let categories: Vec<&str> = prompt.redactions().iter().map(|c| c.as_str()).collect();
    if format == "json" {
        return to_json_string(&json!({
            "blocked": prompt.blocked(),
            "truncated": prompt.truncated(),
            "hash": prompt.hash(),
            "preview": prompt.masked_preview(),
            "redactions": categories,
        }));
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    let verdict = if prompt.blocked() { "BLOCKED" } else { "allowed" };
    table.add_row(vec!["Verdict", verdict]);
    table.add_row(vec!["Truncated", if prompt.truncated() { "yes" } else { "no" }]);
    table.add_row(vec!["Hash", prompt.hash()]);
    table.add_row(vec!["Preview".to_string(), prompt.masked_preview()]);
    let redactions = if categories.is_empty() {
        "-".to_string()
    } else {
        categories.join(", ")
    };
    table.add_row(vec!["Redactions".to_string(), redactions]);
    Ok(table.to_string())
}

/// Per-job results of a batch run followed by queue totals.
pub fn format_run_summary(summary: &RunSummary, format: &str) -> Result<String, RenderError> {
    let stats = &summary.stats;
    if format == "json" {
        let dead: Vec<_> = summary
            .dead_letters
            .iter()
            .map(|d| json!({ "deliveryId": d.delivery.id, "reason": d.reason }))
            .collect();
        return to_json_string(&json!({
            "events": summary.events,
            "deadLetters": dead,
            "stats": {
                "completed": stats.completed,
                "failed": stats.failed,
                "retried": stats.retried,
                "deadLettered": stats.dead_lettered,
                "pending": stats.pending,
            },
        }));
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Job", "Tenant", "Event", "Detail", "Tokens", "Cents"]);
    for envelope in &summary.events {
        match &envelope.event {
            RenderEvent::Completed {
                job_id,
                tenant_id,
                artifacts,
                cost_tokens,
                cost_cents,
                ..
            } => table.add_row(vec![
                job_id.to_string(),
                tenant_id.to_string(),
                envelope.event.name().to_string(),
                artifacts.composite_uri.clone(),
                cost_tokens.to_string(),
                cost_cents.to_string(),
            ]),
            RenderEvent::Failed {
                job_id,
                tenant_id,
                error_kind,
                retryable,
                ..
            } => table.add_row(vec![
                job_id.to_string(),
                tenant_id.to_string(),
                envelope.event.name().to_string(),
                format!("{}{}", error_kind, if *retryable { " (retryable)" } else { "" }),
                "-".to_string(),
                "-".to_string(),
            ]),
        };
    }

    let mut out = table.to_string();
    for dead in &summary.dead_letters {
        out.push_str(&format!(
            "\nDead-lettered delivery {}: {}",
            dead.delivery.id, dead.reason
        ));
    }
    out.push_str(&format!(
        "\nCompleted: {}  Failed: {}  Retried: {}  Malformed: {}",
        stats.completed, stats.failed, stats.retried, stats.dead_lettered
    ));
    Ok(out)
}
