// Telegram HTML rendering of usage reports, rankings and command replies.

use crate::error::CommandError;
use crate::models::{Node, NodeTotals};
use crate::window::WindowTotals;

/// Skipped-node names listed before the rest is elided.
const MAX_SKIPPED_SHOWN: usize = 30;

const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Binary units, two decimals; plain bytes print as an integer.
pub fn human_bytes(n: u64) -> String {
    if n < 1024 {
        return format!("{} B", n);
    }
    let mut x = n as f64;
    let mut unit = 0;
    while x >= 1024.0 && unit < UNITS.len() - 1 {
        x /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", x, UNITS[unit])
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Extra sections of a report.
#[derive(Debug, Default)]
pub struct ReportNotes<'a> {
    pub resets: &'a [Node],
    /// "name(reason)" labels from the latest poll cycle.
    pub skipped: &'a [String],
}

fn top_lines(top: &[NodeTotals], lines: &mut Vec<String>) {
    if top.is_empty() {
        lines.push("(no data)".into());
        return;
    }
    for (i, t) in top.iter().enumerate() {
        lines.push(format!(
            "{}. <b>{}</b>: {} (⬇️ {} / ⬆️ {})",
            i + 1,
            escape_html(&t.node.name),
            human_bytes(t.usage.total()),
            human_bytes(t.usage.download),
            human_bytes(t.usage.upload),
        ));
    }
}

fn note_lines(notes: &ReportNotes<'_>, lines: &mut Vec<String>) {
    if !notes.skipped.is_empty() {
        lines.push(String::new());
        lines.push("⚠️ <b>Skipped in the last poll</b>:".into());
        let shown: Vec<String> = notes
            .skipped
            .iter()
            .take(MAX_SKIPPED_SHOWN)
            .map(|s| escape_html(s))
            .collect();
        let mut joined = shown.join(", ");
        if notes.skipped.len() > MAX_SKIPPED_SHOWN {
            joined.push_str(", …");
        }
        lines.push(joined);
    }
    if !notes.resets.is_empty() {
        lines.push(String::new());
        lines.push("⚠️ <b>Counter resets detected</b> (compensated):".into());
        let names: Vec<String> = notes.resets.iter().map(|n| escape_html(&n.name)).collect();
        lines.push(names.join(", "));
    }
}

/// Full per-node report: every node, totals, Top N and notes.
pub fn format_usage_report(
    title: &str,
    window: &WindowTotals,
    top: &[NodeTotals],
    top_n: usize,
    notes: &ReportNotes<'_>,
) -> String {
    let mut lines = vec![
        format!("📊 <b>{}</b> ({})", escape_html(title), escape_html(&window.label)),
        String::new(),
    ];

    let mut nodes: Vec<&NodeTotals> = window.nodes.values().collect();
    nodes.sort_by(|a, b| {
        a.node
            .name
            .to_lowercase()
            .cmp(&b.node.name.to_lowercase())
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
    for t in nodes {
        lines.push(format!("🖥 <b>{}</b>", escape_html(&t.node.name)));
        lines.push(format!("⬇️ Download: {}", human_bytes(t.usage.download)));
        lines.push(format!("⬆️ Upload: {}", human_bytes(t.usage.upload)));
        lines.push(String::new());
    }

    let total = window.total();
    lines.push("——".into());
    lines.push(format!("📦 <b>Total download</b>: {}", human_bytes(total.download)));
    lines.push(format!("📦 <b>Total upload</b>: {}", human_bytes(total.upload)));
    lines.push(format!("📦 <b>Total</b>: {}", human_bytes(total.total())));

    lines.push(String::new());
    lines.push(format!("🔥 <b>Top {}</b> (download + upload)", top_n));
    top_lines(top, &mut lines);

    note_lines(notes, &mut lines);
    lines.join("\n")
}

/// Ranking only.
pub fn format_top(
    window: &WindowTotals,
    top: &[NodeTotals],
    top_n: usize,
    notes: &ReportNotes<'_>,
) -> String {
    let mut lines = vec![
        format!("🔥 <b>Top {}</b> (download + upload)", top_n),
        format!("⏱ {} ({})", escape_html(&window.spec.to_string()), escape_html(&window.label)),
        String::new(),
    ];
    top_lines(top, &mut lines);
    note_lines(notes, &mut lines);
    lines.join("\n")
}

pub fn help_text() -> String {
    [
        "Available commands:",
        "/today  /week  /month",
        "/top  (defaults to today)",
        "/top today|week|month  (or t|w|m)",
        "/top 6h  (any N hours)",
    ]
    .join("\n")
}

pub fn command_error_reply(err: &CommandError) -> String {
    let hint = match err {
        CommandError::ZeroHours => "Usage: /top 6h (N &gt; 0)".to_string(),
        CommandError::TooManyHours { max } => format!("Usage: /top 6h (N up to {})", max),
        CommandError::BadWindow(_) => "Usage: /top  or  /top today|week|month  or  /top 6h".to_string(),
        CommandError::Unknown(_) => help_text(),
    };
    format!("⚠️ {}\n{}", escape_html(&err.to_string()), hint)
}

/// Longest error text carried by a failure alert; the tail is kept.
const MAX_ALERT_ERROR_CHARS: usize = 1500;

/// Operator alert for a failed job. `error` is the full error chain.
pub fn format_failure_alert(job: &str, host: &str, at: &str, error: &str) -> String {
    let count = error.chars().count();
    let tail: String = if count > MAX_ALERT_ERROR_CHARS {
        let tail: String = error.chars().skip(count - MAX_ALERT_ERROR_CHARS).collect();
        format!("…{}", tail)
    } else {
        error.to_string()
    };
    [
        "❌ <b>Traffic job failed</b>".to_string(),
        format!("🕒 {}", escape_html(at)),
        format!("🖥 {}", escape_html(host)),
        format!("📍 {}", escape_html(job)),
        format!("🧨 <code>{}</code>", escape_html(&tail)),
    ]
    .join("\n")
}

/// Reply when a query could not be answered from the store.
pub fn internal_error_reply() -> String {
    "⚠️ Could not read traffic data right now. Please try again later.".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_uses_binary_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1024), "1.00 KiB");
        assert_eq!(human_bytes(1536), "1.50 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
        assert_eq!(human_bytes(u64::MAX), "16384.00 PiB");
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
        assert_eq!(escape_html("hk-01"), "hk-01");
    }

    #[test]
    fn failure_alert_keeps_error_tail() {
        let long = format!("{}<end>", "x".repeat(2000));
        let alert = format_failure_alert("collect", "box-1", "2026-10-19 10:00", &long);
        assert!(alert.contains("📍 collect"));
        assert!(alert.contains("🖥 box-1"));
        assert!(alert.contains("&lt;end&gt;</code>"));
        assert!(alert.contains("…x"));
        assert!(!alert.contains(&"x".repeat(1500)));
    }

    #[test]
    fn error_reply_escapes_argument() {
        let reply = command_error_reply(&CommandError::BadWindow("<x>".into()));
        assert!(reply.contains("&lt;x&gt;"));
        assert!(reply.contains("/top 6h"));
    }
}
