//! Channel-specific rendering of a `NotificationMessage`.
//!
//! The dispatcher composes subject and body once per recipient; this module
//! only decides how each channel presents them.

use duewatch_common::types::{NotificationKind, NotificationMessage, Priority};

/// Header line for chat messages, selected by notification kind.
fn chat_header(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::TaskReminder => "📋 *Task reminder*",
        NotificationKind::TaskOverdue => "⚠️ *Overdue task*",
        NotificationKind::AgendaReminder => "📅 *Upcoming event*",
        NotificationKind::FinancialReminder => "💰 *Payment due*",
        NotificationKind::FinancialOverdue => "🚨 *Overdue payment*",
    }
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "Low",
        Priority::Medium => "Medium",
        Priority::High => "High",
        Priority::Urgent => "Urgent",
    }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "#6b7280",
        Priority::Medium => "#2563eb",
        Priority::High => "#d97706",
        Priority::Urgent => "#dc2626",
    }
}

/// Plain-text message for the chat gateway.
pub fn chat_text(message: &NotificationMessage) -> String {
    let mut text = format!(
        "{}\n\nHello {}!\n\n{}\n\n*{}*\nWhen: {}\nPriority: {}",
        chat_header(message.kind),
        message.recipient_name,
        message.body,
        message.record_title,
        message.due_display,
        priority_label(message.priority),
    );

    if let Some(location) = message.details.get("location").and_then(|v| v.as_str()) {
        text.push_str(&format!("\nWhere: {}", location));
    }
    if let Some(amount) = message.details.get("amount").and_then(|v| v.as_str()) {
        text.push_str(&format!("\nAmount: {}", amount));
    }

    text
}

/// HTML body for the outbound mail queue.
pub fn email_html(message: &NotificationMessage) -> String {
    let mut rows = vec![
        detail_row("When", &message.due_display),
        detail_row("Priority", priority_label(message.priority)),
    ];
    if let Some(location) = message.details.get("location").and_then(|v| v.as_str()) {
        rows.push(detail_row("Where", location));
    }
    if let Some(amount) = message.details.get("amount").and_then(|v| v.as_str()) {
        rows.push(detail_row("Amount", amount));
    }

    format!(
        r#"<div style="font-family:Arial,sans-serif;max-width:600px;margin:0 auto">
<div style="border-left:4px solid {color};padding:12px 16px;background:#f9fafb">
<h2 style="margin:0 0 8px 0">{subject}</h2>
<p style="margin:0">Hello {name},</p>
<p>{body}</p>
<h3 style="margin:16px 0 8px 0">{title}</h3>
<table style="border-collapse:collapse">{rows}</table>
</div>
<p style="color:#9ca3af;font-size:12px">This is an automatic reminder. Please do not reply.</p>
</div>"#,
        color = priority_color(message.priority),
        subject = escape_html(&message.subject),
        name = escape_html(&message.recipient_name),
        body = escape_html(&message.body),
        title = escape_html(&message.record_title),
        rows = rows.join(""),
    )
}

fn detail_row(label: &str, value: &str) -> String {
    format!(
        "<tr><td style=\"padding:2px 12px 2px 0;color:#6b7280\">{}</td><td>{}</td></tr>",
        escape_html(label),
        escape_html(value)
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
