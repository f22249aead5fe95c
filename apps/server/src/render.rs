use chrono::NaiveDate;

use crate::models::AppointmentDetails;

pub const DEFAULT_CONFIRMATION_TEMPLATE: &str = "Your {{service}} appointment is confirmed for {{date}} at {{time}}.{{#if branch}} See you at {{branch}}.{{/if}}";
pub const DEFAULT_CANCELLATION_TEMPLATE: &str = "Your {{service}} appointment on {{date}} at {{time}} has been cancelled.{{#if branch}} ({{branch}}){{/if}}";

const IF_BRANCH_OPEN: &str = "{{#if branch}}";
const IF_BRANCH_CLOSE: &str = "{{/if}}";

/// Fill a confirmation/cancellation template from booking details.
///
/// Supported placeholders: `{{service}}`, `{{date}}` (shown as dd/MM/yyyy),
/// `{{time}}`, `{{branch}}`, and the conditional `{{#if branch}}...{{/if}}`
/// block. Unknown placeholders are left untouched.
pub fn render(template: &str, details: &AppointmentDetails) -> String {
    let branch = details.branch.as_deref();
    strip_branch_blocks(template, branch.is_some())
        .replace("{{service}}", &details.service)
        .replace("{{date}}", &display_date(&details.date))
        .replace("{{time}}", &details.time)
        .replace("{{branch}}", branch.unwrap_or(""))
}

/// Stored literal YYYY-MM-DD → dd/MM/yyyy. Malformed literals pass through
/// unchanged rather than failing the whole message.
fn display_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// With a branch present the block markers are removed and the content kept;
/// without one the whole block disappears. A dangling open marker is left
/// alone.
fn strip_branch_blocks(template: &str, keep_content: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find(IF_BRANCH_OPEN) {
        let after_open = open + IF_BRANCH_OPEN.len();
        let Some(close) = rest[after_open..].find(IF_BRANCH_CLOSE) else {
            break;
        };
        out.push_str(&rest[..open]);
        if keep_content {
            out.push_str(&rest[after_open..after_open + close]);
        }
        rest = &rest[after_open + close + IF_BRANCH_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

// ── Tests ──
