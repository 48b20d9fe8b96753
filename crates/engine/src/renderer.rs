//! Notification renderer.
//!
//! Turns a fetched issue into chat messages in the HTML subset chat clients
//! understand. A new issue (no change records) yields one `created` message;
//! an updated issue yields one `updated` message per change record, each
//! listing only the fields that record touched.

use chrono::FixedOffset;
use serde_json::Value;

use trackwatch_common::time::{format_epoch_ms, local_offset, parse_epoch_ms};
use trackwatch_common::types::{ChangeRecord, Issue, Notification, Operation, Project};

/// Escape text for the HTML subset. `&` goes first so entities produced for
/// `<` and `>` are not escaped again.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape text placed inside a double-quoted attribute.
pub fn escape_attribute(text: &str) -> String {
    escape_html(text).replace('"', "&quot;")
}

pub fn classify(issue: &Issue) -> Operation {
    if issue.changes.is_empty() {
        Operation::Created
    } else {
        Operation::Updated
    }
}

/// Renders issues with timestamps shown in a fixed offset.
#[derive(Debug, Clone)]
pub struct Renderer {
    offset: FixedOffset,
}

impl Renderer {
    /// Renderer using the local timezone.
    pub fn new() -> Self {
        Self::with_offset(local_offset())
    }

    pub fn with_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn render_all(&self, project: &Project, issues: &[Issue]) -> Vec<Notification> {
        issues
            .iter()
            .flat_map(|issue| self.render(project, issue))
            .collect()
    }

    pub fn render(&self, project: &Project, issue: &Issue) -> Vec<Notification> {
        match classify(issue) {
            Operation::Created => vec![Notification {
                issue_id: issue.id.clone(),
                operation: Operation::Created,
                text: self.message(
                    project,
                    issue,
                    Operation::Created,
                    issue.updater.as_deref(),
                    issue.created,
                    "",
                ),
            }],
            Operation::Updated => issue
                .changes
                .iter()
                .map(|change| Notification {
                    issue_id: issue.id.clone(),
                    operation: Operation::Updated,
                    text: self.message(
                        project,
                        issue,
                        Operation::Updated,
                        change.updater.as_deref().or(issue.updater.as_deref()),
                        Some(change.updated),
                        &self.changed_fields(change),
                    ),
                })
                .collect(),
        }
    }

    fn message(
        &self,
        project: &Project,
        issue: &Issue,
        operation: Operation,
        actor: Option<&str>,
        time: Option<i64>,
        changed_fields: &str,
    ) -> String {
        let time = time
            .map(|ms| format_epoch_ms(ms, &self.offset))
            .unwrap_or_default();

        let mut text = format!(
            "<b>{}</b> {} {} <a href=\"{}\">{}</a> {}",
            escape_html(actor.unwrap_or_default()),
            time,
            operation,
            escape_attribute(&project.issue_url(&issue.id)),
            escape_html(&issue.id),
            escape_html(issue.summary.as_deref().unwrap_or_default()),
        );

        if let Some(description) = issue.description.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(&format!("\n<pre>{}</pre>", escape_html(description)));
        }

        text.push_str(changed_fields);
        text.push_str(&attachments_block(issue));
        text
    }

    /// One `name: old -> new` line per touched field.
    fn changed_fields(&self, change: &ChangeRecord) -> String {
        let mut out = String::new();

        for name in &change.changed_fields {
            let Some(field) = change.changes.get(name) else {
                continue;
            };

            let old = value_text(&field.old_value);
            let new = match name.as_str() {
                "resolved" => self.resolved_text(&field.new_value),
                "links" => links_text(&field.new_value),
                _ => value_text(&field.new_value),
            };

            if old.is_empty() && new.is_empty() {
                continue;
            }

            out.push_str(&format!(
                "\n<i>{}: {} -> {}</i>",
                escape_html(name),
                escape_html(&old),
                escape_html(&new)
            ));
        }

        out
    }

    fn resolved_text(&self, value: &Value) -> String {
        match parse_epoch_ms(value) {
            Some(ms) => format_epoch_ms(ms, &self.offset),
            None => value_text(value),
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

fn links_text(value: &Value) -> String {
    let Value::Object(map) = value else {
        return value_text(value);
    };

    if let (Some(_), Some(role)) = (map.get("type"), map.get("role")) {
        let target = map.get("value").map(value_text).unwrap_or_default();
        return format!("{} {}", value_text(role), target);
    }

    map.iter()
        .map(|(key, member)| format!("{} = {}", key, value_text(member)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Display text of a field value; null is empty.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

fn attachments_block(issue: &Issue) -> String {
    if issue.attachments.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n<i>Attachments:</i>");
    for attachment in &issue.attachments {
        out.push_str(&format!(
            "\n<a href=\"{}\">{}</a>",
            escape_attribute(&attachment.url),
            escape_html(&attachment.label)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde_json::json;
    use trackwatch_common::types::{Attachment, FieldChange};

    fn project() -> Project {
        Project::new("CORE", "https://tracker.example.com", "-100")
    }

    fn renderer() -> Renderer {
        Renderer::with_offset(FixedOffset::east_opt(0).unwrap())
    }

    fn issue() -> Issue {
        Issue {
            summary: Some("Crash on start".to_string()),
            updater: Some("alice".to_string()),
            created: Some(1_700_000_000_000),
            ..Issue::empty("CORE-7")
        }
    }

    fn change(updated: i64, fields: &[(&str, Value, Value)]) -> ChangeRecord {
        let mut changes = BTreeMap::new();
        for (name, old, new) in fields {
            changes.insert(
                name.to_string(),
                FieldChange {
                    old_value: old.clone(),
                    new_value: new.clone(),
                },
            );
        }
        ChangeRecord {
            updated,
            updater: Some("bob".to_string()),
            changed_fields: fields.iter().map(|(n, _, _)| n.to_string()).collect(),
            changes,
        }
    }

    #[test]
    fn test_escape_order() {
        assert_eq!(escape_html("<script>&"), "&lt;script&gt;&amp;");
        assert_eq!(escape_html("&lt;"), "&amp;lt;");
        assert_eq!(escape_html("a < b < c"), "a &lt; b &lt; c");
    }

    #[test]
    fn test_attribute_escape_covers_quotes() {
        assert_eq!(
            escape_attribute(r#"https://t/a?id=1&name="x""#),
            "https://t/a?id=1&amp;name=&quot;x&quot;"
        );
    }

    #[test]
    fn test_attachment_url_is_escaped() {
        let mut issue = issue();
        issue.attachments = vec![Attachment {
            label: "log.txt".to_string(),
            url: "https://tracker.example.com/a?id=1&sign=\"q\"".to_string(),
        }];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.contains(
            "<a href=\"https://tracker.example.com/a?id=1&amp;sign=&quot;q&quot;\">log.txt</a>"
        ));
    }

    #[test]
    fn test_created_issue_renders_one_message() {
        let messages = renderer().render(&project(), &issue());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].operation, Operation::Created);
        assert_eq!(
            messages[0].text,
            "<b>alice</b> 14.11.2023 22:13:20 created \
             <a href=\"https://tracker.example.com/issue/CORE-7\">CORE-7</a> Crash on start"
        );
    }

    #[test]
    fn test_updated_issue_renders_one_message_per_change() {
        let mut issue = issue();
        issue.changes = vec![
            change(1, &[("State", json!("Open"), json!("In Progress"))]),
            change(2, &[("Assignee", json!(null), json!("bob"))]),
            change(3, &[("State", json!("In Progress"), json!("Fixed"))]),
        ];

        let messages = renderer().render(&project(), &issue);
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.operation == Operation::Updated));
        assert!(messages[0].text.contains("<i>State: Open -> In Progress</i>"));
        assert!(!messages[0].text.contains("Assignee"));
        assert!(messages[1].text.contains("<i>Assignee:  -> bob</i>"));
        assert!(messages[2].text.contains("<i>State: In Progress -> Fixed</i>"));
        assert!(messages[0].text.starts_with("<b>bob</b> 01.01.1970 00:00:00 updated"));
    }

    #[test]
    fn test_change_actor_falls_back_to_issue_updater() {
        let mut record = change(1, &[("State", json!("Open"), json!("Fixed"))]);
        record.updater = None;
        let mut issue = issue();
        issue.changes = vec![record];

        let messages = renderer().render(&project(), &issue);
        assert!(messages[0].text.starts_with("<b>alice</b>"));
    }

    #[test]
    fn test_description_is_escaped_in_pre_block() {
        let mut issue = issue();
        issue.description = Some("<script>&".to_string());
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.contains("\n<pre>&lt;script&gt;&amp;</pre>"));
    }

    #[test]
    fn test_summary_and_values_are_escaped() {
        let mut issue = issue();
        issue.summary = Some("a<b".to_string());
        issue.changes = vec![change(1, &[("Tag", json!("x&y"), json!("<z>"))])];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.contains("</a> a&lt;b"));
        assert!(text.contains("<i>Tag: x&amp;y -> &lt;z&gt;</i>"));
    }

    #[test]
    fn test_empty_field_change_is_suppressed() {
        let mut issue = issue();
        issue.changes = vec![change(
            1,
            &[
                ("Estimation", json!(null), json!("")),
                ("State", json!("Open"), json!("Fixed")),
            ],
        )];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(!text.contains("Estimation"));
        assert!(text.contains("State: Open -> Fixed"));
    }

    #[test]
    fn test_resolved_is_reformatted() {
        let mut issue = issue();
        issue.changes = vec![change(1, &[("resolved", json!(null), json!("1700000000000"))])];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.contains("<i>resolved:  -> 14.11.2023 22:13:20</i>"));
    }

    #[test]
    fn test_links_with_type_and_role() {
        let mut issue = issue();
        issue.changes = vec![change(
            1,
            &[(
                "links",
                json!(null),
                json!({"type": "Depend", "role": "depends on", "value": "CORE-3"}),
            )],
        )];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.contains("<i>links:  -> depends on CORE-3</i>"));
    }

    #[test]
    fn test_links_without_role_dump_members() {
        let mut issue = issue();
        issue.changes = vec![change(
            1,
            &[("links", json!(null), json!({"source": "CORE-1", "target": "CORE-2"}))],
        )];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.contains("links:  -> source = CORE-1\ntarget = CORE-2"));
    }

    #[test]
    fn test_attachments_block() {
        let mut issue = issue();
        issue.attachments = vec![
            Attachment {
                label: "log<1>.txt".to_string(),
                url: "https://tracker.example.com/a/1".to_string(),
            },
            Attachment {
                label: "shot.png".to_string(),
                url: "https://tracker.example.com/a/2".to_string(),
            },
        ];
        let text = &renderer().render(&project(), &issue)[0].text;
        assert!(text.ends_with(
            "\n<i>Attachments:</i>\
             \n<a href=\"https://tracker.example.com/a/1\">log&lt;1&gt;.txt</a>\
             \n<a href=\"https://tracker.example.com/a/2\">shot.png</a>"
        ));
    }

    #[test]
    fn test_missing_optional_data_degrades_to_empty() {
        let text = &renderer().render(&project(), &Issue::empty("CORE-9"))[0].text;
        assert_eq!(
            text,
            "<b></b>  created <a href=\"https://tracker.example.com/issue/CORE-9\">CORE-9</a> "
        );
    }

    #[test]
    fn test_render_all_flattens_in_order() {
        let mut updated = issue();
        updated.id = "CORE-8".to_string();
        updated.changes = vec![
            change(1, &[("State", json!("Open"), json!("Fixed"))]),
            change(2, &[("State", json!("Fixed"), json!("Verified"))]),
        ];
        let messages = renderer().render_all(&project(), &[issue(), updated]);
        let ids: Vec<_> = messages.iter().map(|m| m.issue_id.as_str()).collect();
        assert_eq!(ids, vec!["CORE-7", "CORE-8", "CORE-8"]);
    }
}
