//! Table formatting for CLI command output.

use comfy_table::{presets, Attribute, Cell, ContentArrangement, Table};

use crate::domain::models::{ApprovalRequest, Task};

fn base_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn format_tasks(tasks: &[Task]) -> String {
    let mut table = base_table();
    table.set_header(vec![
        Cell::new("ID").add_attribute(Attribute::Bold),
        Cell::new("Subject").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Retries").add_attribute(Attribute::Bold),
    ]);
    for task in tasks {
        table.add_row(vec![
            short_id(&task.id.to_string()),
            task.subject.clone(),
            format!("{:?}", task.status),
            task.retry_count.to_string(),
        ]);
    }
    table.to_string()
}

pub fn format_approvals(approvals: &[ApprovalRequest]) -> String {
    let mut table = base_table();
    table.set_header(vec![
        Cell::new("ID").add_attribute(Attribute::Bold),
        Cell::new("Tool").add_attribute(Attribute::Bold),
        Cell::new("Reason").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
    ]);
    for approval in approvals {
        table.add_row(vec![
            short_id(&approval.id.to_string()),
            approval.tool_name.clone(),
            approval.reason.clone(),
            format!("{:?}", approval.status),
        ]);
    }
    table.to_string()
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
