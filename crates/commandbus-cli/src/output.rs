//! Table/JSON rendering for CLI command output, grounded in the pack's
//! comfy-table convention for operator-facing list output.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use commandbus_core::{BatchStats, Command, CommandStatus};

fn base_table() -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn status_color(status: CommandStatus) -> Color {
    match status {
        CommandStatus::Completed => Color::Green,
        CommandStatus::InProgress => Color::Cyan,
        CommandStatus::Pending => Color::White,
        CommandStatus::Canceled => Color::DarkGrey,
        CommandStatus::Failed => Color::Red,
        CommandStatus::InTroubleshootingQueue => Color::Yellow,
    }
}

pub fn commands_table(commands: &[Command]) -> String {
    let mut table = base_table();
    table.set_header(vec![
        Cell::new("Command ID").add_attribute(Attribute::Bold),
        Cell::new("Type").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Attempts").add_attribute(Attribute::Bold),
        Cell::new("Last Error").add_attribute(Attribute::Bold),
        Cell::new("Updated").add_attribute(Attribute::Bold),
    ]);

    for command in commands {
        let last_error = match (&command.last_error_code, &command.last_error_message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code.clone(),
            _ => "-".to_string(),
        };

        table.add_row(vec![
            Cell::new(command.command_id),
            Cell::new(&command.command_type),
            Cell::new(format!("{:?}", command.status)).fg(status_color(command.status)),
            Cell::new(format!("{}/{}", command.attempts, command.max_attempts)),
            Cell::new(last_error),
            Cell::new(command.updated_at.to_rfc3339()),
        ]);
    }

    table.to_string()
}

pub fn batch_stats_table(stats: &BatchStats) -> String {
    let mut table = base_table();
    table.set_header(vec![Cell::new("Metric").add_attribute(Attribute::Bold), Cell::new("Count").add_attribute(Attribute::Bold)]);
    table.add_row(vec!["Completed", &stats.completed.to_string()]);
    table.add_row(vec!["Canceled", &stats.canceled.to_string()]);
    table.add_row(vec!["Failed", &stats.failed.to_string()]);
    table.add_row(vec!["In troubleshooting queue", &stats.in_troubleshooting.to_string()]);
    table.add_row(vec!["Complete", &stats.is_complete.to_string()]);
    table.to_string()
}
