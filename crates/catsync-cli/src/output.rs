//! Terminal output formatting.

use colored::{ColoredString, Colorize};

use catsync_core::{ChangeAction, ChangeEvent, ElementKind, EventScope, PassReport, PassStatus};
use catsync_graph::{GraphCounts, SyncRunRecord};

fn status_colored(status: &str) -> ColoredString {
    match status {
        "COMPLETE" => status.green(),
        "PARTIAL" => status.yellow(),
        "ABORTED" => status.red(),
        other => other.dimmed(),
    }
}

fn action_label(action: ChangeAction) -> ColoredString {
    match action {
        ChangeAction::Created => "+ created".green(),
        ChangeAction::Updated => "~ updated".yellow(),
        ChangeAction::Removed => "- removed".red(),
        ChangeAction::PrimaryKeySet => "* primary key".cyan(),
        ChangeAction::PrimaryKeyCleared => "* key cleared".magenta(),
        ChangeAction::ForeignKeyLinked => "> foreign key".blue(),
    }
}

/// Print the outcome of one pass.
pub fn print_report(report: &PassReport) {
    let database = report.database_qualified_name.as_deref().unwrap_or("(unidentified)");
    println!(
        "{} {} {}",
        "Pass".bold(),
        status_colored(report.status.as_str()).bold(),
        format!("({} ms)", report.duration_ms()).dimmed()
    );
    println!("  {}: {}", "Database".bold(), database.cyan());

    let counts = &report.counts;
    println!("  Created:           {}", counts.created);
    println!("  Updated:           {}", counts.updated);
    println!("  Removed:           {}", counts.removed);
    println!("  Primary keys:      {}", counts.primary_keys);
    if counts.primary_keys_cleared > 0 {
        println!("  Keys cleared:      {}", counts.primary_keys_cleared);
    }
    println!("  Foreign keys:      {}", counts.foreign_keys);
    if counts.unresolved_links > 0 {
        println!("  Unresolved links:  {}", counts.unresolved_links.to_string().yellow());
    }
    if report.skipped_branches > 0 {
        println!("  Skipped branches:  {}", report.skipped_branches.to_string().yellow());
    }
    if report.status == PassStatus::Complete && report.changes.is_empty() {
        println!("  {}", "Graph already in step with the source.".dimmed());
    }
}

/// Print a change event as it arrives.
pub fn print_event(event: &ChangeEvent) {
    let scope = match &event.scope {
        EventScope::Shared => event.database_qualified_name.as_str(),
        EventScope::Table { qualified_name } => qualified_name.as_str(),
    };
    println!(
        "{} {} {}",
        event.emitted_at.format("%H:%M:%S").to_string().dimmed(),
        scope.cyan(),
        format!("[{} changes]", event.changes.len()).dimmed()
    );
    for change in &event.changes {
        println!("    {:<16} {:<15} {}", action_label(change.action), change.kind.as_str(), change.qualified_name);
    }
}

pub fn print_graph_counts(counts: &GraphCounts, elements: &[(ElementKind, usize)]) {
    println!("{}", "Metadata graph".bold());
    println!("  Nodes:         {}", counts.nodes);
    println!("  Relationships: {}", counts.relationships);
    for (kind, count) in elements {
        println!("    {:<15} {}", kind.as_str(), count);
    }
}

pub fn print_runs(runs: &[SyncRunRecord]) {
    println!();
    if runs.is_empty() {
        println!("{}", "No sync runs recorded.".dimmed());
        return;
    }

    println!(
        "{:<26} {:<9} {:>7} {:>7} {:>7} {:>8}  {}",
        "Finished", "Status", "Created", "Updated", "Removed", "Duration", "Database"
    );
    println!("{}", "-".repeat(90));
    for run in runs {
        println!(
            "{:<26} {:<9} {:>7} {:>7} {:>7} {:>6}ms  {}",
            truncate(&run.finished_at, 25),
            status_colored(&run.status),
            run.created,
            run.updated,
            run.removed,
            run.duration_ms,
            run.database
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("2026-10-16T08:00:00.123456+00:00", 19), "2026-10-16T08:00:00");
        assert_eq!(truncate("short", 10), "short");
    }
}
