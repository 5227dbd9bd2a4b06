// src/cli/handlers/commons.rs

// This module contains shared functions used by multiple handlers.

use colored::Colorize;

use crate::models::ResultSet;
use crate::state::RunContext;

/// Reports `N/M <done> database(s)`; a partial result is a single error.
pub fn report_tally(ctx: &mut RunContext, done: usize, total: usize, what: &str) {
    let summary = format!(
        t!("handlers.tally"),
        done = done,
        total = total,
        what = what
    );
    if done == total {
        ctx.info(summary);
    } else {
        ctx.error(summary);
    }
}

/// Renders a result set as aligned columns.
pub fn format_table(set: &ResultSet, colored: bool) -> String {
    let columns = set
        .rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(set.columns.len()))
        .max()
        .unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in std::iter::once(&set.columns).chain(set.rows.iter()) {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |row: &[String]| -> String {
        row.iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::new();
    if !set.columns.is_empty() {
        let header = render(set.columns.as_slice());
        lines.push(if colored {
            header.bold().to_string()
        } else {
            header
        });
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
    }
    lines.extend(set.rows.iter().map(|row| render(row.as_slice())));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_errors_once_on_partial_result() {
        let mut ctx = RunContext::new("dbms");
        ctx.set_colored(false);
        report_tally(&mut ctx, 5, 5, "backuped");
        assert!(!ctx.has_errors());
        report_tally(&mut ctx, 3, 5, "backuped");
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn test_format_table() {
        let set = ResultSet {
            columns: vec!["name".to_string(), "state".to_string()],
            rows: vec![
                vec!["Sales".to_string(), "ONLINE".to_string()],
                vec!["HR".to_string(), "OFF".to_string()],
            ],
        };
        let table = format_table(&set, false);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "name  | state");
        assert_eq!(lines[1], "------+-------");
        assert_eq!(lines[2], "Sales | ONLINE");
        assert_eq!(lines[3], "HR    | OFF");
    }
}
