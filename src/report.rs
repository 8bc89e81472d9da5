use std::fmt::Write;

use chrono::{DateTime, Local};

use crate::models::{Record, RiskLevel};
use crate::risk;
use crate::table;

/// Markdown snapshot of one poll cycle.
pub fn build_report(generated_at: DateTime<Local>, records: &[Record]) -> String {
    let aggregate = risk::aggregate(records);
    let departments = risk::tally_by_department(&aggregate.latest);
    let trend = risk::sentiment_trend(records);
    let rows = table::build_rows(records);

    let mut output = String::new();

    let _ = writeln!(output, "# Dropout Risk Dashboard Report");
    let _ = writeln!(
        output,
        "Generated {} from {} records across {} students",
        generated_at.format("%Y-%m-%d %H:%M"),
        records.len(),
        aggregate.total_students
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if aggregate.tally.total() == 0 {
        let _ = writeln!(output, "No students with a risk assessment yet.");
    } else {
        for level in RiskLevel::ALL {
            let count = aggregate.tally.get(level);
            let share = count as f64 / aggregate.tally.total() as f64 * 100.0;
            let _ = writeln!(output, "- {level}: {count} students ({share:.0}%)");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk by Department");

    if departments.is_empty() {
        let _ = writeln!(output, "No department data available.");
    } else {
        let _ = writeln!(output, "| Department | Low | Medium | High |");
        let _ = writeln!(output, "|---|---|---|---|");
        for group in &departments {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                group.category, group.tally.low, group.tally.medium, group.tally.high
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Assessments");

    if rows.is_empty() {
        let _ = writeln!(output, "No assessments recorded.");
    } else {
        for row in &rows {
            let _ = writeln!(
                output,
                "- {} on {}: {} (attendance {}, assignment {}, test {})",
                row.student_id,
                row.recorded_at,
                row.badge.label(),
                row.attendance,
                row.assignment_score,
                row.test_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sentiment Trend");

    if trend.is_empty() {
        let _ = writeln!(output, "No sentiment analyses recorded.");
    } else {
        for point in &trend {
            let _ = writeln!(
                output,
                "- {}: {:.1} average over {} analyses",
                point.date, point.average, point.samples
            );
        }
    }

    output
}
