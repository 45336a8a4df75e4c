//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use scaler_lib::{DecisionOutcome, RunReport, VerifyOutcome};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the decisions table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Current")]
    current: u32,
    #[tabled(rename = "Desired")]
    desired: u32,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Note")]
    note: String,
}

/// Row for the summary table
#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Count")]
    count: u32,
}

pub fn print_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            print_decisions(report);
            println!();
            print_summary(report);
        }
    }
    Ok(())
}

fn print_decisions(report: &RunReport) {
    if report.decisions.is_empty() {
        println!("{}", "No targets processed".yellow());
        return;
    }

    let rows: Vec<DecisionRow> = report
        .decisions
        .iter()
        .map(|d| {
            let ready = report
                .verifications
                .iter()
                .find(|v| v.target == d.target)
                .map(|v| color_verification(&v.outcome))
                .unwrap_or_else(|| "-".to_string());
            DecisionRow {
                namespace: d.target.namespace.clone(),
                kind: d.target.kind.to_string(),
                name: d.target.name.clone(),
                current: d.current_replicas,
                desired: d.desired_replicas,
                outcome: color_outcome(d.outcome),
                ready,
                note: d.note.clone().unwrap_or_default(),
            }
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

fn print_summary(report: &RunReport) {
    let s = &report.summary;
    let mut rows = vec![
        SummaryRow {
            metric: "Targets processed",
            count: s.targets_processed,
        },
        SummaryRow {
            metric: "Scaled",
            count: s.scales_applied,
        },
        SummaryRow {
            metric: "Scale failures",
            count: s.scales_failed,
        },
        SummaryRow {
            metric: "Verification failures",
            count: s.verification_failures,
        },
    ];
    let optional = [
        ("Planned (dry run)", s.dry_run_planned),
        ("Unchanged", s.unchanged),
        ("Not found", s.not_found),
        ("Metrics unavailable", s.metrics_unavailable),
        ("Skipped by max operations", s.skipped_by_cap),
        ("Malformed lines", s.malformed_lines),
    ];
    rows.extend(
        optional
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(metric, count)| SummaryRow { metric, count }),
    );

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);

    if report.succeeded() {
        print_success("Run completed");
    } else {
        print_error("Run completed with failures");
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Color a decision outcome
pub fn color_outcome(outcome: DecisionOutcome) -> String {
    let label = outcome.to_string();
    match outcome {
        DecisionOutcome::Applied => label.green().to_string(),
        DecisionOutcome::DryRun => label.blue().to_string(),
        DecisionOutcome::Unchanged | DecisionOutcome::NoAction => label.dimmed().to_string(),
        DecisionOutcome::SkippedByCap => label.yellow().to_string(),
        DecisionOutcome::Failed => label.red().to_string(),
    }
}

fn color_verification(outcome: &VerifyOutcome) -> String {
    match outcome {
        VerifyOutcome::Healthy { .. } => "healthy".green().to_string(),
        VerifyOutcome::Timeout { last_ready, .. } => {
            format!("timeout ({} ready)", last_ready).red().to_string()
        }
        VerifyOutcome::NotFound => "not found".red().to_string(),
    }
}
