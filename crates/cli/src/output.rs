//! Output formatting for the verification CLI

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use campus_harness::runner::{ScenarioResult, SuiteResult};
use campus_harness::scenario::Scenario;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed as a table row
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// One row of `campus-verify list`
#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub transport: String,
    pub tags: String,
    pub steps: usize,
    pub description: String,
}

impl From<&Scenario> for ScenarioSummary {
    fn from(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            transport: format!("{:?}", scenario.transport).to_lowercase(),
            tags: scenario.tags.join(", "),
            steps: scenario.steps.len(),
            description: scenario.description.trim().to_string(),
        }
    }
}

impl TableDisplay for ScenarioSummary {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "TRANSPORT", "TAGS", "STEPS", "DESCRIPTION"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.transport.clone(),
            self.tags.clone(),
            self.steps.to_string(),
            self.description.clone(),
        ]
    }
}

/// One row of the run summary
#[derive(Debug, Serialize)]
pub struct ResultRow {
    pub name: String,
    pub status: String,
    pub steps: String,
    pub duration_ms: u64,
    pub detail: String,
}

impl From<&ScenarioResult> for ResultRow {
    fn from(result: &ScenarioResult) -> Self {
        let passed = result.steps.iter().filter(|s| s.ok).count();
        Self {
            name: result.name.clone(),
            status: if result.success { "PASS" } else { "FAIL" }.to_string(),
            steps: format!("{}/{}", passed, result.steps.len()),
            duration_ms: result.duration_ms,
            detail: result.error.clone().unwrap_or_default(),
        }
    }
}

impl TableDisplay for ResultRow {
    fn headers() -> Vec<&'static str> {
        vec!["SCENARIO", "STATUS", "STEPS", "DURATION (MS)", "DETAIL"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.status.clone(),
            self.steps.clone(),
            self.duration_ms.to_string(),
            self.detail.clone(),
        ]
    }
}

/// Print a list of items in the requested format
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for item in items {
                for (header, value) in T::headers().iter().zip(item.row()) {
                    println!("{header}: {value}");
                }
                println!();
            }
        }
    }
}

/// Print a suite run: per-scenario rows plus a verdict line. JSON format
/// emits the full result document instead.
pub fn print_suite(suite: &SuiteResult, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(suite).unwrap_or_default());
        }
        _ => {
            let rows: Vec<ResultRow> = suite.results.iter().map(ResultRow::from).collect();
            print_list(&rows, format);
            println!(
                "{} passed, {} failed of {} ({} ms)",
                suite.passed, suite.failed, suite.total, suite.duration_ms
            );
        }
    }
}
