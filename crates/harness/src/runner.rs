//! Orchestration: scenarios in, verdicts and artifacts out
//!
//! The runner loads scenarios, starts the static server the first time an
//! http-transport scenario needs it, executes each scenario sequentially
//! through the driver, and runs baseline comparison for scenarios that
//! opted in. Scenarios are independent; a failure stops that scenario
//! only and the suite moves on.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::driver::{Browser, Driver, DriverConfig, StepOutcome};
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{Scenario, Transport};
use crate::server::{ServerConfig, StaticServer};
use crate::visual::{VisualConfig, VisualTester};

/// Result of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepOutcome>,
    pub visual: Vec<VisualOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualOutcome {
    pub name: String,
    pub matches: bool,
    pub diff_percent: f64,
    pub diff_image_path: Option<String>,
}

/// Result of a whole suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Configuration for the runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Checkout of the course site under verification
    pub site_root: PathBuf,

    /// Directory of scenario YAML files
    pub scenario_dir: PathBuf,

    /// Artifact root (screenshots/, baselines/, diffs/, results.json)
    pub output_dir: PathBuf,

    pub browser: Browser,
    pub headless: bool,

    /// Directory whose `node_modules` provides playwright
    pub node_root: Option<PathBuf>,

    /// Fixed server port for http scenarios (None = ephemeral)
    pub port: Option<u16>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            site_root: PathBuf::from("site"),
            scenario_dir: PathBuf::from("verification/scenarios"),
            output_dir: PathBuf::from("verification/output"),
            browser: Browser::Chromium,
            headless: true,
            node_root: None,
            port: None,
        }
    }
}

/// Executes verification scenarios
pub struct Runner {
    config: RunnerConfig,
    server: Option<StaticServer>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            server: None,
        }
    }

    /// Load all scenarios from the configured directory
    pub fn load_scenarios(&self) -> HarnessResult<Vec<Scenario>> {
        Scenario::load_all(&self.config.scenario_dir)
    }

    /// Run every scenario
    pub async fn run_all(&mut self) -> HarnessResult<SuiteResult> {
        let scenarios = self.load_scenarios()?;
        self.run_scenarios(&scenarios).await
    }

    /// Run scenarios carrying a tag
    pub async fn run_tagged(&mut self, tag: &str) -> HarnessResult<SuiteResult> {
        let scenarios: Vec<Scenario> = self
            .load_scenarios()?
            .into_iter()
            .filter(|s| s.has_tag(tag))
            .collect();
        self.run_scenarios(&scenarios).await
    }

    /// Run a single scenario by name
    pub async fn run_named(&mut self, name: &str) -> HarnessResult<SuiteResult> {
        let scenario = self
            .load_scenarios()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| HarnessError::ScenarioNotFound(name.to_string()))?;
        self.run_scenarios(&[scenario]).await
    }

    /// Run a list of scenarios sequentially
    pub async fn run_scenarios(&mut self, scenarios: &[Scenario]) -> HarnessResult<SuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        std::fs::create_dir_all(self.screenshot_dir()?)?;

        // One up-front probe instead of one failure per scenario.
        self.driver(Transport::File)?.probe().await?;

        info!("running {} scenario(s)", scenarios.len());

        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        for scenario in scenarios {
            let result = self.run_scenario(scenario).await?;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown failure")
                );
            }
            results.push(result);
        }

        if let Some(server) = self.server.take() {
            server.stop().await;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "verification finished: {passed} passed, {failed} failed ({duration_ms} ms)"
        );

        Ok(SuiteResult {
            started_at,
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    /// Run one scenario: driver first, then baseline comparison
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> HarnessResult<ScenarioResult> {
        let start = Instant::now();

        let driver = self.driver_for(scenario).await?;
        let steps = driver.run(scenario).await?;

        let mut error = steps
            .iter()
            .find(|s| !s.ok)
            .map(|s| format!("{}: {}", s.name, s.error.as_deref().unwrap_or("failed")));

        let mut visual = Vec::new();
        if scenario.visual_baseline && error.is_none() {
            let tester = VisualTester::new(self.visual_config()?)?;
            for name in scenario.screenshot_names() {
                match tester.compare(name, Some(scenario.visual_threshold)) {
                    Ok(comparison) => {
                        if !comparison.matches {
                            error = Some(mismatch_message(
                                name,
                                comparison.diff_percent,
                                scenario.visual_threshold,
                            ));
                        }
                        visual.push(VisualOutcome {
                            name: name.to_string(),
                            matches: comparison.matches,
                            diff_percent: comparison.diff_percent,
                            diff_image_path: comparison
                                .diff_image_path
                                .map(|p| p.to_string_lossy().into_owned()),
                        });
                    }
                    Err(HarnessError::BaselineNotFound(_)) => {
                        info!(
                            "no baseline for '{name}' yet; capture one with update-baselines"
                        );
                    }
                    Err(e) => {
                        error = Some(format!("baseline comparison failed: {e}"));
                    }
                }
            }
        }

        Ok(ScenarioResult {
            name: scenario.name.clone(),
            success: error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            visual,
            error,
        })
    }

    /// Promote all current screenshots to baselines
    pub fn update_baselines(&self) -> HarnessResult<Vec<String>> {
        VisualTester::new(self.visual_config()?)?.update_all_baselines()
    }

    /// Write the suite result as pretty JSON under the output directory
    pub fn write_results(&self, suite: &SuiteResult) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join("results.json");
        std::fs::write(&path, serde_json::to_string_pretty(suite)?)?;
        info!("results written to {}", path.display());
        Ok(path)
    }

    /// Build the driver for a scenario, starting the server when the
    /// scenario needs http transport
    async fn driver_for(&mut self, scenario: &Scenario) -> HarnessResult<Driver> {
        if scenario.transport == Transport::Http && self.server.is_none() {
            let server = StaticServer::spawn(ServerConfig {
                site_root: self.config.site_root.clone(),
                port: self.config.port,
                ..ServerConfig::default()
            })
            .await?;
            self.server = Some(server);
        }
        self.driver(scenario.transport)
    }

    fn driver(&self, transport: Transport) -> HarnessResult<Driver> {
        let base_url = match transport {
            Transport::Http => self.server.as_ref().map(|s| s.base_url().to_string()),
            Transport::File => None,
        };

        Ok(Driver::new(DriverConfig {
            browser: self.config.browser,
            headless: self.config.headless,
            site_root: absolutize(&self.config.site_root)?,
            base_url,
            screenshot_dir: self.screenshot_dir()?,
            node_root: self.config.node_root.clone(),
        }))
    }

    // Artifact paths reach the generated script, which may run with a
    // different working directory (node_root). They must not stay
    // cwd-relative.
    fn screenshot_dir(&self) -> HarnessResult<PathBuf> {
        Ok(absolutize(&self.config.output_dir)?.join("screenshots"))
    }

    fn visual_config(&self) -> HarnessResult<VisualConfig> {
        let output_dir = absolutize(&self.config.output_dir)?;
        Ok(VisualConfig {
            baseline_dir: output_dir.join("baselines"),
            actual_dir: output_dir.join("screenshots"),
            diff_dir: output_dir.join("diffs"),
            threshold: 0.5,
        })
    }
}

fn absolutize(path: &Path) -> HarnessResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn mismatch_message(name: &str, diff_percent: f64, threshold: f64) -> String {
    HarnessError::ScreenshotMismatch {
        name: name.to_string(),
        diff_percent,
        threshold,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_in(dir: &std::path::Path) -> Runner {
        Runner::new(RunnerConfig {
            site_root: dir.join("site"),
            scenario_dir: dir.join("scenarios"),
            output_dir: dir.join("output"),
            ..RunnerConfig::default()
        })
    }

    #[test]
    fn load_scenarios_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scenarios")).unwrap();
        std::fs::write(
            dir.path().join("scenarios/a.yaml"),
            "name: alpha\ntags: [smoke]\nsteps:\n  - action: sleep\n    ms: 1\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("scenarios/b.yaml"),
            "name: beta\nsteps:\n  - action: sleep\n    ms: 1\n",
        )
        .unwrap();

        let scenarios = runner_in(dir.path()).load_scenarios().unwrap();
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].name, "alpha");
    }

    #[tokio::test]
    async fn run_named_rejects_unknown_scenario() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scenarios")).unwrap();

        let mut runner = runner_in(dir.path());
        match runner.run_named("missing").await {
            Err(HarnessError::ScenarioNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("expected ScenarioNotFound, got {other:?}"),
        }
    }

    #[test]
    fn artifact_paths_are_absolute_even_with_node_root_set() {
        // the generated script runs with node_root as its working
        // directory, so a cwd-relative screenshot path would land there
        let runner = Runner::new(RunnerConfig {
            output_dir: PathBuf::from("verification/output"),
            node_root: Some(PathBuf::from("/opt/playwright-env")),
            ..RunnerConfig::default()
        });

        let scenario = Scenario::from_yaml(
            "name: shot\nsteps:\n  - action: navigate\n    page: index.html\n  - action: screenshot\n    name: landing\n",
        )
        .unwrap();
        let script = runner
            .driver(Transport::File)
            .unwrap()
            .build_script(&scenario)
            .unwrap();

        let expected = std::env::current_dir()
            .unwrap()
            .join("verification/output/screenshots/landing.png");
        assert!(script.contains(&*expected.to_string_lossy()));

        let visual = runner.visual_config().unwrap();
        assert!(visual.baseline_dir.is_absolute());
        assert!(visual.actual_dir.is_absolute());
        assert!(visual.diff_dir.is_absolute());
    }

    #[test]
    fn mismatch_message_uses_the_mismatch_taxonomy() {
        let msg = mismatch_message("index", 3.2, 0.5);
        assert!(msg.contains("index"));
        assert!(msg.contains("3.20%"));
        assert!(msg.contains("threshold: 0.50%"));
    }

    #[test]
    fn results_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let suite = SuiteResult {
            started_at: Utc::now(),
            total: 1,
            passed: 1,
            failed: 0,
            duration_ms: 42,
            results: vec![ScenarioResult {
                name: "homepage".into(),
                success: true,
                duration_ms: 42,
                steps: vec![StepOutcome {
                    index: 0,
                    name: "navigate:index.html".into(),
                    ok: true,
                    duration_ms: 40,
                    error: None,
                }],
                visual: vec![],
                error: None,
            }],
        };

        let path = runner.write_results(&suite).unwrap();
        let loaded: SuiteResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(loaded.all_passed());
        assert_eq!(loaded.results[0].steps[0].name, "navigate:index.html");
    }
}
