//! Playwright browser driver
//!
//! The harness does not link a browser engine. Each scenario is compiled
//! into a self-contained Node.js script that imports Playwright, launches
//! one headless browser, performs every step in order, and reports one
//! JSON record per step on stdout. The Rust side executes the script with
//! `node` and parses the records back.
//!
//! Script output contract:
//! - `CAMPUS-STEP {json}` — one line per executed step
//! - `CAMPUS-CONSOLE {json}` — relayed browser console message
//! - non-zero exit after the first failed step (no retry, no recovery)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{Scenario, Step, Transport};

/// Marker prefixes in the generated script's stdout
const STEP_MARKER: &str = "CAMPUS-STEP ";
const CONSOLE_MARKER: &str = "CAMPUS-CONSOLE ";

/// Playwright browser engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(format!(
                "unknown browser '{other}' (expected chromium, firefox or webkit)"
            )),
        }
    }
}

/// Result of one executed step, as reported by the generated script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub name: String,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Relayed browser console message
#[derive(Debug, Clone, Deserialize)]
struct ConsoleRecord {
    kind: String,
    text: String,
}

/// Configuration for the driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Browser engine to launch
    pub browser: Browser,

    /// Headless mode (on for verification runs)
    pub headless: bool,

    /// Root of the site checkout; `file` transport pages resolve under it
    pub site_root: PathBuf,

    /// Base URL of the local static server, when one is running
    pub base_url: Option<String>,

    /// Directory screenshots are written to
    pub screenshot_dir: PathBuf,

    /// Directory whose `node_modules` provides the playwright package
    /// (current directory when unset)
    pub node_root: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            site_root: PathBuf::from("site"),
            base_url: None,
            screenshot_dir: PathBuf::from("verification/output/screenshots"),
            node_root: None,
        }
    }
}

/// Drives Playwright through generated Node.js scripts
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Verify that `node` and the playwright package are available
    pub async fn probe(&self) -> HarnessResult<()> {
        let status = self
            .command("node")
            .args(["--version"])
            .output()
            .await
            .map_err(|_| HarnessError::NodeNotFound)?;
        if !status.status.success() {
            return Err(HarnessError::NodeNotFound);
        }

        let resolve = self
            .command("node")
            .args(["-e", "require.resolve('playwright')"])
            .output()
            .await
            .map_err(|_| HarnessError::NodeNotFound)?;
        if !resolve.status.success() {
            let root = self
                .config
                .node_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_string());
            return Err(HarnessError::PlaywrightMissing(root));
        }

        Ok(())
    }

    /// Execute a scenario, returning the per-step outcomes in order
    pub async fn run(&self, scenario: &Scenario) -> HarnessResult<Vec<StepOutcome>> {
        let script = self.build_script(scenario)?;

        let staging = tempfile::tempdir()?;
        let script_path = staging.path().join(format!("{}.js", scenario.name));
        std::fs::write(&script_path, &script)?;

        debug!("running scenario script {}", script_path.display());

        let output = self
            .command("node")
            .arg(&script_path)
            .output()
            .await
            .map_err(|_| HarnessError::NodeNotFound)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let outcomes = self.parse_output(&stdout)?;

        self.check_run(scenario, output.status.success(), outcomes, &stdout, &stderr)
    }

    /// A run is only trustworthy when the records and the exit status
    /// agree: a clean exit must report every step, and a dirty exit must
    /// carry a failing record. A node process dying mid-scenario leaves a
    /// prefix of all-ok records that must not read as a pass.
    fn check_run(
        &self,
        scenario: &Scenario,
        exited_ok: bool,
        outcomes: Vec<StepOutcome>,
        stdout: &str,
        stderr: &str,
    ) -> HarnessResult<Vec<StepOutcome>> {
        let has_failure = outcomes.iter().any(|o| !o.ok);

        if !exited_ok && !has_failure {
            return Err(HarnessError::Driver(format!(
                "scenario '{}' exited abnormally without a failing step record:\nstdout: {}\nstderr: {}",
                scenario.name, stdout, stderr
            )));
        }
        if exited_ok && outcomes.len() != scenario.steps.len() {
            return Err(HarnessError::Driver(format!(
                "scenario '{}' reported {} of {} steps",
                scenario.name,
                outcomes.len(),
                scenario.steps.len()
            )));
        }

        Ok(outcomes)
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(root) = &self.config.node_root {
            cmd.current_dir(root);
            cmd.env("NODE_PATH", root.join("node_modules"));
        }
        cmd
    }

    /// Extract step and console records from script stdout
    fn parse_output(&self, stdout: &str) -> HarnessResult<Vec<StepOutcome>> {
        let mut outcomes = Vec::new();

        for line in stdout.lines() {
            let line = line.trim();
            if let Some(json) = line.strip_prefix(STEP_MARKER) {
                let outcome: StepOutcome = serde_json::from_str(json).map_err(|e| {
                    HarnessError::Driver(format!("bad step record '{json}': {e}"))
                })?;
                outcomes.push(outcome);
            } else if let Some(json) = line.strip_prefix(CONSOLE_MARKER) {
                match serde_json::from_str::<ConsoleRecord>(json) {
                    Ok(msg) => debug!("browser console [{}]: {}", msg.kind, msg.text),
                    Err(e) => warn!("unparseable console record '{json}': {e}"),
                }
            }
        }

        Ok(outcomes)
    }

    /// Build the Node.js script for a whole scenario. One browser, one
    /// page, steps strictly in order.
    pub fn build_script(&self, scenario: &Scenario) -> HarnessResult<String> {
        let mut script = String::new();

        script.push_str(&format!(
            r#"const {{ chromium, firefox, webkit }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = scenario.viewport.width,
            height = scenario.viewport.height,
        ));

        if scenario.accept_dialogs {
            script.push_str(
                "  page.on('dialog', (dialog) => dialog.accept().catch(() => {}));\n",
            );
        }
        if scenario.capture_console {
            script.push_str(&format!(
                "  page.on('console', (msg) => console.log('{marker}' + \
                 JSON.stringify({{ kind: msg.type(), text: msg.text() }})));\n",
                marker = CONSOLE_MARKER,
            ));
        }

        script.push_str(&format!(
            r#"
  const report = (record) => console.log('{marker}' + JSON.stringify(record));
  const run = async (index, name, fn) => {{
    const started = Date.now();
    try {{
      await fn();
      report({{ index, name, ok: true, duration_ms: Date.now() - started }});
    }} catch (error) {{
      report({{
        index, name, ok: false,
        duration_ms: Date.now() - started,
        error: String((error && error.message) || error),
      }});
      await browser.close();
      process.exit(1);
    }}
  }};
"#,
            marker = STEP_MARKER,
        ));

        for (index, step) in scenario.steps.iter().enumerate() {
            let body = self.step_js(scenario, step)?;
            script.push_str(&format!(
                "\n  await run({index}, {label}, async () => {{\n{body}  }});\n",
                label = js_str(&step.label()),
            ));
        }

        script.push_str("\n  await browser.close();\n})();\n");

        Ok(script)
    }

    /// JavaScript body for one step
    fn step_js(&self, scenario: &Scenario, step: &Step) -> HarnessResult<String> {
        let js = match step {
            Step::Navigate {
                page,
                wait_for_selector,
            } => {
                let url = self.resolve_page(scenario.transport, page)?;
                let mut js = format!("    await page.goto({});\n", js_str(&url));
                if let Some(selector) = wait_for_selector {
                    js.push_str(&format!(
                        "    await page.waitForSelector({});\n",
                        js_str(selector)
                    ));
                }
                js
            }

            Step::Click {
                selector,
                timeout_ms,
            } => format!(
                "    await page.click({}, {{ timeout: {} }});\n",
                js_str(selector),
                timeout_ms.unwrap_or(10_000),
            ),

            Step::Fill { selector, value } => format!(
                "    await page.fill({}, {});\n",
                js_str(selector),
                js_str(value),
            ),

            Step::Wait {
                selector,
                timeout_ms,
                state,
            } => format!(
                "    await page.waitForSelector({}, {{ state: {}, timeout: {} }});\n",
                js_str(selector),
                js_str(state.as_str()),
                timeout_ms,
            ),

            Step::WaitFunction {
                expression,
                timeout_ms,
            } => format!(
                "    await page.waitForFunction({}, null, {{ timeout: {} }});\n",
                js_str(expression),
                timeout_ms,
            ),

            Step::Sleep { ms } => format!("    await page.waitForTimeout({ms});\n"),

            Step::Assert {
                selector,
                visible,
                text,
                text_contains,
                count_at_least,
                timeout_ms,
            } => {
                let mut js = String::new();

                if let Some(visible) = visible {
                    let state = if *visible { "visible" } else { "hidden" };
                    js.push_str(&format!(
                        "    await page.waitForSelector({}, {{ state: {}, timeout: {} }});\n",
                        js_str(selector),
                        js_str(state),
                        timeout_ms,
                    ));
                }
                if let Some(expected) = text {
                    js.push_str(&format!(
                        "    await page.waitForFunction(([sel, expected]) => \
                         Array.from(document.querySelectorAll(sel))\
                         .some((el) => el.textContent.trim() === expected), \
                         [{}, {}], {{ timeout: {} }});\n",
                        js_str(selector),
                        js_str(expected),
                        timeout_ms,
                    ));
                }
                if let Some(fragment) = text_contains {
                    js.push_str(&format!(
                        "    await page.waitForFunction(([sel, fragment]) => \
                         Array.from(document.querySelectorAll(sel))\
                         .some((el) => el.textContent.includes(fragment)), \
                         [{}, {}], {{ timeout: {} }});\n",
                        js_str(selector),
                        js_str(fragment),
                        timeout_ms,
                    ));
                }
                if let Some(count) = count_at_least {
                    js.push_str(&format!(
                        "    await page.waitForFunction(([sel, count]) => \
                         document.querySelectorAll(sel).length >= count, \
                         [{}, {}], {{ timeout: {} }});\n",
                        js_str(selector),
                        count,
                        timeout_ms,
                    ));
                }

                if js.is_empty() {
                    return Err(HarnessError::ScenarioParse(format!(
                        "assert step on '{selector}' has no expectation"
                    )));
                }
                js
            }

            Step::AssertUrl {
                ends_with,
                equals,
                timeout_ms,
            } => {
                let mut js = String::new();
                if let Some(suffix) = ends_with {
                    js.push_str(&format!(
                        "    await page.waitForFunction((suffix) => \
                         window.location.href.endsWith(suffix), {}, {{ timeout: {} }});\n",
                        js_str(suffix),
                        timeout_ms,
                    ));
                }
                if let Some(url) = equals {
                    js.push_str(&format!(
                        "    await page.waitForFunction((url) => \
                         window.location.href === url, {}, {{ timeout: {} }});\n",
                        js_str(url),
                        timeout_ms,
                    ));
                }
                js
            }

            Step::AssertTitle { equals, timeout_ms } => format!(
                "    await page.waitForFunction((expected) => \
                 document.title === expected, {}, {{ timeout: {} }});\n",
                js_str(equals),
                timeout_ms,
            ),

            Step::Screenshot { name, full_page } => {
                let path = self.config.screenshot_dir.join(format!("{name}.png"));
                format!(
                    "    await page.screenshot({{ path: {}, fullPage: {} }});\n",
                    js_str(&path.to_string_lossy()),
                    full_page,
                )
            }
        };

        Ok(js)
    }

    /// Resolve a step's `page` to a concrete URL. Absolute URLs pass
    /// through; relative pages resolve against the server base (http) or
    /// the site root (file), keeping any query string.
    fn resolve_page(&self, transport: Transport, page: &str) -> HarnessResult<String> {
        if page.starts_with("http://")
            || page.starts_with("https://")
            || page.starts_with("file://")
        {
            return Ok(page.to_string());
        }

        match transport {
            Transport::Http => {
                let base = self.config.base_url.as_deref().ok_or_else(|| {
                    HarnessError::Driver(format!(
                        "http scenario needs a running server to resolve page '{page}'"
                    ))
                })?;
                Ok(format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    page.trim_start_matches('/')
                ))
            }
            Transport::File => {
                let (path, query) = match page.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (page, None),
                };
                let full = self.config.site_root.join(path.trim_start_matches('/'));
                let mut url = format!("file://{}", full.display());
                if let Some(query) = query {
                    url.push('?');
                    url.push_str(query);
                }
                Ok(url)
            }
        }
    }
}

/// Encode a string as a JavaScript string literal
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use test_case::test_case;

    fn driver() -> Driver {
        Driver::new(DriverConfig {
            site_root: PathBuf::from("/srv/site"),
            base_url: Some("http://127.0.0.1:4100".to_string()),
            screenshot_dir: PathBuf::from("/tmp/shots"),
            ..DriverConfig::default()
        })
    }

    fn scenario(yaml: &str) -> Scenario {
        Scenario::from_yaml(yaml).unwrap()
    }

    #[test_case(Transport::File, "index.html", "file:///srv/site/index.html"; "file page")]
    #[test_case(Transport::File, "payment.html?uid=verifier", "file:///srv/site/payment.html?uid=verifier"; "file page with query")]
    #[test_case(Transport::Http, "index.html", "http://127.0.0.1:4100/index.html"; "http page")]
    #[test_case(Transport::Http, "/notes.html", "http://127.0.0.1:4100/notes.html"; "http page leading slash")]
    #[test_case(Transport::File, "https://example.com/x", "https://example.com/x"; "absolute url untouched")]
    fn resolve_page(transport: Transport, page: &str, expected: &str) {
        assert_eq!(driver().resolve_page(transport, page).unwrap(), expected);
    }

    #[test]
    fn http_page_without_server_is_an_error() {
        let driver = Driver::new(DriverConfig {
            base_url: None,
            ..DriverConfig::default()
        });
        assert!(driver.resolve_page(Transport::Http, "index.html").is_err());
    }

    #[test]
    fn script_contains_markers_and_steps() {
        let s = scenario(
            r#"
name: smoke
steps:
  - action: navigate
    page: index.html
  - action: click
    selector: '.course-card'
  - action: screenshot
    name: done
"#,
        );
        let script = driver().build_script(&s).unwrap();
        assert!(script.contains("require('playwright')"));
        assert!(script.contains("CAMPUS-STEP"));
        assert!(script.contains(r#"page.goto("file:///srv/site/index.html")"#));
        assert!(script.contains(r#"page.click(".course-card""#));
        assert!(script.contains(r#"/tmp/shots/done.png"#));
        // one run() wrapper per step
        assert_eq!(script.matches("await run(").count(), 3);
    }

    #[test]
    fn selectors_are_json_escaped() {
        let s = scenario(
            r#"
name: escaping
steps:
  - action: click
    selector: 'a[href="broiler-rearing.html"]'
"#,
        );
        let script = driver().build_script(&s).unwrap();
        assert!(script.contains(r#"page.click("a[href=\"broiler-rearing.html\"]""#));
    }

    #[test]
    fn dialog_and_console_handlers_are_opt_in() {
        let plain = scenario("name: plain\nsteps:\n  - action: sleep\n    ms: 1\n");
        let script = driver().build_script(&plain).unwrap();
        assert!(!script.contains("page.on('dialog'"));
        assert!(!script.contains("page.on('console'"));

        let flagged = scenario(
            "name: flagged\naccept_dialogs: true\ncapture_console: true\nsteps:\n  - action: sleep\n    ms: 1\n",
        );
        let script = driver().build_script(&flagged).unwrap();
        assert!(script.contains("page.on('dialog', (dialog) => dialog.accept()"));
        assert!(script.contains("page.on('console'"));
    }

    #[test]
    fn wait_function_passes_null_arg_and_timeout() {
        let s = scenario(
            r#"
name: unlock
steps:
  - action: wait_function
    expression: "document.querySelector('#unlockButton').disabled === false"
    timeout_ms: 15000
"#,
        );
        let script = driver().build_script(&s).unwrap();
        assert!(script.contains("null, { timeout: 15000 }"));
        assert!(script.contains("disabled === false"));
    }

    #[test]
    fn assert_without_expectation_rejected() {
        let s = scenario(
            r#"
name: empty-assert
steps:
  - action: assert
    selector: '.course-card'
"#,
        );
        assert!(driver().build_script(&s).is_err());
    }

    #[test]
    fn parse_output_extracts_step_records() {
        let stdout = r#"
CAMPUS-STEP {"index":0,"name":"navigate:index.html","ok":true,"duration_ms":120}
CAMPUS-CONSOLE {"kind":"log","text":"loaded 4 courses"}
CAMPUS-STEP {"index":1,"name":"click:.course-card","ok":false,"duration_ms":10003,"error":"Timeout 10000ms exceeded"}
"#;
        let outcomes = driver().parse_output(stdout).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].ok);
        assert!(!outcomes[1].ok);
        assert!(outcomes[1].error.as_deref().unwrap().contains("Timeout"));
    }

    fn outcome(index: usize, ok: bool) -> StepOutcome {
        StepOutcome {
            index,
            name: format!("step-{index}"),
            ok,
            duration_ms: 1,
            error: (!ok).then(|| "Timeout 10000ms exceeded".to_string()),
        }
    }

    fn three_step_scenario() -> Scenario {
        scenario(
            r#"
name: crash
steps:
  - action: navigate
    page: index.html
  - action: click
    selector: '.course-card'
  - action: screenshot
    name: done
"#,
        )
    }

    #[test]
    fn dirty_exit_without_failing_record_is_a_driver_error() {
        // node died after two clean steps
        let result = driver().check_run(
            &three_step_scenario(),
            false,
            vec![outcome(0, true), outcome(1, true)],
            "",
            "Killed",
        );
        match result {
            Err(HarnessError::Driver(msg)) => {
                assert!(msg.contains("without a failing step record"));
            }
            other => panic!("expected driver error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_records_on_clean_exit_are_a_driver_error() {
        let result = driver().check_run(
            &three_step_scenario(),
            true,
            vec![outcome(0, true), outcome(1, true)],
            "",
            "",
        );
        match result {
            Err(HarnessError::Driver(msg)) => assert!(msg.contains("2 of 3 steps")),
            other => panic!("expected driver error, got {other:?}"),
        }
    }

    #[test]
    fn failing_record_with_dirty_exit_passes_through() {
        let outcomes = driver()
            .check_run(
                &three_step_scenario(),
                false,
                vec![outcome(0, true), outcome(1, false)],
                "",
                "",
            )
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[1].ok);
    }

    #[test]
    fn complete_clean_run_passes_through() {
        let outcomes = driver()
            .check_run(
                &three_step_scenario(),
                true,
                vec![outcome(0, true), outcome(1, true), outcome(2, true)],
                "",
                "",
            )
            .unwrap();
        assert_eq!(outcomes.len(), 3);
    }

    #[test]
    fn parse_output_rejects_garbled_step_record() {
        assert!(driver().parse_output("CAMPUS-STEP {not json}").is_err());
    }

    #[test]
    fn browser_from_str() {
        assert_eq!("chromium".parse::<Browser>().unwrap(), Browser::Chromium);
        assert_eq!("webkit".parse::<Browser>().unwrap(), Browser::Webkit);
        assert!("chrome".parse::<Browser>().is_err());
    }
}
