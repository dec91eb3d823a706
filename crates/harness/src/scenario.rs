//! Declarative YAML verification scenarios
//!
//! A scenario is one self-contained verification procedure: a flat,
//! sequential list of browser actions and assertions. Scenarios carry no
//! branching and no retry policy; an unmet wait or failed assertion is
//! fatal to the run.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// A complete verification scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// How pages are loaded: directly from disk or through the local
    /// static server
    #[serde(default)]
    pub transport: Transport,

    /// Browser viewport
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    /// Auto-accept confirm/alert dialogs (the logout confirmation)
    #[serde(default)]
    pub accept_dialogs: bool,

    /// Relay browser console messages into the harness log
    #[serde(default)]
    pub capture_console: bool,

    /// Compare captured screenshots against stored baselines
    #[serde(default)]
    pub visual_baseline: bool,

    /// Allowed pixel difference for baseline comparison (percent)
    #[serde(default = "default_visual_threshold")]
    pub visual_threshold: f64,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

fn default_viewport() -> Viewport {
    Viewport {
        width: 1280,
        height: 720,
    }
}

fn default_visual_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// How a scenario reaches the site under verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// `file://<site_root>/<page>` URLs, no server involved
    #[default]
    File,
    /// Pages served from `site_root` by the harness's local HTTP server
    Http,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Open a page. `page` is a site-relative path, optionally with a
    /// query string (`payment.html?uid=verifier`); absolute `http(s)://`
    /// and `file://` URLs pass through untouched.
    Navigate {
        page: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Click an element (first match when the selector is ambiguous)
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill { selector: String, value: String },

    /// Wait for an element to reach a state
    Wait {
        selector: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default)]
        state: WaitState,
    },

    /// Wait for a JavaScript expression to become truthy
    WaitFunction {
        expression: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },

    /// Fixed settle time (use sparingly)
    Sleep { ms: u64 },

    /// Assert something about the elements matching a selector. Text
    /// assertions pass if ANY matching element satisfies them.
    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        count_at_least: Option<usize>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },

    /// Assert on the page URL (waits until satisfied, like the browser
    /// assertions)
    AssertUrl {
        #[serde(default)]
        ends_with: Option<String>,
        #[serde(default)]
        equals: Option<String>,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },

    /// Assert the document title
    AssertTitle {
        equals: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },

    /// Capture a PNG screenshot under the output directory
    Screenshot {
        name: String,
        #[serde(default)]
        full_page: bool,
    },
}

// 10 s, the wait budget the verification procedures use.
fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

impl Step {
    /// Short label used in logs and step outcome records
    pub fn label(&self) -> String {
        match self {
            Step::Navigate { page, .. } => format!("navigate:{page}"),
            Step::Click { selector, .. } => format!("click:{selector}"),
            Step::Fill { selector, .. } => format!("fill:{selector}"),
            Step::Wait { selector, .. } => format!("wait:{selector}"),
            Step::WaitFunction { expression, .. } => {
                let head: String = expression.chars().take(40).collect();
                format!("wait_function:{head}")
            }
            Step::Sleep { ms } => format!("sleep:{ms}ms"),
            Step::Assert { selector, .. } => format!("assert:{selector}"),
            Step::AssertUrl {
                ends_with, equals, ..
            } => {
                let target = ends_with.as_deref().or(equals.as_deref()).unwrap_or("?");
                format!("assert_url:{target}")
            }
            Step::AssertTitle { equals, .. } => format!("assert_title:{equals}"),
            Step::Screenshot { name, .. } => format!("screenshot:{name}"),
        }
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            HarnessError::ScenarioParse(format!("{}: {}", path.display(), e))
        })
    }

    /// Load all scenarios from a directory, rejecting duplicate names
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut scenarios = Vec::new();
        let mut seen = HashSet::new();

        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            let scenario = Self::from_file(&path)?;
            if !seen.insert(scenario.name.clone()) {
                return Err(HarnessError::DuplicateScenario(scenario.name));
            }
            scenarios.push(scenario);
        }

        Ok(scenarios)
    }

    /// Structural checks applied after parsing
    pub fn validate(&self) -> HarnessResult<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::ScenarioParse(
                "scenario name must not be empty".into(),
            ));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::ScenarioParse(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }

        let mut shots = HashSet::new();
        for step in &self.steps {
            if let Step::Screenshot { name, .. } = step {
                if !shots.insert(name.clone()) {
                    return Err(HarnessError::ScenarioParse(format!(
                        "scenario '{}' captures screenshot '{}' twice",
                        self.name, name
                    )));
                }
            }
            if let Step::AssertUrl {
                ends_with: None,
                equals: None,
                ..
            } = step
            {
                return Err(HarnessError::ScenarioParse(format!(
                    "scenario '{}' has an assert_url step with no expectation",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// Names of all screenshots this scenario captures, in order
    pub fn screenshot_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                Step::Screenshot { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
