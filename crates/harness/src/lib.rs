//! Verification harness for the AlfaOctal Campus course site.
//!
//! The harness executes declarative YAML scenarios against a headless
//! browser. Each scenario is a flat sequence of browser actions and
//! assertions (navigate, click, fill, wait, screenshot) that one of the
//! verification procedures performs against the course website:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     campus-harness                         │
//! ├────────────────────────────────────────────────────────────┤
//! │  Runner                                                    │
//! │    ├── load scenarios (verification/scenarios/*.yaml)      │
//! │    ├── StaticServer (http scenarios only)                  │
//! │    ├── Driver::run(scenario) -> per-step outcomes          │
//! │    └── VisualTester::compare(screenshot, baseline)         │
//! ├────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                           │
//! │    ├── name, tags, transport: file | http                  │
//! │    └── steps: navigate / click / fill / wait /             │
//! │        wait_function / assert / assert_url / assert_title  │
//! │        / sleep / screenshot                                │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The browser is driven through Playwright: the driver generates a
//! self-contained Node.js script per scenario and parses per-step JSON
//! records from its stdout. The website under verification is external;
//! the harness only observes it and writes PNG artifacts under the
//! output directory.

pub mod driver;
pub mod error;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod visual;

pub use driver::{Browser, Driver, DriverConfig, StepOutcome};
pub use error::{HarnessError, HarnessResult};
pub use runner::{Runner, RunnerConfig, ScenarioResult, SuiteResult};
pub use scenario::{Scenario, Step, Transport};
