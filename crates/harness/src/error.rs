//! Error types for the verification harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("static server failed to start: {0}")]
    ServerStartup(String),

    #[error("static server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("node executable not found; the driver needs Node.js with the playwright package available")]
    NodeNotFound,

    #[error("playwright package not resolvable from {0}; install it with: npm install playwright")]
    PlaywrightMissing(String),

    #[error("driver failure: {0}")]
    Driver(String),

    #[error("scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("duplicate scenario name: {0}")]
    DuplicateScenario(String),

    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("step failed: {step}: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("baseline not found: {0}")]
    BaselineNotFound(String),

    #[error("screenshot mismatch: {name} differs by {diff_percent:.2}% (threshold: {threshold:.2}%)")]
    ScreenshotMismatch {
        name: String,
        diff_percent: f64,
        threshold: f64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
