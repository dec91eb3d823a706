//! Screenshot baseline comparison
//!
//! Screenshots are the primary artifact of a verification run. When a
//! scenario opts in, each captured PNG is compared against a stored
//! baseline: a SHA-256 equality check first, then a per-pixel diff with a
//! small per-channel tolerance to absorb anti-aliasing and encoder noise.
//! Differing pixels are marked red in a diff image; matching pixels are
//! dimmed so the marks stand out.

use std::path::{Path, PathBuf};

use image::{GenericImageView, Pixel, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Per-channel difference below this is treated as equal.
const CHANNEL_TOLERANCE: i32 = 5;

/// Aggregate numbers from a pixel comparison
#[derive(Debug, Clone, Copy)]
pub struct DiffStats {
    pub diff_pixels: u64,
    pub total_pixels: u64,
}

impl DiffStats {
    pub fn percent(&self) -> f64 {
        if self.total_pixels == 0 {
            return 0.0;
        }
        (self.diff_pixels as f64 / self.total_pixels as f64) * 100.0
    }
}

/// Compare two images pixel by pixel on the actual image's canvas.
/// Pixels outside the overlapping region (when dimensions differ) count
/// as differing. Returns the stats and a marked-up diff image.
pub fn diff_images(actual: &RgbaImage, baseline: &RgbaImage) -> (DiffStats, RgbaImage) {
    let (width, height) = actual.dimensions();
    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;
    let total_pixels = (width as u64) * (height as u64);

    for y in 0..height {
        for x in 0..width {
            let inside = x < baseline.width() && y < baseline.height();
            let differs = !inside
                || pixels_differ(actual.get_pixel(x, y), baseline.get_pixel(x, y));

            if differs {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            } else {
                let channels = actual.get_pixel(x, y).channels();
                diff_img.put_pixel(
                    x,
                    y,
                    image::Rgba([channels[0] / 2, channels[1] / 2, channels[2] / 2, 128]),
                );
            }
        }
    }

    (
        DiffStats {
            diff_pixels,
            total_pixels,
        },
        diff_img,
    )
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(&a, &b)| (a as i32 - b as i32).abs() > CHANNEL_TOLERANCE)
}

/// Result of comparing one screenshot against its baseline
#[derive(Debug, Clone)]
pub struct Comparison {
    pub matches: bool,
    pub diff_percent: f64,
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub diff_image_path: Option<PathBuf>,
    pub actual_hash: String,
    pub baseline_hash: String,
}

/// Baseline store and comparator
pub struct VisualTester {
    baseline_dir: PathBuf,
    actual_dir: PathBuf,
    diff_dir: PathBuf,
    threshold: f64,
}

impl VisualTester {
    pub fn new(config: VisualConfig) -> HarnessResult<Self> {
        std::fs::create_dir_all(&config.baseline_dir)?;
        std::fs::create_dir_all(&config.actual_dir)?;
        std::fs::create_dir_all(&config.diff_dir)?;

        Ok(Self {
            baseline_dir: config.baseline_dir,
            actual_dir: config.actual_dir,
            diff_dir: config.diff_dir,
            threshold: config.threshold,
        })
    }

    /// Compare the named screenshot against its baseline
    pub fn compare(&self, name: &str, threshold: Option<f64>) -> HarnessResult<Comparison> {
        let threshold = threshold.unwrap_or(self.threshold);

        let actual_path = self.actual_dir.join(format!("{name}.png"));
        let baseline_path = self.baseline_dir.join(format!("{name}.png"));

        if !actual_path.exists() {
            return Err(HarnessError::StepFailed {
                step: format!("compare:{name}"),
                reason: format!("screenshot not found: {}", actual_path.display()),
            });
        }
        if !baseline_path.exists() {
            return Err(HarnessError::BaselineNotFound(
                baseline_path.to_string_lossy().into_owned(),
            ));
        }

        let actual_hash = hash_file(&actual_path)?;
        let baseline_hash = hash_file(&baseline_path)?;

        if actual_hash == baseline_hash {
            debug!("'{name}' matches baseline exactly");
            let img = image::open(&actual_path)?;
            let total = (img.width() as u64) * (img.height() as u64);
            return Ok(Comparison {
                matches: true,
                diff_percent: 0.0,
                diff_pixels: 0,
                total_pixels: total,
                diff_image_path: None,
                actual_hash,
                baseline_hash,
            });
        }

        let actual = image::open(&actual_path)?.to_rgba8();
        let baseline = image::open(&baseline_path)?.to_rgba8();

        if actual.dimensions() != baseline.dimensions() {
            warn!(
                "'{name}' dimensions differ: actual {:?} vs baseline {:?}",
                actual.dimensions(),
                baseline.dimensions()
            );
        }

        let (stats, diff_img) = diff_images(&actual, &baseline);
        let diff_percent = stats.percent();
        let matches = diff_percent <= threshold;

        let diff_image_path = if stats.diff_pixels > 0 {
            let path = self.diff_dir.join(format!("{name}-diff.png"));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "'{name}' drifted from baseline: {diff_percent:.2}% pixels differ \
                 (threshold {threshold:.2}%)"
            );
        }

        Ok(Comparison {
            matches,
            diff_percent,
            diff_pixels: stats.diff_pixels,
            total_pixels: stats.total_pixels,
            diff_image_path,
            actual_hash,
            baseline_hash,
        })
    }

    /// Promote the current screenshot to baseline
    pub fn update_baseline(&self, name: &str) -> HarnessResult<()> {
        let actual_path = self.actual_dir.join(format!("{name}.png"));
        if !actual_path.exists() {
            return Err(HarnessError::StepFailed {
                step: format!("update_baseline:{name}"),
                reason: format!("screenshot not found: {}", actual_path.display()),
            });
        }

        std::fs::copy(&actual_path, self.baseline_dir.join(format!("{name}.png")))?;
        info!("updated baseline for '{name}'");
        Ok(())
    }

    /// Promote every current screenshot to baseline
    pub fn update_all_baselines(&self) -> HarnessResult<Vec<String>> {
        let mut updated = Vec::new();
        for name in png_stems(&self.actual_dir)? {
            self.update_baseline(&name)?;
            updated.push(name);
        }
        Ok(updated)
    }

    /// Names of all stored baselines
    pub fn list_baselines(&self) -> HarnessResult<Vec<String>> {
        png_stems(&self.baseline_dir)
    }
}

fn png_stems(dir: &Path) -> HarnessResult<Vec<String>> {
    let mut stems = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "png").unwrap_or(false) {
            if let Some(stem) = path.file_stem() {
                stems.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    stems.sort();
    Ok(stems)
}

fn hash_file(path: &Path) -> HarnessResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Configuration for baseline comparison
#[derive(Debug, Clone)]
pub struct VisualConfig {
    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub threshold: f64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("verification/output/baselines"),
            actual_dir: PathBuf::from("verification/output/screenshots"),
            diff_dir: PathBuf::from("verification/output/diffs"),
            threshold: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, image::Rgba(rgba))
    }

    #[test]
    fn identical_images_have_no_diff() {
        let a = solid(10, 10, [20, 40, 60, 255]);
        let (stats, _) = diff_images(&a, &a.clone());
        assert_eq!(stats.diff_pixels, 0);
        assert_eq!(stats.percent(), 0.0);
    }

    #[test]
    fn small_channel_noise_is_tolerated() {
        let a = solid(10, 10, [100, 100, 100, 255]);
        let b = solid(10, 10, [104, 97, 102, 255]);
        let (stats, _) = diff_images(&a, &b);
        assert_eq!(stats.diff_pixels, 0);
    }

    #[test]
    fn changed_region_is_counted_and_marked() {
        let a = solid(10, 10, [0, 0, 0, 255]);
        let mut b = a.clone();
        for x in 0..5 {
            b.put_pixel(x, 0, image::Rgba([255, 255, 255, 255]));
        }

        let (stats, diff) = diff_images(&a, &b);
        assert_eq!(stats.diff_pixels, 5);
        assert_eq!(stats.total_pixels, 100);
        assert!((stats.percent() - 5.0).abs() < 1e-9);
        assert_eq!(diff.get_pixel(0, 0), &image::Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn shrunken_baseline_counts_missing_region() {
        let actual = solid(4, 4, [10, 10, 10, 255]);
        let baseline = solid(2, 2, [10, 10, 10, 255]);
        let (stats, _) = diff_images(&actual, &baseline);
        // 16 pixels total, 4 overlap and match
        assert_eq!(stats.diff_pixels, 12);
    }

    #[test]
    fn compare_flags_drift_above_threshold() {
        let dirs = tempfile::tempdir().unwrap();
        let tester = VisualTester::new(VisualConfig {
            baseline_dir: dirs.path().join("baselines"),
            actual_dir: dirs.path().join("actual"),
            diff_dir: dirs.path().join("diffs"),
            threshold: 0.5,
        })
        .unwrap();

        solid(10, 10, [0, 0, 0, 255])
            .save(dirs.path().join("baselines/shot.png"))
            .unwrap();
        let mut changed = solid(10, 10, [0, 0, 0, 255]);
        for x in 0..10 {
            changed.put_pixel(x, 0, image::Rgba([255, 255, 255, 255]));
        }
        changed.save(dirs.path().join("actual/shot.png")).unwrap();

        let comparison = tester.compare("shot", None).unwrap();
        assert!(!comparison.matches);
        assert!((comparison.diff_percent - 10.0).abs() < 1e-9);
        assert!(comparison.diff_image_path.is_some());
    }

    #[test]
    fn compare_matches_identical_files_by_hash() {
        let dirs = tempfile::tempdir().unwrap();
        let tester = VisualTester::new(VisualConfig {
            baseline_dir: dirs.path().join("baselines"),
            actual_dir: dirs.path().join("actual"),
            diff_dir: dirs.path().join("diffs"),
            threshold: 0.5,
        })
        .unwrap();

        let img = solid(8, 8, [1, 2, 3, 255]);
        img.save(dirs.path().join("baselines/shot.png")).unwrap();
        img.save(dirs.path().join("actual/shot.png")).unwrap();

        let comparison = tester.compare("shot", None).unwrap();
        assert!(comparison.matches);
        assert_eq!(comparison.actual_hash, comparison.baseline_hash);
        assert!(comparison.diff_image_path.is_none());
    }

    #[test]
    fn missing_baseline_is_a_distinct_error() {
        let dirs = tempfile::tempdir().unwrap();
        let tester = VisualTester::new(VisualConfig {
            baseline_dir: dirs.path().join("baselines"),
            actual_dir: dirs.path().join("actual"),
            diff_dir: dirs.path().join("diffs"),
            threshold: 0.5,
        })
        .unwrap();

        solid(4, 4, [0, 0, 0, 255])
            .save(dirs.path().join("actual/fresh.png"))
            .unwrap();

        match tester.compare("fresh", None) {
            Err(HarnessError::BaselineNotFound(_)) => {}
            other => panic!("expected BaselineNotFound, got {other:?}"),
        }
    }

    #[test]
    fn update_baseline_then_compare_matches() {
        let dirs = tempfile::tempdir().unwrap();
        let tester = VisualTester::new(VisualConfig {
            baseline_dir: dirs.path().join("baselines"),
            actual_dir: dirs.path().join("actual"),
            diff_dir: dirs.path().join("diffs"),
            threshold: 0.5,
        })
        .unwrap();

        solid(4, 4, [9, 9, 9, 255])
            .save(dirs.path().join("actual/shot.png"))
            .unwrap();
        tester.update_baseline("shot").unwrap();

        assert_eq!(tester.list_baselines().unwrap(), vec!["shot".to_string()]);
        assert!(tester.compare("shot", None).unwrap().matches);
    }
}
