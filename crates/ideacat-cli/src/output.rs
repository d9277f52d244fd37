//! Input loading, result files and the progress checkpoint

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ideacat_core::{BatchOutcomes, CategorizedItem, Item, RunMetrics, RunReport};
use ideacat_engine::ProgressSink;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

/// Accepts a bare array or an object wrapping one, e.g. `{"ideas": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum InputFile {
    Items(Vec<Item>),
    Wrapped { ideas: Vec<Item> },
}

pub fn load_items(path: &Path) -> Result<Vec<Item>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let input: InputFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of ideas", path.display()))?;

    Ok(match input {
        InputFile::Items(items) => items,
        InputFile::Wrapped { ideas } => ideas,
    })
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// UTC timestamp used in output file names
pub fn timestamp() -> Result<String> {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    Ok(OffsetDateTime::now_utc().format(&format)?)
}

/// Where one run writes its files
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub checkpoint: PathBuf,
    pub results: PathBuf,
    pub metrics: PathBuf,
}

impl RunPaths {
    pub fn new(output_dir: &Path, model: &str, stamp: &str) -> Self {
        let model = model.replace(['/', '\\', ':'], "_");
        Self {
            checkpoint: output_dir
                .join("partial_responses")
                .join(format!("{}_{}_preliminary.json", model, stamp)),
            results: output_dir.join(format!("categorized_ideas_{}_{}.json", stamp, model)),
            metrics: output_dir
                .join("metrics")
                .join(format!("performance_metrics_{}_{}.json", stamp, model)),
        }
    }
}

/// The report plus its aggregated metrics, as written to the metrics file
#[derive(Serialize)]
pub struct MetricsFile<'a> {
    pub summary: RunMetrics,
    pub batch_outcomes: BatchOutcomes,
    pub items_per_second: f64,
    #[serde(flatten)]
    pub report: &'a RunReport,
}

impl<'a> MetricsFile<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            summary: report.metrics(),
            batch_outcomes: report.batch_outcomes(),
            items_per_second: report.items_per_second(),
            report,
        }
    }
}

/// Rewrites a JSON file with all results so far after every successful batch
pub struct JsonProgressFile {
    path: PathBuf,
}

impl JsonProgressFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ProgressSink for JsonProgressFile {
    async fn save_progress(&self, results: &[CategorizedItem]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_vec_pretty(results)?;
        // Replace atomically
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_items_accepts_both_key_styles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ideas.json");
        std::fs::write(
            &path,
            r#"[
                {"_id": "a1", "text": "Solar powered kiosk"},
                {"id": 7, "title": "Dog walking marketplace"},
                {"_id": "b2"}
            ]"#,
        )
        .unwrap();

        let items = load_items(&path).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "a1");
        assert_eq!(items[1].id, "7");
        assert_eq!(items[1].text, "Dog walking marketplace");
        assert_eq!(items[2].text, "");
    }

    #[test]
    fn test_load_wrapped_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ideas.json");
        std::fs::write(&path, r#"{"ideas": [{"_id": "x", "text": "y"}]}"#).unwrap();
        assert_eq!(load_items(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_load_items_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_items(&dir.path().join("missing.json")).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"not": "ideas"}"#).unwrap();
        assert!(load_items(&path).is_err());
    }

    #[test]
    fn test_run_paths() {
        let paths = RunPaths::new(Path::new("out"), "org/model", "20240101_120000");
        assert_eq!(
            paths.results,
            PathBuf::from("out/categorized_ideas_20240101_120000_org_model.json")
        );
        assert_eq!(
            paths.checkpoint,
            PathBuf::from("out/partial_responses/org_model_20240101_120000_preliminary.json")
        );
        assert!(paths.metrics.starts_with("out/metrics"));
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp().unwrap();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
    }

    #[tokio::test]
    async fn test_progress_file_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial").join("progress.json");
        let sink = JsonProgressFile::new(path.clone());

        let mut results = vec![CategorizedItem {
            id: "a".into(),
            category: "Software".into(),
        }];
        sink.save_progress(&results).await.unwrap();
        results.push(CategorizedItem {
            id: "b".into(),
            category: "Energy".into(),
        });
        sink.save_progress(&results).await.unwrap();

        let saved: Vec<CategorizedItem> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, results);
    }
}
