use include_dir::{include_dir, Dir};
use serde::Deserialize;
use serde_json::from_str;
use std::path::Path;

use crate::error::{Result, TaisoError};

static DATA_DIR: Dir = include_dir!("src/data");

/// One timed exercise step. The sequence is fixed at configuration time and
/// immutable during a run.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub duration_ms: u64,
}

/// Ordered sequence of exercise steps.
#[derive(Deserialize, Clone, Debug)]
pub struct Routine {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Time range of one exercise within a recording, in seconds from the start
/// of step 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSpan {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl Routine {
    /// The embedded standard 13-step routine.
    pub fn standard() -> Self {
        let file = DATA_DIR
            .get_file("routine.json")
            .expect("routine file not found");
        let text = file
            .contents_utf8()
            .expect("unable to interpret routine file as a string");
        from_str(text).expect("unable to deserialize routine json")
    }

    /// Load a custom routine from a JSON file with the same shape as the
    /// embedded one.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let routine: Routine = from_str(&text).map_err(|e| TaisoError::DataFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if routine.steps.is_empty() {
            return Err(TaisoError::DataFile {
                path: path.to_path_buf(),
                reason: "routine has no steps".into(),
            });
        }
        Ok(routine)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn total_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    /// Cumulative time spans of each step, used to bin recorded frames per
    /// exercise when scoring.
    pub fn spans(&self) -> Vec<StepSpan> {
        let mut spans = Vec::with_capacity(self.steps.len());
        let mut at_ms = 0u64;
        for step in &self.steps {
            let start_sec = at_ms as f64 / 1000.0;
            at_ms += step.duration_ms;
            spans.push(StepSpan {
                start_sec,
                end_sec: at_ms as f64 / 1000.0,
            });
        }
        spans
    }

    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.steps
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.as_str())
            .unwrap_or(id)
    }
}
