// Run records
//
// Every CLI invocation that produces an output file stamps it with a record:
// a unique id, wall-clock start and finish, the backend and the full
// configuration, so a result can be reproduced from the file alone.

use crate::config::SimulationConfig;
use crate::ml::backend::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a run did
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunKind {
    /// Open-loop schedule rollout
    Rollout,

    /// Environment episode driven by a schedule
    Episode,

    /// Fresh parameter blobs written for smoke testing
    InitWeights,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Rollout => "Rollout",
            RunKind::Episode => "Episode",
            RunKind::InitWeights => "InitWeights",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub backend: BackendKind,

    /// Schedule name, when the run followed one
    pub schedule: Option<String>,

    pub config: SimulationConfig,

    /// Free-form summary (JSON)
    pub summary: serde_json::Value,
}

impl RunRecord {
    pub fn start(kind: RunKind, backend: BackendKind, config: &SimulationConfig) -> Self {
        Self {
            id: RunId::new(),
            kind,
            started_at: Utc::now(),
            finished_at: None,
            backend,
            schedule: None,
            config: config.clone(),
            summary: serde_json::json!({}),
        }
    }

    pub fn with_schedule(mut self, name: impl Into<String>) -> Self {
        self.schedule = Some(name.into());
        self
    }

    pub fn finish(mut self, summary: serde_json::Value) -> Self {
        self.finished_at = Some(Utc::now());
        self.summary = summary;
        self
    }

    /// Where the record goes for outputs that cannot embed it, e.g.
    /// `net.json` -> `net.record.json`
    pub fn sidecar_path(output: &Path) -> PathBuf {
        output.with_extension("record.json")
    }

    /// Wall-clock duration, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_record_lifecycle() {
        let cfg = SimulationConfig::default();
        let record = RunRecord::start(RunKind::Rollout, BackendKind::Cpu, &cfg).with_schedule("add");
        assert!(record.finished_at.is_none());
        assert!(record.duration_ms().is_none());

        let record = record.finish(serde_json::json!({ "steps": 12 }));
        assert!(record.duration_ms().unwrap() >= 0);
        assert_eq!(record.summary["steps"], 12);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "Rollout");
        assert_eq!(json["backend"], "cpu");
        assert_eq!(json["schedule"], "add");

        let back: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.kind.as_str(), "Rollout");
    }

    #[test]
    fn test_init_weights_sidecar_record() {
        assert_eq!(
            RunRecord::sidecar_path(Path::new("out/net.json")),
            PathBuf::from("out/net.record.json")
        );
        assert_eq!(
            RunRecord::sidecar_path(Path::new("weights")),
            PathBuf::from("weights.record.json")
        );

        let cfg = SimulationConfig {
            layer_widths: vec![5, 8, 1],
            ..SimulationConfig::default()
        };
        let record = RunRecord::start(RunKind::InitWeights, BackendKind::Cpu, &cfg)
            .finish(serde_json::json!({ "seed": 42 }));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "InitWeights");
        assert!(json["schedule"].is_null());
        assert_eq!(json["config"]["layer_widths"], serde_json::json!([5, 8, 1]));
        assert!(record.duration_ms().is_some());
    }
}
