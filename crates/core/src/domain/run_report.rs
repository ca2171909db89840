// Run Report (persisted next to the sorter output)

use serde::{Deserialize, Serialize};

/// File name of the run report inside the output folder
pub const RUN_LOG_FILE: &str = "run_log.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub sorter_name: String,
    pub sorter_version: String,
    pub runner_version: String,
    pub started_at: i64, // epoch ms
    pub run_time_secs: f64,
    pub error: bool,
    pub error_message: Option<String>,
}

impl RunReport {
    pub fn success(
        sorter_name: &str,
        sorter_version: &str,
        started_at: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            sorter_name: sorter_name.to_string(),
            sorter_version: sorter_version.to_string(),
            runner_version: crate::VERSION.to_string(),
            started_at,
            run_time_secs: duration_ms as f64 / 1000.0,
            error: false,
            error_message: None,
        }
    }

    pub fn failure(
        sorter_name: &str,
        sorter_version: &str,
        started_at: i64,
        duration_ms: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: true,
            error_message: Some(message.into()),
            ..Self::success(sorter_name, sorter_version, started_at, duration_ms)
        }
    }
}
