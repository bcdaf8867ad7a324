//! SUSHI Dataset Master Report envelope (COUNTER CoP-RD, release rd1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPeriod {
    #[serde(rename = "begin-date")]
    pub begin_date: DateTime<Utc>,
    #[serde(rename = "end-date")]
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub code: u32,
    pub severity: String,
    pub message: String,
    #[serde(rename = "help-url", default, skip_serializing_if = "String::is_empty")]
    pub help_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
}

impl Exception {
    /// `3071` — a usually-present attribute is missing from this report.
    pub fn missing_attribute(message: &str, data: &str) -> Self {
        Exception {
            code: 3071,
            severity: "warning".to_string(),
            message: message.to_string(),
            help_url: String::new(),
            data: data.to_string(),
        }
    }

    /// `69` — the report body is gzip-compressed.
    pub fn compressed() -> Self {
        Exception {
            code: 69,
            severity: "warning".to_string(),
            message: "Report is compressed using gzip".to_string(),
            help_url: "https://github.com/datacite/sashimi".to_string(),
            data: "usage data needs to be uncompressed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterIdentifier {
    #[serde(rename = "type")]
    pub identifier_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDatasetInstance {
    #[serde(rename = "metric-type")]
    pub metric_type: String,
    pub count: u64,
    #[serde(rename = "access-method")]
    pub access_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDatasetPerformance {
    pub period: ReportingPeriod,
    pub instance: Vec<CounterDatasetInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDatasetUsage {
    #[serde(rename = "dataset-title")]
    pub dataset_title: String,
    #[serde(rename = "dataset-id")]
    pub dataset_id: CounterIdentifier,
    pub platform: String,
    pub publisher: String,
    #[serde(rename = "publisher-id")]
    pub publisher_id: Vec<CounterIdentifier>,
    #[serde(rename = "data-type")]
    pub data_type: String,
    pub performance: Vec<CounterDatasetPerformance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHeader {
    #[serde(rename = "report-name")]
    pub report_name: String,
    #[serde(rename = "report-id")]
    pub report_id: String,
    pub release: String,
    pub created: String,
    #[serde(rename = "created-by")]
    pub created_by: String,
    #[serde(rename = "reporting-period")]
    pub reporting_period: ReportingPeriod,
    #[serde(rename = "report-filters")]
    pub report_filters: Vec<String>,
    #[serde(rename = "report-attributes")]
    pub report_attributes: Vec<String>,
    pub exceptions: Vec<Exception>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDatasetReport {
    #[serde(rename = "report-header")]
    pub report_header: ReportHeader,
    #[serde(rename = "report-datasets")]
    pub report_datasets: Vec<CounterDatasetUsage>,
}

/// Attributes shared by every dataset row of one report run.
#[derive(Debug, Clone, Default)]
pub struct SharedData {
    /// Platform name, e.g. the hosting service.
    pub platform: String,
    /// Name of the repository.
    pub publisher: String,
    /// Always a client-id when present.
    pub publisher_id: String,
}
