use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of discovery heuristics, listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AttributePattern,
    ClickableKeyword,
    InlineScript,
    RawHtmlRegex,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::AttributePattern,
        StrategyKind::ClickableKeyword,
        StrategyKind::InlineScript,
        StrategyKind::RawHtmlRegex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttributePattern => "attribute_pattern",
            Self::ClickableKeyword => "clickable_keyword",
            Self::InlineScript => "inline_script",
            Self::RawHtmlRegex => "raw_html_regex",
        }
    }

    /// Higher wins when two strategies report the same identifier with equal evidence.
    pub fn priority(&self) -> u8 {
        match self {
            Self::AttributePattern => 3,
            Self::ClickableKeyword => 2,
            Self::InlineScript => 1,
            Self::RawHtmlRegex => 0,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Handle to a live DOM element. Only meaningful to the strategy and session
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub selector: String,
}

impl ElementRef {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub identifier: String,
    pub evidence_text: String,
    pub source_strategy: StrategyKind,
    pub element_ref: Option<ElementRef>,
}

impl RawCandidate {
    pub fn new(identifier: &str, evidence_text: &str, source_strategy: StrategyKind) -> Self {
        Self {
            identifier: identifier.to_string(),
            evidence_text: evidence_text.trim().to_string(),
            source_strategy,
            element_ref: None,
        }
    }

    pub fn with_element(mut self, element_ref: ElementRef) -> Self {
        self.element_ref = Some(element_ref);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Open,
    Closed,
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Text lifted from an open posting's page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedJob {
    pub job_id: String,
    pub apply_url: String,
    pub verified_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<JobDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalarySource {
    Inferred,
    Scraped,
}

/// One entry of the site's `jobs.json`. Field names are the contract with the
/// presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalJobRecord {
    pub id: String,
    pub title: String,
    pub department: String,
    pub location: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub salary_min: Option<i64>,
    #[serde(default)]
    pub salary_max: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    pub description_md: String,
    pub requirements_md: String,
    #[serde(default)]
    pub nice_to_haves_md: Option<String>,
    pub apply_url: String,
    pub posted_at: String,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub locations: Vec<String>,
    pub employment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary_source: Option<SalarySource>,
    /// Hand-maintained fields (benefits, contact_info, ...). Kept as-is on records
    /// a run does not replace.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What happened to one identifier during resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub apply_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnostic output written once per completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRunArtifact {
    pub ran_at: DateTime<Utc>,
    pub total_candidates: usize,
    pub resolved_jobs: Vec<ResolvedJob>,
    pub by_strategy: BTreeMap<String, usize>,
    /// Per-identifier probe outcomes, including ids that were never probed
    #[serde(default)]
    pub probes: Vec<ProbeRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_priority_follows_declaration_order() {
        let priorities: Vec<u8> = StrategyKind::ALL.iter().map(|s| s.priority()).collect();
        assert_eq!(priorities, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_job_status_wire_names() {
        assert_eq!(serde_json::to_string(&JobStatus::Open).unwrap(), "\"OPEN\"");
        assert_eq!(JobStatus::parse("CLOSED"), Some(JobStatus::Closed));
        assert_eq!(JobStatus::parse("closed"), None);
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let raw = r#"{
            "id": "finance-manager",
            "title": "Finance Manager",
            "department": "Finance",
            "location": "Park City, UT",
            "type": "Full Time",
            "description_md": "d",
            "requirements_md": "r",
            "apply_url": "https://example.com",
            "posted_at": "2025-01-01",
            "employment_type": "FULL_TIME",
            "benefits": ["401k"]
        }"#;
        let record: CanonicalJobRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.job_type, "Full Time");
        assert!(record.extra.contains_key("benefits"));
        assert!(record.salary_source.is_none());

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["type"], "Full Time");
        assert_eq!(back["benefits"][0], "401k");
        assert!(back.get("salary_source").is_none());
    }

    #[test]
    fn test_artifact_uses_camel_case() {
        let artifact = ScrapeRunArtifact {
            ran_at: Utc::now(),
            total_candidates: 3,
            resolved_jobs: vec![],
            by_strategy: BTreeMap::from([("inline_script".to_string(), 3)]),
            probes: vec![],
        };
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["totalCandidates"], 3);
        assert_eq!(value["byStrategy"]["inline_script"], 3);
        assert!(value.get("ranAt").is_some());
        assert!(value["resolvedJobs"].as_array().unwrap().is_empty());
    }
}
