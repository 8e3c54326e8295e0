use std::time::Duration;
use thiserror::Error;

/// Failures reported by a `PageDriver`.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("element {selector} could not be used: {reason}")]
    Interaction { selector: String, reason: String },
    #[error("page evaluation failed: {0}")]
    Evaluation(String),
    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),
    #[error("browser session unavailable: {0}")]
    Session(String),
}

/// The scrape pipeline's error taxonomy. Everything except `SessionFatal` is
/// recovered per candidate or per probe.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("navigation error: {0}")]
    Navigation(#[source] DriverError),
    #[error("interaction error: {0}")]
    Interaction(#[source] DriverError),
    #[error("probe for job {job_id} was neither closed nor a clean navigation (landed on {url})")]
    ClassificationAmbiguous { job_id: String, url: String },
    #[error("record for job {job_id} is missing {field}")]
    SchemaViolation { job_id: String, field: &'static str },
    #[error("could not start a browser session: {0}")]
    SessionFatal(String),
}

impl From<DriverError> for ScrapeError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Session(reason) => ScrapeError::SessionFatal(reason),
            e @ DriverError::Interaction { .. } => ScrapeError::Interaction(e),
            e => ScrapeError::Navigation(e),
        }
    }
}

/// Why a discovery strategy produced nothing.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("page snapshot has no {0}")]
    MissingInput(&'static str),
    #[error("strategy panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_errors_map_onto_taxonomy() {
        let nav: ScrapeError = DriverError::Timeout {
            url: "https://x".into(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert!(matches!(nav, ScrapeError::Navigation(_)));

        let click: ScrapeError = DriverError::Interaction {
            selector: "#a".into(),
            reason: "detached".into(),
        }
        .into();
        assert!(matches!(click, ScrapeError::Interaction(_)));

        let session: ScrapeError = DriverError::Session("no chrome".into()).into();
        assert!(matches!(session, ScrapeError::SessionFatal(_)));
    }

    #[test]
    fn test_schema_violation_message_names_field() {
        let err = ScrapeError::SchemaViolation {
            job_id: "564827".into(),
            field: "title",
        };
        assert_eq!(err.to_string(), "record for job 564827 is missing title");
    }
}
