use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, info_span, trace, warn};

use crate::config::{RuleSet, Timing};
use crate::detail;
use crate::driver::{self, NavigateOptions, PageDriver};
use crate::error::ScrapeError;
use crate::models::{JobStatus, ProbeRecord, ResolvedJob};

/// Deep link the portal uses for one posting. Parameter order matters.
pub fn probe_url(base: &str, job_id: &str) -> String {
    format!("{}&selectedMenuKey=CareerCenter&jobId={}", base, job_id)
}

pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// Closed markers win regardless of where the page landed; otherwise the
/// portal has to have moved off the listing for the posting to count as open.
pub fn classify(body_text: &str, current_url: &str, listing_url: &str, markers: &[String]) -> JobStatus {
    let text = body_text.to_lowercase();
    if markers.iter().any(|m| text.contains(&m.to_lowercase())) {
        JobStatus::Closed
    } else if current_url != listing_url {
        JobStatus::Open
    } else {
        JobStatus::Unknown
    }
}

/// What a settled probe page looked like.
#[derive(Debug, Clone)]
struct PageReading {
    url: String,
    title: String,
    text: String,
}

#[derive(Debug)]
enum ProbeState {
    Pending,
    Navigated,
    Settled,
    Evaluated(PageReading),
    Classified(JobStatus, PageReading),
}

impl ProbeState {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Navigated => "navigated",
            Self::Settled => "settled",
            Self::Evaluated(_) => "evaluated",
            Self::Classified(..) => "classified",
        }
    }
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// One entry per identifier that was actually probed, whatever its status
    pub jobs: Vec<ResolvedJob>,
    /// One entry per identifier handed in, including skipped ones
    pub probes: Vec<ProbeRecord>,
}

impl Resolution {
    pub fn open(&self) -> impl Iterator<Item = &ResolvedJob> {
        self.jobs.iter().filter(|j| j.status == JobStatus::Open)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.probes.iter().filter(|p| p.status == status).count()
    }
}

/// Probes identifiers one at a time against the live portal.
pub struct Resolver<'a> {
    pub driver: &'a mut dyn PageDriver,
    pub listing_url: &'a str,
    pub rules: &'a RuleSet,
    pub timing: &'a Timing,
    pub retries: u32,
}

impl<'a> Resolver<'a> {
    /// Resolve every identifier in order. Once `deadline` passes, the rest are
    /// reported UNKNOWN without being probed.
    pub fn resolve_all(&mut self, ids: &[String], deadline: Instant) -> Resolution {
        let mut resolution = Resolution::default();

        for id in ids {
            if !is_valid_job_id(id) {
                warn!("rejecting non-numeric job id '{}'", id);
                resolution.probes.push(self.skipped(id, "not a numeric job id"));
                continue;
            }
            if Instant::now() >= deadline {
                warn!("run budget exhausted, {} not probed", id);
                resolution.probes.push(self.skipped(id, "run budget exhausted"));
                continue;
            }

            let (record, job) = self.resolve(id);
            resolution.probes.push(record);
            resolution.jobs.push(job);
        }

        info!(
            "resolved {} id(s): {} open, {} closed, {} unknown",
            resolution.probes.len(),
            resolution.count(JobStatus::Open),
            resolution.count(JobStatus::Closed),
            resolution.count(JobStatus::Unknown)
        );
        resolution
    }

    fn skipped(&self, id: &str, reason: &str) -> ProbeRecord {
        ProbeRecord {
            job_id: id.to_string(),
            status: JobStatus::Unknown,
            attempts: 0,
            apply_url: probe_url(self.listing_url, id),
            error: Some(reason.to_string()),
        }
    }

    /// Probe one identifier, retrying UNKNOWN outcomes.
    pub fn resolve(&mut self, job_id: &str) -> (ProbeRecord, ResolvedJob) {
        let _span = info_span!("probe", job_id = %job_id).entered();
        let url = probe_url(self.listing_url, job_id);
        let mut attempts = 0;
        let mut last_error;

        let (status, reading) = loop {
            attempts += 1;
            let outcome = self.probe_once(job_id, &url);
            self.return_to_listing();

            match outcome {
                Ok((JobStatus::Unknown, reading)) => {
                    let ambiguous = ScrapeError::ClassificationAmbiguous {
                        job_id: job_id.to_string(),
                        url: reading.url.clone(),
                    };
                    debug!("{}", ambiguous);
                    last_error = Some(ambiguous.to_string());
                    if attempts > self.retries {
                        break (JobStatus::Unknown, Some(reading));
                    }
                }
                Ok((status, reading)) => {
                    last_error = None;
                    break (status, Some(reading));
                }
                Err(e) => {
                    debug!("attempt {} failed: {}", attempts, e);
                    last_error = Some(e.to_string());
                    if attempts > self.retries {
                        break (JobStatus::Unknown, None);
                    }
                }
            }
        };

        match status {
            JobStatus::Open => info!("OPEN"),
            JobStatus::Closed => info!("CLOSED, dropping"),
            JobStatus::Unknown => warn!(
                "still UNKNOWN after {} attempt(s), dropping: {}",
                attempts,
                last_error.as_deref().unwrap_or("no detail")
            ),
        }

        let detail = match (&status, reading) {
            (JobStatus::Open, Some(reading)) => reading.detail,
            _ => None,
        };

        let record = ProbeRecord {
            job_id: job_id.to_string(),
            status,
            attempts,
            apply_url: url.clone(),
            error: last_error,
        };
        let job = ResolvedJob {
            job_id: job_id.to_string(),
            apply_url: url,
            verified_at: Utc::now(),
            status,
            detail,
        };
        (record, job)
    }

    /// One pass through `Pending → Navigated → Settled → Evaluated → Classified`.
    fn probe_once(&mut self, job_id: &str, url: &str) -> Result<(JobStatus, ProbeReading), ScrapeError> {
        let mut state = ProbeState::Pending;
        loop {
            trace!("{} is {}", job_id, state.name());
            state = match state {
                ProbeState::Pending => {
                    self.driver
                        .navigate(url, &NavigateOptions::navigated(self.timing.probe_timeout()))?;
                    ProbeState::Navigated
                }
                ProbeState::Navigated => {
                    driver::settle(self.timing.probe_settle());
                    ProbeState::Settled
                }
                ProbeState::Settled => ProbeState::Evaluated(PageReading {
                    url: self.driver.current_url(),
                    title: self.driver.page_title().unwrap_or_default(),
                    text: self.driver.body_text()?,
                }),
                ProbeState::Evaluated(reading) => {
                    let status = classify(
                        &reading.text,
                        &reading.url,
                        self.listing_url,
                        &self.rules.closed_markers,
                    );
                    ProbeState::Classified(status, reading)
                }
                ProbeState::Classified(status, reading) => {
                    let detail = (status == JobStatus::Open).then(|| self.read_detail(&reading));
                    return Ok((
                        status,
                        ProbeReading {
                            url: reading.url,
                            detail: detail.flatten(),
                        },
                    ));
                }
            };
        }
    }

    fn read_detail(&mut self, reading: &PageReading) -> Option<crate::models::JobDetail> {
        match self.driver.body_html() {
            Ok(html) => Some(detail::extract_detail(&html, &reading.title)),
            Err(e) => {
                warn!("could not read posting page: {}", e);
                None
            }
        }
    }

    fn return_to_listing(&mut self) {
        let options = NavigateOptions::navigated(self.timing.listing_timeout());
        match self.driver.navigate(self.listing_url, &options) {
            Ok(()) => driver::settle(self.timing.return_settle()),
            Err(e) => warn!("could not return to the listing: {}", e),
        }
    }
}

/// Result of a classified probe, after the page itself is gone.
#[derive(Debug)]
struct ProbeReading {
    url: String,
    detail: Option<crate::models::JobDetail>,
}
