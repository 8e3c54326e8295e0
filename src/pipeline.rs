use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, info_span, warn};

use crate::config::ScrapeConfig;
use crate::db::{History, Posting, PostingUpdate, RunSummary};
use crate::discovery::{self, ClickThrough, Discovery, DiscoveryReport};
use crate::driver::{self, NavigateOptions, PageDriver, Session, WaitCondition};
use crate::merge::{self, IncomingRecord};
use crate::models::{CanonicalJobRecord, JobStatus, ProbeRecord, RawCandidate, ResolvedJob, ScrapeRunArtifact};
use crate::normalize::Normalizer;
use crate::resolver::Resolver;
use crate::snapshot::PageSnapshot;
use crate::store::{self, JobStore};

/// What one scrape run did, for the end-of-run summary.
#[derive(Debug)]
pub struct RunReport {
    pub ran_at: DateTime<Utc>,
    pub total_candidates: usize,
    pub by_strategy: BTreeMap<String, usize>,
    pub probes: Vec<ProbeRecord>,
    pub records: Vec<CanonicalJobRecord>,
    pub added: usize,
    pub updated: usize,
    pub superseded: usize,
    /// (incoming slug, stored slug) pairs with nearly identical titles
    pub near_duplicates: Vec<(String, String)>,
    pub committed: bool,
    pub artifact_path: Option<PathBuf>,
}

impl RunReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.probes.iter().filter(|p| p.status == status).count()
    }
}

fn open_history(config: &ScrapeConfig) -> Option<History> {
    let path = config.history_db_path();
    match History::open(&path) {
        Ok(history) => Some(history),
        Err(e) => {
            warn!("run history unavailable: {:#}", e);
            None
        }
    }
}

fn load_listing(driver: &mut dyn PageDriver, config: &ScrapeConfig) -> Result<()> {
    info!("loading {}", config.portal_url);
    let timeout = config.timing.listing_timeout();
    let options = match &config.ready_selector {
        Some(selector) => NavigateOptions {
            wait: WaitCondition::Selector(selector.clone()),
            timeout,
        },
        None => NavigateOptions::navigated(timeout),
    };
    driver
        .navigate(&config.portal_url, &options)
        .map_err(crate::error::ScrapeError::from)
        .context("Failed to load the listing page")?;
    driver::settle(config.timing.listing_settle());
    Ok(())
}

/// Load the listing and run every discovery strategy against it.
pub fn discover_live(driver: &mut dyn PageDriver, config: &ScrapeConfig) -> Result<DiscoveryReport> {
    load_listing(driver, config)?;
    let snapshot = PageSnapshot::capture(driver);
    info!(
        "snapshot of {}: {} element(s), {} script(s)",
        snapshot.url,
        snapshot.elements.len(),
        snapshot.scripts.as_ref().map_or(0, Vec::len)
    );

    let click_through = driver.is_interactive().then(|| ClickThrough {
        listing_url: &config.portal_url,
        max_clicks: config.max_click_probes,
        timing: &config.timing,
        driver,
    });
    let mut discovery = Discovery {
        rules: &config.rules,
        click_through,
    };
    Ok(discovery::discover_all(&snapshot, &mut discovery))
}

/// Discovery over a saved page; no clicking.
pub fn discover_saved(html: &str, config: &ScrapeConfig) -> DiscoveryReport {
    let snapshot = PageSnapshot::from_html(&config.portal_url, html);
    let mut discovery = Discovery {
        rules: &config.rules,
        click_through: None,
    };
    discovery::discover_all(&snapshot, &mut discovery)
}

/// Turn open postings into records, dropping the ones that fail the schema
/// and the second of two postings that share a slug.
fn normalize_open<'j>(
    open: impl Iterator<Item = &'j ResolvedJob>,
    evidence: &HashMap<String, String>,
    config: &ScrapeConfig,
    history: Option<&History>,
) -> Vec<IncomingRecord> {
    let normalizer = Normalizer {
        rules: &config.rules,
        company: &config.company_name,
        currency: &config.currency,
    };
    let today = Utc::now().date_naive();
    let mut incoming: Vec<IncomingRecord> = Vec::new();

    for job in open {
        let text = evidence.get(&job.job_id).map(String::as_str).unwrap_or("");
        let record = match normalizer.normalize(job, text, today) {
            Ok(record) => record,
            Err(e) => {
                warn!("excluding job {}: {}", job.job_id, e);
                continue;
            }
        };

        if let Some(first) = incoming.iter().find(|r| r.record.id == record.id) {
            warn!(
                "job {} normalizes to '{}' like {}; keeping the first",
                job.job_id, record.id, first.record.apply_url
            );
            continue;
        }

        let supersedes = history
            .and_then(|h| match h.slug_for(&job.job_id) {
                Ok(slug) => slug,
                Err(e) => {
                    warn!("could not look up previous slug for {}: {:#}", job.job_id, e);
                    None
                }
            })
            .filter(|old| *old != record.id);
        if let Some(old) = &supersedes {
            info!("job {} was '{}', now '{}'", job.job_id, old, record.id);
        }
        incoming.push(IncomingRecord::new(record, supersedes));
    }
    incoming
}

/// One full scrape: discover, resolve, normalize, merge and commit.
///
/// The session is closed on every path. Failing to load the listing aborts
/// the run before anything is written; a run that confirms nothing leaves
/// `jobs.json` as it was.
pub fn run_scrape(config: &ScrapeConfig, page_driver: Box<dyn PageDriver>, dry_run: bool) -> Result<RunReport> {
    let _run = info_span!("run").entered();
    let ran_at = Utc::now();
    let deadline = Instant::now() + config.timing.run_budget();
    let mut session = Session::new(page_driver);

    let discovered = discover_live(session.driver(), config)?;
    let total_candidates = discovered.candidates.len();
    let by_strategy = discovered.strategy_counts();

    let candidates = merge::dedup_candidates(discovered.candidates);
    info!("{} candidate(s), {} distinct id(s)", total_candidates, candidates.len());
    let ids: Vec<String> = candidates.iter().map(|c| c.identifier.clone()).collect();
    let evidence: HashMap<String, String> = candidates
        .into_iter()
        .map(|RawCandidate { identifier, evidence_text, .. }| (identifier, evidence_text))
        .collect();

    let resolution = Resolver {
        driver: session.driver(),
        listing_url: &config.portal_url,
        rules: &config.rules,
        timing: &config.timing,
        retries: config.probe_retries,
    }
    .resolve_all(&ids, deadline);

    if let Err(e) = session.close() {
        warn!("failed to close browser session: {}", e);
    }

    let mut history = open_history(config);
    let incoming = normalize_open(resolution.open(), &evidence, config, history.as_ref());
    let records: Vec<CanonicalJobRecord> = incoming.iter().map(|i| i.record.clone()).collect();

    let store = JobStore::new(&config.jobs_path);
    let mut report = RunReport {
        ran_at,
        total_candidates,
        by_strategy,
        probes: resolution.probes.clone(),
        records,
        added: 0,
        updated: 0,
        superseded: 0,
        near_duplicates: Vec::new(),
        committed: false,
        artifact_path: None,
    };

    if incoming.is_empty() {
        info!("no open postings confirmed, {} left as is", store.path().display());
    } else if dry_run {
        let outcome = merge::merge_records(store.load()?, incoming);
        report.added = outcome.added;
        report.updated = outcome.updated;
        report.superseded = outcome.superseded;
        report.near_duplicates = outcome.near_duplicates;
        info!("dry run, {} not written", store.path().display());
    } else {
        let lock = store.lock()?;
        let outcome = merge::merge_records(store.load()?, incoming);
        if outcome.changed() {
            store.save(&lock, &outcome.records)?;
            report.committed = true;
            info!(
                "committed {} record(s) to {}",
                outcome.records.len(),
                store.path().display()
            );
        }
        report.added = outcome.added;
        report.updated = outcome.updated;
        report.superseded = outcome.superseded;
        report.near_duplicates = outcome.near_duplicates;
    }

    if let Some(history) = history.as_mut() {
        if let Err(e) = record_history(history, &report, &resolution.jobs, dry_run) {
            warn!("failed to update run history: {:#}", e);
        }
    }

    let artifact = ScrapeRunArtifact {
        ran_at,
        total_candidates,
        resolved_jobs: resolution.jobs,
        by_strategy: report.by_strategy.clone(),
        probes: resolution.probes,
    };
    match store::write_artifact(&config.artifacts_dir, &artifact) {
        Ok(path) => {
            info!("run artifact written to {}", path.display());
            report.artifact_path = Some(path);
        }
        Err(e) => warn!("failed to write run artifact: {:#}", e),
    }

    Ok(report)
}

fn record_history(
    history: &mut History,
    report: &RunReport,
    jobs: &[ResolvedJob],
    dry_run: bool,
) -> Result<()> {
    if !dry_run {
        let updates: Vec<PostingUpdate> = jobs
            .iter()
            .map(|job| PostingUpdate {
                job_id: job.job_id.clone(),
                slug: report
                    .records
                    .iter()
                    .find(|r| r.apply_url == job.apply_url)
                    .map(|r| r.id.clone()),
                status: job.status,
                apply_url: job.apply_url.clone(),
                verified_at: job.verified_at,
            })
            .collect();
        history.record_postings(&updates)?;
    }

    history.record_run(&RunSummary {
        ran_at: report.ran_at,
        total_candidates: report.total_candidates,
        by_strategy: report.by_strategy.clone(),
        open: report.count(JobStatus::Open),
        closed: report.count(JobStatus::Closed),
        unknown: report.count(JobStatus::Unknown),
        added: report.added,
        updated: report.updated,
        dry_run,
    })?;
    Ok(())
}

/// Probe a single identifier from the listing page.
pub fn probe_one(config: &ScrapeConfig, page_driver: Box<dyn PageDriver>, job_id: &str) -> Result<(ProbeRecord, ResolvedJob)> {
    let mut session = Session::new(page_driver);
    load_listing(session.driver(), config)?;
    let outcome = Resolver {
        driver: session.driver(),
        listing_url: &config.portal_url,
        rules: &config.rules,
        timing: &config.timing,
        retries: config.probe_retries,
    }
    .resolve(job_id);
    if let Err(e) = session.close() {
        warn!("failed to close browser session: {}", e);
    }
    Ok(outcome)
}

/// Drop records whose posting was last confirmed CLOSED. Returns the
/// postings whose records were (or, on a dry run, would be) removed.
pub fn prune_closed(config: &ScrapeConfig, history: &History, dry_run: bool) -> Result<Vec<Posting>> {
    let closed = history.closed_postings()?;

    let store = JobStore::new(&config.jobs_path);
    let lock = (!dry_run).then(|| store.lock()).transpose()?;
    let records = store.load()?;
    let is_closed = |r: &CanonicalJobRecord| closed.iter().any(|p| p.slug.as_deref() == Some(r.id.as_str()));
    let (removed, kept): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| is_closed(r));

    let pruned: Vec<Posting> = closed
        .into_iter()
        .filter(|p| removed.iter().any(|r| p.slug.as_deref() == Some(r.id.as_str())))
        .collect();
    if let Some(lock) = &lock {
        if !removed.is_empty() {
            store.save(lock, &kept)?;
            info!("pruned {} closed posting(s)", removed.len());
        }
    }
    Ok(pruned)
}
