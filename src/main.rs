mod browser;
mod config;
mod db;
mod detail;
mod discovery;
mod driver;
mod error;
mod http;
mod logging;
mod merge;
mod models;
mod normalize;
mod pipeline;
mod resolver;
mod snapshot;
mod store;
mod util;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::{DriverKind, ScrapeConfig};
use db::History;
use driver::PageDriver;
use error::ScrapeError;
use models::{CanonicalJobRecord, JobStatus, SalarySource};
use std::path::PathBuf;
use store::JobStore;
use util::truncate;

#[derive(Parser)]
#[command(name = "careers")]
#[command(about = "Harvest open postings from the ADP recruiting portal into jobs.json")]
struct Cli {
    /// JSON config file (defaults to $CAREERS_CONFIG, then built-in settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Job list to read and update
    #[arg(long, global = true)]
    jobs: Option<PathBuf>,

    /// Page driver to use
    #[arg(long, value_enum, global = true)]
    driver: Option<DriverKind>,

    /// Show the browser window
    #[arg(long, global = true)]
    headful: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the portal and merge open postings into the job list (default)
    Scrape {
        /// Show what would change without writing the job list
        #[arg(long)]
        dry_run: bool,
    },

    /// Run candidate discovery only and print what each strategy found
    Discover {
        /// Use a saved listing page instead of the live portal
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Probe one job id and print how it classifies
    Probe {
        /// Portal job id, e.g. 564827
        job_id: String,
    },

    /// List committed jobs
    List,

    /// Show one committed job
    Show {
        /// Job slug
        id: String,
    },

    /// Show recent scrape runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Remove jobs whose posting was last confirmed closed
    Prune {
        /// Show what would be removed without removing
        #[arg(long)]
        dry_run: bool,
    },
}

fn create_driver(config: &ScrapeConfig) -> Result<Box<dyn PageDriver>> {
    let driver: Box<dyn PageDriver> = match config.driver {
        DriverKind::Chrome => Box::new(
            browser::ChromeDriver::launch(config.headless).map_err(ScrapeError::from)?,
        ),
        DriverKind::Http => Box::new(http::HttpDriver::new().map_err(ScrapeError::from)?),
    };
    Ok(driver)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let mut config = ScrapeConfig::load(cli.config.as_deref())?;
    if let Some(jobs) = cli.jobs {
        config.jobs_path = jobs;
    }
    if let Some(kind) = cli.driver {
        config.driver = kind;
    }
    if cli.headful {
        config.headless = false;
    }

    match cli.command.unwrap_or(Commands::Scrape { dry_run: false }) {
        Commands::Scrape { dry_run } => {
            let driver = create_driver(&config)?;
            let report = pipeline::run_scrape(&config, driver, dry_run)?;

            if !report.probes.is_empty() {
                println!("{:<12} {:<8} {:>8}  {}", "JOB ID", "STATUS", "ATTEMPTS", "NOTE");
                println!("{}", "-".repeat(72));
                for probe in &report.probes {
                    println!(
                        "{:<12} {:<8} {:>8}  {}",
                        truncate(&probe.job_id, 12),
                        probe.status,
                        probe.attempts,
                        truncate(probe.error.as_deref().unwrap_or(""), 40)
                    );
                }
                println!();
            }

            println!("Candidates:  {}", report.total_candidates);
            println!(
                "Resolved:    {} open, {} closed, {} unknown",
                report.count(JobStatus::Open),
                report.count(JobStatus::Closed),
                report.count(JobStatus::Unknown)
            );
            println!(
                "Records:     {} added, {} updated, {} renamed",
                report.added, report.updated, report.superseded
            );
            for (incoming, existing) in &report.near_duplicates {
                println!("Check:       '{}' looks like existing '{}'", incoming, existing);
            }
            if dry_run {
                println!("\n(Dry run - {} was not changed)", config.jobs_path.display());
            } else if report.committed {
                println!("\nWrote {}", config.jobs_path.display());
            } else {
                println!("\nNo changes to {}", config.jobs_path.display());
            }
        }

        Commands::Discover { html } => {
            let report = match html {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read saved page: {}", path.display()))?;
                    pipeline::discover_saved(&raw, &config)
                }
                None => {
                    let mut session = driver::Session::new(create_driver(&config)?);
                    let report = pipeline::discover_live(session.driver(), &config)?;
                    session.close().map_err(ScrapeError::from)?;
                    report
                }
            };

            for (strategy, count) in &report.by_strategy {
                println!("{:<20} {}", strategy, count);
            }
            for (strategy, reason) in &report.failures {
                println!("{:<20} failed: {}", strategy, reason);
            }

            let candidates = merge::dedup_candidates(report.candidates);
            if candidates.is_empty() {
                println!("\nNo candidates found.");
            } else {
                println!("\n{:<15} {:<20} {:<40} {}", "ID", "STRATEGY", "EVIDENCE", "ELEMENT");
                println!("{}", "-".repeat(100));
                for c in candidates {
                    let element = c.element_ref.as_ref().map(|e| e.selector.as_str()).unwrap_or("-");
                    println!(
                        "{:<15} {:<20} {:<40} {}",
                        truncate(&c.identifier, 15),
                        c.source_strategy,
                        truncate(&c.evidence_text, 40),
                        truncate(element, 30)
                    );
                }
            }
        }

        Commands::Probe { job_id } => {
            if !resolver::is_valid_job_id(&job_id) {
                return Err(anyhow!("'{}' is not a numeric job id", job_id));
            }
            let driver = create_driver(&config)?;
            let (record, job) = pipeline::probe_one(&config, driver, &job_id)?;

            println!("Job {}: {}", record.job_id, record.status);
            println!("URL: {}", record.apply_url);
            println!("Attempts: {}", record.attempts);
            if let Some(error) = &record.error {
                println!("Note: {}", error);
            }
            match History::open(&config.history_db_path()) {
                Ok(history) => {
                    if let Some(previous) = history.get_posting(&record.job_id)? {
                        println!(
                            "Last recorded: {} as of {}",
                            previous.status,
                            truncate(&previous.verified_at, 19)
                        );
                    }
                }
                Err(e) => tracing::warn!("run history unavailable: {:#}", e),
            }
            if let Some(detail) = &job.detail {
                if let Some(heading) = &detail.heading {
                    println!("Heading: {}", heading);
                }
                if let Some(salary) = &detail.salary_text {
                    println!("Salary: {}", salary);
                }
            }
        }

        Commands::List => {
            let jobs = JobStore::new(&config.jobs_path).load()?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<30} {:<12} {:<30} {:>12} {:<10}", "ID", "DEPARTMENT", "TITLE", "SALARY", "POSTED");
                println!("{}", "-".repeat(98));
                for job in &jobs {
                    println!(
                        "{:<30} {:<12} {:<30} {:>12} {:<10}",
                        truncate(&job.id, 28),
                        truncate(&job.department, 12),
                        truncate(&job.title, 28),
                        salary_label(job),
                        job.posted_at
                    );
                }
            }
        }

        Commands::Show { id } => {
            let jobs = JobStore::new(&config.jobs_path).load()?;
            match jobs.iter().find(|j| j.id == id) {
                Some(job) => print_job(job),
                None => println!("Job '{}' not found.", id),
            }
        }

        Commands::Runs { limit } => {
            let history = History::open(&config.history_db_path())?;
            let runs = history.list_runs(limit)?;
            if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!(
                    "{:<5} {:<26} {:>6} {:>5} {:>7} {:>8} {:>8}  {}",
                    "ID", "RAN AT", "CANDS", "OPEN", "CLOSED", "UNKNOWN", "ADD/UPD", "STRATEGIES"
                );
                println!("{}", "-".repeat(100));
                for run in runs {
                    let strategies = run
                        .strategies
                        .iter()
                        .map(|(name, count)| format!("{}={}", name, count))
                        .collect::<Vec<_>>()
                        .join(" ");
                    println!(
                        "{:<5} {:<26} {:>6} {:>5} {:>7} {:>8} {:>8}  {}{}",
                        run.id,
                        truncate(&run.ran_at, 26),
                        run.total_candidates,
                        run.open,
                        run.closed,
                        run.unknown,
                        format!("{}/{}", run.added, run.updated),
                        strategies,
                        if run.dry_run { " (dry run)" } else { "" }
                    );
                }
            }
        }

        Commands::Prune { dry_run } => {
            let history = History::open(&config.history_db_path())?;
            let removed = pipeline::prune_closed(&config, &history, dry_run)?;
            if removed.is_empty() {
                println!("No closed postings to remove.");
            } else {
                for posting in &removed {
                    println!(
                        "  {:<40} job {} {} as of {}",
                        posting.slug.as_deref().unwrap_or("-"),
                        posting.job_id,
                        posting.status,
                        truncate(&posting.verified_at, 19)
                    );
                    println!("    {}", posting.apply_url);
                }
                if dry_run {
                    println!("\nWould remove {} job(s)", removed.len());
                } else {
                    println!("\nRemoved {} job(s)", removed.len());
                }
            }
        }
    }

    Ok(())
}

fn salary_label(job: &CanonicalJobRecord) -> String {
    let marker = match job.salary_source {
        Some(SalarySource::Inferred) => "~",
        _ => "",
    };
    match (job.salary_min, job.salary_max) {
        (Some(min), Some(max)) => format!("{}${}-${}k", marker, min / 1000, max / 1000),
        (Some(min), None) => format!("{}${}k+", marker, min / 1000),
        (None, Some(max)) => format!("{}<${}k", marker, max / 1000),
        (None, None) => "-".to_string(),
    }
}

fn print_job(job: &CanonicalJobRecord) {
    println!("{} ({})", job.title, job.id);
    println!("Department: {}", job.department);
    println!("Location: {}{}", job.location, if job.remote { " (remote)" } else { "" });
    println!("Type: {} [{}]", job.job_type, job.employment_type);
    if job.salary_min.is_some() || job.salary_max.is_some() {
        let source = match job.salary_source {
            Some(SalarySource::Inferred) => " (inferred)",
            Some(SalarySource::Scraped) => " (from posting)",
            None => "",
        };
        println!(
            "Salary: {} {}{}",
            salary_label(job).trim_start_matches('~'),
            job.currency.as_deref().unwrap_or(""),
            source
        );
    }
    println!("Posted: {}", job.posted_at);
    println!("Apply: {}", job.apply_url);

    println!("\n--- Description ---\n{}", textwrap::fill(&job.description_md, 80));
    println!("\n--- Requirements ---\n{}", job.requirements_md);
    if let Some(nice) = &job.nice_to_haves_md {
        println!("\n--- Nice to have ---\n{}", nice);
    }
}
