use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ADP_BASE_URL: &str = "https://workforcenow.adp.com/mascsr/default/mdf/recruitment/recruitment.html?cid=7a229a23-b938-47ed-bc95-636e054d62a6&ccId=19000101_000001&lang=en_US";

pub const CONFIG_ENV: &str = "CAREERS_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Headless Chrome over the DevTools protocol
    Chrome,
    /// Plain HTTP fetches; no script evaluation or clicks
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Listing page of the recruiting portal (cid/ccId/lang query)
    pub portal_url: String,
    /// CSS selector that marks the listing as rendered; the load event when unset
    pub ready_selector: Option<String>,
    pub driver: DriverKind,
    pub headless: bool,
    pub timing: Timing,
    /// Extra attempts for a probe that came back UNKNOWN
    pub probe_retries: u32,
    pub max_click_probes: usize,
    pub jobs_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub history_db: Option<PathBuf>,
    pub company_name: String,
    pub currency: String,
    pub rules: RuleSet,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            portal_url: ADP_BASE_URL.to_string(),
            ready_selector: None,
            driver: DriverKind::Chrome,
            headless: true,
            timing: Timing::default(),
            probe_retries: 1,
            max_click_probes: 15,
            jobs_path: PathBuf::from("src/data/jobs.json"),
            artifacts_dir: PathBuf::from("scrape-runs"),
            history_db: None,
            company_name: "MRP".to_string(),
            currency: "USD".to_string(),
            rules: RuleSet::default(),
        }
    }
}

impl ScrapeConfig {
    /// Explicit path first, then `$CAREERS_CONFIG`, then built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn history_db_path(&self) -> PathBuf {
        if let Some(path) = &self.history_db {
            return path.clone();
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "careers-scrape") {
            proj_dirs.data_dir().join("history.db")
        } else {
            PathBuf::from("history.db")
        }
    }
}

/// Timeouts and fixed settle delays. The portal gives no signal when its
/// dynamic content is done, so settles are plain sleeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub listing_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub listing_settle_ms: u64,
    pub probe_settle_ms: u64,
    pub return_settle_ms: u64,
    pub click_settle_ms: u64,
    pub run_budget_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            listing_timeout_secs: 60,
            probe_timeout_secs: 30,
            listing_settle_ms: 5000,
            probe_settle_ms: 3000,
            return_settle_ms: 2000,
            click_settle_ms: 3000,
            run_budget_secs: 900,
        }
    }
}

impl Timing {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn listing_settle(&self) -> Duration {
        Duration::from_millis(self.listing_settle_ms)
    }

    pub fn probe_settle(&self) -> Duration {
        Duration::from_millis(self.probe_settle_ms)
    }

    pub fn return_settle(&self) -> Duration {
        Duration::from_millis(self.return_settle_ms)
    }

    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }

    /// No waiting at all; used by tests and `--html` replays.
    pub fn immediate() -> Self {
        Self {
            listing_settle_ms: 0,
            probe_settle_ms: 0,
            return_settle_ms: 0,
            click_settle_ms: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentRule {
    /// Matches when the title contains any of these
    pub contains: Vec<String>,
    pub department: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryBand {
    pub keyword: String,
    #[serde(flatten)]
    pub range: SalaryRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRule {
    pub pattern: String,
    pub location: String,
}

/// Every heuristic table the normalizer and discovery consult. Rule lists are
/// ordered and the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub title_keywords: Vec<String>,
    pub closed_markers: Vec<String>,
    pub department_rules: Vec<DepartmentRule>,
    pub default_department: String,
    pub salary_bands: Vec<SalaryBand>,
    pub default_salary: SalaryRange,
    pub location_rules: Vec<LocationRule>,
    pub default_location: String,
    pub employment_types: Vec<String>,
    pub default_employment_type: String,
    pub remote_keywords: Vec<String>,
    /// Placeholders: `{title}`, `{title_lower}`, `{company}`
    pub description_template: String,
    pub requirements_template: String,
    pub nice_to_haves_template: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn department(contains: &[&str], department: &str) -> DepartmentRule {
    DepartmentRule {
        contains: strings(contains),
        department: department.to_string(),
    }
}

fn band(keyword: &str, min: i64, max: i64) -> SalaryBand {
    SalaryBand {
        keyword: keyword.to_string(),
        range: SalaryRange { min, max },
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            title_keywords: strings(&[
                "Manager",
                "Specialist",
                "Director",
                "Engineer",
                "Representative",
                "Coordinator",
                "Analyst",
                "Technician",
            ]),
            closed_markers: strings(&[
                "no longer accepting applications",
                "Please switch to a supported browser",
            ]),
            department_rules: vec![
                department(&["Finance"], "Finance"),
                department(&["Ecommerce"], "Marketing"),
                department(&["Supply Chain"], "Operations"),
                department(&["Depot"], "Operations"),
                department(&["Procurement"], "Procurement"),
                department(&["Aesthetic", "Consultant"], "Sales"),
            ],
            default_department: "Operations".to_string(),
            salary_bands: vec![
                band("Manager", 80_000, 120_000),
                band("Director", 120_000, 180_000),
                band("Specialist", 60_000, 90_000),
                band("Consultant", 70_000, 100_000),
            ],
            default_salary: SalaryRange {
                min: 50_000,
                max: 70_000,
            },
            location_rules: vec![LocationRule {
                pattern: "Park City".to_string(),
                location: "Park City, UT".to_string(),
            }],
            default_location: "Park City, UT".to_string(),
            employment_types: strings(&["Full Time", "Part Time"]),
            default_employment_type: "Full Time".to_string(),
            remote_keywords: strings(&["Remote"]),
            description_template: "Join our team as a {title} at {company}. We're looking for dedicated professionals to help us build the future of medical aesthetics. This role offers the opportunity to work with cutting-edge technology and make a real impact in the medical device industry.".to_string(),
            requirements_template: "- Relevant experience in {title_lower}\n- Strong communication and interpersonal skills\n- Team player with collaborative mindset\n- Commitment to excellence and continuous improvement\n- Bachelor's degree or equivalent experience preferred".to_string(),
            nice_to_haves_template: "- Medical device industry experience\n- Previous experience in similar role\n- Advanced certifications or training\n- Knowledge of medical aesthetics market".to_string(),
        }
    }
}
