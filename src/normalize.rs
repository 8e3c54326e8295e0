//! Turns a confirmed posting plus the text it was discovered with into a
//! `jobs.json` record. Nothing here touches the page or the disk.

use chrono::{Days, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

use crate::config::{RuleSet, SalaryRange};
use crate::detail::{DESCRIPTION_CHARS, REQUIREMENTS_CHARS};
use crate::error::ScrapeError;
use crate::models::{CanonicalJobRecord, ResolvedJob, SalarySource};

pub const MAX_SLUG_LEN: usize = 50;
pub const RECENTLY: &str = "Recently";

static TITLE_BEFORE_AGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*(?:Posted\s+)?\d+\+?\s+days?\s+ago").expect("valid regex")
});
static POSTING_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(\+?)\s+days?\s+ago").expect("valid regex"));
static PAY_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*(\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?\s*(k)?").expect("valid regex")
});
static HOURLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bhour(?:ly)?\b|(?:\bper|\ban|/)\s*hrs?\b|/\s*h\b").expect("valid regex")
});

/// URL-safe id for a title: lowercase ASCII letters, digits and single
/// hyphens, at most 50 characters.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    let hyphenated = kept.split_whitespace().collect::<Vec<_>>().join("-");
    let truncated: String = hyphenated.chars().take(MAX_SLUG_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}

/// Text before the "N days ago" marker, or the first two words when there
/// is no marker.
pub fn extract_title(evidence: &str) -> String {
    let evidence = evidence.trim();
    if let Some(title) = TITLE_BEFORE_AGE
        .captures(evidence)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|t| !t.is_empty())
    {
        return title.to_string();
    }
    evidence.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

/// "3 days ago", "30+ days ago", or "Recently".
pub fn posted_label(evidence: &str) -> String {
    POSTING_AGE
        .find(evidence)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| RECENTLY.to_string())
}

/// Calendar date a posting label refers to; "30+" counts as 30.
pub fn posted_date(label: &str, today: NaiveDate) -> NaiveDate {
    POSTING_AGE
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|days| days.as_str().parse::<u64>().ok())
        .and_then(|days| today.checked_sub_days(Days::new(days)))
        .unwrap_or(today)
}

/// "Full Time" → "FULL_TIME"
pub fn employment_type_code(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Pay range advertised in free text, e.g. "$80,000 - $120,000" or
/// "$80k-$120k". Only annual pay counts: hourly rates, bare amounts under
/// 1000 and amounts too large to represent yield nothing.
pub fn parse_pay_range(content: &str) -> (Option<i64>, Option<i64>) {
    if HOURLY.is_match(content) {
        return (None, None);
    }

    let mut amounts = PAY_AMOUNT.captures_iter(content).filter_map(|caps| {
        let digits: String = caps.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
        let num = digits.parse::<i64>().ok()?;
        if caps.get(2).is_some() {
            num.checked_mul(1000)
        } else {
            (num >= 1000).then_some(num)
        }
    });

    let pay_min = amounts.next();
    let pay_max = amounts.next();

    // Ensure min < max
    if let (Some(min), Some(max)) = (pay_min, pay_max) {
        if min > max {
            return (Some(max), Some(min));
        }
    }
    (pay_min, pay_max)
}

fn render(template: &str, title: &str, company: &str) -> String {
    template
        .replace("{title_lower}", &title.to_lowercase())
        .replace("{title}", title)
        .replace("{company}", company)
}

fn within(text: Option<&String>, bounds: std::ops::RangeInclusive<usize>) -> Option<String> {
    text.filter(|t| bounds.contains(&t.chars().count())).cloned()
}

pub struct Normalizer<'a> {
    pub rules: &'a RuleSet,
    pub company: &'a str,
    pub currency: &'a str,
}

impl<'a> Normalizer<'a> {
    pub fn department(&self, title: &str) -> String {
        self.rules
            .department_rules
            .iter()
            .find(|rule| rule.contains.iter().any(|needle| title.contains(needle.as_str())))
            .map(|rule| rule.department.clone())
            .unwrap_or_else(|| self.rules.default_department.clone())
    }

    pub fn inferred_salary(&self, title: &str) -> SalaryRange {
        self.rules
            .salary_bands
            .iter()
            .find(|band| title.contains(band.keyword.as_str()))
            .map(|band| band.range)
            .unwrap_or(self.rules.default_salary)
    }

    pub fn location(&self, evidence: &str) -> String {
        self.rules
            .location_rules
            .iter()
            .find(|rule| evidence.contains(rule.pattern.as_str()))
            .map(|rule| rule.location.clone())
            .unwrap_or_else(|| self.rules.default_location.clone())
    }

    pub fn job_type(&self, evidence: &str) -> String {
        self.rules
            .employment_types
            .iter()
            .find(|kind| evidence.contains(kind.as_str()))
            .cloned()
            .unwrap_or_else(|| self.rules.default_employment_type.clone())
    }

    pub fn is_remote(&self, evidence: &str) -> bool {
        let lower = evidence.to_lowercase();
        self.rules
            .remote_keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
    }

    /// Build the record for an open posting. `evidence` is the listing text the
    /// identifier was found with, possibly empty.
    pub fn normalize(
        &self,
        job: &ResolvedJob,
        evidence: &str,
        today: NaiveDate,
    ) -> Result<CanonicalJobRecord, ScrapeError> {
        let violation = |field| ScrapeError::SchemaViolation {
            job_id: job.job_id.clone(),
            field,
        };
        let detail = job.detail.clone().unwrap_or_default();

        let title = if evidence.trim().is_empty() {
            detail.heading.clone().unwrap_or_default().trim().to_string()
        } else {
            extract_title(evidence)
        };
        if title.is_empty() {
            return Err(violation("title"));
        }

        let id = slugify(&title);
        if id.is_empty() {
            return Err(violation("id"));
        }
        if job.apply_url.trim().is_empty() {
            return Err(violation("apply_url"));
        }

        let (salary_min, salary_max, salary_source) = match detail
            .salary_text
            .as_deref()
            .map(parse_pay_range)
        {
            Some((Some(min), max)) => (Some(min), max, SalarySource::Scraped),
            _ => {
                let band = self.inferred_salary(&title);
                (Some(band.min), Some(band.max), SalarySource::Inferred)
            }
        };

        let location = self.location(evidence);
        let job_type = self.job_type(evidence);
        let posted = posted_date(&posted_label(evidence), today);

        Ok(CanonicalJobRecord {
            id,
            department: self.department(&title),
            employment_type: employment_type_code(&job_type),
            salary_min,
            salary_max,
            currency: Some(self.currency.to_string()),
            description_md: within(detail.description.as_ref(), DESCRIPTION_CHARS).unwrap_or_else(
                || render(&self.rules.description_template, &title, self.company),
            ),
            requirements_md: within(detail.requirements.as_ref(), REQUIREMENTS_CHARS)
                .unwrap_or_else(|| render(&self.rules.requirements_template, &title, self.company)),
            nice_to_haves_md: Some(render(
                &self.rules.nice_to_haves_template,
                &title,
                self.company,
            )),
            apply_url: job.apply_url.clone(),
            posted_at: posted.format("%Y-%m-%d").to_string(),
            remote: self.is_remote(evidence),
            locations: vec![location.clone()],
            location,
            job_type,
            salary_source: Some(salary_source),
            title,
            extra: serde_json::Map::new(),
        })
    }
}
