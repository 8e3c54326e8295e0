use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::{RuleSet, Timing};
use crate::driver::{self, NavigateOptions, PageDriver};
use crate::error::{ScrapeError, StrategyError};
use crate::models::{ElementRef, RawCandidate, StrategyKind};
use crate::snapshot::{ElementInfo, PageSnapshot};
use crate::util::truncate;

static THIRTEEN_DIGIT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{13})_\d+$").expect("valid regex"));
static JOB_ITEM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"job_item_view_main_div_(\d+)_\d+").expect("valid regex"));
static JOB_ID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"jobId[=:](\d+)").expect("valid regex"));
static SCRIPT_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"jobId["':\s=]*(\d+)"#).expect("valid regex"));
static URL_JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]jobId=(\d+)").expect("valid regex"));

/// Lets the clickable strategy click elements that carried no identifier and
/// watch where the page goes.
pub struct ClickThrough<'a> {
    pub driver: &'a mut dyn PageDriver,
    pub listing_url: &'a str,
    pub max_clicks: usize,
    pub timing: &'a Timing,
}

pub struct Discovery<'a> {
    pub rules: &'a RuleSet,
    pub click_through: Option<ClickThrough<'a>>,
}

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub candidates: Vec<RawCandidate>,
    pub by_strategy: BTreeMap<StrategyKind, usize>,
    pub failures: Vec<(StrategyKind, String)>,
}

impl DiscoveryReport {
    pub fn strategy_counts(&self) -> BTreeMap<String, usize> {
        self.by_strategy
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), *count))
            .collect()
    }
}

impl StrategyKind {
    pub fn discover(
        &self,
        snapshot: &PageSnapshot,
        discovery: &mut Discovery<'_>,
    ) -> Result<Vec<RawCandidate>, StrategyError> {
        match self {
            Self::AttributePattern => Ok(attribute_pattern(snapshot)),
            Self::ClickableKeyword => Ok(clickable_keyword(snapshot, discovery)),
            Self::InlineScript => inline_script(snapshot),
            Self::RawHtmlRegex => raw_html_regex(snapshot),
        }
    }
}

/// Runs every strategy against the same snapshot and pools the results. A
/// strategy that fails or panics contributes nothing.
pub fn discover_all(snapshot: &PageSnapshot, discovery: &mut Discovery<'_>) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for strategy in StrategyKind::ALL {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            strategy.discover(snapshot, discovery)
        }))
        .unwrap_or_else(|payload| Err(StrategyError::Panicked(panic_message(payload))));

        match outcome {
            Ok(candidates) => {
                info!("{}: {} candidate(s)", strategy, candidates.len());
                report.by_strategy.insert(strategy, candidates.len());
                report.candidates.extend(candidates);
            }
            Err(e) => {
                warn!("{} contributed nothing: {}", strategy, e);
                report.by_strategy.insert(strategy, 0);
                report.failures.push((strategy, e.to_string()));
            }
        }
    }

    report
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Numeric identifier embedded in a structural element id, e.g.
/// `9201410695317_1` or `job_item_view_main_div_564827_0`.
pub fn identifier_from_id(id: &str) -> Option<String> {
    THIRTEEN_DIGIT_ID
        .captures(id)
        .or_else(|| JOB_ITEM_ID.captures(id))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn identifier_from_element(el: &ElementInfo) -> Option<String> {
    identifier_from_id(&el.id).or_else(|| {
        [&el.href, &el.onclick]
            .into_iter()
            .find_map(|attr| JOB_ID_TOKEN.captures(attr))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn attribute_pattern(snapshot: &PageSnapshot) -> Vec<RawCandidate> {
    snapshot
        .elements
        .iter()
        .filter_map(|el| {
            identifier_from_id(&el.id).map(|id| {
                RawCandidate::new(&id, &el.text, StrategyKind::AttributePattern)
                    .with_element(ElementRef::new(&el.selector))
            })
        })
        .collect()
}

fn has_title_keyword(text: &str, rules: &RuleSet) -> bool {
    rules.title_keywords.iter().any(|kw| text.contains(kw.as_str()))
}

/// Interactive, keyword-bearing, and neither navigation chrome nor a whole-page dump.
fn looks_like_job_link(el: &ElementInfo, rules: &RuleSet) -> bool {
    el.is_interactive() && el.text_len > 10 && el.text_len < 200 && has_title_keyword(&el.text, rules)
}

fn clickable_keyword(snapshot: &PageSnapshot, discovery: &mut Discovery<'_>) -> Vec<RawCandidate> {
    let mut candidates = Vec::new();
    let mut unresolved = Vec::new();

    for el in snapshot
        .elements
        .iter()
        .filter(|el| looks_like_job_link(el, discovery.rules))
    {
        match identifier_from_element(el) {
            Some(id) => candidates.push(
                RawCandidate::new(&id, &el.text, StrategyKind::ClickableKeyword)
                    .with_element(ElementRef::new(&el.selector)),
            ),
            None => unresolved.push(el),
        }
    }

    if let Some(click) = discovery.click_through.as_mut() {
        for el in unresolved.into_iter().take(click.max_clicks) {
            match click_probe(click, el) {
                Ok(Some(id)) => {
                    info!("click on '{}' revealed job {}", truncate(&el.text, 40), id);
                    candidates.push(
                        RawCandidate::new(&id, &el.text, StrategyKind::ClickableKeyword)
                            .with_element(ElementRef::new(&el.selector)),
                    );
                }
                Ok(None) => debug!("click on '{}' revealed nothing", truncate(&el.text, 40)),
                Err(e) => warn!("skipping element '{}': {}", truncate(&el.text, 40), e),
            }
        }
    }

    candidates
}

fn click_probe(click: &mut ClickThrough<'_>, el: &ElementInfo) -> Result<Option<String>, ScrapeError> {
    let before = click.driver.current_url();
    click.driver.click(&ElementRef::new(&el.selector))?;
    driver::settle(click.timing.click_settle());

    let after = click.driver.current_url();
    if after == before {
        return Ok(None);
    }

    let id = URL_JOB_ID
        .captures(&after)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    click.driver.navigate(
        click.listing_url,
        &NavigateOptions::navigated(click.timing.listing_timeout()),
    )?;
    driver::settle(click.timing.return_settle());

    Ok(id)
}

fn distinct_captures<'h>(re: &Regex, haystacks: impl Iterator<Item = &'h str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for haystack in haystacks {
        for caps in re.captures_iter(haystack) {
            if let Some(m) = caps.get(1) {
                if seen.insert(m.as_str()) {
                    ids.push(m.as_str().to_string());
                }
            }
        }
    }
    ids
}

fn inline_script(snapshot: &PageSnapshot) -> Result<Vec<RawCandidate>, StrategyError> {
    let scripts = snapshot
        .scripts
        .as_ref()
        .ok_or(StrategyError::MissingInput("script bodies"))?;
    Ok(distinct_captures(&SCRIPT_JOB_ID, scripts.iter().map(String::as_str))
        .iter()
        .map(|id| RawCandidate::new(id, "", StrategyKind::InlineScript))
        .collect())
}

fn raw_html_regex(snapshot: &PageSnapshot) -> Result<Vec<RawCandidate>, StrategyError> {
    let html = snapshot
        .html
        .as_deref()
        .ok_or(StrategyError::MissingInput("markup"))?;
    Ok(distinct_captures(&JOB_ID_TOKEN, std::iter::once(html))
        .iter()
        .map(|id| RawCandidate::new(id, "", StrategyKind::RawHtmlRegex))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{FakeDriver, FakePage};

    const LISTING: &str = "https://portal/listing";

    const PAGE: &str = r#"<html><body>
        <div id="9201410695317_1">Finance Manager 3 days ago Park City, UT, US Full Time</div>
        <div id="job_item_view_main_div_564828_0">Supply Chain Manager 30+ days ago</div>
        <a href="/recruitment?jobId=564829">Ecommerce Specialist - apply</a>
        <button id="mystery">Procurement Specialist role</button>
        <a href="/about">About our Manager team and culture</a>
        <a href="/home">Home</a>
        <script>window.jobs = [{ "jobId": "564830" }, { jobId: 564831 }, { jobId: 564830 }];</script>
        <span data-x="jobId=564832">hidden</span>
    </body></html>"#;

    fn ids(candidates: &[RawCandidate], kind: StrategyKind) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| c.source_strategy == kind)
            .map(|c| c.identifier.clone())
            .collect()
    }

    #[test]
    fn test_identifier_from_id_patterns() {
        assert_eq!(identifier_from_id("9201410695317_1"), Some("9201410695317".into()));
        assert_eq!(
            identifier_from_id("job_item_view_main_div_564827_3"),
            Some("564827".into())
        );
        assert_eq!(identifier_from_id("920141069531_1"), None);
        assert_eq!(identifier_from_id("header"), None);
    }

    #[test]
    fn test_static_discovery_pools_all_strategies() {
        let snapshot = PageSnapshot::from_html(LISTING, PAGE);
        let rules = RuleSet::default();
        let mut discovery = Discovery {
            rules: &rules,
            click_through: None,
        };
        let report = discover_all(&snapshot, &mut discovery);

        assert_eq!(
            ids(&report.candidates, StrategyKind::AttributePattern),
            vec!["9201410695317", "564828"]
        );
        assert_eq!(
            ids(&report.candidates, StrategyKind::ClickableKeyword),
            vec!["564829"]
        );
        assert_eq!(
            ids(&report.candidates, StrategyKind::InlineScript),
            vec!["564830", "564831"]
        );
        assert_eq!(
            ids(&report.candidates, StrategyKind::RawHtmlRegex),
            vec!["564829", "564832"]
        );
        assert!(report.failures.is_empty());
        assert_eq!(report.by_strategy[&StrategyKind::InlineScript], 2);
    }

    #[test]
    fn test_clickable_requires_keyword_and_length_bounds() {
        let rules = RuleSet::default();
        let short = ElementInfo {
            tag: "a".into(),
            text: "Manager".into(),
            text_len: 7,
            ..ElementInfo::default()
        };
        let long_text = "Manager ".repeat(30);
        let dump = ElementInfo {
            tag: "a".into(),
            text_len: long_text.len(),
            text: long_text,
            ..ElementInfo::default()
        };
        let no_keyword = ElementInfo {
            tag: "a".into(),
            text: "Benefits and perks".into(),
            text_len: 18,
            ..ElementInfo::default()
        };
        let role_button = ElementInfo {
            tag: "div".into(),
            role: "button".into(),
            text: "Field Technician II".into(),
            text_len: 19,
            ..ElementInfo::default()
        };
        assert!(!looks_like_job_link(&short, &rules));
        assert!(!looks_like_job_link(&dump, &rules));
        assert!(!looks_like_job_link(&no_keyword, &rules));
        assert!(looks_like_job_link(&role_button, &rules));
    }

    #[test]
    fn test_missing_inputs_degrade_single_strategy() {
        let mut snapshot = PageSnapshot::from_html(LISTING, PAGE);
        snapshot.html = None;
        snapshot.scripts = None;

        let rules = RuleSet::default();
        let mut discovery = Discovery {
            rules: &rules,
            click_through: None,
        };
        let report = discover_all(&snapshot, &mut discovery);

        assert_eq!(report.failures.len(), 2);
        assert_eq!(ids(&report.candidates, StrategyKind::AttributePattern).len(), 2);
        assert_eq!(ids(&report.candidates, StrategyKind::ClickableKeyword).len(), 1);
        assert_eq!(report.by_strategy[&StrategyKind::RawHtmlRegex], 0);
    }

    #[test]
    fn test_failed_click_leaves_other_strategies_intact() {
        let snapshot = PageSnapshot::from_html(LISTING, PAGE);
        let rules = RuleSet::default();
        let timing = Timing::immediate();
        // "#mystery" has no click route, so clicking it fails with an interaction error.
        let mut driver = FakeDriver::new().page(LISTING, FakePage::html(PAGE));
        driver
            .navigate(LISTING, &NavigateOptions::navigated(timing.listing_timeout()))
            .unwrap();

        let mut discovery = Discovery {
            rules: &rules,
            click_through: Some(ClickThrough {
                driver: &mut driver,
                listing_url: LISTING,
                max_clicks: 15,
                timing: &timing,
            }),
        };
        let report = discover_all(&snapshot, &mut discovery);

        assert!(report.failures.is_empty());
        assert_eq!(
            ids(&report.candidates, StrategyKind::AttributePattern),
            vec!["9201410695317", "564828"]
        );
        assert_eq!(
            ids(&report.candidates, StrategyKind::InlineScript),
            vec!["564830", "564831"]
        );
        assert_eq!(
            ids(&report.candidates, StrategyKind::ClickableKeyword),
            vec!["564829"]
        );
    }

    #[test]
    fn test_click_through_reads_job_id_from_new_url() {
        let snapshot = PageSnapshot::from_html(LISTING, PAGE);
        let rules = RuleSet::default();
        let timing = Timing::immediate();
        let detail = "https://portal/listing&selectedMenuKey=CareerCenter&jobId=564833";
        let mut driver = FakeDriver::new()
            .page(LISTING, FakePage::html(PAGE))
            .click_to("#mystery", detail);
        let visits = driver.visits.clone();
        driver
            .navigate(LISTING, &NavigateOptions::navigated(timing.listing_timeout()))
            .unwrap();

        let mut discovery = Discovery {
            rules: &rules,
            click_through: Some(ClickThrough {
                driver: &mut driver,
                listing_url: LISTING,
                max_clicks: 15,
                timing: &timing,
            }),
        };
        let report = discover_all(&snapshot, &mut discovery);

        let clicked: Vec<_> = report
            .candidates
            .iter()
            .filter(|c| c.identifier == "564833")
            .collect();
        assert_eq!(clicked.len(), 1);
        assert_eq!(clicked[0].evidence_text, "Procurement Specialist role");
        // returned to the listing after the click
        assert_eq!(visits.borrow().last().map(String::as_str), Some(LISTING));
    }

    #[test]
    fn test_panic_message_extraction() {
        let message = panic_message(Box::new("boom"));
        assert_eq!(message, "boom");
        let message = panic_message(Box::new(String::from("bang")));
        assert_eq!(message, "bang");
    }
}
