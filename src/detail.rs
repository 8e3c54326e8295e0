use scraper::{ElementRef, Html, Selector};
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use crate::models::JobDetail;

pub const DESCRIPTION_CHARS: RangeInclusive<usize> = 100..=2000;
pub const REQUIREMENTS_CHARS: RangeInclusive<usize> = 50..=1000;
const MAX_SALARY_CHARS: usize = 200;

fn selectors(raw: &[&str]) -> Vec<Selector> {
    raw.iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
}

static HEADINGS: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&["h1", "h2"]));
static DESCRIPTION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"[class*="description"]"#,
        r#"[class*="job-desc"]"#,
        r#"[id*="description"]"#,
        "p",
        "div",
    ])
});
static REQUIREMENTS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"[class*="requirement"]"#,
        r#"[class*="qualification"]"#,
        r#"[id*="requirement"]"#,
    ])
});
static SALARY: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        r#"[class*="salary"]"#,
        r#"[class*="compensation"]"#,
        r#"[id*="salary"]"#,
    ])
});

fn clean_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First element, trying selectors in order, whose text passes `accept`.
fn first_match(document: &Html, selectors: &[Selector], accept: impl Fn(&str) -> bool) -> Option<String> {
    selectors.iter().find_map(|selector| {
        document
            .select(selector)
            .map(clean_text)
            .find(|text| accept(text))
    })
}

/// Pull what the posting page offers beyond the listing: heading, prose
/// blocks and any advertised pay.
pub fn extract_detail(html: &str, page_title: &str) -> JobDetail {
    let document = Html::parse_document(html);
    let within = |range: RangeInclusive<usize>| move |text: &str| range.contains(&text.chars().count());

    let heading = first_match(&document, &HEADINGS, |text| !text.is_empty()).or_else(|| {
        let title = page_title.trim();
        (!title.is_empty()).then(|| title.to_string())
    });

    JobDetail {
        heading,
        description: first_match(&document, &DESCRIPTION, within(DESCRIPTION_CHARS)),
        requirements: first_match(&document, &REQUIREMENTS, within(REQUIREMENTS_CHARS)),
        salary_text: first_match(&document, &SALARY, |text| {
            text.contains('$') && text.chars().count() <= MAX_SALARY_CHARS
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_all_sections() {
        let description = "You will own the monthly close, partner with operations on forecasting, and keep our reporting honest and timely across every region.";
        let requirements = "Five years of accounting experience and a CPA or equivalent certification.";
        let html = format!(
            r#"<html><body>
                <h1>  Finance   Manager </h1>
                <div class="job-description-text">{description}</div>
                <ul class="qualifications">{requirements}</ul>
                <span class="salary-range">$80,000 - $120,000 per year</span>
            </body></html>"#
        );
        let detail = extract_detail(&html, "Careers");
        assert_eq!(detail.heading.as_deref(), Some("Finance Manager"));
        assert_eq!(detail.description.as_deref(), Some(description));
        assert_eq!(detail.requirements.as_deref(), Some(requirements));
        assert_eq!(detail.salary_text.as_deref(), Some("$80,000 - $120,000 per year"));
    }

    #[test]
    fn test_short_blocks_are_ignored() {
        let html = r#"<html><body>
            <p class="description">Too short.</p>
            <div class="requirements">Also short.</div>
            <div class="salary">Competitive</div>
        </body></html>"#;
        let detail = extract_detail(html, " Supply Chain Manager ");
        assert_eq!(detail.heading.as_deref(), Some("Supply Chain Manager"));
        assert_eq!(detail.description, None);
        assert_eq!(detail.requirements, None);
        assert_eq!(detail.salary_text, None);
    }

    #[test]
    fn test_description_falls_back_to_paragraphs() {
        let paragraph = "a".repeat(150);
        let html = format!("<html><body><p>short</p><p>{paragraph}</p></body></html>");
        let detail = extract_detail(&html, "");
        assert_eq!(detail.description, Some(paragraph));
        assert_eq!(detail.heading, None);
    }
}
