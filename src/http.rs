use reqwest::blocking::Client;
use scraper::Html;
use tracing::debug;

use crate::driver::{NavigateOptions, PageDriver};
use crate::error::DriverError;
use crate::models::ElementRef;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Static-page driver: fetches markup over HTTP and never runs scripts.
/// Only useful when the portal serves its listing without client rendering.
pub struct HttpDriver {
    client: Client,
    url: String,
    title: String,
    html: String,
}

impl HttpDriver {
    pub fn new() -> Result<Self, DriverError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DriverError::Session(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: String::new(),
            title: String::new(),
            html: String::new(),
        })
    }
}

fn document_title(document: &Html) -> String {
    scraper::Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}

impl PageDriver for HttpDriver {
    fn navigate(&mut self, url: &str, options: &NavigateOptions) -> Result<(), DriverError> {
        debug!("fetching {}", url);
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DriverError::Timeout {
                        url: url.to_string(),
                        timeout: options.timeout,
                    }
                } else {
                    DriverError::Navigation {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let final_url = response.url().to_string();
        let html = response.text().map_err(|e| DriverError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        self.title = document_title(&Html::parse_document(&html));
        self.url = final_url;
        self.html = html;
        Ok(())
    }

    fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value, DriverError> {
        Err(DriverError::Unsupported("script evaluation"))
    }

    fn click(&mut self, _element: &ElementRef) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("clicking"))
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }

    fn page_title(&self) -> Result<String, DriverError> {
        Ok(self.title.clone())
    }

    fn body_text(&self) -> Result<String, DriverError> {
        let document = Html::parse_document(&self.html);
        Ok(document.root_element().text().collect::<Vec<_>>().join(" "))
    }

    fn body_html(&self) -> Result<String, DriverError> {
        Ok(self.html.clone())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.html.clear();
        Ok(())
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_driver_refuses_scripts_and_clicks() {
        let mut driver = HttpDriver::new().unwrap();
        assert!(!driver.is_interactive());
        assert!(matches!(
            driver.evaluate("1 + 1"),
            Err(DriverError::Unsupported(_))
        ));
        assert!(matches!(
            driver.click(&ElementRef::new("#a")),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_document_title() {
        let doc = Html::parse_document("<html><head><title> Careers </title></head></html>");
        assert_eq!(document_title(&doc), "Careers");
    }
}
