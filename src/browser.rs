use headless_chrome::browser::default_executable;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::driver::{NavigateOptions, PageDriver, WaitCondition};
use crate::error::DriverError;
use crate::models::ElementRef;

const USER_AGENT_ARG: &str = "--user-agent=Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// `PageDriver` backed by a local Chrome over the DevTools protocol.
pub struct ChromeDriver {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeDriver {
    pub fn launch(headless: bool) -> Result<Self, DriverError> {
        info!("launching Chrome (headless: {})", headless);

        let launch_options = LaunchOptions {
            headless,
            sandbox: true,
            window_size: Some((1920, 1080)),
            path: default_executable().ok(),
            args: vec![
                OsStr::new(USER_AGENT_ARG),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };

        let browser = Browser::new(launch_options).map_err(|e| {
            DriverError::Session(format!(
                "failed to launch Chrome, make sure it is installed: {}",
                e
            ))
        })?;
        let tab = browser
            .new_tab()
            .map_err(|e| DriverError::Session(format!("failed to open a tab: {}", e)))?;

        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    fn tab(&self) -> Result<&Arc<Tab>, DriverError> {
        self.tab
            .as_ref()
            .ok_or_else(|| DriverError::Session("session already closed".into()))
    }

    fn evaluate_string(&self, script: &str) -> Result<String, DriverError> {
        let result = self
            .tab()?
            .evaluate(script, false)
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }
}

fn navigation_error(url: &str, timeout: Duration, err: anyhow::Error) -> DriverError {
    let reason = err.to_string();
    if reason.to_lowercase().contains("timeout") || reason.to_lowercase().contains("timed out") {
        DriverError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        DriverError::Navigation {
            url: url.to_string(),
            reason,
        }
    }
}

impl PageDriver for ChromeDriver {
    fn navigate(&mut self, url: &str, options: &NavigateOptions) -> Result<(), DriverError> {
        debug!("navigating to {}", url);
        let tab = self.tab()?;
        tab.set_default_timeout(options.timeout);
        tab.navigate_to(url)
            .map_err(|e| navigation_error(url, options.timeout, e))?;

        match &options.wait {
            WaitCondition::Navigated => {
                tab.wait_until_navigated()
                    .map_err(|e| navigation_error(url, options.timeout, e))?;
            }
            WaitCondition::Selector(selector) => {
                tab.wait_for_element_with_custom_timeout(selector, options.timeout)
                    .map_err(|e| navigation_error(url, options.timeout, e))?;
            }
        }
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, DriverError> {
        let result = self
            .tab()?
            .evaluate(script, false)
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    fn click(&mut self, element: &ElementRef) -> Result<(), DriverError> {
        let interaction = |reason: String| DriverError::Interaction {
            selector: element.selector.clone(),
            reason,
        };
        let found = self
            .tab()?
            .find_element(&element.selector)
            .map_err(|e| interaction(e.to_string()))?;
        found.click().map_err(|e| interaction(e.to_string()))?;
        Ok(())
    }

    fn current_url(&self) -> String {
        self.tab().map(|tab| tab.get_url()).unwrap_or_default()
    }

    fn page_title(&self) -> Result<String, DriverError> {
        self.tab()?
            .get_title()
            .map_err(|e| DriverError::Evaluation(e.to_string()))
    }

    fn body_text(&self) -> Result<String, DriverError> {
        self.evaluate_string("document.body ? document.body.textContent : ''")
    }

    fn body_html(&self) -> Result<String, DriverError> {
        self.tab()?
            .get_content()
            .map_err(|e| DriverError::Evaluation(e.to_string()))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if let Some(tab) = self.tab.take() {
            // The browser process goes away with `browser` below either way.
            let _ = tab.close(true);
        }
        if self.browser.take().is_some() {
            info!("browser session closed");
        }
        Ok(())
    }
}
