use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DriverError;
use crate::models::ElementRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Return once the load event has fired
    Navigated,
    /// Return once an element matching this CSS selector exists
    Selector(String),
}

#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub wait: WaitCondition,
    pub timeout: Duration,
}

impl NavigateOptions {
    pub fn navigated(timeout: Duration) -> Self {
        Self {
            wait: WaitCondition::Navigated,
            timeout,
        }
    }
}

/// A single live page. Every call blocks until it completes or times out.
pub trait PageDriver {
    fn navigate(&mut self, url: &str, options: &NavigateOptions) -> Result<(), DriverError>;

    /// Run a read-only script in the page and return its JSON result.
    fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, DriverError>;

    fn click(&mut self, element: &ElementRef) -> Result<(), DriverError>;

    fn current_url(&self) -> String;

    fn page_title(&self) -> Result<String, DriverError>;

    fn body_text(&self) -> Result<String, DriverError>;

    fn body_html(&self) -> Result<String, DriverError>;

    /// Release the underlying session. Must tolerate a half-broken session.
    fn close(&mut self) -> Result<(), DriverError>;

    /// False for drivers that can neither evaluate scripts nor click.
    fn is_interactive(&self) -> bool {
        true
    }
}

/// Owns a driver for the length of one run and closes it exactly once, on
/// every exit path.
pub struct Session {
    driver: Box<dyn PageDriver>,
    closed: bool,
}

impl Session {
    pub fn new(driver: Box<dyn PageDriver>) -> Self {
        Self {
            driver,
            closed: false,
        }
    }

    pub fn driver(&mut self) -> &mut dyn PageDriver {
        self.driver.as_mut()
    }

    pub fn close(mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.driver.close()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("closing browser session on early exit");
            if let Err(e) = self.driver.close() {
                warn!("failed to close browser session: {}", e);
            }
        }
    }
}

/// Fixed post-navigation/post-click delay.
pub fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted in-memory driver for pipeline tests.

    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Debug, Clone, Default)]
    pub struct FakePage {
        /// URL reported after landing here; defaults to the requested URL
        pub landed_url: Option<String>,
        pub title: String,
        pub text: String,
        pub html: String,
    }

    impl FakePage {
        pub fn text(text: &str) -> Self {
            Self {
                text: text.to_string(),
                html: format!("<html><body>{}</body></html>", text),
                ..Self::default()
            }
        }

        pub fn html(html: &str) -> Self {
            let text = scraper::Html::parse_document(html)
                .root_element()
                .text()
                .collect::<Vec<_>>()
                .join(" ");
            Self {
                text,
                html: html.to_string(),
                ..Self::default()
            }
        }

        pub fn landing_on(mut self, url: &str) -> Self {
            self.landed_url = Some(url.to_string());
            self
        }
    }

    #[derive(Default)]
    pub struct FakeDriver {
        pub pages: HashMap<String, FakePage>,
        /// Number of upcoming navigations to a URL that should time out
        pub failures: HashMap<String, u32>,
        /// Selector → URL reached by clicking it; missing selectors fail
        pub clicks: HashMap<String, String>,
        pub evaluation: Option<serde_json::Value>,
        pub interactive: bool,
        pub visits: Rc<RefCell<Vec<String>>>,
        pub closes: Rc<Cell<u32>>,
        current: Option<(String, FakePage)>,
    }

    impl FakeDriver {
        pub fn new() -> Self {
            Self {
                interactive: true,
                ..Self::default()
            }
        }

        pub fn page(mut self, url: &str, page: FakePage) -> Self {
            self.pages.insert(url.to_string(), page);
            self
        }

        pub fn failing(mut self, url: &str, times: u32) -> Self {
            self.failures.insert(url.to_string(), times);
            self
        }

        pub fn click_to(mut self, selector: &str, url: &str) -> Self {
            self.clicks.insert(selector.to_string(), url.to_string());
            self
        }

        pub fn static_only(mut self) -> Self {
            self.interactive = false;
            self
        }

        fn current_page(&self) -> Result<&FakePage, DriverError> {
            self.current
                .as_ref()
                .map(|(_, page)| page)
                .ok_or(DriverError::Evaluation("no page loaded".into()))
        }
    }

    impl PageDriver for FakeDriver {
        fn navigate(&mut self, url: &str, options: &NavigateOptions) -> Result<(), DriverError> {
            self.visits.borrow_mut().push(url.to_string());
            if let Some(remaining) = self.failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DriverError::Timeout {
                        url: url.to_string(),
                        timeout: options.timeout,
                    });
                }
            }
            let page = self.pages.get(url).cloned().ok_or_else(|| DriverError::Navigation {
                url: url.to_string(),
                reason: "no route".into(),
            })?;
            let landed = page.landed_url.clone().unwrap_or_else(|| url.to_string());
            self.current = Some((landed, page));
            Ok(())
        }

        fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value, DriverError> {
            if !self.interactive {
                return Err(DriverError::Unsupported("script evaluation"));
            }
            self.evaluation
                .clone()
                .ok_or(DriverError::Evaluation("no scripted result".into()))
        }

        fn click(&mut self, element: &ElementRef) -> Result<(), DriverError> {
            if !self.interactive {
                return Err(DriverError::Unsupported("clicking"));
            }
            let target = self.clicks.get(&element.selector).cloned().ok_or_else(|| {
                DriverError::Interaction {
                    selector: element.selector.clone(),
                    reason: "detached".into(),
                }
            })?;
            let page = self.pages.get(&target).cloned().unwrap_or_default();
            self.current = Some((target, page));
            Ok(())
        }

        fn current_url(&self) -> String {
            self.current
                .as_ref()
                .map(|(url, _)| url.clone())
                .unwrap_or_default()
        }

        fn page_title(&self) -> Result<String, DriverError> {
            Ok(self.current_page()?.title.clone())
        }

        fn body_text(&self) -> Result<String, DriverError> {
            Ok(self.current_page()?.text.clone())
        }

        fn body_html(&self) -> Result<String, DriverError> {
            Ok(self.current_page()?.html.clone())
        }

        fn close(&mut self) -> Result<(), DriverError> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }

        fn is_interactive(&self) -> bool {
            self.interactive
        }
    }
}
