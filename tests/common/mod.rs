//! Scripted in-process browser used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spa_renderer_lib::browser::{RequestEvent, RequestId, RequestObserver, SubscriptionId};
use spa_renderer_lib::{BrowserDriver, BrowserError, ElementState, Page, Session, SessionOptions};

/// Shared record of everything the fake browser was asked to do.
#[derive(Default)]
pub struct BrowserLog {
    /// Outcome of each `navigate` call, in order. Calls past the end succeed.
    pub navigations_plan: Mutex<VecDeque<Result<(), BrowserError>>>,
    /// Outcome of each `wait_for_selector` call, in order. Calls past the end succeed.
    pub waits_plan: Mutex<VecDeque<Result<(), BrowserError>>>,
    /// Number of upcoming pages that start a same-origin request which never finishes.
    pub hanging_pages: Mutex<usize>,
    pub fail_launch: Mutex<Option<String>>,
    pub present: Mutex<HashSet<String>>,
    pub html: Mutex<String>,

    pub sessions_opened: AtomicUsize,
    pub sessions_closed: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub unsubscribed: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
    pub scripts: Mutex<Vec<String>>,
    pub waits: Mutex<Vec<(String, ElementState)>>,
    pub options: Mutex<Vec<SessionOptions>>,
}

impl BrowserLog {
    pub fn new(html: &str) -> Arc<Self> {
        let log = Self::default();
        *log.html.lock().unwrap() = html.to_string();
        Arc::new(log)
    }

    pub fn plan(&self, outcomes: impl IntoIterator<Item = Result<(), BrowserError>>) {
        self.navigations_plan.lock().unwrap().extend(outcomes);
    }

    pub fn plan_waits(&self, outcomes: impl IntoIterator<Item = Result<(), BrowserError>>) {
        self.waits_plan.lock().unwrap().extend(outcomes);
    }

    pub fn hang_pages(&self, count: usize) {
        *self.hanging_pages.lock().unwrap() = count;
    }

    pub fn add_present(&self, selector: &str) {
        self.present.lock().unwrap().insert(selector.to_string());
    }

    pub fn navigations(&self) -> usize {
        self.navigations.lock().unwrap().len()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.pages_closed.load(Ordering::SeqCst)
    }
}

pub struct FakeDriver {
    pub log: Arc<BrowserLog>,
}

impl FakeDriver {
    pub fn new(log: &Arc<BrowserLog>) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn open_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>, BrowserError> {
        if let Some(message) = self.log.fail_launch.lock().unwrap().clone() {
            return Err(BrowserError::Launch(message));
        }
        self.log.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.log.options.lock().unwrap().push(options.clone());
        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeSession {
    log: Arc<BrowserLog>,
}

#[async_trait]
impl Session for FakeSession {
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        self.log.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            log: Arc::clone(&self.log),
            next_subscription: AtomicU64::new(1),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.log.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage {
    log: Arc<BrowserLog>,
    next_subscription: AtomicU64,
}

#[async_trait]
impl Page for FakePage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.log.navigations.lock().unwrap().push(url.to_string());
        self.log
            .navigations_plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn subscribe(
        &self,
        observer: Arc<dyn RequestObserver>,
    ) -> Result<SubscriptionId, BrowserError> {
        let hang = {
            let mut remaining = self.log.hanging_pages.lock().unwrap();
            let hang = *remaining > 0;
            *remaining = remaining.saturating_sub(1);
            hang
        };
        if hang {
            observer.on_request_event(&RequestEvent::Started {
                id: RequestId::from("stalled"),
                url: "https://a.com/api/slow".to_string(),
                method: "GET".to_string(),
            });
        }
        Ok(SubscriptionId(
            self.next_subscription.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn unsubscribe(&self, _id: SubscriptionId) -> Result<(), BrowserError> {
        self.log.unsubscribed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> Result<bool, BrowserError> {
        Ok(self.log.present.lock().unwrap().contains(selector))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.log
            .waits
            .lock()
            .unwrap()
            .push((selector.to_string(), state));
        self.log
            .waits_plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn evaluate(&self, script: &str) -> Result<(), BrowserError> {
        self.log.scripts.lock().unwrap().push(script.to_string());
        Ok(())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.log.html.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.log.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
