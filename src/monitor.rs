//! Network activity tracking and idle detection for one page load.
//!
//! The monitor counts in-flight "significant" requests: same-origin (by
//! default) GET/POST/PUT calls that are not static assets. The page is idle
//! once no such request has been pending for a full idle window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::debug;
use url::Url;

use crate::browser::{BrowserError, Page, RequestEvent, RequestId, RequestObserver, SubscriptionId};

/// Placeholder replaced by the escaped page origin in the tracked-URL template.
pub const BASE_URL_PLACEHOLDER: &str = "@BASE_URL@";

/// Default template: requests to the page's own origin.
pub const DEFAULT_TRACKED_TEMPLATE: &str = r"^@BASE_URL@(/|\?|#|$)";

const TRACKED_METHODS: &[&str] = &["GET", "POST", "PUT"];

fn static_asset_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\.(png|jpe?g|gif|ico|svg|webp|avif|eot|ttf|woff2?|otf|css|js)$")
            .expect("static pattern compiles")
    })
}

/// Requests currently in flight, keyed by request identity.
///
/// The pending count is the number of entries, so it can neither go negative
/// nor drift from the set of open requests.
#[derive(Debug, Default)]
pub struct NetworkLedger {
    in_flight: HashMap<RequestId, String>,
}

impl NetworkLedger {
    /// Records a started request. A repeated start for the same id is ignored.
    pub fn start(&mut self, id: RequestId, url: String) -> bool {
        if self.in_flight.contains_key(&id) {
            return false;
        }
        self.in_flight.insert(id, url);
        true
    }

    /// Closes a request. Unknown or already-closed ids are ignored.
    pub fn finish(&mut self, id: &RequestId) -> Option<String> {
        self.in_flight.remove(id)
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.in_flight.values().cloned().collect();
        urls.sort();
        urls
    }
}

/// Decides which requests count towards network activity.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    tracked: Regex,
}

impl RequestFilter {
    /// Builds the tracked pattern by substituting the page origin into `template`.
    pub fn for_page(page_url: &Url, template: &str) -> Result<Self, regex::Error> {
        let origin = page_url.origin().ascii_serialization();
        let pattern = template.replace(BASE_URL_PLACEHOLDER, &regex::escape(&origin));
        Ok(Self {
            tracked: Regex::new(&pattern)?,
        })
    }

    pub fn is_tracked(&self, url: &str, method: &str) -> bool {
        if is_static_asset(url) {
            return false;
        }
        if !TRACKED_METHODS
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
        {
            return false;
        }
        self.tracked.is_match(url)
    }
}

fn is_static_asset(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    static_asset_pattern().is_match(&path)
}

fn lock(ledger: &Mutex<NetworkLedger>) -> MutexGuard<'_, NetworkLedger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LedgerObserver {
    filter: RequestFilter,
    ledger: Arc<Mutex<NetworkLedger>>,
}

impl RequestObserver for LedgerObserver {
    fn on_request_event(&self, event: &RequestEvent) {
        match event {
            RequestEvent::Started { id, url, method } => {
                if !self.filter.is_tracked(url, method) {
                    return;
                }
                let mut ledger = lock(&self.ledger);
                if ledger.start(id.clone(), url.clone()) {
                    debug!(request = %id, url = %url, pending = ledger.pending(), ">> request started");
                }
            }
            RequestEvent::Finished { id } | RequestEvent::Failed { id } => {
                let mut ledger = lock(&self.ledger);
                if let Some(url) = ledger.finish(id) {
                    debug!(request = %id, url = %url, pending = ledger.pending(), "<< request ended");
                }
            }
        }
    }
}

/// Timing for [`NetworkActivityMonitor::wait_until_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Quiet time required before the page counts as idle.
    pub window: Duration,
    /// Poll interval.
    pub tick: Duration,
    /// Overall deadline for reaching idle.
    pub timeout: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
            tick: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Tracks significant requests of one page. Never shared across renders.
pub struct NetworkActivityMonitor {
    ledger: Arc<Mutex<NetworkLedger>>,
    subscription: Option<SubscriptionId>,
}

impl NetworkActivityMonitor {
    /// Registers the monitor's observer on `page`.
    pub async fn attach(page: &dyn Page, filter: RequestFilter) -> Result<Self, BrowserError> {
        let ledger = Arc::new(Mutex::new(NetworkLedger::default()));
        let observer = Arc::new(LedgerObserver {
            filter,
            ledger: Arc::clone(&ledger),
        });
        let subscription = page.subscribe(observer).await?;
        Ok(Self {
            ledger,
            subscription: Some(subscription),
        })
    }

    pub fn pending(&self) -> usize {
        lock(&self.ledger).pending()
    }

    pub fn in_flight(&self) -> Vec<String> {
        lock(&self.ledger).urls()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Polls every `tick` until no tracked request has been pending for
    /// `window`. Any pending request resets the accumulated quiet time.
    pub async fn wait_until_idle(&self, policy: IdlePolicy) -> Result<Duration, BrowserError> {
        let start = Instant::now();
        let mut quiet = Duration::ZERO;

        while !self.is_idle() || quiet < policy.window {
            if start.elapsed() >= policy.timeout {
                return Err(BrowserError::timeout(format!(
                    "network idle not reached within {:?}; in flight: {:?}",
                    policy.timeout,
                    self.in_flight()
                )));
            }
            debug!(quiet = ?quiet, window = ?policy.window, in_flight = ?self.in_flight(), "waiting for network idle");
            sleep(policy.tick).await;
            if self.is_idle() {
                quiet += policy.tick;
            } else {
                quiet = Duration::ZERO;
            }
        }

        debug!(quiet = ?quiet, window = ?policy.window, "network idle");
        Ok(start.elapsed())
    }

    /// Removes the observer from `page`. Calling it twice is a no-op.
    pub async fn detach(&mut self, page: &dyn Page) -> Result<(), BrowserError> {
        match self.subscription.take() {
            Some(id) => page.unsubscribe(id).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ElementState;
    use async_trait::async_trait;

    fn filter(page: &str) -> RequestFilter {
        RequestFilter::for_page(&Url::parse(page).unwrap(), DEFAULT_TRACKED_TEMPLATE).unwrap()
    }

    fn started(id: &str, url: &str) -> RequestEvent {
        RequestEvent::Started {
            id: RequestId::from(id),
            url: url.to_string(),
            method: "GET".to_string(),
        }
    }

    /// Page that lets tests emit request events to its observers.
    #[derive(Default)]
    struct EventPage {
        observers: Mutex<Vec<(SubscriptionId, Arc<dyn RequestObserver>)>>,
    }

    impl EventPage {
        fn emit(&self, event: RequestEvent) {
            for (_, observer) in self.observers.lock().unwrap().iter() {
                observer.on_request_event(&event);
            }
        }

        fn observer_count(&self) -> usize {
            self.observers.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Page for EventPage {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            observer: Arc<dyn RequestObserver>,
        ) -> Result<SubscriptionId, BrowserError> {
            let mut observers = self.observers.lock().unwrap();
            let id = SubscriptionId(observers.len() as u64 + 1);
            observers.push((id, observer));
            Ok(id)
        }

        async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrowserError> {
            self.observers.lock().unwrap().retain(|(sid, _)| *sid != id);
            Ok(())
        }

        async fn query_selector(&self, _selector: &str) -> Result<bool, BrowserError> {
            Ok(false)
        }

        async fn wait_for_selector(
            &self,
            _selector: &str,
            _state: ElementState,
            _timeout: Duration,
        ) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn evaluate(&self, _script: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn content(&self) -> Result<String, BrowserError> {
            Ok(String::new())
        }

        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    #[test]
    fn filter_tracks_same_origin_api_calls() {
        let f = filter("https://shop.example.com/products?page=2");
        assert!(f.is_tracked("https://shop.example.com/api/items", "GET"));
        assert!(f.is_tracked("https://shop.example.com?x=1", "post"));
        assert!(f.is_tracked("https://shop.example.com", "PUT"));
    }

    #[test]
    fn filter_skips_assets_methods_and_third_parties() {
        let f = filter("https://shop.example.com/");
        assert!(!f.is_tracked("https://shop.example.com/app.js", "GET"));
        assert!(!f.is_tracked("https://shop.example.com/logo.PNG?v=3", "GET"));
        assert!(!f.is_tracked("https://shop.example.com/fonts/a.woff2", "GET"));
        assert!(!f.is_tracked("https://shop.example.com/api", "DELETE"));
        assert!(!f.is_tracked("https://shop.example.com/api", "OPTIONS"));
        assert!(!f.is_tracked("https://www.google-analytics.com/collect", "POST"));
        assert!(!f.is_tracked("https://shop.example.com.evil.io/api", "GET"));
    }

    #[test]
    fn custom_template_can_widen_tracking() {
        let f = RequestFilter::for_page(
            &Url::parse("https://a.com/").unwrap(),
            r"^(@BASE_URL@|https://api\.a\.com)(/|$)",
        )
        .unwrap();
        assert!(f.is_tracked("https://api.a.com/v1/items", "GET"));
        assert!(f.is_tracked("https://a.com/", "GET"));
    }

    #[test]
    fn ledger_counts_by_identity() {
        let mut ledger = NetworkLedger::default();
        assert!(ledger.start(RequestId::from("1"), "https://a.com/api".to_string()));
        assert!(ledger.start(RequestId::from("2"), "https://a.com/api".to_string()));
        assert!(!ledger.start(RequestId::from("1"), "https://a.com/api".to_string()));
        assert_eq!(ledger.pending(), 2);

        assert!(ledger.finish(&RequestId::from("1")).is_some());
        assert!(ledger.finish(&RequestId::from("1")).is_none());
        assert_eq!(ledger.pending(), 1);
        assert_eq!(ledger.urls(), vec!["https://a.com/api".to_string()]);

        assert!(ledger.finish(&RequestId::from("unknown")).is_none());
        ledger.finish(&RequestId::from("2"));
        assert_eq!(ledger.pending(), 0);
    }

    #[tokio::test]
    async fn pending_tracks_open_requests_through_any_event_sequence() {
        let page = EventPage::default();
        let monitor = NetworkActivityMonitor::attach(&page, filter("https://a.com/"))
            .await
            .unwrap();

        let events = vec![
            (started("1", "https://a.com/api/a"), 1),
            (started("2", "https://a.com/api/a"), 2),
            (started("3", "https://cdn.other.com/x"), 2),
            (started("4", "https://a.com/main.css"), 2),
            (RequestEvent::Finished { id: "3".into() }, 2),
            (RequestEvent::Failed { id: "1".into() }, 1),
            (RequestEvent::Finished { id: "1".into() }, 1),
            (RequestEvent::Finished { id: "2".into() }, 0),
            (RequestEvent::Failed { id: "2".into() }, 0),
        ];
        for (event, expected) in events {
            page.emit(event);
            assert_eq!(monitor.pending(), expected);
            assert_eq!(monitor.in_flight().len(), expected);
        }
        assert!(monitor.is_idle());
    }

    #[tokio::test]
    async fn detach_removes_observer() {
        let page = EventPage::default();
        let mut monitor = NetworkActivityMonitor::attach(&page, filter("https://a.com/"))
            .await
            .unwrap();
        assert_eq!(page.observer_count(), 1);
        monitor.detach(&page).await.unwrap();
        monitor.detach(&page).await.unwrap();
        assert_eq!(page.observer_count(), 0);

        page.emit(started("1", "https://a.com/api"));
        assert_eq!(monitor.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_page_is_idle_after_one_window() {
        let page = EventPage::default();
        let monitor = NetworkActivityMonitor::attach(&page, filter("https://a.com/"))
            .await
            .unwrap();
        let waited = monitor
            .wait_until_idle(IdlePolicy {
                window: Duration::from_millis(2000),
                tick: Duration::from_millis(1000),
                timeout: Duration::from_secs(60),
            })
            .await
            .unwrap();
        assert_eq!(waited, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_request_resets_quiet_time() {
        let page = Arc::new(EventPage::default());
        let monitor = NetworkActivityMonitor::attach(page.as_ref(), filter("https://a.com/"))
            .await
            .unwrap();

        let emitter = Arc::clone(&page);
        let traffic = tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            emitter.emit(started("1", "https://a.com/api/items"));
            sleep(Duration::from_millis(2000)).await;
            emitter.emit(RequestEvent::Finished { id: "1".into() });
        });

        let waited = monitor
            .wait_until_idle(IdlePolicy {
                window: Duration::from_millis(2000),
                tick: Duration::from_millis(1000),
                timeout: Duration::from_secs(60),
            })
            .await
            .unwrap();
        traffic.await.unwrap();

        // Busy until 2500ms; quiet ticks at 3000ms and 4000ms.
        assert_eq!(waited, Duration::from_millis(4000));
        assert!(monitor.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn never_idle_page_times_out() {
        let page = EventPage::default();
        let monitor = NetworkActivityMonitor::attach(&page, filter("https://a.com/"))
            .await
            .unwrap();
        page.emit(started("long-poll", "https://a.com/events"));

        let err = monitor
            .wait_until_idle(IdlePolicy {
                window: Duration::from_secs(2),
                tick: Duration::from_secs(1),
                timeout: Duration::from_secs(10),
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("https://a.com/events"));
    }
}
