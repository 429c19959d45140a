mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{BrowserLog, FakeDriver};
use spa_renderer_lib::browser::dom::{DEVICE_META, TIMESTAMP_META};
use spa_renderer_lib::{
    BlobCache, BrowserError, CacheError, CacheKey, CacheKeyCodec, Config, ElementState,
    MemoryBlobCache, ReadinessCondition, RenderError, RenderOrchestrator, RenderRequest,
};

const PAGE: &str = "<html><head></head><body><div id=\"app\">shop</div></body></html>";

fn config() -> Config {
    let mut config = Config::builtin().expect("builtin config");
    config.network_idle_time = Duration::ZERO;
    config.max_tries = 3;
    config
}

fn orchestrator(
    config: Config,
    log: &Arc<BrowserLog>,
    cache: Option<Arc<dyn BlobCache>>,
) -> RenderOrchestrator {
    RenderOrchestrator::new(Arc::new(config), FakeDriver::new(log), cache)
        .expect("orchestrator builds")
}

fn timeout(message: &str) -> Result<(), BrowserError> {
    Err(BrowserError::Timeout(message.to_string()))
}

#[tokio::test]
async fn renders_and_closes_everything() {
    let log = BrowserLog::new(PAGE);
    let renderer = orchestrator(config(), &log, None);

    let result = renderer
        .render(&RenderRequest::new("https://shop.example.com/list"))
        .await
        .expect("render succeeds");

    assert_eq!(result.html, PAGE);
    assert_eq!(result.device, "desktop");
    assert!(!result.cache_hit);
    assert!(result.cache_url.is_none());
    assert_eq!(log.opened(), 1);
    assert_eq!(log.closed(), 1);
    assert_eq!(log.pages_opened(), log.pages_closed());
    assert_eq!(
        log.unsubscribed.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn timeouts_are_retried_on_fresh_pages() {
    let log = BrowserLog::new(PAGE);
    log.plan([timeout("first"), timeout("second")]);
    let renderer = orchestrator(config(), &log, None);

    let result = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await;

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(log.navigations(), 3);
    assert_eq!(log.pages_opened(), 3);
    assert_eq!(log.pages_closed(), 3);
    assert_eq!(log.closed(), 1);
}

#[tokio::test]
async fn last_timeout_propagates_with_its_message() {
    let log = BrowserLog::new(PAGE);
    log.plan([timeout("first"), timeout("navigation exceeded 30s")]);
    let mut request = RenderRequest::new("https://a.com/");
    request.max_tries = Some(2);
    let renderer = orchestrator(config(), &log, None);

    let err = renderer.render(&request).await.unwrap_err();

    match err {
        RenderError::LoadTimeout { attempts, message } => {
            assert_eq!(attempts, 2);
            assert_eq!(message, "navigation exceeded 30s");
        }
        other => panic!("expected load timeout, got {other:?}"),
    }
    assert_eq!(log.navigations(), 2);
    assert_eq!(log.closed(), 1);
    assert_eq!(log.pages_opened(), log.pages_closed());
}

#[tokio::test]
async fn single_try_never_retries() {
    let log = BrowserLog::new(PAGE);
    log.plan([timeout("slow")]);
    let mut config = config();
    config.max_tries = 1;
    let renderer = orchestrator(config, &log, None);

    let err = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await
        .unwrap_err();
    assert!(err.is_load_timeout());
    assert_eq!(log.navigations(), 1);
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let log = BrowserLog::new(PAGE);
    log.plan([Err(BrowserError::Protocol("net::ERR_NAME_NOT_RESOLVED".to_string()))]);
    let renderer = orchestrator(config(), &log, None);

    let err = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::Browser(BrowserError::Protocol(_))));
    assert_eq!(log.navigations(), 1);
    assert_eq!(log.closed(), 1);
}

#[tokio::test]
async fn launch_failure_leaves_nothing_open() {
    let log = BrowserLog::new(PAGE);
    *log.fail_launch.lock().unwrap() = Some("no chromium".to_string());
    let renderer = orchestrator(config(), &log, None);

    let err = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::SessionSetup(_)));
    assert!(err.to_string().contains("no chromium"));
    assert_eq!(log.opened(), 0);
    assert_eq!(log.closed(), 0);
}

#[tokio::test]
async fn invalid_url_fails_before_any_browser_work() {
    let log = BrowserLog::new(PAGE);
    let renderer = orchestrator(config(), &log, None);

    let err = renderer
        .render(&RenderRequest::new("not a url"))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::InvalidUrl(_)));
    assert_eq!(log.opened(), 0);
}

#[tokio::test]
async fn post_processing_runs_in_order() {
    let log = BrowserLog::new(PAGE);
    let mut config = config();
    config.remove_elements = vec![".cookie-banner".to_string(), "#chat".to_string()];
    let mut request = RenderRequest::new("https://a.com/shop?page=2");
    request.add_base_url = Some(true);
    request.device = Some("iPhone 12".to_string());
    let renderer = orchestrator(config, &log, None);

    renderer.render(&request).await.expect("render succeeds");

    let scripts = log.scripts();
    assert_eq!(scripts.len(), 6, "{scripts:#?}");
    assert!(scripts[0].contains("script:not([type])"));
    assert!(scripts[1].contains(".cookie-banner"));
    assert!(scripts[2].contains("#chat"));
    assert!(scripts[3].contains(TIMESTAMP_META));
    assert!(scripts[4].contains(DEVICE_META));
    assert!(scripts[4].contains("iPhone 12"));
    assert!(scripts[5].contains("base.href = \"https://a.com/shop?page=2\""));
}

#[tokio::test]
async fn request_removals_replace_configured_ones() {
    let log = BrowserLog::new(PAGE);
    let mut config = config();
    config.remove_elements = vec![".cookie-banner".to_string()];
    let mut request = RenderRequest::new("https://a.com/");
    request.remove_elements = Some(vec![".ads".to_string()]);
    let renderer = orchestrator(config, &log, None);

    renderer.render(&request).await.expect("render succeeds");

    let scripts = log.scripts();
    assert!(scripts.iter().any(|s| s.contains(".ads")));
    assert!(!scripts.iter().any(|s| s.contains(".cookie-banner")));
    assert!(!scripts.iter().any(|s| s.contains("base.href")));
}

#[tokio::test]
async fn readiness_conditions_gate_capture() {
    let log = BrowserLog::new(PAGE);
    log.add_present("#app");
    let mut request = RenderRequest::new("https://a.com/");
    request.ready_conditions = Some(vec![
        ReadinessCondition::new("#app", [".product-list", ".price"], ElementState::Visible),
        ReadinessCondition::new("#never", [".x"], ElementState::Attached),
    ]);
    let renderer = orchestrator(config(), &log, None);

    renderer.render(&request).await.expect("render succeeds");

    let waits = log.waits.lock().unwrap().clone();
    assert_eq!(
        waits,
        vec![
            (".product-list".to_string(), ElementState::Visible),
            (".price".to_string(), ElementState::Visible),
        ]
    );
}

#[tokio::test]
async fn readiness_timeout_is_retried_on_a_fresh_page() {
    let log = BrowserLog::new(PAGE);
    log.add_present("#app");
    log.plan_waits([timeout("selector .price not visible within 10s")]);
    let mut request = RenderRequest::new("https://a.com/");
    request.ready_conditions = Some(vec![ReadinessCondition::new(
        "#app",
        [".price"],
        ElementState::Visible,
    )]);
    let renderer = orchestrator(config(), &log, None);

    let result = renderer.render(&request).await.expect("second try succeeds");

    assert_eq!(result.html, PAGE);
    assert_eq!(log.navigations(), 2);
    assert_eq!(log.pages_opened(), 2);
    assert_eq!(log.pages_closed(), 2);
    assert_eq!(log.waits.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn persistent_readiness_timeout_becomes_load_timeout() {
    let log = BrowserLog::new(PAGE);
    log.add_present("#app");
    log.plan_waits([
        timeout("selector .price not visible within 10s"),
        timeout("selector .price still not visible within 10s"),
    ]);
    let mut request = RenderRequest::new("https://a.com/");
    request.max_tries = Some(2);
    request.ready_conditions = Some(vec![ReadinessCondition::new(
        "#app",
        [".price"],
        ElementState::Visible,
    )]);
    let renderer = orchestrator(config(), &log, None);

    let err = renderer.render(&request).await.unwrap_err();

    match err {
        RenderError::LoadTimeout { attempts, message } => {
            assert_eq!(attempts, 2);
            assert_eq!(message, "selector .price still not visible within 10s");
        }
        other => panic!("expected load timeout, got {other:?}"),
    }
    assert_eq!(log.closed(), 1);
    assert_eq!(log.pages_opened(), log.pages_closed());
}

fn idle_config() -> Config {
    let mut config = config();
    config.network_idle_tick = Duration::from_millis(10);
    config.network_idle_timeout = Duration::from_millis(50);
    config
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_is_retried_on_a_fresh_page() {
    let log = BrowserLog::new(PAGE);
    log.hang_pages(1);
    let renderer = orchestrator(idle_config(), &log, None);

    let result = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await
        .expect("second try goes idle");

    assert_eq!(result.html, PAGE);
    assert_eq!(log.navigations(), 2);
    assert_eq!(log.pages_closed(), 2);
}

#[tokio::test(start_paused = true)]
async fn persistent_idle_timeout_names_the_stalled_request() {
    let log = BrowserLog::new(PAGE);
    log.hang_pages(3);
    let renderer = orchestrator(idle_config(), &log, None);

    let err = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await
        .unwrap_err();

    match err {
        RenderError::LoadTimeout { attempts, message } => {
            assert_eq!(attempts, 3);
            assert!(message.contains("network idle not reached"), "{message}");
            assert!(message.contains("https://a.com/api/slow"), "{message}");
        }
        other => panic!("expected load timeout, got {other:?}"),
    }
    assert_eq!(log.navigations(), 3);
    assert_eq!(log.closed(), 1);
}

#[tokio::test]
async fn device_and_headers_reach_the_session() {
    let log = BrowserLog::new(PAGE);
    let mut config = config();
    config.device = "mobile".to_string();
    config
        .extra_http_headers
        .insert("x-renderer".to_string(), "spa".to_string());
    let mut request = RenderRequest::new("https://a.com/");
    request
        .extra_headers
        .insert("x-tenant".to_string(), "acme".to_string());
    request.debug = Some(true);
    let renderer = orchestrator(config, &log, None);

    let result = renderer.render(&request).await.expect("render succeeds");

    assert_eq!(result.device, "mobile");
    let options = log.options.lock().unwrap().clone();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].profile.viewport.to_string(), "390x844");
    assert_eq!(options[0].extra_headers["x-renderer"], "spa");
    assert_eq!(options[0].extra_headers["x-tenant"], "acme");
    assert!(!options[0].headless);
}

#[tokio::test]
async fn request_device_beats_configured_device() {
    let log = BrowserLog::new(PAGE);
    let mut config = config();
    config.device = "mobile".to_string();
    let mut request = RenderRequest::new("https://a.com/");
    request.device = Some("iPhone 12".to_string());
    let renderer = orchestrator(config, &log, None);

    let result = renderer.render(&request).await.expect("render succeeds");

    assert_eq!(result.device, "iPhone 12");
    let options = log.options.lock().unwrap().clone();
    assert!(options[0].profile.is_mobile);
    assert!(options[0].profile.user_agent.contains("iPhone"));
}

#[tokio::test]
async fn preload_failure_is_ignored() {
    let log = BrowserLog::new(PAGE);
    log.plan([Err(BrowserError::Protocol("warm-up failed".to_string()))]);
    let mut config = config();
    config.preload_pages = true;
    let renderer = orchestrator(config, &log, None);

    let result = renderer.render(&RenderRequest::new("https://a.com/")).await;

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(log.navigations(), 2);
    assert_eq!(log.pages_opened(), 2);
    assert_eq!(log.pages_closed(), 2);
}

fn key_for(url: &str, device: &str) -> CacheKey {
    CacheKeyCodec::from_config(&config())
        .unwrap()
        .derive_key(url, device)
        .unwrap()
}

#[tokio::test]
async fn cache_hit_skips_the_browser() {
    let log = BrowserLog::new(PAGE);
    let cache = Arc::new(MemoryBlobCache::new());
    let key = key_for("https://a.com/shop?utm_source=mail&id=7", "desktop");
    cache
        .put(&key, "<html>cached</html>", "text/html")
        .await
        .unwrap();
    let mut request = RenderRequest::new("https://a.com/shop?id=7&utm_source=news");
    request.return_cached = Some(true);
    let renderer = orchestrator(config(), &log, Some(cache));

    let result = renderer.render(&request).await.expect("cache hit");

    assert!(result.cache_hit);
    assert_eq!(result.html, "<html>cached</html>");
    assert_eq!(result.device, "desktop");
    assert_eq!(result.cache_url.as_deref(), Some("memory://a.com/desktop/shop?id=7"));
    assert_eq!(log.opened(), 0);
}

#[tokio::test]
async fn cache_miss_renders_and_stores() {
    let log = BrowserLog::new(PAGE);
    let cache = Arc::new(MemoryBlobCache::new());
    let mut request = RenderRequest::new("https://a.com/shop?id=7");
    request.return_cached = Some(true);
    request.store_pages = Some(true);
    let renderer = orchestrator(config(), &log, Some(cache.clone()));

    let result = renderer.render(&request).await.expect("render succeeds");

    assert!(!result.cache_hit);
    assert_eq!(log.opened(), 1);
    let key = key_for("https://a.com/shop?id=7", "desktop");
    assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some(PAGE));
    assert_eq!(cache.content_type(&key).as_deref(), Some("text/html"));
    assert_eq!(result.cache_url, Some(format!("memory://{key}")));

    let again = renderer.render(&request).await.expect("second render");
    assert!(again.cache_hit);
    assert_eq!(log.opened(), 1);
}

#[tokio::test]
async fn cache_reads_are_opt_in() {
    let log = BrowserLog::new(PAGE);
    let cache = Arc::new(MemoryBlobCache::new());
    let key = key_for("https://a.com/", "desktop");
    cache.put(&key, "stale", "text/html").await.unwrap();
    let renderer = orchestrator(config(), &log, Some(cache));

    let result = renderer
        .render(&RenderRequest::new("https://a.com/"))
        .await
        .expect("render succeeds");
    assert!(!result.cache_hit);
    assert_eq!(result.html, PAGE);
}

#[tokio::test]
async fn request_flags_enable_caching_when_config_does_not() {
    let log = BrowserLog::new(PAGE);
    let cache = Arc::new(MemoryBlobCache::new());
    let config = config();
    assert!(!config.store_pages && !config.return_cached_pages);
    let renderer = orchestrator(config, &log, Some(cache.clone()));

    let mut request = RenderRequest::new("https://a.com/docs");
    request.store_pages = Some(true);
    let stored = renderer.render(&request).await.expect("render succeeds");
    let key = key_for("https://a.com/docs", "desktop");
    assert_eq!(stored.cache_url, Some(format!("memory://{key}")));
    assert_eq!(cache.len(), 1);

    let mut request = RenderRequest::new("https://a.com/docs");
    request.return_cached = Some(true);
    let cached = renderer.render(&request).await.expect("cache hit");
    assert!(cached.cache_hit);
    assert_eq!(log.opened(), 1);
}

#[tokio::test]
async fn caching_without_a_cache_still_renders() {
    let log = BrowserLog::new(PAGE);
    let mut request = RenderRequest::new("https://a.com/");
    request.store_pages = Some(true);
    request.return_cached = Some(true);
    let renderer = orchestrator(config(), &log, None);

    let result = renderer.render(&request).await.expect("render succeeds");

    assert_eq!(result.html, PAGE);
    assert!(!result.cache_hit);
    assert!(result.cache_url.is_none());
}

struct BrokenCache;

#[async_trait]
impl BlobCache for BrokenCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<String>, CacheError> {
        Err(CacheError::Transport("connection refused".to_string()))
    }

    async fn put(
        &self,
        key: &CacheKey,
        _html: &str,
        _content_type: &str,
    ) -> Result<String, CacheError> {
        Err(CacheError::Status {
            status: 403,
            key: key.to_string(),
        })
    }

    fn locator(&self, key: &CacheKey) -> String {
        format!("broken://{key}")
    }
}

#[tokio::test]
async fn cache_failures_never_fail_the_render() {
    let log = BrowserLog::new(PAGE);
    let mut request = RenderRequest::new("https://a.com/");
    request.return_cached = Some(true);
    request.store_pages = Some(true);
    let renderer = orchestrator(config(), &log, Some(Arc::new(BrokenCache)));

    let result = renderer.render(&request).await.expect("render succeeds");

    assert_eq!(result.html, PAGE);
    assert!(!result.cache_hit);
    assert!(result.cache_url.is_none());
    assert_eq!(log.closed(), 1);
}
