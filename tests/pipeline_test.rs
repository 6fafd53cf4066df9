//! Pipeline tests: scripted fixes through acquisition, smoothing, persistence
//! and reverse geocoding against mock HTTP services.
//!
//! Timings are shrunk through the config so the tests run in well under a
//! second of real time.

use anyhow::Result;
use complaint_locator::acquisition::{AcquisitionController, AcquisitionState};
use complaint_locator::config::Config;
use complaint_locator::replay::{ReplayScript, ScriptedEvent, ScriptedPositionSource};
use complaint_locator::store::{KeyValueStore, LastGoodFix, MemoryStore};
use log::info;
use mockito::{Matcher, ServerGuard};
use std::sync::{Arc, Once};

// Initialize the logger only once
static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Seconds))
            .is_test(true)
            .init();
    });
}

const LAT: f64 = 19.0760;
const LNG: f64 = 72.8777;

const NOMINATIM_BODY: &str = r#"{
    "name": "Azad Maidan",
    "display_name": "Azad Maidan, Fort, Mumbai, Maharashtra, 400001, India",
    "address": {
        "road": "Mahapalika Marg",
        "neighbourhood": "Fort",
        "city": "Mumbai",
        "state": "Maharashtra",
        "postcode": "400001"
    }
}"#;

const OVERPASS_BODY: &str = r#"{"elements":[
    {"type":"node","id":1,"lat":19.0764,"lon":72.8777,"tags":{"shop":"bakery","name":"Yazdani Bakery"}},
    {"type":"node","id":2,"lat":19.0770,"lon":72.8777,"tags":{"shop":"books"}},
    {"type":"way","id":3,"center":{"lat":19.0750,"lon":72.8777},"tags":{"amenity":"college","name":"Elphinstone College"}}
]}"#;

fn fast_config(server: &ServerGuard) -> Config {
    let mut config = Config::default();
    config.acquisition.watch_window_ms = 400;
    config.acquisition.fallback_timeout_ms = 200;
    config.geocoding.debounce_ms = 20;
    config.geocoding.timeout_ms = 2_000;
    config.geocoding.primary_url = format!("{}/primary", server.url());
    config.geocoding.secondary_url = format!("{}/secondary", server.url());
    config.poi.overpass_url = server.url();
    config
}

async fn run_session(
    config: &Config,
    script: ReplayScript,
    store: Arc<MemoryStore>,
) -> Result<(AcquisitionState, String)> {
    let resolver = Arc::new(config.build_resolver()?);
    let mut controller = AcquisitionController::new(
        Arc::new(ScriptedPositionSource::new(script)),
        store,
        resolver.clone(),
    )
    .with_config(config.acquisition.clone(), config.filter.clone());

    let state = controller.begin().await;
    resolver.wait_idle().await;
    Ok((state, resolver.current_address()))
}

#[tokio::test]
async fn test_converging_fixes_resolve_to_enriched_address() -> Result<()> {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("GET", "/primary/reverse")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(NOMINATIM_BODY)
        .expect(1)
        .create_async()
        .await;
    let _overpass = server
        .mock("GET", "/api/interpreter")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(OVERPASS_BODY)
        .create_async()
        .await;

    let config = fast_config(&server);
    let store = Arc::new(MemoryStore::new());
    let script = ReplayScript {
        watch: [40.0, 40.0, 35.0, 30.0, 22.0]
            .iter()
            .map(|acc| ScriptedEvent::fix(10, LAT, LNG, *acc))
            .collect(),
        one_shot: None,
    };

    let (state, address) = run_session(&config, script, store.clone()).await?;
    info!("Resolved address: {address}");

    assert_eq!(state, AcquisitionState::Inaccurate);
    assert_eq!(
        address,
        "Azad Maidan, Mahapalika Marg, Fort, Mumbai, Maharashtra 400001 • Nearby: Yazdani Bakery (44m), Elphinstone College (111m)"
    );
    // Jitter-free fixes at one spot only trigger one lookup
    primary.assert_async().await;

    let last_good = LastGoodFix::load(store.as_ref(), &config.storage.last_good_key)
        .expect("a fix under 25m was seen");
    assert!((last_good.lat - LAT).abs() < 1e-9);

    Ok(())
}

#[tokio::test]
async fn test_failing_primary_uses_secondary() -> Result<()> {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let _primary = server
        .mock("GET", "/primary/reverse")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;
    let secondary = server
        .mock("GET", "/secondary/reverse")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("lat".into(), LAT.to_string()),
            Matcher::UrlEncoded("lon".into(), LNG.to_string()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(r#"{"display_name":"Fort, Mumbai, India"}"#)
        .create_async()
        .await;

    let mut config = fast_config(&server);
    config.poi.enabled = false;
    let script = ReplayScript {
        watch: vec![ScriptedEvent::fix(10, LAT, LNG, 6.0)],
        one_shot: None,
    };

    let (state, address) = run_session(&config, script, Arc::new(MemoryStore::new())).await?;

    assert_eq!(state, AcquisitionState::Accurate);
    assert_eq!(address, "Fort, Mumbai, India");
    secondary.assert_async().await;

    Ok(())
}

#[tokio::test]
async fn test_silent_watch_reuses_last_good_fix() -> Result<()> {
    init_logger();
    let mut server = mockito::Server::new_async().await;
    let _primary = server
        .mock("GET", "/primary/reverse")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(r#"{"address":{"suburb":"Colaba","city":"Mumbai"}}"#)
        .create_async()
        .await;

    let mut config = fast_config(&server);
    config.poi.enabled = false;

    let store = Arc::new(MemoryStore::new());
    store.set(
        &config.storage.last_good_key,
        r#"{"lat":18.9067,"lng":72.8147,"timestampMs":1700000000000}"#,
    )?;

    let (state, address) =
        run_session(&config, ReplayScript::default(), store.clone()).await?;

    assert_eq!(state, AcquisitionState::Inaccurate);
    assert_eq!(address, "Colaba, Mumbai");

    Ok(())
}
