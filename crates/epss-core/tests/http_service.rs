use epss_core::{EpssConfig, EpssError, EpssService, HttpSource, ScoreCache};
use mockito::Matcher;
use std::io::Write;
use std::time::Duration;

const BODY: &str = r#"{"status":"OK","data":[
    {"cve":"CVE-2021-44228","epss":"0.944500000","percentile":"0.999890000","date":"2025-11-21"}
]}"#;

fn service_for(server: &mockito::Server) -> EpssService {
    let config = EpssConfig {
        base_url: format!("{}/data/v1/epss", server.url()),
        max_retries: 1,
        timeout_secs: 5,
        ..EpssConfig::default()
    };
    let source = HttpSource::new(&config)
        .unwrap()
        .with_backoff(Duration::ZERO);
    EpssService::new(source, ScoreCache::new(100), &config)
}

#[test]
fn repeated_lookup_hits_upstream_once() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/data/v1/epss")
        .match_query(Matcher::UrlEncoded("cve".into(), "CVE-2021-44228".into()))
        .with_status(200)
        .with_body(BODY)
        .expect(1)
        .create();

    let svc = service_for(&server);
    let first = svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
    let second = svc.get_epss_score("CVE-2021-44228").unwrap().unwrap();
    assert_eq!(first, second);
    assert!((first.epss_score - 0.9445).abs() < 1e-9);
    mock.assert();
}

#[test]
fn timeout_degrades_to_none() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/data/v1/epss")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(800));
            w.write_all(BODY.as_bytes())
        })
        .create();

    let config = EpssConfig {
        base_url: format!("{}/data/v1/epss", server.url()),
        max_retries: 1,
        ..EpssConfig::default()
    };
    let source = HttpSource::new(&config)
        .unwrap()
        .with_timeout(Duration::from_millis(100))
        .unwrap();
    let svc = EpssService::new(source, ScoreCache::new(100), &config);

    assert!(svc.get_epss_score("CVE-2021-44228").unwrap().is_none());
    assert!(svc.cache().is_empty());
}

#[test]
fn malformed_payload_degrades_to_none() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/data/v1/epss")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create();

    let svc = service_for(&server);
    assert!(svc.get_epss_score("CVE-2021-44228").unwrap().is_none());
}

#[test]
fn invalid_identifier_never_reaches_server() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/data/v1/epss")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let svc = service_for(&server);
    assert!(matches!(
        svc.get_epss_score("not-a-cve"),
        Err(EpssError::InvalidIdentifier(_))
    ));
    mock.assert();
}

#[test]
fn batch_keeps_only_resolved_ids() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/data/v1/epss")
        .match_query(Matcher::UrlEncoded(
            "cve".into(),
            "CVE-2021-44228,CVE-9999-00000".into(),
        ))
        .with_status(200)
        .with_body(BODY)
        .expect(1)
        .create();

    let svc = service_for(&server);
    let scores = svc
        .get_epss_scores(["CVE-9999-00000", "CVE-2021-44228"])
        .unwrap();
    assert_eq!(scores.len(), 1);
    for score in scores.values() {
        assert!((0.0..=1.0).contains(&score.epss_score));
        assert!((0.0..=1.0).contains(&score.percentile));
    }
    mock.assert();
}
