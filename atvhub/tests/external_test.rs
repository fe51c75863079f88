use atvhub::blob::{BlobError, BlobStore, HostedBlobStore};
use atvhub::discovery::{discover_feed, DiscoveryError};
use atvhub::ingestion::{fetch_and_parse_feed, SOURCE_NAVER};
use atvhub::naver::{NaverClient, NaverCredentials, SearchOptions};
use atvhub::notify::{Delivery, LeadAlert, Notifier, NotifyTargets};
use common::NotificationConfig;
use mockito::Matcher;
use serde_json::json;

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Brand Newsroom</title><link>https://brand.example</link><description>d</description>
<item><title>출시</title><link>https://brand.example/1</link><description>x</description></item>
</channel></rss>"#;

fn creds() -> NaverCredentials {
    NaverCredentials {
        client_id: "id".into(),
        client_secret: "secret".into(),
    }
}

#[tokio::test]
async fn naver_search_prefers_original_links() {
    let mut server = mockito::Server::new_async().await;
    let ok = server
        .mock("GET", "/v1/search/news.json")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query".into(), "신제품".into()),
            Matcher::UrlEncoded("start".into(), "1".into()),
            Matcher::UrlEncoded("sort".into(), "date".into()),
        ]))
        .match_header("X-Naver-Client-Id", "id")
        .match_header("X-Naver-Client-Secret", "secret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "items": [
                    {
                        "title": "<b>신제품</b> 출시",
                        "originallink": "https://press.example/1",
                        "link": "https://n.news.naver.com/1",
                        "description": "새 &quot;음료&quot;",
                        "pubDate": "Mon, 15 Jan 2024 09:00:00 +0900"
                    },
                    {
                        "title": "두번째",
                        "originallink": "",
                        "link": "https://n.news.naver.com/2",
                        "description": "",
                        "pubDate": "Mon, 15 Jan 2024 08:00:00 +0900"
                    }
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let failing = server
        .mock("GET", "/v1/search/news.json")
        .match_query(Matcher::UrlEncoded("query".into(), "캠페인".into()))
        .with_status(500)
        .create_async()
        .await;

    let client = NaverClient::new(
        reqwest::Client::new(),
        Some(format!("{}/v1/search/news.json", server.url())),
    );
    let articles = client
        .search(&creds(), &["신제품".to_string(), "캠페인".to_string()], SearchOptions::default())
        .await;

    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].title, "신제품 출시");
    assert_eq!(articles[0].link, "https://press.example/1");
    assert_eq!(articles[0].content_snippet, "새 \"음료\"");
    assert_eq!(articles[0].source, SOURCE_NAVER);
    assert_eq!(articles[0].keyword.as_deref(), Some("신제품"));
    assert_eq!(articles[1].link, "https://n.news.naver.com/2");

    ok.assert_async().await;
    failing.assert_async().await;
}

#[tokio::test]
async fn naver_without_credentials_makes_no_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

    let client = NaverClient::new(reqwest::Client::new(), Some(server.url()));
    let articles = client
        .search(&NaverCredentials::default(), &["신제품".to_string()], SearchOptions::default())
        .await;

    assert!(articles.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn telegram_alert_is_sent_as_markdown_v2() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/botTOKEN/sendMessage")
        .match_body(Matcher::PartialJson(json!({ "chat_id": "42", "parse_mode": "MarkdownV2" })))
        .with_status(200)
        .with_body(r#"{"ok":true}"#)
        .create_async()
        .await;

    let cfg = NotificationConfig {
        telegram_api_url: Some(format!("{}/", server.url())),
        ..Default::default()
    };
    let notifier = Notifier::new(reqwest::Client::new(), &cfg);
    let alert = LeadAlert {
        title: "신제품 출시".into(),
        company: "Acme".into(),
        score: 80,
        angle: "출시 캠페인".into(),
        link: "https://news.example/1".into(),
        email: Some("pr@acme.kr".into()),
        phone: None,
    };
    let targets = NotifyTargets {
        slack_url: None,
        telegram_token: Some("TOKEN".into()),
        telegram_chat_id: Some("42".into()),
    };

    let delivery = notifier.send_lead_alert(&alert, &targets).await;
    assert_eq!(delivery, Delivery { slack: false, telegram: true });
    mock.assert_async().await;
}

#[tokio::test]
async fn telegram_errors_are_reported_as_undelivered() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/botTOKEN/sendMessage")
        .with_status(400)
        .with_body(r#"{"ok":false,"description":"can't parse entities"}"#)
        .create_async()
        .await;

    let cfg = NotificationConfig {
        telegram_api_url: Some(server.url()),
        ..Default::default()
    };
    let notifier = Notifier::new(reqwest::Client::new(), &cfg);
    let alert = LeadAlert {
        title: "t".into(),
        company: "c".into(),
        score: 90,
        angle: "a".into(),
        link: "https://news.example/2".into(),
        email: None,
        phone: None,
    };
    let targets = NotifyTargets {
        telegram_token: Some("TOKEN".into()),
        telegram_chat_id: Some("42".into()),
        ..Default::default()
    };

    let delivery = notifier.send_lead_alert(&alert, &targets).await;
    assert!(!delivery.telegram);
}

#[tokio::test]
async fn hosted_blob_store_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let put = server
        .mock("PUT", "/images/hero.png")
        .match_header("authorization", "Bearer tok")
        .match_header("x-content-type", "image/png")
        .match_header("x-add-random-suffix", "1")
        .match_body("png-bytes")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"url":"https://store.blob.test/images/hero-x1.png","pathname":"images/hero-x1.png","contentType":"image/png"}"#,
        )
        .create_async()
        .await;
    let list = server
        .mock("GET", "/")
        .match_query(Matcher::UrlEncoded("limit".into(), "1000".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"blobs":[{"url":"https://store.blob.test/images/hero-x1.png","pathname":"images/hero-x1.png","size":9,"uploadedAt":"2024-01-15T00:00:00.000Z"}],"hasMore":false}"#,
        )
        .create_async()
        .await;
    let delete = server
        .mock("POST", "/delete")
        .match_body(Matcher::PartialJson(json!({ "urls": ["https://store.blob.test/images/hero-x1.png"] })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let store = HostedBlobStore::new(reqwest::Client::new(), format!("{}/", server.url()), "tok", "blob.test");

    let blob = store
        .put("/images/hero.png", Some("image/png"), b"png-bytes".to_vec())
        .await
        .expect("put");
    assert_eq!(blob.pathname, "images/hero-x1.png");
    assert!(store.owns_url(&blob.url));

    let blobs = store.list().await.expect("list");
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].size, Some(9));

    assert!(matches!(
        store.delete("https://elsewhere.example/a.png").await,
        Err(BlobError::NotOwned)
    ));
    store.delete(&blob.url).await.expect("delete");

    put.assert_async().await;
    list.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn hosted_blob_errors_surface_the_status() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("PUT", "/a.png")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let store = HostedBlobStore::new(reqwest::Client::new(), server.url(), "tok", "blob.test");
    let err = store.put("a.png", None, vec![1]).await.unwrap_err();
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn feed_fetch_gives_up_after_repeated_server_errors() {
    let mut server = mockito::Server::new_async().await;
    let unavailable = server
        .mock("GET", "/feed.xml")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let err = fetch_and_parse_feed(&client, &format!("{}/feed.xml", server.url()), 5)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
    unavailable.assert_async().await;
}

#[tokio::test]
async fn feed_fetch_does_not_retry_client_errors() {
    let mut server = mockito::Server::new_async().await;
    let missing = server
        .mock("GET", "/gone.xml")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let err = fetch_and_parse_feed(&client, &format!("{}/gone.xml", server.url()), 5)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
    missing.assert_async().await;
}

#[tokio::test]
async fn discovery_follows_advertised_feed_links() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/blog")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(
            r#"<!DOCTYPE html><html><head>
<link rel="alternate" type="application/json" href="/feed.json">
<link rel="alternate" type="application/rss+xml" href="/feed.xml">
</head><body>blog</body></html>"#,
        )
        .create_async()
        .await;
    let _feed = server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(RSS)
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let found = discover_feed(&client, &format!("{}/blog", server.url()))
        .await
        .expect("discovered");
    assert_eq!(found.feed_url, format!("{}/feed.xml", server.url()));
    assert_eq!(found.title.as_deref(), Some("Brand Newsroom"));
}

#[tokio::test]
async fn discovery_reports_pages_without_feeds() {
    let mut server = mockito::Server::new_async().await;
    let _plain = server
        .mock("GET", "/plain")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><head><title>x</title></head><body></body></html>")
        .create_async()
        .await;
    let _json = server
        .mock("GET", "/data")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("just some text")
        .create_async()
        .await;

    let client = reqwest::Client::new();
    assert!(matches!(
        discover_feed(&client, &format!("{}/plain", server.url())).await,
        Err(DiscoveryError::NoneDiscovered)
    ));
    let err = discover_feed(&client, &format!("{}/data", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::NotHtml));
    assert_eq!(err.to_string(), "Failed to fetch URL: URL does not return HTML content");
}
