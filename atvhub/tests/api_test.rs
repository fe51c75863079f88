use std::sync::Arc;

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::{json, Value};

use atvhub::blob::{BlobStore, LocalBlobStore};
use atvhub::consultation::CONSULTATIONS_KEY;
use atvhub::server::{build_rocket, AppState};
use atvhub::storage::KvStore;
use common::Config;

const ADMIN_PASSWORD: &str = "admin-pw";

fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("hash")
        .to_string()
}

fn admin_config(extra: &str) -> Config {
    let toml = format!(
        "[database]\npath = \":memory:\"\n\n[auth.admin]\nusername = \"admin\"\npassword_hash = \"{}\"\n\n{}",
        hash(ADMIN_PASSWORD),
        extra
    );
    Config::from_toml_str(&toml).expect("config")
}

async fn client_with(config: Config, blobs: Option<Arc<dyn BlobStore>>) -> Client {
    let kv = KvStore::in_memory().await.expect("kv");
    let state = AppState::assemble(Arc::new(config), kv, reqwest::Client::new(), None, blobs);
    Client::tracked(build_rocket(state)).await.expect("valid rocket")
}

async fn client() -> Client {
    client_with(admin_config(""), None).await
}

fn basic(user: &str, password: &str) -> Header<'static> {
    Header::new(
        "Authorization",
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password))),
    )
}

fn admin() -> Header<'static> {
    basic("admin", ADMIN_PASSWORD)
}

async fn json_of(res: rocket::local::asynchronous::LocalResponse<'_>) -> Value {
    res.into_json::<Value>().await.expect("json body")
}

#[tokio::test]
async fn health_and_status_are_public() {
    let client = client().await;

    let res = client.get("/health").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_string().await.as_deref(), Some("OK"));

    let res = client.get("/api/status").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    let body = json_of(res).await;
    assert_eq!(body["status"], "ok");
    assert!(body["ai_provider"].is_null());
}

#[tokio::test]
async fn admin_routes_require_basic_auth() {
    let client = client().await;

    let res = client.get("/api/admin/config").dispatch().await;
    assert_eq!(res.status(), Status::Unauthorized);
    assert_eq!(
        res.headers().get_one("WWW-Authenticate"),
        Some("Basic realm=\"Admin Area\"")
    );
    assert_eq!(res.headers().get_one("Cache-Control"), Some("no-store"));
    assert_eq!(json_of(res).await["error"], "Authentication required");

    let res = client
        .get("/api/admin/config")
        .header(basic("admin", "wrong"))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Unauthorized);
    assert_eq!(
        res.headers().get_one("WWW-Authenticate"),
        Some("Basic realm=\"Admin Area\"")
    );
    assert_eq!(res.headers().get_one("Cache-Control"), Some("no-store"));
    assert_eq!(json_of(res).await["error"], "Invalid credentials");

    let res = client
        .get("/api/admin/config")
        .header(Header::new("Authorization", "Basic %%%"))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Unauthorized);
    assert_eq!(
        res.headers().get_one("WWW-Authenticate"),
        Some("Basic realm=\"Admin Area\"")
    );
    assert_eq!(json_of(res).await["error"], "Invalid authorization header");

    let res = client.get("/api/admin/config").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.headers().get_one("Cache-Control"), Some("no-store"));
}

#[tokio::test]
async fn unconfigured_realm_refuses_everyone() {
    let client = client().await;
    let res = client.get("/api/sales/config").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::Unauthorized);
    assert!(res.headers().get_one("WWW-Authenticate").is_none());
    assert_eq!(res.headers().get_one("Cache-Control"), Some("no-store"));
    assert_eq!(json_of(res).await["error"], "Access not configured");
}

#[tokio::test]
async fn section_save_validates_input() {
    let client = client().await;

    let res = client
        .post("/api/admin/section/save")
        .header(admin())
        .json(&json!({ "id": "hero" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Missing Required Fields (id, type, data)");

    let res = client
        .post("/api/admin/section/save")
        .header(admin())
        .json(&json!({ "id": "x", "type": "carousel", "data": {} }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);

    let res = client
        .post("/api/admin/section/save")
        .header(admin())
        .json(&json!({ "id": "hero", "type": "hero", "data": { "title": "", "titleSize": "huge" } }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    let body = json_of(res).await;
    assert_eq!(body["error"], "Validation Error");
    assert!(body["message"].as_str().unwrap_or_default().contains("title"));
}

#[tokio::test]
async fn section_ids_cannot_leave_the_mirror() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mirror = dir.path().join("content");
    let extra = format!("[content]\nmirror_dir = \"{}\"\n", mirror.display());
    let client = client_with(admin_config(&extra), None).await;

    let res = client
        .post("/api/admin/section/save")
        .header(admin())
        .json(&json!({ "id": "../../escaped", "type": "faq", "data": {} }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Invalid Section ID: ../../escaped");
    assert!(!dir.path().join("escaped.json").exists());
    assert!(!mirror.exists());

    let res = client
        .delete("/api/admin/section/delete")
        .header(admin())
        .json(&json!({ "id": "../home" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
}

#[tokio::test]
async fn sections_flow_to_the_landing_page() {
    let client = client().await;

    for (id, title) in [("hero", "Addressable TV"), ("faq", "FAQ")] {
        let res = client
            .post("/api/admin/section/save")
            .header(admin())
            .json(&json!({ "id": id, "type": id, "data": { "title": title } }))
            .dispatch()
            .await;
        assert_eq!(res.status(), Status::Ok, "saving {}", id);
    }

    let res = client
        .post("/api/admin/home/save")
        .header(admin())
        .json(&json!({ "title": "no sections" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Invalid Home Config");

    let home = json!({ "sections": [
        { "id": "hero", "type": "hero", "enabled": true },
        { "id": "faq", "type": "faq", "enabled": false }
    ]});
    let res = client.post("/api/admin/home/save").header(admin()).json(&home).dispatch().await;
    assert_eq!(res.status(), Status::Ok);

    let landing = json_of(client.get("/api/content/landing").dispatch().await).await;
    let sections = landing["sections"].as_array().expect("sections");
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0]["id"], "hero");
    assert_eq!(sections[0]["data"]["title"], "Addressable TV");
    assert!(landing["etag"].as_str().unwrap_or_default().starts_with('v'));

    let res = client
        .get("/api/admin/content?type=section&id=hero")
        .header(admin())
        .dispatch()
        .await;
    assert_eq!(json_of(res).await["title"], "Addressable TV");

    let res = client
        .get("/api/admin/content?type=section&id=missing")
        .header(admin())
        .dispatch()
        .await;
    assert_eq!(json_of(res).await, json!({}));

    let res = client.get("/api/admin/content?type=other").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::BadRequest);

    let res = client
        .delete("/api/admin/section/delete")
        .header(admin())
        .json(&json!({ "id": "hero" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/admin/content?type=home").header(admin()).dispatch().await;
    let home = json_of(res).await;
    let ids: Vec<&str> = home["sections"]
        .as_array()
        .expect("sections")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["faq"]);

    let stats = json_of(client.get("/api/admin/stats/overview").header(admin()).dispatch().await).await;
    assert!(stats["todaySaves"].as_i64().unwrap_or_default() >= 4);
}

#[tokio::test]
async fn content_home_is_404_before_first_save() {
    let client = client().await;
    let res = client.get("/api/admin/content?type=home").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::NotFound);
    assert_eq!(json_of(res).await["error"], "File not found");
}

#[tokio::test]
async fn system_config_secrets_are_masked() {
    let client = client().await;

    let res = client
        .post("/api/admin/config")
        .header(admin())
        .json(&json!({ "slackWebhookUrl": "https://hooks.example/abc", "siteName": "ATV" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);

    let body = json_of(client.get("/api/admin/config").header(admin()).dispatch().await).await;
    assert_eq!(body["slackWebhookUrl"], "********");
    assert_eq!(body["siteName"], "ATV");
    assert!(body.get("telegramBotToken").is_none());

    // Posting the mask back keeps the stored secret.
    client
        .post("/api/admin/config")
        .header(admin())
        .json(&json!({ "slackWebhookUrl": "********", "siteName": "ATV2" }))
        .dispatch()
        .await;

    let state = client.rocket().state::<AppState>().expect("state");
    let stored = state.content.get_system_config().await.expect("config");
    assert_eq!(stored["slackWebhookUrl"], "https://hooks.example/abc");
    assert_eq!(stored["siteName"], "ATV2");
}

#[tokio::test]
async fn policies_round_trip_and_reject_unknown_types() {
    let client = client().await;

    let res = client.get("/api/admin/policy").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Type required");

    let res = client.get("/api/admin/policy?type=prices").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(
        json_of(res).await["error"],
        "Invalid type. Allowed: channels, bonuses, surcharges, segments"
    );

    let res = client.get("/api/admin/policy?type=channels").header(admin()).dispatch().await;
    assert_eq!(json_of(res).await, json!([]));

    let res = client
        .post("/api/admin/policy")
        .header(admin())
        .json(&json!({ "type": "channels" }))
        .dispatch()
        .await;
    assert_eq!(json_of(res).await["error"], "Invalid data");

    let channels = json!([{ "id": "tvn", "name": "tvN", "cpv": 12 }]);
    let res = client
        .post("/api/admin/policy")
        .header(admin())
        .json(&json!({ "type": "channels", "data": channels }))
        .dispatch()
        .await;
    assert_eq!(json_of(res).await["success"], true);

    let res = client.get("/api/admin/policy?type=channels").header(admin()).dispatch().await;
    assert_eq!(json_of(res).await, channels);
}

#[tokio::test]
async fn consultation_requests_are_stored_and_announced() {
    let mut slack = mockito::Server::new_async().await;
    let hook = slack
        .mock("POST", "/hook")
        .match_body(mockito::Matcher::Regex("Kim".into()))
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;
    let config = admin_config("[notifications]\nslack_webhook_env = \"ATVHUB_TEST_UNSET_SLACK\"\n");
    let client = client_with(config, None).await;
    client
        .post("/api/admin/config")
        .header(admin())
        .json(&json!({ "slackWebhookUrl": format!("{}/hook", slack.url()) }))
        .dispatch()
        .await;

    let res = client
        .post("/api/consultation/submit")
        .json(&json!({ "name": "Kim", "phone": "010-1234-5678" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Missing required fields");

    let res = client
        .post("/api/consultation/submit")
        .json(&json!({
            "name": "Kim",
            "phone": "010-1234-5678",
            "email": "kim@acme.kr",
            "message": "TV 광고 문의"
        }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);
    let body = json_of(res).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Consultation requested successfully");

    let state = client.rocket().state::<AppState>().expect("state");
    let stored = state.content.kv().lrange(CONSULTATIONS_KEY, 0, -1).await.expect("list");
    assert_eq!(stored.len(), 1);
    let entry: Value = serde_json::from_str(&stored[0]).expect("entry json");
    assert_eq!(entry["email"], "kim@acme.kr");
    assert_eq!(entry["status"], "new");
    assert!(entry["id"].as_str().is_some_and(|id| !id.is_empty()));
    hook.assert_async().await;
}

#[tokio::test]
async fn cta_events_honour_the_allow_list() {
    let client = client().await;

    let res = client
        .post("/api/events/cta")
        .json(&json!({ "ctaId": "Bad Id!" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Invalid CTA ID");

    let res = client.post("/api/events/cta").json(&json!({})).dispatch().await;
    assert_eq!(res.status(), Status::BadRequest);

    for id in ["estimate_open", "promo_banner-2"] {
        let res = client.post("/api/events/cta").json(&json!({ "ctaId": id })).dispatch().await;
        assert_eq!(res.status(), Status::Ok);
    }

    let stats = json_of(client.get("/api/admin/stats/overview").header(admin()).dispatch().await).await;
    assert_eq!(stats["todayCtaCount"], 2);
}

#[tokio::test]
async fn search_events_are_masked_and_tracked() {
    let client = client().await;

    let res = client.post("/api/events/search").json(&json!({ "q": 42 })).dispatch().await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Invalid query");

    let res = client.post("/api/events/search").json(&json!({ "q": " a " })).dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(json_of(res).await["msg"], "Query too short, skipped");

    let res = client
        .post("/api/events/search")
        .json(&json!({ "q": "상담 010-1234-5678" }))
        .dispatch()
        .await;
    assert_eq!(json_of(res).await["success"], true);

    let stats = json_of(client.get("/api/admin/stats/overview").header(admin()).dispatch().await).await;
    assert_eq!(stats["todaySearchCount"], 1);
    assert_eq!(stats["recentTerms"], json!(["상담 ***-****-****"]));
}

#[tokio::test]
async fn malformed_json_gets_a_json_error() {
    let client = client().await;
    let res = client
        .post("/api/events/cta")
        .header(ContentType::JSON)
        .body("{not json")
        .dispatch()
        .await;
    assert!(res.status() == Status::BadRequest || res.status() == Status::UnprocessableEntity);
    assert_eq!(json_of(res).await["success"], false);
}

#[tokio::test]
async fn blob_routes_need_a_backend() {
    let client = client().await;
    let res = client.get("/api/admin/blob/list").header(admin()).dispatch().await;
    assert_eq!(res.status(), Status::InternalServerError);
    assert_eq!(json_of(res).await["error"], "Blob storage not configured");
}

#[tokio::test]
async fn local_blob_upload_list_serve_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = "http://localhost:8000/blobs";
    let config = admin_config(&format!(
        "[blob]\nbackend = \"local\"\nlocal_dir = \"{}\"\npublic_base_url = \"{}\"\nmax_upload_bytes = 16\n",
        dir.path().display(),
        base
    ));
    let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path(), base));
    let client = client_with(config, Some(store)).await;

    let res = client
        .post("/api/admin/blob/upload?filename=img/logo.png")
        .header(admin())
        .header(ContentType::PNG)
        .body(b"png-bytes".to_vec())
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);
    let blob = json_of(res).await;
    assert_eq!(blob["pathname"], "img/logo.png");
    assert_eq!(blob["url"], format!("{}/img/logo.png", base));
    assert_eq!(blob["contentType"], "image/png");

    let res = client.get("/blobs/img/logo.png").dispatch().await;
    assert_eq!(res.status(), Status::Ok);
    assert_eq!(res.into_bytes().await.as_deref(), Some(&b"png-bytes"[..]));

    let res = client
        .post("/api/admin/blob/upload?filename=big.png")
        .header(admin())
        .body(vec![0u8; 64])
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::PayloadTooLarge);

    let list = json_of(client.get("/api/admin/blob/list").header(admin()).dispatch().await).await;
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let stats = json_of(client.get("/api/admin/stats/overview").header(admin()).dispatch().await).await;
    assert_eq!(stats["todayUploads"], 1);

    let res = client
        .delete("/api/admin/blob/delete")
        .header(admin())
        .json(&json!({ "url": "https://elsewhere.example/img/logo.png" }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::BadRequest);
    assert_eq!(json_of(res).await["error"], "Not a blob storage URL");

    let res = client
        .delete("/api/admin/blob/delete")
        .header(admin())
        .json(&json!({}))
        .dispatch()
        .await;
    assert_eq!(json_of(res).await["error"], "URL is required");

    let res = client
        .delete("/api/admin/blob/delete")
        .header(admin())
        .json(&json!({ "url": format!("{}/img/logo.png", base) }))
        .dispatch()
        .await;
    assert_eq!(res.status(), Status::Ok);
    assert!(!dir.path().join("img/logo.png").exists());
}

#[tokio::test]
async fn seed_loads_the_mirror_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("sections")).expect("mkdir");
    std::fs::write(
        dir.path().join("home.json"),
        r#"{"sections":[{"id":"hero","type":"hero","enabled":true}]}"#,
    )
    .expect("write home");
    std::fs::write(dir.path().join("sections/hero.json"), r#"{"title":"Seeded"}"#).expect("write hero");
    std::fs::write(dir.path().join("sections/faq.json"), r#"{"questions":"oops"}"#).expect("write faq");

    let config = admin_config(&format!("[content]\nmirror_dir = \"{}\"\n", dir.path().display()));
    let client = client_with(config, None).await;

    let report = json_of(client.post("/api/admin/seed").header(admin()).dispatch().await).await;
    assert_eq!(report["home"], true);
    assert_eq!(report["sections"], 1);
    assert_eq!(report["errors"].as_array().map(Vec::len), Some(1));

    let landing = json_of(client.get("/api/content/landing").dispatch().await).await;
    assert_eq!(landing["sections"][0]["data"]["title"], "Seeded");
}
