// tests/api_tests.rs

use playboard::{
    config::{Config, DataBackend},
    models::user::ROLE_ADMIN,
    routes,
    state::AppState,
    utils::hash::hash_password,
};
use serde_json::{Value, json};

const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "admin-password";

struct TestApp {
    address: String,
    client: reqwest::Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    async fn admin_token(&self) -> String {
        let body: Value = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": ADMIN_USERNAME, "password": ADMIN_PASSWORD }))
            .send()
            .await
            .expect("Login failed")
            .json()
            .await
            .expect("Failed to parse login json");
        body["data"]["token"]
            .as_str()
            .expect("Token not found")
            .to_string()
    }

    /// Creates a PlayBook through the admin API and returns its id.
    async fn create_playbook(&self, token: &str, body: Value) -> String {
        let resp = self
            .client
            .post(self.url("/api/playbooks"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("Create playbook failed");
        assert_eq!(resp.status().as_u16(), 201);
        let body: Value = resp.json().await.unwrap();
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn start(&self, playbook_id: &str, user_id: &str) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/playbooks/{}/progress", playbook_id)))
            .json(&json!({ "userId": user_id, "userName": "Test Learner" }))
            .send()
            .await
            .expect("Start failed")
    }

    async fn complete(&self, playbook_id: &str, step: u32, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/api/playbooks/{}/progress/{}", playbook_id, step)))
            .json(&body)
            .send()
            .await
            .expect("Complete failed")
    }
}

/// Spawns the app over the in-memory backend on a random port, with a
/// seeded admin account.
async fn spawn_app() -> TestApp {
    let config = Config {
        database_url: String::new(),
        data_backend: DataBackend::Memory,
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        admin_username: None,
        admin_password: None,
    };

    let state = AppState::in_memory(config);
    let hashed = hash_password(ADMIN_PASSWORD).unwrap();
    state
        .users
        .create(ADMIN_USERNAME, &hashed, ROLE_ADMIN)
        .await
        .unwrap();

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
    }
}

fn three_step_playbook(slug: &str, status: &str) -> Value {
    json!({
        "title": "Onboarding",
        "slug": slug,
        "status": status,
        "steps": [
            { "type": "content", "resourceId": "c1", "title": "Welcome" },
            { "type": "exam", "resourceId": "e1", "title": "Quiz" },
            { "type": "survey", "resourceId": "s1", "title": "Feedback" }
        ]
    })
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/random_path_that_does_not_exist"))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn admin_routes_require_a_token() {
    let app = spawn_app().await;

    let response = app.client.get(app.url("/api/playbooks")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);

    let bad_login = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "username": ADMIN_USERNAME, "password": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_login.status().as_u16(), 401);
}

#[tokio::test]
async fn starting_an_unknown_playbook_is_404() {
    let app = spawn_app().await;
    let response = app.start("does-not-exist", "u1").await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn missing_user_id_is_400() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("missing-user", "published"))
        .await;

    let response = app
        .client
        .post(app.url(&format!("/api/playbooks/{}/progress", id)))
        .json(&json!({ "userId": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn full_three_step_run() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("full-run", "published"))
        .await;

    let started: Value = app.start(&id, "u1").await.json().await.unwrap();
    assert_eq!(started["data"]["currentStep"], 1);
    assert_eq!(started["data"]["totalSteps"], 3);
    assert_eq!(started["data"]["userName"], "Test Learner");

    // Starting again returns the same record.
    let again: Value = app.start(&id, "u1").await.json().await.unwrap();
    assert_eq!(again["data"]["id"], started["data"]["id"]);

    let step1 = app
        .complete(&id, 1, json!({ "userId": "u1", "timeSpent": 30 }))
        .await;
    assert_eq!(step1.status().as_u16(), 200);

    let step2: Value = app
        .complete(
            &id,
            2,
            json!({
                "userId": "u1",
                "timeSpent": 60,
                "result": { "type": "exam", "examId": "e1", "score": 90, "passed": true }
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(step2["data"]["completionRate"], 67);
    assert_eq!(step2["data"]["currentStep"], 3);

    let step3: Value = app
        .complete(
            &id,
            3,
            json!({
                "userId": "u1",
                "result": { "type": "survey", "responses": { "q1": "great" } }
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    let record = &step3["data"];
    assert_eq!(record["isCompleted"], true);
    assert_eq!(record["completionRate"], 100);
    assert_eq!(record["completedSteps"], json!([1, 2, 3]));
    assert_eq!(record["timeSpent"], 90);
    assert!(record["completedAt"].is_string());
    assert_eq!(step3["message"], "PlayBook completed");

    let pb: Value = app
        .client
        .get(app.url(&format!("/api/playbooks/{}", id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pb["data"]["completionCount"], 1);
}

#[tokio::test]
async fn locked_steps_are_forbidden_and_out_of_range_is_400() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("gated", "published"))
        .await;
    app.start(&id, "u1").await;

    let locked = app.complete(&id, 2, json!({ "userId": "u1" })).await;
    assert_eq!(locked.status().as_u16(), 403);

    let beyond = app.complete(&id, 4, json!({ "userId": "u1" })).await;
    assert_eq!(beyond.status().as_u16(), 400);

    let negative = app
        .complete(&id, 1, json!({ "userId": "u1", "timeSpent": -5 }))
        .await;
    assert_eq!(negative.status().as_u16(), 400);

    let wrong_type = app
        .complete(
            &id,
            1,
            json!({ "userId": "u1", "result": { "type": "exam", "score": 10 } }),
        )
        .await;
    assert_eq!(wrong_type.status().as_u16(), 400);

    let never_started = app.complete(&id, 1, json!({ "userId": "stranger" })).await;
    assert_eq!(never_started.status().as_u16(), 404);
}

#[tokio::test]
async fn reset_locks_steps_opened_before_it() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("relock", "published"))
        .await;
    app.start(&id, "u1").await;
    let first = app.complete(&id, 1, json!({ "userId": "u1" })).await;
    assert_eq!(first.status().as_u16(), 200);

    let reset = app
        .client
        .post(app.url(&format!("/api/playbooks/{}/progress/reset", id)))
        .json(&json!({ "userId": "u1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status().as_u16(), 200);

    let second = app.complete(&id, 2, json!({ "userId": "u1" })).await;
    assert_eq!(second.status().as_u16(), 403);

    let record: Value = app.start(&id, "u1").await.json().await.unwrap();
    assert_eq!(record["data"]["completedSteps"], json!([]));
    assert_eq!(record["data"]["isCompleted"], false);
}

#[tokio::test]
async fn custom_page_saves_partial_state_then_completes() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(
            &token,
            json!({
                "title": "Lab",
                "slug": "lab",
                "status": "published",
                "steps": [
                    { "type": "customPage", "resourceId": "p1", "title": "Sandbox" },
                    { "type": "content", "resourceId": "c1", "title": "Wrap up" }
                ]
            }),
        )
        .await;
    app.start(&id, "u1").await;

    let url = app.url(&format!("/api/playbooks/{}/progress/custom-page/1", id));

    let partial: Value = app
        .client
        .put(&url)
        .json(&json!({ "userId": "u1", "progressData": { "draft": "abc" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(partial["data"]["completedSteps"], json!([]));
    assert_eq!(partial["data"]["stepResults"]["1"]["data"]["draft"], "abc");

    let done: Value = app
        .client
        .put(&url)
        .json(&json!({
            "userId": "u1",
            "progressData": { "completed": true, "timeSpent": 39.6, "title": "Sandbox" }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(done["data"]["completedSteps"], json!([1]));
    assert_eq!(done["data"]["currentStep"], 2);
    assert_eq!(done["data"]["timeSpent"], 40);
    assert_eq!(done["data"]["stepResults"]["1"]["completed"], true);

    // Step 2 is content, not a custom page.
    let wrong = app
        .client
        .put(app.url(&format!("/api/playbooks/{}/progress/custom-page/2", id)))
        .json(&json!({ "userId": "u1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 400);
}

#[tokio::test]
async fn goto_and_reset() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("goto-reset", "published"))
        .await;
    let started: Value = app.start(&id, "u1").await.json().await.unwrap();
    app.complete(&id, 1, json!({ "userId": "u1", "timeSpent": 10 }))
        .await;

    let goto_url = app.url(&format!("/api/playbooks/{}/progress/goto", id));
    let back: Value = app
        .client
        .post(&goto_url)
        .json(&json!({ "userId": "u1", "stepNumber": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(back["data"]["currentStep"], 1);
    assert_eq!(back["data"]["completedSteps"], json!([1]));

    let invalid = app
        .client
        .post(&goto_url)
        .json(&json!({ "userId": "u1", "stepNumber": 9 }))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status().as_u16(), 400);

    let reset_url = app.url(&format!("/api/playbooks/{}/progress/reset", id));
    let reset: Value = app
        .client
        .post(&reset_url)
        .json(&json!({ "userId": "u1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["data"]["id"], started["data"]["id"]);
    assert_eq!(reset["data"]["completedSteps"], json!([]));
    assert_eq!(reset["data"]["timeSpent"], 0);

    let nobody: Value = app
        .client
        .post(&reset_url)
        .json(&json!({ "userId": "nobody" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nobody["success"], true);
    assert!(nobody["data"].is_null());
}

#[tokio::test]
async fn stats_are_padded_to_every_step() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(
            &token,
            json!({
                "title": "Four steps",
                "status": "published",
                "steps": [
                    { "type": "content", "resourceId": "a", "title": "A" },
                    { "type": "content", "resourceId": "b", "title": "B" },
                    { "type": "content", "resourceId": "c", "title": "C" },
                    { "type": "content", "resourceId": "d", "title": "D" }
                ]
            }),
        )
        .await;

    app.start(&id, "a").await;
    app.start(&id, "b").await;
    app.complete(&id, 1, json!({ "userId": "a", "timeSpent": 100 }))
        .await;
    app.complete(&id, 2, json!({ "userId": "a" })).await;
    app.complete(&id, 1, json!({ "userId": "b", "timeSpent": 50 }))
        .await;

    let stats: Value = app
        .client
        .get(app.url(&format!("/api/playbooks/{}/stats", id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        stats["data"]["stepStats"],
        json!({ "1": 2, "2": 1, "3": 0, "4": 0 })
    );
    let overview = &stats["data"]["overview"];
    assert_eq!(overview["totalUsers"], 2);
    assert_eq!(overview["completedUsers"], 0);
    assert_eq!(overview["totalTimeSpent"], 150);
    assert_eq!(overview["averageTimeSpent"], 75);
    assert_eq!(overview["minTimeSpent"], 50);
    assert_eq!(overview["maxTimeSpent"], 100);

    let missing = app
        .client
        .get(app.url("/api/playbooks/nope/stats"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn results_download_as_csv_and_json() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("export-me", "published"))
        .await;
    app.start(&id, "u1").await;
    app.complete(
        &id,
        1,
        json!({ "userId": "u1", "result": { "type": "content", "contentTitle": "Hello, \"world\"" } }),
    )
    .await;

    let unauthenticated = app
        .client
        .get(app.url(&format!("/api/playbooks/{}/download?format=csv", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthenticated.status().as_u16(), 401);

    let csv = app
        .client
        .get(app.url(&format!("/api/playbooks/{}/download?format=csv", id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(csv.status().as_u16(), 200);
    assert_eq!(
        csv.headers()["content-disposition"],
        "attachment; filename=\"playbook_export-me_results.csv\""
    );
    // Read raw bytes: `text()` would strip the BOM while decoding.
    let bytes = csv.bytes().await.unwrap();
    assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("Step 1:Hello, \"\"world\"\":0s"));

    let json_doc: Value = app
        .client
        .get(app.url(&format!("/api/playbooks/{}/download", id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json_doc["summary"]["totalUsers"], 1);
    assert_eq!(json_doc["playBook"]["slug"], "export-me");
    assert_eq!(json_doc["userResults"][0]["userId"], "u1");
}

#[tokio::test]
async fn public_playbooks_count_views_and_hide_drafts() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    app.create_playbook(&token, three_step_playbook("open-book", "published"))
        .await;
    app.create_playbook(&token, three_step_playbook("draft-book", "draft"))
        .await;

    let first: Value = app
        .client
        .get(app.url("/api/playbooks/public/open-book"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["data"]["viewCount"], 1);

    let second: Value = app
        .client
        .get(app.url("/api/playbooks/public/open-book"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["data"]["viewCount"], 2);

    let draft = app
        .client
        .get(app.url("/api/playbooks/public/draft-book"))
        .send()
        .await
        .unwrap();
    assert_eq!(draft.status().as_u16(), 404);
}

#[tokio::test]
async fn deleting_a_draft_removes_its_progress() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let draft = app
        .create_playbook(&token, three_step_playbook("to-delete", "draft"))
        .await;
    let published = app
        .create_playbook(&token, three_step_playbook("keep-me", "published"))
        .await;
    app.start(&draft, "u1").await;
    app.start(&draft, "u2").await;

    let refused = app
        .client
        .delete(app.url(&format!("/api/playbooks/{}", published)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status().as_u16(), 400);

    let deleted: Value = app
        .client
        .delete(app.url(&format!("/api/playbooks/{}", draft)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["data"]["removedProgress"], 2);

    let gone = app.start(&draft, "u1").await;
    assert_eq!(gone.status().as_u16(), 404);
}

#[tokio::test]
async fn duplicate_slugs_conflict() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    app.create_playbook(&token, three_step_playbook("same", "draft"))
        .await;

    let dup = app
        .client
        .post(app.url("/api/playbooks"))
        .bearer_auth(&token)
        .json(&three_step_playbook("same", "draft"))
        .send()
        .await
        .unwrap();
    assert_eq!(dup.status().as_u16(), 409);
}

#[tokio::test]
async fn update_edits_fields_and_publishes() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(&token, three_step_playbook("editable", "draft"))
        .await;
    let url = app.url(&format!("/api/playbooks/{}", id));

    let updated = app
        .client
        .put(&url)
        .bearer_auth(&token)
        .json(&json!({
            "title": "Onboarding v2",
            "tags": ["intro", " intro ", "hr"],
            "displayType": "stepByStep",
            "status": "published"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status().as_u16(), 200);
    let body: Value = updated.json().await.unwrap();
    assert_eq!(body["message"], "PlayBook updated");
    assert_eq!(body["data"]["title"], "Onboarding v2");
    assert_eq!(body["data"]["slug"], "editable");
    assert_eq!(body["data"]["tags"], json!(["intro", "hr"]));
    assert_eq!(body["data"]["displayType"], "stepByStep");
    assert_eq!(body["data"]["steps"].as_array().unwrap().len(), 3);
    assert!(body["data"]["publishedAt"].is_string());

    // Now visible to learners.
    let public = app
        .client
        .get(app.url("/api/playbooks/public/editable"))
        .send()
        .await
        .unwrap();
    assert_eq!(public.status().as_u16(), 200);

    let too_many_tags = app
        .client
        .put(&url)
        .bearer_auth(&token)
        .json(&json!({ "tags": (0..11).map(|i| format!("t{}", i)).collect::<Vec<_>>() }))
        .send()
        .await
        .unwrap();
    assert_eq!(too_many_tags.status().as_u16(), 400);

    let anonymous = app
        .client
        .put(&url)
        .json(&json!({ "title": "Hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let missing = app
        .client
        .put(app.url("/api/playbooks/nope"))
        .bearer_auth(&token)
        .json(&json!({ "title": "Ghost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn public_list_and_categories_show_published_only() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    for (slug, status, category) in [
        ("fire-safety", "published", "safety"),
        ("welcome", "published", "general"),
        ("payroll", "draft", "hr"),
    ] {
        let mut body = three_step_playbook(slug, status);
        body["category"] = json!(category);
        app.create_playbook(&token, body).await;
    }

    let all: Value = app
        .client
        .get(app.url("/api/playbooks/public"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["success"], true);
    assert_eq!(all["count"], 2);
    assert_eq!(all["pages"], 1);
    assert_eq!(all["currentPage"], 1);
    assert!(all["data"][0].get("steps").is_none());
    assert_eq!(all["data"][0]["totalSteps"], 3);

    let safety: Value = app
        .client
        .get(app.url("/api/playbooks/public?category=safety"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(safety["count"], 1);
    assert_eq!(safety["data"][0]["slug"], "fire-safety");

    let categories: Value = app
        .client
        .get(app.url("/api/playbooks/categories"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(categories["data"], json!(["general", "safety"]));
}

#[tokio::test]
async fn admin_list_filters_sorts_and_pages() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    app.create_playbook(&token, three_step_playbook("alpha", "draft"))
        .await;
    app.create_playbook(&token, three_step_playbook("beta", "published"))
        .await;
    app.create_playbook(&token, three_step_playbook("gamma", "draft"))
        .await;

    let list = |query: &'static str| {
        let request = app
            .client
            .get(app.url(&format!("/api/playbooks{}", query)))
            .bearer_auth(&token);
        async move {
            request
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    };

    let drafts = list("?status=draft&category=all").await;
    assert_eq!(drafts["count"], 2);

    let oldest = list("?sortBy=oldest&pageSize=1&page=2").await;
    assert_eq!(oldest["pages"], 3);
    assert_eq!(oldest["currentPage"], 2);
    assert_eq!(oldest["data"].as_array().unwrap().len(), 1);
    assert_eq!(oldest["data"][0]["slug"], "beta");

    let searched = list("?search=ONBOARD").await;
    assert_eq!(searched["count"], 3);
}

#[tokio::test]
async fn empty_playbook_is_completed_when_started() {
    let app = spawn_app().await;
    let token = app.admin_token().await;
    let id = app
        .create_playbook(
            &token,
            json!({ "title": "Placeholder", "status": "published", "steps": [] }),
        )
        .await;

    let started: Value = app.start(&id, "u1").await.json().await.unwrap();
    assert_eq!(started["data"]["isCompleted"], true);
    assert!(started["data"]["completedAt"].is_string());
    assert_eq!(started["data"]["completionRate"], 0);

    let pb: Value = app
        .client
        .get(app.url(&format!("/api/playbooks/{}", id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pb["data"]["completionCount"], 1);
}
