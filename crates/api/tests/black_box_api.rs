use std::net::SocketAddr;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::StatusCode;
use serde_json::json;

use storefront_api::app::{build_app, AppServices};
use storefront_api::config::AppConfig;
use storefront_api::password::hash_password;
use storefront_auth::{NewUser, RateLimitConfig, RateLimitPolicy, Role, RouteClass, UserStore};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: AppConfig, services: AppServices) -> Self {
        // Build the app (same router as prod), but bind to an ephemeral port.
        let app = build_app(config, services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        session_signing_key: "test-secret".to_string(),
        issuer_url: "https://issuer.invalid/".to_string(),
        audience: "storefront-api".to_string(),
        rate_limits: RateLimitConfig::default(),
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("reqwest client")
}

async fn register(client: &reqwest::Client, base_url: &str, user_name: &str) -> serde_json::Value {
    let res = client
        .post(format!("{}/auth/register", base_url))
        .json(&json!({
            "userName": user_name,
            "email": format!("{user_name}@example.com"),
            "password": "correct-horse",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn fetch_csrf_token(client: &reqwest::Client, base_url: &str) -> String {
    let res = client
        .get(format!("{}/csrf-token", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    body["csrfToken"].as_str().unwrap().to_string()
}

async fn seed_admin(services: &AppServices, user_name: &str, password: &str) {
    services
        .users
        .insert(NewUser {
            external_id: None,
            user_name: user_name.to_string(),
            email: format!("{user_name}@example.com"),
            display_name: user_name.to_string(),
            role: Role::Admin,
            password_hash: Some(hash_password(password).unwrap()),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn unauthenticated_catalog_read_succeeds() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;

    let res = client()
        .get(format!("{}/products", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(!body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn mutating_request_without_csrf_token_is_rejected() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;

    let res = client()
        .post(format!("{}/cart/add", srv.base_url))
        .json(&json!({ "productId": "SKU-1001" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_csrf_token");
}

#[tokio::test]
async fn csrf_token_then_cookie_session_succeeds_end_to_end() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;
    let client = client();

    // Establish a local-scheme session (sets the HTTP-only cookie).
    register(&client, &srv.base_url, "shopper").await;

    // Fetch an anti-forgery token for this session.
    let csrf = fetch_csrf_token(&client, &srv.base_url).await;

    // Retry the mutation with cookie + token: accepted.
    let res = client
        .post(format!("{}/cart/add", srv.base_url))
        .header("X-CSRF-Token", &csrf)
        .json(&json!({ "productId": "SKU-1001", "quantity": 2 }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["items"][0]["product_id"], "SKU-1001");
    assert_eq!(body["items"][0]["quantity"], 2);
}

#[tokio::test]
async fn malformed_csrf_token_is_distinct_from_missing() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;
    let client = client();

    register(&client, &srv.base_url, "shopper").await;
    fetch_csrf_token(&client, &srv.base_url).await;

    let res = client
        .post(format!("{}/cart/add", srv.base_url))
        .header("X-CSRF-Token", "definitely-not-a-token")
        .json(&json!({ "productId": "SKU-1001" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_csrf_token");
}

#[tokio::test]
async fn invalid_credentials_fail_before_the_csrf_check() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;

    // A bad session cookie short-circuits at the resolver: 401, not a CSRF
    // failure, even though no anti-forgery token was supplied.
    let res = client()
        .post(format!("{}/cart/add", srv.base_url))
        .header("Cookie", "token=tampered.jwt.value")
        .json(&json!({ "productId": "SKU-1001" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn form_posts_may_carry_the_token_in_the_body() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;
    let client = client();

    register(&client, &srv.base_url, "shopper").await;
    let csrf = fetch_csrf_token(&client, &srv.base_url).await;

    // No header; the token travels as the `_csrf` form field. The handler
    // rejects the content shape (it wants JSON), but the request must get
    // past the anti-forgery check - a CSRF failure would be 403.
    let res = client
        .post(format!("{}/cart/add", srv.base_url))
        .form(&[("productId", "SKU-1001"), ("_csrf", csrf.as_str())])
        .send()
        .await
        .unwrap();

    assert_ne!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn role_gate_distinguishes_unauthenticated_from_forbidden() {
    let services = AppServices::in_memory();
    seed_admin(&services, "root", "root-pw").await;
    let srv = TestServer::spawn(test_config(), services).await;

    // Absent identity: 401.
    let res = client()
        .get(format!("{}/admin/users", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Authenticated as a plain user: 403.
    let user_client = client();
    register(&user_client, &srv.base_url, "shopper").await;
    let res = user_client
        .get(format!("{}/admin/users", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");

    // Authenticated as admin: 200.
    let admin_client = client();
    let res = admin_client
        .post(format!("{}/auth/login", srv.base_url))
        .json(&json!({ "userName": "root", "password": "root-pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = admin_client
        .get(format!("{}/admin/users", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_can_change_a_role_with_csrf() {
    let services = AppServices::in_memory();
    seed_admin(&services, "root", "root-pw").await;
    let srv = TestServer::spawn(test_config(), services.clone()).await;

    let user_client = client();
    let registered = register(&user_client, &srv.base_url, "promotee").await;
    let user_id = registered["user"]["id"].as_str().unwrap().to_string();

    let admin_client = client();
    let res = admin_client
        .post(format!("{}/auth/login", srv.base_url))
        .json(&json!({ "userName": "root", "password": "root-pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let csrf = fetch_csrf_token(&admin_client, &srv.base_url).await;
    let res = admin_client
        .patch(format!("{}/admin/users/{}/role", srv.base_url, user_id))
        .header("X-CSRF-Token", &csrf)
        .json(&json!({ "role": "admin" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let record = services
        .users
        .find_by_user_name("promotee")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.role, Role::Admin);
}

#[tokio::test]
async fn auth_route_class_rate_limit_trips_and_recovers() {
    let window = Duration::from_millis(300);
    let mut config = test_config();
    config.rate_limits = RateLimitConfig::default()
        .with_policy(RouteClass::Auth, RateLimitPolicy::new(3, window));

    let srv = TestServer::spawn(config, AppServices::in_memory()).await;
    let client = client();

    // Threshold N: the first N requests get through to the handler (and
    // fail authentication), the (N+1)-th is cut off with 429.
    for _ in 0..3 {
        let res = client
            .post(format!("{}/auth/login", srv.base_url))
            .json(&json!({ "userName": "nobody", "password": "wrong" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    let res = client
        .post(format!("{}/auth/login", srv.base_url))
        .json(&json!({ "userName": "nobody", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "too_many_requests");

    // The next window admits requests again.
    tokio::time::sleep(window + Duration::from_millis(50)).await;
    let res = client
        .post(format!("{}/auth/login", srv.base_url))
        .json(&json!({ "userName": "nobody", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_reports_the_local_scheme() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;
    let client = client();

    register(&client, &srv.base_url, "shopper").await;

    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["scheme"], "local");
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn logout_invalidates_outstanding_csrf_tokens() {
    let srv = TestServer::spawn(test_config(), AppServices::in_memory()).await;
    let client = client();

    register(&client, &srv.base_url, "shopper").await;
    let csrf = fetch_csrf_token(&client, &srv.base_url).await;

    let res = client
        .post(format!("{}/auth/logout", srv.base_url))
        .header("X-CSRF-Token", &csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The session (and its anti-forgery secret) is gone; the old token no
    // longer verifies for this client.
    let res = client
        .post(format!("{}/cart/add", srv.base_url))
        .header("X-CSRF-Token", &csrf)
        .json(&json!({ "productId": "SKU-1001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_csrf_token");
}

// ─────────────────────────────────────────────────────────────────────────────
// External scheme: stub issuer with live JWKS + profile endpoints
// ─────────────────────────────────────────────────────────────────────────────

struct StubIssuer {
    base_url: String,
    encoding_key: jsonwebtoken::EncodingKey,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for StubIssuer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

const STUB_KID: &str = "test-key-1";

impl StubIssuer {
    /// Spawn an issuer serving a freshly generated RSA key set and a fixed
    /// user profile.
    async fn spawn(profile: serde_json::Value) -> Self {
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::traits::PublicKeyParts;

        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048).expect("rsa key generation");
        let public_key = rsa::RsaPublicKey::from(&private_key);

        let pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("pkcs1 pem");
        let encoding_key =
            jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes()).expect("encoding key");

        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "kid": STUB_KID,
                "use": "sig",
                "alg": "RS256",
                "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            }]
        });

        let app = axum::Router::new()
            .route(
                "/.well-known/jwks.json",
                axum::routing::get(move || {
                    let jwks = jwks.clone();
                    async move { axum::Json(jwks) }
                }),
            )
            .route(
                "/userinfo",
                axum::routing::get(move || {
                    let profile = profile.clone();
                    async move { axum::Json(profile) }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind stub issuer");
        let base_url = format!("http://{}/", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            encoding_key,
            handle,
        }
    }

    fn mint_bearer(&self, sub: &str, audience: &str) -> String {
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(STUB_KID.to_string());

        let now = chrono::Utc::now().timestamp();
        let claims = json!({
            "iss": self.base_url,
            "aud": audience,
            "sub": sub,
            "iat": now,
            "exp": now + 600,
        });

        jsonwebtoken::encode(&header, &claims, &self.encoding_key).expect("mint bearer token")
    }
}

#[tokio::test]
async fn external_bearer_token_resolves_and_reconciles() {
    let issuer = StubIssuer::spawn(json!({
        "sub": "auth0|e2e-user",
        "email": "e2e@example.com",
        "nickname": "e2e",
    }))
    .await;

    let mut config = test_config();
    config.issuer_url = issuer.base_url.clone();

    let services = AppServices::in_memory();
    let srv = TestServer::spawn(config, services.clone()).await;

    let bearer = issuer.mint_bearer("auth0|e2e-user", "storefront-api");

    let res = client()
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let first: serde_json::Value = res.json().await.unwrap();
    assert_eq!(first["scheme"], "external");
    assert_eq!(first["role"], "user");

    // Reconciliation created exactly one local record for the external id.
    let record = services
        .users
        .find_by_external_id("auth0|e2e-user")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.user_name, "e2e");
    assert_eq!(record.email, "e2e@example.com");

    // Idempotent: a second request maps to the same local identity.
    let res = client()
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    let second: serde_json::Value = res.json().await.unwrap();
    assert_eq!(first["user_id"], second["user_id"]);
}

#[tokio::test]
async fn wrong_audience_bearer_token_is_unauthenticated() {
    let issuer = StubIssuer::spawn(json!({
        "sub": "auth0|aud-test",
        "email": "aud@example.com",
    }))
    .await;

    let mut config = test_config();
    config.issuer_url = issuer.base_url.clone();
    let srv = TestServer::spawn(config, AppServices::in_memory()).await;

    let bearer = issuer.mint_bearer("auth0|aud-test", "some-other-api");

    let res = client()
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unreachable_profile_endpoint_surfaces_profile_fetch_failed() {
    let issuer = StubIssuer::spawn(json!({ "sub": "ignored" })).await;

    // JWKS resolves against the live stub, but the profile fetch goes to a
    // dead endpoint: signature passes, reconciliation fails distinctly.
    struct DeadFetcher;

    #[async_trait::async_trait]
    impl storefront_auth::ProfileFetcher for DeadFetcher {
        async fn fetch(
            &self,
            _access_token: &str,
        ) -> Result<storefront_auth::ExternalProfile, storefront_auth::ProfileFetchError> {
            Err(storefront_auth::ProfileFetchError::Unreachable(
                "connection refused".into(),
            ))
        }
    }

    let mut config = test_config();
    config.issuer_url = issuer.base_url.clone();

    let app = storefront_api::app::build_app_with_fetcher(
        config,
        AppServices::in_memory(),
        std::sync::Arc::new(DeadFetcher),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let bearer = issuer.mint_bearer("auth0|dead-profile", "storefront-api");
    let res = client()
        .get(format!("http://{addr}/whoami"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "profile_fetch_failed");

    handle.abort();
}
