//! API server assembly.
//!
//! Builds the full route table over a provider, applies the auth
//! middleware, and serves with a two-phase graceful shutdown: stop
//! accepting on signal, then drain in-flight requests for up to ten
//! seconds before exiting anyway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, head, post};
use axum::Router;
use rack_core::options::ProviderOptions;
use rack_provider::Provider;
use tokio::sync::watch;
use tracing::info;

use crate::auth;
use crate::error::ApiResult;
use crate::handlers::{
    apps, builds, certificates, instances, objects, processes, registries, releases, resources,
    system,
};
use crate::validate::Validators;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub provider: Arc<dyn Provider>,
    /// Rack password; `None` leaves the rack open.
    pub password: Option<String>,
    /// JWT verification key, fetched from the provider at startup.
    pub jwt_key: String,
    pub validators: Arc<Validators>,
}

/// The API server.
pub struct Server {
    state: ApiState,
}

impl Server {
    /// Initialize the provider and fetch the JWT key. `initialize` is
    /// idempotent on the provider side, so retrying startup is safe.
    pub async fn new(provider: Arc<dyn Provider>, password: Option<String>) -> ApiResult<Self> {
        provider.initialize(ProviderOptions::default()).await?;
        let jwt_key = provider.system_jwt_sign_key().await?;
        Ok(Self {
            state: ApiState {
                provider,
                password,
                jwt_key,
                validators: Arc::new(Validators::default()),
            },
        })
    }

    pub fn state(&self) -> ApiState {
        self.state.clone()
    }

    /// The full route table.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until a shutdown signal, then drain for up to 10 s.
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "api server listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });

        let mut drain_rx = shutdown_rx.clone();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = drain_rx.changed().await;
        });

        tokio::select! {
            result = server => result?,
            _ = async {
                let _ = shutdown_rx.changed().await;
                tokio::time::sleep(Duration::from_secs(10)).await;
            } => {
                info!("drain deadline reached; exiting");
            }
        }
        Ok(())
    }
}

/// Assemble the route table for a state.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/auth", get(system::auth))
        .route("/apps", get(apps::list).post(apps::create))
        .route(
            "/apps/{app}",
            get(apps::get).put(apps::update).delete(apps::delete),
        )
        .route("/apps/{app}/cancel", post(apps::cancel))
        .route("/apps/{app}/logs", get(apps::logs))
        .route("/apps/{app}/metrics", get(apps::metrics))
        .route("/apps/{app}/builds", get(builds::list).post(builds::create))
        .route("/apps/{app}/builds/import", post(builds::import))
        .route("/apps/{app}/builds/{id}", get(builds::get).put(builds::update))
        .route("/apps/{app}/builds/{id}/logs", get(builds::logs))
        .route(
            "/apps/{app}/releases",
            get(releases::list).post(releases::create),
        )
        .route("/apps/{app}/releases/{id}", get(releases::get))
        .route("/apps/{app}/releases/{id}/promote", post(releases::promote))
        .route("/apps/{app}/processes", get(processes::list))
        .route(
            "/apps/{app}/processes/{pid}",
            get(processes::get).delete(processes::stop),
        )
        .route("/apps/{app}/processes/{pid}/exec", get(processes::exec))
        .route("/apps/{app}/processes/{pid}/logs", get(processes::logs))
        .route(
            "/apps/{app}/processes/{pid}/files",
            get(processes::files_download)
                .post(processes::files_upload)
                .delete(processes::files_delete),
        )
        .route(
            "/apps/{app}/services/{service}/processes",
            post(processes::run),
        )
        .route("/apps/{app}/objects", get(objects::list))
        .route(
            "/apps/{app}/objects/{*key}",
            head(objects::exists)
                .get(objects::fetch)
                .post(objects::store)
                .delete(objects::delete),
        )
        .route(
            "/certificates",
            get(certificates::list).post(certificates::create),
        )
        .route("/certificates/generate", post(certificates::generate))
        .route("/certificates/{id}", delete(certificates::delete))
        .route("/registries", get(registries::list).post(registries::add))
        .route("/registries/{server}", delete(registries::remove))
        .route(
            "/resources",
            get(resources::list)
                .post(resources::create)
                .options(resources::types),
        )
        .route(
            "/resources/{name}",
            get(resources::get)
                .put(resources::update)
                .delete(resources::delete),
        )
        .route("/instances", get(instances::list))
        .route("/instances/keyroll", post(instances::keyroll))
        .route("/instances/{id}", delete(instances::terminate))
        .route("/instances/{id}/shell", get(instances::shell))
        .route("/proxy/{host}/{port}", get(system::proxy))
        .route("/system", get(system::get).put(system::update))
        .route("/system/capacity", get(system::capacity))
        .route("/system/logs", get(system::logs))
        .route("/system/metrics", get(system::metrics))
        .route("/system/processes", get(system::processes))
        .route("/system/releases", get(system::releases))
        .layer(middleware::from_fn_with_state(state.clone(), auth::layer))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use rack_core::types::App;
    use rack_provider::MockProvider;
    use tower::ServiceExt;

    use crate::auth::Claims;

    const PASSWORD: &str = "secret";

    fn app_with_status(status: &str) -> App {
        App {
            name: "app1".to_string(),
            generation: "2".to_string(),
            locked: false,
            release: String::new(),
            status: status.to_string(),
            parameters: HashMap::new(),
        }
    }

    async fn fixture() -> (Arc<MockProvider>, Router) {
        let provider = Arc::new(MockProvider::new());
        let server = Server::new(provider.clone(), Some(PASSWORD.to_string()))
            .await
            .unwrap();
        let router = server.router();
        (provider, router)
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{pass}")))
    }

    fn request(method: &str, path: &str, auth: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    fn jwt(role: &str, key: &[u8]) -> String {
        let claims = Claims {
            role: role.to_string(),
            exp: 4_102_444_800, // far future
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(key)).unwrap()
    }

    #[tokio::test]
    async fn promote_running_app_invokes_provider_once() {
        let (provider, router) = fixture().await;
        provider.add_app(app_with_status("running"));

        let response = router
            .oneshot(request(
                "POST",
                "/apps/app1/releases/release1/promote",
                &basic("x", PASSWORD),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let calls = provider.calls_for("release_promote");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, vec!["app1", "release1"]);
    }

    #[tokio::test]
    async fn promote_updating_app_is_rejected_without_provider_call() {
        let (provider, router) = fixture().await;
        provider.add_app(app_with_status("updating"));

        let response = router
            .oneshot(request(
                "POST",
                "/apps/app1/releases/release1/promote",
                &basic("x", PASSWORD),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_string(response).await.contains("app is currently updating"));
        assert!(provider.calls_for("release_promote").is_empty());
    }

    #[tokio::test]
    async fn cancel_requires_updating_status() {
        let (provider, router) = fixture().await;
        provider.add_app(app_with_status("running"));

        let response = router
            .oneshot(request("POST", "/apps/app1/cancel", &basic("x", PASSWORD)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_string(response).await.contains("app is not updating"));
        assert!(provider.calls_for("app_cancel").is_empty());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_authentication() {
        let (_provider, router) = fixture().await;

        let response = router
            .oneshot(request("GET", "/apps", &basic("x", "wrong")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains("invalid authentication"));
    }

    #[tokio::test]
    async fn read_role_cannot_write() {
        let (_provider, router) = fixture().await;
        let token = jwt("r", b"mock-jwt-key");

        let response = router
            .oneshot(request("POST", "/apps", &basic("jwt", &token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(
            body_string(response)
                .await
                .contains("you are unauthorized to access this")
        );
    }

    #[tokio::test]
    async fn read_role_can_get() {
        let (_provider, router) = fixture().await;
        let token = jwt("r", b"mock-jwt-key");

        let response = router
            .oneshot(request("GET", "/apps", &basic("jwt", &token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_handshake_accepts_valid_jwt() {
        let (_provider, router) = fixture().await;
        let token = jwt("rw", b"mock-jwt-key");

        let response = router
            .oneshot(request("GET", "/auth", &basic("jwt", &token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auth_handshake_rejects_tampered_jwt() {
        let (_provider, router) = fixture().await;
        let token = jwt("rw", b"wrong-key");

        let response = router
            .oneshot(request("GET", "/auth", &basic("jwt", &token)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_string(response).await;
        assert!(body.contains("invalid authentication:"), "{body}");
    }

    #[tokio::test]
    async fn provider_error_renders_verbatim_500() {
        let (provider, router) = fixture().await;
        provider.add_app(app_with_status("running"));
        provider.fail("app_list", "err1");

        let response = router
            .oneshot(request("GET", "/apps", &basic("x", PASSWORD)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, r#"{"error":"err1"}"#);
    }

    #[tokio::test]
    async fn unknown_app_is_404() {
        let (_provider, router) = fixture().await;

        let response = router
            .oneshot(request("GET", "/apps/ghost", &basic("x", PASSWORD)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_option_value_is_400() {
        let (provider, router) = fixture().await;
        provider.add_app(app_with_status("running"));

        let response = router
            .oneshot(request(
                "GET",
                "/apps/app1/builds?limit=nope",
                &basic("x", PASSWORD),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn apps_render_sorted_by_name() {
        let (provider, router) = fixture().await;
        let mut b = app_with_status("running");
        b.name = "beta".to_string();
        let mut a = app_with_status("running");
        a.name = "alpha".to_string();
        provider.add_app(b);
        provider.add_app(a);

        let response = router
            .oneshot(request("GET", "/apps", &basic("x", PASSWORD)))
            .await
            .unwrap();

        let body = body_string(response).await;
        let alpha = body.find("alpha").unwrap();
        let beta = body.find("beta").unwrap();
        assert!(alpha < beta);
    }

    #[tokio::test]
    async fn app_create_requires_name() {
        let (_provider, router) = fixture().await;

        let response = router
            .oneshot(request("POST", "/apps", &basic("x", PASSWORD)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("name required"));
    }

    #[tokio::test]
    async fn app_create_decodes_form_body() {
        let (provider, router) = fixture().await;

        let request = Request::builder()
            .method("POST")
            .uri("/apps")
            .header(header::AUTHORIZATION, basic("x", PASSWORD))
            .body(Body::from("name=app1&generation=2"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let app = provider.app_get("app1").await.unwrap();
        assert_eq!(app.generation, "2");
    }

    #[tokio::test]
    async fn object_head_reports_existence() {
        let (provider, router) = fixture().await;
        provider.put_object("app1", "tmp/source.tgz", b"data".to_vec());

        let response = router
            .clone()
            .oneshot(request(
                "HEAD",
                "/apps/app1/objects/tmp/source.tgz",
                &basic("x", PASSWORD),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(request(
                "HEAD",
                "/apps/app1/objects/tmp/missing.tgz",
                &basic("x", PASSWORD),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn open_rack_without_password_allows_all() {
        let provider = Arc::new(MockProvider::new());
        let server = Server::new(provider.clone(), None).await.unwrap();

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/apps")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
