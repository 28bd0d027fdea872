#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, Response, StatusCode},
    };
    use tower::ServiceExt;

    use crate::startup::{Ready, Startup};
    use crate::tests::support::{body_bytes, body_json, get, get_with_origin, test_config};

    const CSS: &str = "@font-face { font-family: Inter; }";

    async fn ready_with_assets() -> (Ready, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fonts.css"), CSS).unwrap();
        std::fs::create_dir(dir.path().join("fonts")).unwrap();
        std::fs::write(dir.path().join("fonts").join("inter.woff2"), [0u8, 1, 2, 3]).unwrap();
        let ready = Startup::new(test_config(dir.path())).run().await.unwrap();
        (ready, dir)
    }

    #[tokio::test]
    async fn test_listed_origin_is_echoed() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(get_with_origin("/api/static/fonts.css", "http://localhost:3000")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD, OPTIONS");
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Origin, X-Requested-With, Content-Type, Accept"
        );
        assert_eq!(body_bytes(res).await, CSS.as_bytes());
    }

    #[tokio::test]
    async fn test_null_origin_is_echoed() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(get_with_origin("/api/static/fonts/inter.woff2", "null")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "null");
    }

    #[tokio::test]
    async fn test_unlisted_origin_gets_no_allow_origin() {
        let (ready, _dir) = ready_with_assets().await;
        for origin in ["http://evil.example", "http://localhost:3000/", "HTTP://CADDY"] {
            let res = ready.router().oneshot(get_with_origin("/api/static/fonts.css", origin)).await.unwrap();
            // Served, but the browser will refuse to expose it cross-origin
            assert_eq!(res.status(), StatusCode::OK, "origin {}", origin);
            assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none(), "origin {}", origin);
            assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD, OPTIONS");
        }
    }

    #[tokio::test]
    async fn test_no_origin_is_served() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(get("/api/static/fonts.css")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(body_bytes(res).await, CSS.as_bytes());
    }

    #[tokio::test]
    async fn test_head_request_is_served() {
        let (ready, _dir) = ready_with_assets().await;
        let req = Request::builder().method(Method::HEAD).uri("/api/static/fonts.css").body(Body::empty()).unwrap();
        let res = ready.router().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body_bytes(res).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_asset_falls_through_to_not_found() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(get_with_origin("/api/static/missing.css", "http://evil.example")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        let body = body_json(res).await;
        assert_eq!(body["code"], "ROUTE_NOT_FOUND");
        assert_eq!(body["path"], "/api/static/missing.css");
    }

    #[tokio::test]
    async fn test_missing_asset_keeps_static_cors_headers() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(get_with_origin("/api/static/missing.css", "http://localhost:3000")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD, OPTIONS");
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Origin, X-Requested-With, Content-Type, Accept"
        );
        assert!(has_vary_origin(&res));
    }

    fn has_vary_origin(res: &Response<Body>) -> bool {
        res.headers().get_all(header::VARY).iter().any(|v| v == "Origin")
    }

    fn options(uri: &str, origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri(uri)
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_options_with_listed_origin_uses_static_policy() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(options("/api/static/fonts.css", "http://localhost:3000")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD, OPTIONS");
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Origin, X-Requested-With, Content-Type, Accept"
        );
        assert!(has_vary_origin(&res));
    }

    #[tokio::test]
    async fn test_options_with_unlisted_origin_gets_no_wildcard() {
        let (ready, _dir) = ready_with_assets().await;
        for uri in ["/api/static/fonts.css", "/api/static/missing.css"] {
            let res = ready.router().oneshot(options(uri, "http://evil.example")).await.unwrap();

            assert_eq!(res.status(), StatusCode::NO_CONTENT, "uri {}", uri);
            assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none(), "uri {}", uri);
            assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, HEAD, OPTIONS");
            assert!(has_vary_origin(&res));
        }
    }

    #[tokio::test]
    async fn test_unlisted_origin_response_varies_on_origin() {
        let (ready, _dir) = ready_with_assets().await;
        let res = ready.router().oneshot(get_with_origin("/api/static/fonts.css", "http://evil.example")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(has_vary_origin(&res));
    }

    #[tokio::test]
    async fn test_traversal_is_not_served() {
        let (ready, dir) = ready_with_assets().await;
        let outside = dir.path().parent().unwrap().join("gatehouse-secret.txt");
        let _ = std::fs::write(&outside, "secret");

        for uri in [
            "/api/static/../gatehouse-secret.txt",
            "/api/static/%2e%2e/gatehouse-secret.txt",
            "/api/static/%2E%2E/gatehouse-secret.txt",
            "/api/static/fonts/%2e%2e/%2e%2e/gatehouse-secret.txt",
        ] {
            let res = ready.router().oneshot(get(uri)).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND, "uri {}", uri);
            assert_ne!(body_bytes(res).await, b"secret", "uri {}", uri);
        }
        let _ = std::fs::remove_file(outside);
    }

    #[tokio::test]
    async fn test_static_requests_are_not_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fonts.css"), CSS).unwrap();
        let mut cfg = test_config(dir.path());
        cfg.rate_limit.max_requests = 1;
        let ready = Startup::new(cfg).run().await.unwrap();

        for _ in 0..3 {
            let res = ready.router().oneshot(get("/api/static/fonts.css")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }
}
