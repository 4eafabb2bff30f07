mod common;

use axum::http::{header, StatusCode};
use axum_test::TestServer;
use common::Library;
use velvron_catalog::aggregator::{Aggregator, HttpSource};
use velvron_catalog::api::{create_router, AppState};
use velvron_catalog::catalog::CatalogPage;
use velvron_catalog::config::CatalogConfig;
use velvron_catalog::models::Manifest;
use velvron_catalog::sandbox::{BackendKind, SandboxStatus};

fn config_for(library: &Library) -> CatalogConfig {
    CatalogConfig {
        content_root: library.root(),
        index_path: library.index_path(),
        ..CatalogConfig::default()
    }
}

async fn setup_with(library: &Library, config: CatalogConfig) -> TestServer {
    let aggregation = Aggregator::new(config.manifest_source())
        .load_session()
        .await
        .expect("Failed to aggregate library");
    let app = create_router(AppState::new(aggregation, &config));
    TestServer::new(app).expect("Failed to create test server")
}

/// Five units, plus one listed in the index that has no directory.
async fn setup() -> (TestServer, Library) {
    let library = Library::new();
    library
        .add_unit("Button", "A clickable control", &["Button-Input", "form"])
        .add_unit("Card", "Content container", &["layout"])
        .add_unit("Modal", "Dialog overlay with a close button", &["overlay"])
        .add_unit("Navbar", "Top navigation", &["layout", "navigation"])
        .add_unit("Toggle", "On/off switch", &["form"])
        .write_index(&["Button", "Card", "Ghost", "Modal", "Navbar", "Toggle"]);
    let server = setup_with(&library, config_for(&library)).await;
    (server, library)
}

fn page_names(page: &CatalogPage) -> Vec<&str> {
    page.items.iter().map(|m| m.name.as_str()).collect()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_loaded_component_count() {
        let (server, _library) = setup().await;

        let response = server.get("/api/v1/health").await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["components"], 5);
    }
}

mod components {
    use super::*;

    #[tokio::test]
    async fn lists_first_page_in_index_order() {
        let (server, _library) = setup().await;

        let response = server.get("/api/v1/components").await;

        response.assert_status_ok();
        let page: CatalogPage = response.json();
        assert_eq!(
            page_names(&page),
            vec!["Button", "Card", "Modal", "Navbar", "Toggle"]
        );
        assert_eq!(page.page, 1);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.total_items, 5);
    }

    #[tokio::test]
    async fn filters_by_search_and_tag() {
        let (server, _library) = setup().await;

        let page: CatalogPage = server
            .get("/api/v1/components")
            .add_query_param("q", "button")
            .await
            .json();
        assert_eq!(page_names(&page), vec!["Button", "Modal"]);

        let page: CatalogPage = server
            .get("/api/v1/components")
            .add_query_param("q", "button")
            .add_query_param("tag", "form")
            .await
            .json();
        assert_eq!(page_names(&page), vec!["Button"]);
    }

    #[tokio::test]
    async fn tag_filter_is_exact() {
        let (server, _library) = setup().await;

        let page: CatalogPage = server
            .get("/api/v1/components")
            .add_query_param("tag", "Button")
            .await
            .json();

        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[tokio::test]
    async fn paginates_with_requested_page_size() {
        let (server, _library) = setup().await;

        let page: CatalogPage = server
            .get("/api/v1/components")
            .add_query_param("page", 2)
            .add_query_param("page_size", 2)
            .await
            .json();

        assert_eq!(page_names(&page), vec!["Modal", "Navbar"]);
        assert_eq!(page.total_pages, 3);
    }

    #[tokio::test]
    async fn normalizes_zero_page_and_page_size() {
        let (server, _library) = setup().await;

        let page: CatalogPage = server
            .get("/api/v1/components")
            .add_query_param("page", 0)
            .add_query_param("pageSize", 0)
            .await
            .json();

        assert_eq!(page.page, 1);
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn caps_page_size_at_configured_maximum() {
        let library = Library::new();
        library
            .add_unit("Alpha", "", &[])
            .add_unit("Beta", "", &[])
            .add_unit("Gamma", "", &[])
            .write_index(&["Alpha", "Beta", "Gamma"]);
        let config = CatalogConfig {
            max_page_size: 2,
            page_size: 2,
            ..config_for(&library)
        };
        let server = setup_with(&library, config).await;

        let page: CatalogPage = server
            .get("/api/v1/components")
            .add_query_param("page_size", 1000)
            .await
            .json();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages, 2);
    }

    #[tokio::test]
    async fn rejects_non_numeric_page() {
        let (server, _library) = setup().await;

        let response = server
            .get("/api/v1/components")
            .add_query_param("page", "two")
            .expect_failure()
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn returns_component_details() {
        let (server, _library) = setup().await;

        let response = server.get("/api/v1/components/Navbar").await;

        response.assert_status_ok();
        let manifest: Manifest = response.json();
        assert_eq!(manifest.name.as_str(), "Navbar");
        assert!(manifest.has_tag("navigation"));
    }

    #[tokio::test]
    async fn returns_404_for_unknown_component() {
        let (server, _library) = setup().await;

        let response = server
            .get("/api/v1/components/NoSuchUnit")
            .expect_failure()
            .await;

        response.assert_status_not_found();
        assert!(response.text().contains("NoSuchUnit"));
    }

    #[tokio::test]
    async fn units_that_failed_to_load_are_absent() {
        let (server, _library) = setup().await;

        server
            .get("/api/v1/components/Ghost")
            .expect_failure()
            .await
            .assert_status_not_found();
    }
}

mod tags {
    use super::*;

    #[tokio::test]
    async fn lists_distinct_sorted_tags() {
        let (server, _library) = setup().await;

        let tags: Vec<String> = server.get("/api/v1/tags").await.json();

        assert_eq!(
            tags,
            vec!["Button-Input", "form", "layout", "navigation", "overlay"]
        );
    }
}

mod library_layout {
    use super::*;

    #[tokio::test]
    async fn serves_the_index_as_loaded() {
        let (server, _library) = setup().await;

        let index: Vec<String> = server.get("/components-list.json").await.json();

        assert_eq!(index, vec!["Button", "Card", "Ghost", "Modal", "Navbar", "Toggle"]);
    }

    #[tokio::test]
    async fn serves_manifests_by_unit() {
        let (server, _library) = setup().await;

        let manifest: Manifest = server.get("/library/Card/manifest.json").await.json();

        assert_eq!(manifest.description, "Content container");
    }

    #[tokio::test]
    async fn serves_demo_with_sandbox_headers() {
        let (server, _library) = setup().await;

        let response = server.get("/library/Card/index.html").await;

        response.assert_status_ok();
        assert!(response.text().contains("<h1>Card</h1>"));
        assert_eq!(
            response.header(header::CONTENT_SECURITY_POLICY),
            "sandbox allow-scripts"
        );
        assert_eq!(response.header(header::X_CONTENT_TYPE_OPTIONS), "nosniff");
        assert_eq!(response.header(header::REFERRER_POLICY), "no-referrer");
        assert!(response
            .header(header::CONTENT_TYPE)
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[tokio::test]
    async fn demo_for_unknown_unit_is_404() {
        let (server, _library) = setup().await;

        server
            .get("/library/Ghost/index.html")
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn other_files_are_404() {
        let (server, _library) = setup().await;

        server
            .get("/library/Card/secrets.txt")
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn follows_configured_file_names() {
        let library = Library::new();
        library
            .write("Card", "meta.json", &common::manifest_json("Card", "Renamed", &[]))
            .write("Card", "demo.html", "<p>renamed demo</p>")
            .write_index(&["Card"]);
        let config = CatalogConfig {
            manifest_file: "meta.json".to_string(),
            demo_file: "demo.html".to_string(),
            ..config_for(&library)
        };
        let server = setup_with(&library, config).await;

        let manifest: Manifest = server.get("/library/Card/meta.json").await.json();
        assert_eq!(manifest.description, "Renamed");
        assert!(server
            .get("/library/Card/demo.html")
            .await
            .text()
            .contains("renamed demo"));
        server
            .get("/library/Card/index.html")
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn demo_that_fails_to_load_names_the_unit() {
        let library = Library::new();
        library
            .add_unit("Card", "", &[])
            .write("Bare", "manifest.json", &common::manifest_json("Bare", "", &[]))
            .write_index(&["Card", "Bare"]);
        let server = setup_with(&library, config_for(&library)).await;

        let response = server
            .get("/library/Bare/index.html")
            .expect_failure()
            .await;

        response.assert_status(StatusCode::BAD_GATEWAY);
        let body = response.text();
        assert!(body.contains("Bare"), "body: {}", body);
        assert!(body.contains("failed to load"), "body: {}", body);
    }

    #[tokio::test]
    async fn another_server_can_aggregate_from_this_one() {
        let library = Library::new();
        library
            .add_unit("Button", "", &["form"])
            .add_unit("Card", "", &["layout"])
            .write_index(&["Button", "Ghost", "Card"]);
        let config = config_for(&library);
        let aggregation = Aggregator::new(config.manifest_source())
            .load_session()
            .await
            .unwrap();
        let app = create_router(AppState::new(aggregation, &config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = HttpSource::new(format!("http://{}", addr));
        let mirrored = Aggregator::new(source).load_session().await.unwrap();

        let names: Vec<&str> = mirrored.catalog.ids().map(|id| id.as_str()).collect();
        assert_eq!(names, vec!["Button", "Card"]);
        assert_eq!(mirrored.index, vec!["Button", "Ghost", "Card"]);
        assert_eq!(mirrored.failures.len(), 1);
    }
}

mod sandboxes {
    use super::*;

    async fn wait_until_ready(server: &TestServer, id: uuid::Uuid) -> serde_json::Value {
        let mut state = serde_json::Value::Null;
        for _ in 0..50 {
            let body: serde_json::Value = server
                .get(&format!("/api/v1/sandboxes/{}", id))
                .await
                .json();
            state = body["state"].clone();
            if state == "ready" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        state
    }

    #[tokio::test]
    async fn open_get_and_close() {
        let (server, _library) = setup().await;

        let response = server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Card" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let opened: SandboxStatus = response.json();
        assert_eq!(opened.unit.as_str(), "Card");

        let status: SandboxStatus = server
            .get(&format!("/api/v1/sandboxes/{}", opened.id))
            .await
            .json();
        assert_eq!(status.id, opened.id);

        server
            .delete(&format!("/api/v1/sandboxes/{}", opened.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        server
            .get(&format!("/api/v1/sandboxes/{}", opened.id))
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn open_unknown_unit_is_404() {
        let (server, _library) = setup().await;

        server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "../Card" }))
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn closing_twice_is_404() {
        let (server, _library) = setup().await;

        let opened: SandboxStatus = server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Button" }))
            .await
            .json();

        server
            .delete(&format!("/api/v1/sandboxes/{}", opened.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/api/v1/sandboxes/{}", opened.id))
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn full_table_drops_the_oldest_settled_sandbox() {
        let library = Library::new();
        library
            .add_unit("Button", "", &[])
            .add_unit("Card", "", &[])
            .write_index(&["Button", "Card"]);
        let mut config = config_for(&library);
        config.sandbox.max_open = 1;
        let server = setup_with(&library, config).await;

        let first: SandboxStatus = server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Card" }))
            .await
            .json();
        wait_until_ready(&server, first.id).await;

        server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Button" }))
            .await
            .assert_status(StatusCode::CREATED);
        server
            .get(&format!("/api/v1/sandboxes/{}", first.id))
            .expect_failure()
            .await
            .assert_status_not_found();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_table_of_running_sandboxes_is_429() {
        let library = Library::new();
        library
            .write("Slow", "manifest.json", &common::manifest_json("Slow", "", &[]))
            .write("Slow", "index.html", "sleep 30\n")
            .write_index(&["Slow"]);
        let mut config = config_for(&library);
        config.sandbox.backend = BackendKind::Process;
        config.sandbox.runner = vec!["sh".to_string()];
        config.sandbox.max_open = 1;
        let server = setup_with(&library, config).await;

        server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Slow" }))
            .await
            .assert_status(StatusCode::CREATED);
        server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Slow" }))
            .expect_failure()
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn settled_document_sandbox_reports_ready() {
        let (server, _library) = setup().await;

        let opened: SandboxStatus = server
            .post("/api/v1/sandboxes")
            .json(&serde_json::json!({ "unit": "Toggle" }))
            .await
            .json();

        assert_eq!(wait_until_ready(&server, opened.id).await, "ready");
    }
}
