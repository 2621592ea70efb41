/// HTTP server factory and configuration.
/// Provides a reusable route table and server constructors
/// for use in both the main binary and tests.

use crate::config::ServerConfig;
use crate::db::DbPool;
use crate::handlers::{conversations, messages, rest, webhook, ws_connect, WsServer};
use actix_web::{middleware, web, App, HttpServer};

/// Register every endpoint on an app or scope
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // General
        .route("/health", web::get().to(rest::health))
        .route("/webhooks/identity", web::post().to(webhook::identity_webhook))
        .route("/me/notifications", web::get().to(rest::notification_counts))
        // Presence
        .route("/presence", web::post().to(rest::update_presence))
        .route("/presence/{user_id}", web::get().to(rest::get_presence))
        // Blocks
        .route("/blocks", web::get().to(rest::list_blocked))
        .route("/blocks/{user_id}", web::get().to(rest::block_status))
        .route("/blocks/{user_id}", web::post().to(rest::block_user))
        .route("/blocks/{user_id}", web::delete().to(rest::unblock_user))
        // Friend requests
        .route("/requests", web::post().to(rest::send_request))
        .route("/requests", web::get().to(rest::list_requests))
        .route("/requests/count", web::get().to(rest::count_requests))
        .route("/requests/{id}/accept", web::post().to(rest::accept_request))
        .route("/requests/{id}/deny", web::post().to(rest::deny_request))
        // Conversations and messages
        .route("/conversations", web::get().to(conversations::list_conversations))
        .route("/conversations/{id}", web::get().to(conversations::get_conversation))
        .route("/conversations/{id}/messages", web::get().to(messages::list_messages))
        .route("/conversations/{id}/messages", web::post().to(messages::send_message))
        .route("/conversations/{id}/read", web::post().to(messages::mark_all_read))
        .route("/messages/{id}/read", web::post().to(messages::mark_read))
        .route("/messages/{id}/delivered", web::post().to(messages::mark_delivered))
        // Groups
        .route("/groups", web::post().to(conversations::create_group))
        .route("/groups/{id}", web::delete().to(conversations::delete_group))
        .route("/groups/{id}/members", web::get().to(conversations::get_group_members))
        .route("/groups/{id}/members", web::post().to(conversations::add_member))
        .route(
            "/groups/{id}/members/{user_id}",
            web::delete().to(conversations::remove_member),
        )
        .route("/groups/{id}/leave", web::post().to(conversations::leave_group))
        .route("/groups/{id}/image", web::put().to(conversations::update_group_image))
        .route("/groups/{id}/admin", web::get().to(conversations::is_group_admin))
        .route("/groups/{id}/admin", web::post().to(conversations::transfer_admin))
        .route("/groups/{id}/invitations", web::post().to(conversations::send_invitation))
        // Invitations
        .route("/invitations", web::get().to(conversations::list_invitations))
        .route("/invitations/count", web::get().to(conversations::count_invitations))
        .route("/invitations/{id}/accept", web::post().to(conversations::accept_invitation))
        .route("/invitations/{id}/reject", web::post().to(conversations::reject_invitation))
        // WebSocket endpoint
        .route("/ws", web::get().to(ws_connect));
}

/// Create a configured HTTP server
///
/// Takes the database pool, WebSocket server, runtime settings and bind
/// address, then returns a fully configured server ready to be awaited.
///
/// # Example
/// ```ignore
/// let pool = web::Data::new(db::create_pool("huddle.db")?);
/// let ws_server = web::Data::new(WsServer::new(pool.get_ref().clone()));
/// let config = web::Data::new(ServerConfig::default());
/// let server = server::create_http_server(pool, ws_server, config, "127.0.0.1:4000")?;
/// server.await?;
/// ```
pub fn create_http_server(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    server_config: web::Data<ServerConfig>,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(ws_server.clone())
            .app_data(server_config.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// Create a test HTTP server with in-memory database and default settings.
/// Binds to a random available port and returns the server with its address.
pub fn create_test_http_server() -> std::io::Result<(actix_web::dev::Server, String)> {
    let pool = web::Data::new(crate::db::create_test_pool());
    let ws_server = web::Data::new(WsServer::new(pool.get_ref().clone()));
    let server_config = web::Data::new(ServerConfig::default());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool.clone())
            .app_data(ws_server.clone())
            .app_data(server_config.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind("127.0.0.1:0")?;

    // Get the actual bind address (including the assigned port)
    let addr_str = server
        .addrs()
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    Ok((server.run(), addr_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::*;
    use crate::db::{test_support, Database};
    use crate::handlers::SUBJECT_HEADER;
    use crate::signature;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};

    const SECRET: &str = "whsec_aHVkZGxlLXRlc3Qtc2VjcmV0";

    fn app_data() -> (web::Data<DbPool>, web::Data<WsServer>, web::Data<ServerConfig>) {
        let pool = web::Data::new(crate::db::create_test_pool());
        let ws_server = web::Data::new(WsServer::new(pool.get_ref().clone()));
        let config = web::Data::new(ServerConfig {
            webhook_secret: Some(SECRET.to_string()),
            ..ServerConfig::default()
        });
        (pool, ws_server, config)
    }

    macro_rules! init_app {
        ($pool:expr, $ws:expr, $config:expr) => {
            test::init_service(
                App::new()
                    .app_data($pool.clone())
                    .app_data($ws.clone())
                    .app_data($config.clone())
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[tokio::test]
    async fn test_create_http_server_with_test_pool() {
        let (pool, ws_server, config) = app_data();
        let result = create_http_server(pool, ws_server, config, "127.0.0.1:0");
        assert!(result.is_ok(), "create_http_server should succeed");
    }

    #[tokio::test]
    async fn test_create_http_server_invalid_address() {
        let (pool, ws_server, config) = app_data();
        let result = create_http_server(pool, ws_server, config, "invalid_address:99999");
        assert!(result.is_err(), "create_http_server should fail with invalid address");
    }

    #[tokio::test]
    async fn test_create_test_http_server() {
        let (_server, addr) = create_test_http_server().expect("Server creation should succeed");
        assert!(addr.contains("127.0.0.1:"), "Address should contain 127.0.0.1:");
        let port_part = addr.split(':').nth(1).unwrap_or("");
        assert!(!port_part.is_empty(), "Port should be assigned");
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let (pool, ws_server, config) = app_data();
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_missing_subject_is_unauthorized() {
        let (pool, ws_server, config) = app_data();
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::get().uri("/conversations").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "unauthenticated");
    }

    #[actix_web::test]
    async fn test_unknown_subject_is_not_found() {
        let (pool, ws_server, config) = app_data();
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::get()
            .uri("/conversations")
            .insert_header((SUBJECT_HEADER, "subject_ghost"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_anonymous_block_status_is_false() {
        let (pool, ws_server, config) = app_data();
        let alice = test_support::user(&pool, "alice").await;
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::get()
            .uri(&format!("/blocks/{}", alice.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "is_blocked": false, "is_blocked_by": false }));
    }

    #[actix_web::test]
    async fn test_group_flow_over_http() {
        let (pool, ws_server, config) = app_data();
        let alice = test_support::user(&pool, "alice").await;
        let bob = test_support::user(&pool, "bob").await;
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::post()
            .uri("/groups")
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .set_json(json!({ "name": "Team" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: CreatedResponse = test::read_body_json(resp).await;

        let req = test::TestRequest::post()
            .uri(&format!("/groups/{}/members", created.id))
            .insert_header((SUBJECT_HEADER, "subject_bob"))
            .set_json(json!({ "user_id": alice.id }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri(&format!("/groups/{}/members", created.id))
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .set_json(json!({ "user_id": bob.id }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri(&format!("/conversations/{}/messages", created.id))
            .insert_header((SUBJECT_HEADER, "subject_bob"))
            .set_json(json!({ "content": ["hello ", "team"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri(&format!("/conversations/{}/messages?limit=1", created.id))
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .to_request();
        let page: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(page["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(page["items"][0]["sender_name"], "bob");
        assert!(page["next_cursor"].is_i64());

        let req = test::TestRequest::get()
            .uri(&format!("/groups/{}/members", created.id))
            .insert_header((SUBJECT_HEADER, "subject_bob"))
            .to_request();
        let members: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(members.as_array().map(Vec::len), Some(2));
    }

    #[actix_web::test]
    async fn test_client_system_message_rejected() {
        let (pool, ws_server, config) = app_data();
        let alice = test_support::user(&pool, "alice").await;
        let group_id = crate::db::ConversationStore::create_group(&pool, alice.id, "Team", None)
            .await
            .unwrap();
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::post()
            .uri(&format!("/conversations/{}/messages", group_id))
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .set_json(json!({ "type": "system", "content": ["alice removed bob from the group"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let history = crate::db::MessageStore::list_for_viewer(&pool, alice.id, group_id)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[actix_web::test]
    async fn test_missing_pool_is_internal_error() {
        let app = test::init_service(App::new().configure(configure_routes)).await;

        // The socket route resolves the caller before any other app data
        let req = test::TestRequest::get()
            .uri("/ws")
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["kind"], "internal");
    }

    #[actix_web::test]
    async fn test_state_conflict_maps_to_409() {
        let (pool, ws_server, config) = app_data();
        let alice = test_support::user(&pool, "alice").await;
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::post()
            .uri(&format!("/blocks/{}", alice.id))
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "You cannot block yourself");
    }

    #[actix_web::test]
    async fn test_signed_webhook_provisions_user() {
        let (pool, ws_server, config) = app_data();
        let app = init_app!(pool, ws_server, config);

        let body = json!({
            "type": "user.created",
            "data": {
                "id": "user_ada",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "image_url": "",
                "email_addresses": [{ "email_address": "ada@example.com" }]
            }
        })
        .to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let sig = signature::sign(SECRET, "msg_1", &timestamp, body.as_bytes()).unwrap();

        let req = test::TestRequest::post()
            .uri("/webhooks/identity")
            .insert_header((signature::HEADER_ID, "msg_1"))
            .insert_header((signature::HEADER_TIMESTAMP, timestamp.as_str()))
            .insert_header((signature::HEADER_SIGNATURE, format!("v1,{}", sig)))
            .insert_header(("content-type", "application/json"))
            .set_payload(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let user = Database::get_user_by_external_id(&pool, "user_ada")
            .await
            .unwrap()
            .expect("User not provisioned");
        assert_eq!(user.username, "Ada Lovelace");

        let req = test::TestRequest::post()
            .uri("/webhooks/identity")
            .insert_header((signature::HEADER_ID, "msg_1"))
            .insert_header((signature::HEADER_TIMESTAMP, timestamp.as_str()))
            .insert_header((signature::HEADER_SIGNATURE, "v1,Zm9yZ2Vk"))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_presence_round_trip() {
        let (pool, ws_server, config) = app_data();
        let alice = test_support::user(&pool, "alice").await;
        let app = init_app!(pool, ws_server, config);

        let req = test::TestRequest::post()
            .uri("/presence")
            .insert_header((SUBJECT_HEADER, "subject_alice"))
            .set_json(json!({ "status": "away" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get()
            .uri(&format!("/presence/{}", alice.id))
            .to_request();
        let presence: Presence = test::call_and_read_body_json(&app, req).await;
        assert_eq!(presence.online_status, OnlineStatus::Away);
    }
}
