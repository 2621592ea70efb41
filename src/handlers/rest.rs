/// REST API handlers for relationships, presence and notification counts.
use crate::config::ServerConfig;
use crate::db::{models::*, DbPool, NotificationStore, PresenceStore, RelationshipStore};
use crate::handlers::auth::{Caller, MaybeCaller};
use crate::handlers::websocket::{ChangeEvent, WsServer};
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;

/// Health check endpoint
/// GET /health
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok"
    })))
}

/// Report the caller's presence
/// POST /presence
pub async fn update_presence(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    req: web::Json<UpdatePresenceRequest>,
) -> ActixResult<HttpResponse> {
    let presence = PresenceStore::update_presence(&pool, caller.id(), req.status).await?;
    ws_server
        .notify_user(caller.id(), &ChangeEvent::Presence { user_id: caller.id() })
        .await;
    Ok(HttpResponse::Ok().json(presence))
}

/// GET /presence/{user_id}
pub async fn get_presence(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    user_id: web::Path<UserId>,
) -> ActixResult<HttpResponse> {
    let presence =
        PresenceStore::get_presence(&pool, user_id.into_inner(), config.presence_stale_seconds)
            .await?;
    Ok(HttpResponse::Ok().json(presence))
}

/// POST /blocks/{user_id}
pub async fn block_user(
    pool: web::Data<DbPool>,
    caller: Caller,
    user_id: web::Path<UserId>,
) -> ActixResult<HttpResponse> {
    let id = RelationshipStore::block(&pool, caller.id(), user_id.into_inner()).await?;
    Ok(HttpResponse::Created().json(CreatedResponse { id }))
}

/// DELETE /blocks/{user_id}
pub async fn unblock_user(
    pool: web::Data<DbPool>,
    caller: Caller,
    user_id: web::Path<UserId>,
) -> ActixResult<HttpResponse> {
    RelationshipStore::unblock(&pool, caller.id(), user_id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Users the caller has blocked; empty for anonymous callers
/// GET /blocks
pub async fn list_blocked(
    pool: web::Data<DbPool>,
    caller: MaybeCaller,
) -> ActixResult<HttpResponse> {
    let users = RelationshipStore::list_blocked(&pool, caller.0).await?;
    Ok(HttpResponse::Ok().json(users))
}

/// Block status in both directions; both false for anonymous callers
/// GET /blocks/{user_id}
pub async fn block_status(
    pool: web::Data<DbPool>,
    caller: MaybeCaller,
    user_id: web::Path<UserId>,
) -> ActixResult<HttpResponse> {
    let other_id = user_id.into_inner();
    let response = BlockStatusResponse {
        is_blocked: RelationshipStore::is_blocked(&pool, caller.0, other_id).await?,
        is_blocked_by: RelationshipStore::is_blocked_by(&pool, caller.0, other_id).await?,
    };
    Ok(HttpResponse::Ok().json(response))
}

/// POST /requests
pub async fn send_request(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    req: web::Json<EmailRequest>,
) -> ActixResult<HttpResponse> {
    let request = RelationshipStore::send_request(&pool, caller.id(), &req.email).await?;
    ws_server
        .notify_user(request.receiver_id, &ChangeEvent::Request)
        .await;
    Ok(HttpResponse::Created().json(request))
}

/// GET /requests
pub async fn list_requests(pool: web::Data<DbPool>, caller: Caller) -> ActixResult<HttpResponse> {
    let requests = RelationshipStore::list_requests(&pool, caller.id()).await?;
    Ok(HttpResponse::Ok().json(requests))
}

/// GET /requests/count
pub async fn count_requests(pool: web::Data<DbPool>, caller: Caller) -> ActixResult<HttpResponse> {
    let count = RelationshipStore::count_requests(&pool, caller.id()).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

/// POST /requests/{id}/accept
pub async fn accept_request(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    request_id: web::Path<RequestId>,
) -> ActixResult<HttpResponse> {
    let conversation_id =
        RelationshipStore::accept_request(&pool, caller.id(), request_id.into_inner()).await?;
    ws_server.notify_user(caller.id(), &ChangeEvent::Request).await;
    ws_server
        .notify_conversation(conversation_id, &ChangeEvent::Conversation { conversation_id })
        .await;
    Ok(HttpResponse::Ok().json(json!({ "conversation_id": conversation_id })))
}

/// POST /requests/{id}/deny
pub async fn deny_request(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    request_id: web::Path<RequestId>,
) -> ActixResult<HttpResponse> {
    RelationshipStore::deny_request(&pool, caller.id(), request_id.into_inner()).await?;
    ws_server.notify_user(caller.id(), &ChangeEvent::Request).await;
    Ok(HttpResponse::NoContent().finish())
}

/// Pending request and invitation counts
/// GET /me/notifications
pub async fn notification_counts(
    pool: web::Data<DbPool>,
    caller: Caller,
) -> ActixResult<HttpResponse> {
    let counts = NotificationStore::counts(&pool, caller.id()).await?;
    Ok(HttpResponse::Ok().json(counts))
}
