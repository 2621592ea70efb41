/// REST API handlers for message history, sending and read receipts.
use crate::config::ServerConfig;
use crate::db::{models::*, DbPool, MessageStore};
use crate::error::ChatError;
use crate::handlers::auth::Caller;
use crate::handlers::websocket::{ChangeEvent, WsServer};
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;

/// One page of history, newest first
/// GET /conversations/{id}/messages?before=&limit=
pub async fn list_messages(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
    query: web::Query<MessagePageQuery>,
) -> ActixResult<HttpResponse> {
    let limit = query.limit.unwrap_or(config.page_size);
    let page = MessageStore::list_page(
        &pool,
        caller.id(),
        conversation_id.into_inner(),
        query.before,
        limit,
    )
    .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// POST /conversations/{id}/messages
pub async fn send_message(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
    req: web::Json<SendMessageRequest>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    let req = req.into_inner();
    // Lifecycle announcements are written by the stores only
    if req.kind == MessageKind::System {
        return Err(ChatError::validation("type", "System messages cannot be sent by clients").into());
    }
    let message =
        MessageStore::create(&pool, caller.id(), conversation_id, req.kind, req.content).await?;
    ws_server
        .notify_conversation(conversation_id, &ChangeEvent::Message { conversation_id })
        .await;
    Ok(HttpResponse::Created().json(message))
}

/// Mark everything visible in a conversation as read
/// POST /conversations/{id}/read
pub async fn mark_all_read(
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    let processed =
        MessageStore::mark_all_as_read(&pool, conversation_id, caller.id(), config.read_batch_size)
            .await?;
    if processed > 0 {
        ws_server
            .notify_conversation(conversation_id, &ChangeEvent::Message { conversation_id })
            .await;
    }
    Ok(HttpResponse::Ok().json(json!({ "processed": processed })))
}

/// POST /messages/{id}/read
pub async fn mark_read(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    message_id: web::Path<MessageId>,
) -> ActixResult<HttpResponse> {
    let message_id = message_id.into_inner();
    let changed = MessageStore::mark_as_read(&pool, message_id, caller.id()).await?;
    if changed {
        notify_receipt(&pool, &ws_server, message_id).await;
    }
    Ok(HttpResponse::Ok().json(json!({ "changed": changed })))
}

/// POST /messages/{id}/delivered
pub async fn mark_delivered(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    message_id: web::Path<MessageId>,
) -> ActixResult<HttpResponse> {
    let message_id = message_id.into_inner();
    let changed = MessageStore::mark_as_delivered(&pool, message_id, caller.id()).await?;
    if changed {
        notify_receipt(&pool, &ws_server, message_id).await;
    }
    Ok(HttpResponse::Ok().json(json!({ "changed": changed })))
}

async fn notify_receipt(pool: &DbPool, ws_server: &WsServer, message_id: MessageId) {
    match MessageStore::get(pool, message_id).await {
        Ok(Some(message)) => {
            let conversation_id = message.conversation_id;
            ws_server
                .notify_conversation(conversation_id, &ChangeEvent::Message { conversation_id })
                .await;
        }
        Ok(None) => {}
        Err(e) => log::error!("Failed to load message {}: {}", message_id, e),
    }
}
