/// REST API handlers for conversations, groups and group invitations.
use crate::db::{models::*, ConversationStore, DbPool, InvitationStore};
use crate::handlers::auth::{Caller, MaybeCaller};
use crate::handlers::websocket::{ChangeEvent, WsServer};
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;

async fn announce(ws_server: &WsServer, conversation_id: ConversationId) {
    ws_server
        .notify_conversation(conversation_id, &ChangeEvent::Message { conversation_id })
        .await;
    ws_server
        .notify_conversation(conversation_id, &ChangeEvent::Conversation { conversation_id })
        .await;
}

/// GET /conversations
pub async fn list_conversations(
    pool: web::Data<DbPool>,
    caller: Caller,
) -> ActixResult<HttpResponse> {
    let conversations = ConversationStore::list_for_user(&pool, caller.id()).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

/// GET /conversations/{id}
pub async fn get_conversation(
    pool: web::Data<DbPool>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
) -> ActixResult<HttpResponse> {
    let details = ConversationStore::get(&pool, caller.id(), conversation_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(details))
}

/// POST /groups
pub async fn create_group(
    pool: web::Data<DbPool>,
    caller: Caller,
    req: web::Json<CreateGroupRequest>,
) -> ActixResult<HttpResponse> {
    let id =
        ConversationStore::create_group(&pool, caller.id(), &req.name, req.image_url.as_deref())
            .await?;
    Ok(HttpResponse::Created().json(CreatedResponse { id }))
}

/// POST /groups/{id}/members
pub async fn add_member(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
    req: web::Json<MemberRequest>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    let message =
        ConversationStore::add_member(&pool, caller.id(), conversation_id, req.user_id).await?;
    announce(&ws_server, conversation_id).await;
    Ok(HttpResponse::Created().json(message))
}

/// DELETE /groups/{id}/members/{user_id}
pub async fn remove_member(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    path: web::Path<(ConversationId, UserId)>,
) -> ActixResult<HttpResponse> {
    let (conversation_id, user_id) = path.into_inner();
    let message =
        ConversationStore::remove_member(&pool, caller.id(), conversation_id, user_id).await?;
    announce(&ws_server, conversation_id).await;
    ws_server
        .notify_user(user_id, &ChangeEvent::Conversation { conversation_id })
        .await;
    Ok(HttpResponse::Ok().json(message))
}

/// POST /groups/{id}/leave
pub async fn leave_group(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    let message = ConversationStore::leave_group(&pool, caller.id(), conversation_id).await?;
    announce(&ws_server, conversation_id).await;
    ws_server
        .notify_user(caller.id(), &ChangeEvent::Conversation { conversation_id })
        .await;
    Ok(HttpResponse::Ok().json(message))
}

/// PUT /groups/{id}/image
pub async fn update_group_image(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
    req: web::Json<UpdateGroupImageRequest>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    ConversationStore::update_group_image(&pool, caller.id(), conversation_id, &req.image_url)
        .await?;
    ws_server
        .notify_conversation(conversation_id, &ChangeEvent::Conversation { conversation_id })
        .await;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /groups/{id}
pub async fn delete_group(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    let member_ids = ConversationStore::delete_group(&pool, caller.id(), conversation_id).await?;
    ws_server
        .notify_users(&member_ids, &ChangeEvent::Conversation { conversation_id })
        .await;
    Ok(HttpResponse::NoContent().finish())
}

/// Active members with their roles
/// GET /groups/{id}/members
pub async fn get_group_members(
    pool: web::Data<DbPool>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
) -> ActixResult<HttpResponse> {
    let members =
        ConversationStore::get_group_members(&pool, caller.id(), conversation_id.into_inner())
            .await?;
    Ok(HttpResponse::Ok().json(members))
}

/// GET /groups/{id}/admin
pub async fn is_group_admin(
    pool: web::Data<DbPool>,
    caller: MaybeCaller,
    conversation_id: web::Path<ConversationId>,
) -> ActixResult<HttpResponse> {
    let is_admin =
        ConversationStore::is_group_admin(&pool, caller.0, conversation_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "is_admin": is_admin })))
}

/// POST /groups/{id}/admin
pub async fn transfer_admin(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
    req: web::Json<MemberRequest>,
) -> ActixResult<HttpResponse> {
    let conversation_id = conversation_id.into_inner();
    let message =
        ConversationStore::transfer_admin(&pool, caller.id(), conversation_id, req.user_id)
            .await?;
    announce(&ws_server, conversation_id).await;
    Ok(HttpResponse::Ok().json(message))
}

/// POST /groups/{id}/invitations
pub async fn send_invitation(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    conversation_id: web::Path<ConversationId>,
    req: web::Json<EmailRequest>,
) -> ActixResult<HttpResponse> {
    let invitation = InvitationStore::send_invitation(
        &pool,
        caller.id(),
        conversation_id.into_inner(),
        &req.email,
    )
    .await?;
    ws_server
        .notify_user(invitation.receiver_id, &ChangeEvent::Invitation)
        .await;
    Ok(HttpResponse::Created().json(invitation))
}

/// GET /invitations
pub async fn list_invitations(
    pool: web::Data<DbPool>,
    caller: Caller,
) -> ActixResult<HttpResponse> {
    let invitations = InvitationStore::list_pending(&pool, caller.id()).await?;
    Ok(HttpResponse::Ok().json(invitations))
}

/// GET /invitations/count
pub async fn count_invitations(
    pool: web::Data<DbPool>,
    caller: Caller,
) -> ActixResult<HttpResponse> {
    let count = InvitationStore::count_pending(&pool, caller.id()).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

/// POST /invitations/{id}/accept
pub async fn accept_invitation(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    invitation_id: web::Path<InvitationId>,
) -> ActixResult<HttpResponse> {
    let (invitation, message) =
        InvitationStore::accept_invitation(&pool, caller.id(), invitation_id.into_inner()).await?;
    ws_server.notify_user(caller.id(), &ChangeEvent::Invitation).await;
    if message.is_some() {
        announce(&ws_server, invitation.group_id).await;
    }
    Ok(HttpResponse::Ok().json(invitation))
}

/// POST /invitations/{id}/reject
pub async fn reject_invitation(
    pool: web::Data<DbPool>,
    ws_server: web::Data<WsServer>,
    caller: Caller,
    invitation_id: web::Path<InvitationId>,
) -> ActixResult<HttpResponse> {
    let invitation =
        InvitationStore::reject_invitation(&pool, caller.id(), invitation_id.into_inner()).await?;
    ws_server.notify_user(caller.id(), &ChangeEvent::Invitation).await;
    Ok(HttpResponse::Ok().json(invitation))
}
