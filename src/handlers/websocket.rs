/// WebSocket change feed.
/// Clients hold one socket, subscribed to their own user topic and to the
/// conversations they open. Mutations push small invalidation events and
/// clients re-run their queries.
use crate::db::models::{ConversationId, UserId};
use crate::db::{ConversationStore, DbPool};
use crate::handlers::auth::Caller;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A change clients should react to by refreshing the matching query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    Message { conversation_id: ConversationId },
    Conversation { conversation_id: ConversationId },
    Request,
    Invitation,
    Presence { user_id: UserId },
}

/// Control frames sent by clients
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientCommand {
    Subscribe { conversation_id: ConversationId },
    Unsubscribe { conversation_id: ConversationId },
}

pub fn user_topic(user_id: UserId) -> String {
    format!("user:{}", user_id)
}

pub fn conversation_topic(conversation_id: ConversationId) -> String {
    format!("conversation:{}", conversation_id)
}

/// WebSocket server state - manages client connections and topic routing
pub struct WsServer {
    pub clients: Arc<RwLock<HashMap<String, tokio::sync::mpsc::UnboundedSender<String>>>>,
    pub topics: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    pub pool: DbPool,
}

impl WsServer {
    pub fn new(pool: DbPool) -> Self {
        WsServer {
            clients: Arc::new(RwLock::new(HashMap::new())),
            topics: Arc::new(RwLock::new(HashMap::new())),
            pool,
        }
    }

    /// Register a client connection
    pub async fn register(&self, client_id: String, tx: tokio::sync::mpsc::UnboundedSender<String>) {
        let mut clients = self.clients.write().await;
        clients.insert(client_id, tx);
    }

    /// Unregister a client connection and drop all of its subscriptions
    pub async fn unregister(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        clients.remove(client_id);

        let mut topics = self.topics.write().await;
        for subscribers in topics.values_mut() {
            subscribers.remove(client_id);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());
    }

    pub async fn subscribe(&self, client_id: String, topic: String) {
        let mut topics = self.topics.write().await;
        topics.entry(topic).or_default().insert(client_id);
    }

    pub async fn unsubscribe(&self, client_id: &str, topic: &str) {
        let mut topics = self.topics.write().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Subscribe to a conversation the user holds a membership in.
    /// Returns `false` when the user has no membership there.
    pub async fn subscribe_conversation(
        &self,
        client_id: String,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> bool {
        match ConversationStore::has_membership(&self.pool, user_id, conversation_id).await {
            Ok(true) => {
                self.subscribe(client_id, conversation_topic(conversation_id))
                    .await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::error!("Subscription check failed: {}", e);
                false
            }
        }
    }

    /// Send a raw frame to every subscriber of a topic
    pub async fn broadcast(&self, topic: &str, message: &str) {
        let topics = self.topics.read().await;
        if let Some(subscribers) = topics.get(topic) {
            let clients = self.clients.read().await;
            for subscriber in subscribers {
                if let Some(tx) = clients.get(subscriber) {
                    let _ = tx.send(message.to_string());
                }
            }
        }
    }

    pub async fn publish(&self, topic: &str, event: &ChangeEvent) {
        match serde_json::to_string(event) {
            Ok(frame) => self.broadcast(topic, &frame).await,
            Err(e) => log::error!("Failed to encode change event: {}", e),
        }
    }

    pub async fn notify_user(&self, user_id: UserId, event: &ChangeEvent) {
        self.publish(&user_topic(user_id), event).await;
    }

    pub async fn notify_users(&self, user_ids: &[UserId], event: &ChangeEvent) {
        for user_id in user_ids {
            self.notify_user(*user_id, event).await;
        }
    }

    /// Notify the conversation topic and the user topics of its active members
    pub async fn notify_conversation(&self, conversation_id: ConversationId, event: &ChangeEvent) {
        self.publish(&conversation_topic(conversation_id), event).await;
        match ConversationStore::active_member_ids(&self.pool, conversation_id).await {
            Ok(member_ids) => self.notify_users(&member_ids, event).await,
            Err(e) => log::error!("Failed to load members of {}: {}", conversation_id, e),
        }
    }
}

/// WebSocket actor for individual client connections
pub struct WsActor {
    pub client_id: String,
    pub user_id: UserId,
    pub server: web::Data<WsServer>,
}

impl WsActor {
    fn handle_command(&self, command: ClientCommand, ctx: &mut ws::WebsocketContext<Self>) {
        let server = self.server.clone();
        let client_id = self.client_id.clone();
        let user_id = self.user_id;
        let addr = ctx.address();

        match command {
            ClientCommand::Subscribe { conversation_id } => {
                actix::spawn(async move {
                    let reply = if server
                        .subscribe_conversation(client_id, user_id, conversation_id)
                        .await
                    {
                        json!({ "type": "subscribed", "conversation_id": conversation_id })
                    } else {
                        json!({
                            "type": "error",
                            "error": "Not a member of this conversation",
                            "conversation_id": conversation_id,
                        })
                    };
                    addr.do_send(OutgoingFrame(reply.to_string()));
                });
            }
            ClientCommand::Unsubscribe { conversation_id } => {
                actix::spawn(async move {
                    server
                        .unsubscribe(&client_id, &conversation_topic(conversation_id))
                        .await;
                    let reply =
                        json!({ "type": "unsubscribed", "conversation_id": conversation_id });
                    addr.do_send(OutgoingFrame(reply.to_string()));
                });
            }
        }
    }
}

impl Actor for WsActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("WebSocket connection started: {}", self.client_id);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let addr = ctx.address();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                addr.do_send(OutgoingFrame(msg));
            }
        });

        let server = self.server.clone();
        let client_id = self.client_id.clone();
        let topic = user_topic(self.user_id);
        actix::spawn(async move {
            server.register(client_id.clone(), tx).await;
            server.subscribe(client_id, topic).await;
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("WebSocket connection stopped: {}", self.client_id);
        let server = self.server.clone();
        let client_id = self.client_id.clone();
        actix::spawn(async move {
            server.unregister(&client_id).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => self.handle_command(command, ctx),
                Err(e) => {
                    log::warn!("Invalid WebSocket frame from {}: {}", self.client_id, e);
                    ctx.text(
                        json!({
                            "type": "error",
                            "error": "Invalid message format"
                        })
                        .to_string(),
                    );
                }
            },
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::error!("WebSocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct OutgoingFrame(String);

impl Handler<OutgoingFrame> for WsActor {
    type Result = ();

    fn handle(&mut self, msg: OutgoingFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// WebSocket connection handler
/// GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    caller: Caller,
    server: web::Data<WsServer>,
) -> actix_web::Result<HttpResponse> {
    let client_id = format!("{}_{}", caller.id(), uuid::Uuid::new_v4());

    let actor = WsActor {
        client_id,
        user_id: caller.id(),
        server: server.clone(),
    };

    let resp = ws::start(actor, &req, stream)?;
    Ok(resp)
}
