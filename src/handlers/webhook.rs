/// Identity-provisioning webhook.
/// Verified deliveries create or delete the user mapped to an external subject.
use crate::config::ServerConfig;
use crate::db::{Database, DbPool, NewUser};
use crate::error::{ChatError, ChatResult};
use crate::signature::{self, SignatureHeaders, HEADER_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: IdentityEventData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IdentityEventData {
    pub id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub email_addresses: Vec<EmailAddress>,
}

#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    pub email_address: String,
}

impl IdentityEventData {
    fn into_new_user(self) -> ChatResult<NewUser> {
        let external_id = self
            .id
            .ok_or_else(|| ChatError::validation("id", "Missing user id"))?;
        let username = format!(
            "{} {}",
            self.first_name.unwrap_or_default(),
            self.last_name.unwrap_or_default()
        )
        .trim()
        .to_string();
        let email = self
            .email_addresses
            .into_iter()
            .next()
            .map(|e| e.email_address)
            .unwrap_or_default();

        Ok(NewUser {
            external_id,
            username,
            email,
            avatar_url: self.image_url.unwrap_or_default(),
        })
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> ChatResult<&'a str> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ChatError::InvalidWebhook(format!("Missing {} header", name)))
}

fn verify_delivery(req: &HttpRequest, body: &[u8], config: &ServerConfig) -> ChatResult<()> {
    let secret = config
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ChatError::InvalidWebhook("Webhook secret not configured".to_string()))?;
    let headers = SignatureHeaders {
        id: header(req, HEADER_ID)?,
        timestamp: header(req, HEADER_TIMESTAMP)?,
        signature: header(req, HEADER_SIGNATURE)?,
    };
    signature::verify(secret, headers, body, chrono::Utc::now().timestamp())
}

/// Handle an identity-provisioning delivery
/// POST /webhooks/identity
pub async fn identity_webhook(
    req: HttpRequest,
    body: web::Bytes,
    pool: web::Data<DbPool>,
    config: web::Data<ServerConfig>,
) -> ActixResult<HttpResponse> {
    if let Err(e) = verify_delivery(&req, &body, &config) {
        log::warn!("Rejected identity webhook: {}", e);
        return Err(e.into());
    }

    let event: IdentityEvent = serde_json::from_slice(&body)
        .map_err(|e| ChatError::InvalidWebhook(format!("Malformed payload: {}", e)))?;

    match event.event_type.as_str() {
        "user.created" => {
            let new_user = event.data.into_new_user()?;
            let (user, created) = Database::provision_user(&pool, &new_user).await?;
            if !created {
                log::info!("User already exists: {}", user.id);
            }
            Ok(HttpResponse::Ok().json(json!({ "user_id": user.id, "created": created })))
        }
        "user.deleted" => {
            let external_id = event.data.id.unwrap_or_default();
            match Database::delete_user_by_external_id(&pool, &external_id).await? {
                Some(user) => {
                    Ok(HttpResponse::Ok().json(json!({ "user_id": user.id, "deleted": true })))
                }
                None => {
                    log::info!("User not found for subject {}", external_id);
                    Ok(HttpResponse::Ok().json(json!({ "deleted": false })))
                }
            }
        }
        other => {
            log::info!("Unhandled identity event type: {}", other);
            Ok(HttpResponse::Ok().json(json!({ "status": "ignored" })))
        }
    }
}
