/// Caller identity extractors.
///
/// The upstream gateway authenticates the request and forwards the external
/// subject in `X-Auth-Subject`. `Caller` requires a resolvable user,
/// `MaybeCaller` degrades to anonymous for lenient status queries.
use std::future::Future;
use std::pin::Pin;

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};

use crate::db::identity;
use crate::db::models::{User, UserId};
use crate::db::DbPool;
use crate::error::ChatError;

pub const SUBJECT_HEADER: &str = "x-auth-subject";

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct Caller(pub User);

impl Caller {
    pub fn id(&self) -> UserId {
        self.0.id
    }
}

/// The caller's user id, if one can be resolved
#[derive(Debug, Clone, Copy)]
pub struct MaybeCaller(pub Option<UserId>);

fn subject(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(SUBJECT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn pool(req: &HttpRequest) -> Result<DbPool, ChatError> {
    req.app_data::<web::Data<DbPool>>()
        .map(|data| data.get_ref().clone())
        .ok_or_else(|| {
            log::error!("Database pool missing from app data");
            ChatError::Internal("database pool not configured".to_string())
        })
}

impl FromRequest for Caller {
    type Error = ChatError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let subject = subject(req);
        let pool = pool(req);
        Box::pin(async move {
            let pool = pool?;
            let user = identity::resolve(&pool, subject.as_deref()).await?;
            Ok(Caller(user))
        })
    }
}

impl FromRequest for MaybeCaller {
    type Error = ChatError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let subject = subject(req);
        let pool = pool(req);
        Box::pin(async move {
            let pool = pool?;
            Ok(MaybeCaller(
                identity::resolve_optional(&pool, subject.as_deref()).await,
            ))
        })
    }
}
