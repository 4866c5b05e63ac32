//! Bearer-token guard for the operational routes under `/admin`.
//!
//! Requests must carry `Authorization: Bearer <BAL_ADMIN_TOKEN>`. A missing header is answered with 401 and a wrong
//! token with 403.

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use balance_common::Secret;
use futures::future::LocalBoxFuture;
use log::warn;

use super::constant_time_eq;
use crate::errors::{AuthError, ServerError};

pub struct AdminTokenMiddlewareFactory {
    token: Secret<String>,
}

impl AdminTokenMiddlewareFactory {
    pub fn new(token: Secret<String>) -> Self {
        AdminTokenMiddlewareFactory { token }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdminTokenMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = AdminTokenMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminTokenMiddlewareService { token: self.token.clone(), service: Rc::new(service) }))
    }
}

pub struct AdminTokenMiddlewareService<S> {
    token: Secret<String>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AdminTokenMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let token = self.token.clone();
        Box::pin(async move {
            let presented = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.trim().to_string())
                .ok_or_else(|| ServerError::from(AuthError::MissingCredentials("access token")))?;
            if !token.is_empty() && constant_time_eq(presented.as_bytes(), token.reveal().as_bytes()) {
                service.call(req).await
            } else {
                warn!("🔐️ Rejected admin request to {} with an invalid token", req.path());
                Err(ServerError::from(AuthError::InvalidToken).into())
            }
        })
    }
}
