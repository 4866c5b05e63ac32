//! Signature checks for marketplace push notifications.
//!
//! Shopee signs every push with the partner key: the `Authorization` header carries the lowercase-hex HMAC-SHA256 of
//! `<callback url>|<raw body>`. Wrap the webhook scope in [`HmacMiddlewareFactory`] to reject pushes that do not
//! carry a valid signature before the body is parsed.
//!
//! The body is consumed to compute the signature and put back on the request afterwards, so handlers downstream can
//! still extract it.

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web,
    Error,
};
use balance_common::Secret;
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use shopee_tools::helpers::sign_push;

use super::constant_time_eq;
use crate::errors::{AuthError, ServerError};

pub const SIGNATURE_HEADER: &str = "Authorization";

pub struct HmacMiddlewareFactory {
    key: Secret<String>,
    callback_url: Option<String>,
    // If false, then the middleware will not check the signature and always allow the call
    enabled: bool,
}

impl HmacMiddlewareFactory {
    pub fn new(key: Secret<String>, callback_url: Option<String>, enabled: bool) -> Self {
        HmacMiddlewareFactory { key, callback_url, enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HmacMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = HmacMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HmacMiddlewareService {
            key: self.key.clone(),
            callback_url: self.callback_url.clone(),
            enabled: self.enabled,
            service: Rc::new(service),
        }))
    }
}

pub struct HmacMiddlewareService<S> {
    key: Secret<String>,
    callback_url: Option<String>,
    enabled: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HmacMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let key = self.key.clone();
        let enabled = self.enabled;
        let url = self.callback_url.clone().unwrap_or_else(|| request_url(&req));
        Box::pin(async move {
            if !enabled {
                trace!("🔐️ HMAC checks are disabled. Allowing push.");
                return service.call(req).await;
            }
            let signature = req
                .headers()
                .get(SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_ascii_lowercase())
                .ok_or_else(|| {
                    warn!("🔐️ No signature found on push to {url}. Denying access.");
                    ServerError::from(AuthError::MissingCredentials("push signature"))
                })?;
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract push body: {e:?}");
                ServerError::InvalidRequestBody(e.to_string())
            })?;
            let expected = sign_push(key.reveal(), &url, data.as_ref())
                .map_err(|e| ServerError::ConfigurationError(format!("Cannot sign pushes. {e}")))?;
            if constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
                trace!("🔐️ Push signature ✅️");
                req.set_payload(bytes_to_payload(data));
                service.call(req).await
            } else {
                warn!("🔐️ Invalid signature on push to {url}. Denying access.");
                Err(ServerError::from(AuthError::InvalidSignature).into())
            }
        })
    }
}

/// Rebuilds the URL the marketplace called, as seen through any forwarding headers.
fn request_url(req: &ServiceRequest) -> String {
    let info = req.connection_info();
    let path = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or_else(|| req.path());
    format!("{}://{}{path}", info.scheme(), info.host())
}

fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}
