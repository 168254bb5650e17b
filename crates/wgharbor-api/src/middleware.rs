use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::time::Instant;

use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use tracing::{info, warn};

/// Structured access log: one line per request with remote address,
/// status, sizes, and latency. Auth failures log at warn.
pub struct AccessLog;

impl<S, B> Transform<S, ServiceRequest> for AccessLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = AccessLogMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AccessLogMiddleware { service }))
    }
}

pub struct AccessLogMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AccessLogMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(
        &self,
        ctx: &mut core::task::Context<'_>,
    ) -> core::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let remote_ip = req
            .connection_info()
            .peer_addr()
            .unwrap_or("unknown")
            .to_owned();

        let start = Instant::now();
        let fut = self.service.call(req);

        Box::pin(async move {
            let res = fut.await?;
            let status = res.status().as_u16();
            let response_size = match res.response().body().size() {
                BodySize::Sized(n) => n,
                _ => 0,
            };
            let time_ms = start.elapsed().as_millis() as u64;

            if status == 401 {
                warn!(
                    remote_ip = %remote_ip,
                    method = %method,
                    path = %path,
                    status,
                    time_ms,
                    "unauthorized request"
                );
            } else {
                info!(
                    remote_ip = %remote_ip,
                    method = %method,
                    path = %path,
                    status,
                    response_size,
                    time_ms,
                    "request"
                );
            }

            Ok(res)
        })
    }
}
