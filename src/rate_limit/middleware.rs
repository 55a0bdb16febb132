//! Tower middleware that enforces admission control.
//!
//! The layer does not know how limiting works, only that the gateway should
//! be asked. How to project a request onto admission inputs (tenant, caller
//! identity, action, cost) is application knowledge, so the application
//! supplies it as a closure.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::auth::UserIdentity;
use crate::errors::RegistryV2Error;
use crate::gateway::AdmissionGateway;
use crate::models::ReducedAccount;
use crate::rate_limit::RateLimitedAction;

/// Everything the gateway needs to gate one request.
#[derive(Clone)]
pub struct AdmissionInputs {
    pub requester_ip: IpAddr,
    pub account: ReducedAccount,
    pub identity: Arc<dyn UserIdentity>,
    pub action: RateLimitedAction,
    pub amount: u64,
}

/// Error type of [`AdmissionService`].
#[derive(Debug)]
pub enum AdmissionError<E> {
    /// The gateway refused the request; the envelope is ready to be written
    /// to the client (denials carry `Retry-After`, backend faults are
    /// already coerced to the `UNKNOWN` code).
    Rejected(RegistryV2Error),
    /// The wrapped service failed.
    Inner(E),
}

impl<E> AdmissionError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the envelope if the gateway produced one.
    pub fn as_rejection(&self) -> Option<&RegistryV2Error> {
        match self {
            Self::Rejected(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "request rejected: {e}"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rejected(e) => Some(e),
            Self::Inner(e) => Some(e),
        }
    }
}

/// A layer that gates requests through an [`AdmissionGateway`].
pub struct AdmissionLayer<X> {
    gateway: Arc<AdmissionGateway>,
    extract: Arc<X>,
}

impl<X> AdmissionLayer<X> {
    /// Create a layer; `extract` projects each request onto its admission
    /// inputs.
    pub fn new(gateway: Arc<AdmissionGateway>, extract: X) -> Self {
        Self { gateway, extract: Arc::new(extract) }
    }
}

impl<X> Clone for AdmissionLayer<X> {
    fn clone(&self) -> Self {
        Self { gateway: self.gateway.clone(), extract: self.extract.clone() }
    }
}

impl<S, X> Layer<S> for AdmissionLayer<X> {
    type Service = AdmissionService<S, X>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            gateway: self.gateway.clone(),
            extract: self.extract.clone(),
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
pub struct AdmissionService<S, X> {
    inner: S,
    gateway: Arc<AdmissionGateway>,
    extract: Arc<X>,
}

impl<S: Clone, X> Clone for AdmissionService<S, X> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gateway: self.gateway.clone(),
            extract: self.extract.clone(),
        }
    }
}

impl<S, X, Req> Service<Req> for AdmissionService<S, X>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    X: Fn(&Req) -> AdmissionInputs + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let inputs = (self.extract)(&req);
        let gateway = self.gateway.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let check = gateway
                .check_rate_limit(
                    inputs.requester_ip,
                    &inputs.account,
                    inputs.identity.as_ref(),
                    inputs.action,
                    inputs.amount,
                )
                .await;
            match check {
                Ok(()) => inner.call(req).await.map_err(AdmissionError::Inner),
                // this is a response boundary: coerce whatever came back
                // into a well-formed envelope
                Err(err) => Err(AdmissionError::Rejected(RegistryV2Error::from_error(err))),
            }
        })
    }
}
