//! Remote API seam
//!
//! A handler performs one physical HTTP exchange. Any completed exchange is
//! `Ok`, whatever its status; `Err` means the request may never have reached
//! the server.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::http::{GatewayRequest, GatewayResponse};

/// One-shot HTTP exchange with the remote API
#[async_trait]
pub trait TransportEffects: Send + Sync {
    /// Send `request` (path already rewritten, headers stamped) and wait at
    /// most `timeout` for the response
    async fn send(
        &self,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError>;
}

#[async_trait]
impl<T: TransportEffects + ?Sized> TransportEffects for std::sync::Arc<T> {
    async fn send(
        &self,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError> {
        (**self).send(request, timeout).await
    }
}
