//! Scripted remote API
//!
//! Responses are chosen per `(method, path)`: one-shot scripted results
//! first, then a sticky response, then an echo of the request. The query
//! string is ignored when matching. While offline, every send fails with
//! [`TransportError::ConnectionFailed`] and never reaches the log.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use syncgate_core::effects::TransportEffects;
use syncgate_core::{GatewayRequest, GatewayResponse, Method, TransportError};

type Scripted = Result<GatewayResponse, TransportError>;
type RouteKey = (Method, String);

#[derive(Debug)]
struct ScriptState {
    online: bool,
    latency_ms: u64,
    one_shot: HashMap<RouteKey, VecDeque<Scripted>>,
    sticky: HashMap<RouteKey, GatewayResponse>,
    failures: VecDeque<TransportError>,
    delivered: Vec<GatewayRequest>,
    attempts: usize,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            online: true,
            latency_ms: 0,
            one_shot: HashMap::new(),
            sticky: HashMap::new(),
            failures: VecDeque::new(),
            delivered: Vec::new(),
            attempts: 0,
        }
    }
}

/// In-process stand-in for the remote API
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

fn route_key(method: Method, url: &str) -> RouteKey {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    (method, path.to_string())
}

impl ScriptedTransport {
    /// Online transport with no scripted routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle reachability
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Whether sends currently reach the server
    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Simulated server latency. A send whose timeout is shorter fails
    /// with [`TransportError::Timeout`] immediately.
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.state.lock().latency_ms = latency_ms;
    }

    /// Answer every `(method, path)` request with `response`
    pub fn respond(&self, method: Method, path: &str, response: GatewayResponse) {
        self.state
            .lock()
            .sticky
            .insert(route_key(method, path), response);
    }

    /// Answer the next `(method, path)` request with `result`
    pub fn enqueue(&self, method: Method, path: &str, result: Scripted) {
        self.state
            .lock()
            .one_shot
            .entry(route_key(method, path))
            .or_default()
            .push_back(result);
    }

    /// Fail the next send, whatever its route
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().failures.push_back(error);
    }

    /// Requests that reached the server, in arrival order
    pub fn delivered(&self) -> Vec<GatewayRequest> {
        self.state.lock().delivered.clone()
    }

    /// Number of requests that reached the server
    pub fn delivered_count(&self) -> usize {
        self.state.lock().delivered.len()
    }

    /// Delivered requests for one route
    pub fn delivered_to(&self, method: Method, path: &str) -> Vec<GatewayRequest> {
        let key = route_key(method, path);
        self.state
            .lock()
            .delivered
            .iter()
            .filter(|r| route_key(r.method, &r.url) == key)
            .cloned()
            .collect()
    }

    /// Every send, including ones that failed before reaching the server
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Forget the delivery log and attempt counter
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.delivered.clear();
        state.attempts = 0;
    }

    fn echo(request: &GatewayRequest) -> GatewayResponse {
        let status = if request.method == Method::Post { 201 } else { 200 };
        GatewayResponse::json(
            status,
            json!({
                "method": request.method.as_str(),
                "path": request.url,
                "body": request.body.as_json().cloned(),
            }),
        )
    }
}

#[async_trait]
impl TransportEffects for ScriptedTransport {
    async fn send(
        &self,
        request: &GatewayRequest,
        timeout: Duration,
    ) -> Result<GatewayResponse, TransportError> {
        let result = {
            let mut state = self.state.lock();
            state.attempts += 1;

            if !state.online {
                return Err(TransportError::ConnectionFailed {
                    message: "network unreachable".to_string(),
                });
            }
            if let Some(error) = state.failures.pop_front() {
                return Err(error);
            }
            if u128::from(state.latency_ms) > timeout.as_millis() {
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            let key = route_key(request.method, &request.url);
            let scripted = state
                .one_shot
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .or_else(|| state.sticky.get(&key).cloned().map(Ok))
                .unwrap_or_else(|| Ok(Self::echo(request)));

            if scripted.is_ok() {
                state.delivered.push(request.clone());
            }
            scripted
        };
        tokio::task::yield_now().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_shot_then_sticky_then_echo() {
        let transport = ScriptedTransport::new();
        transport.enqueue(Method::Get, "/a", Ok(GatewayResponse::json(500, json!({}))));
        transport.respond(Method::Get, "/a", GatewayResponse::json(200, json!({"v": 1})));

        let timeout = Duration::from_secs(1);
        let req = GatewayRequest::get("/a?page=2");
        assert_eq!(transport.send(&req, timeout).await.unwrap().status, 500);
        assert_eq!(transport.send(&req, timeout).await.unwrap().status, 200);

        let echoed = transport
            .send(&GatewayRequest::post("/b", json!({"x": 1})), timeout)
            .await
            .unwrap();
        assert_eq!(echoed.status, 201);
        assert_eq!(transport.delivered_count(), 3);
    }

    #[tokio::test]
    async fn test_offline_and_latency() {
        let transport = ScriptedTransport::new();
        transport.set_online(false);
        let req = GatewayRequest::get("/a");
        assert!(matches!(
            transport.send(&req, Duration::from_secs(1)).await,
            Err(TransportError::ConnectionFailed { .. })
        ));

        transport.set_online(true);
        transport.set_latency_ms(5_000);
        assert!(matches!(
            transport.send(&req, Duration::from_secs(1)).await,
            Err(TransportError::Timeout { timeout_ms: 1_000 })
        ));
        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.delivered_count(), 0);
    }
}
