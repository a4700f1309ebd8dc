// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process transport answering from a script.
//!
//! Used by tests and by the offline demo. Routes match on path, optionally
//! narrowed by one query parameter; a route with a matching parameter wins
//! over a bare path route. One-shot replies queued with [`enqueue`] are
//! served first, then the route's standing reply. Unrouted paths get 404.
//!
//! [`enqueue`]: ScriptedTransport::enqueue

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use super::transport::{HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
enum Reply {
    Response(HttpResponse),
    Fail(String),
}

#[derive(Debug)]
struct Route {
    path: String,
    param: Option<(String, String)>,
    queue: VecDeque<Reply>,
    standing: Option<Reply>,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        if request.url.path() != self.path {
            return false;
        }
        match &self.param {
            Some((name, value)) => request
                .url
                .query_pairs()
                .any(|(k, v)| k == name.as_str() && v == value.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<(Instant, HttpRequest)>>,
    latency: Mutex<Duration>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_route<R>(&self, path: &str, param: Option<(&str, &str)>, f: impl FnOnce(&mut Route) -> R) -> R {
        let param = param.map(|(k, v)| (k.to_string(), v.to_string()));
        let mut routes = self.routes.lock();
        let index = match routes.iter().position(|r| r.path == path && r.param == param) {
            Some(i) => i,
            None => {
                routes.push(Route { path: path.to_string(), param, queue: VecDeque::new(), standing: None });
                routes.len() - 1
            }
        };
        f(&mut routes[index])
    }

    /// Standing reply for `path`.
    pub fn respond(&self, path: &str, response: HttpResponse) {
        self.with_route(path, None, |r| r.standing = Some(Reply::Response(response)));
    }

    /// Standing 200 JSON reply for `path`.
    pub fn respond_json(&self, path: &str, body: Value) {
        self.respond(path, HttpResponse::new(200, body.to_string()));
    }

    /// Standing 200 JSON reply for `path` when query `name=value` is present.
    pub fn respond_json_for(&self, path: &str, name: &str, value: &str, body: Value) {
        let reply = Reply::Response(HttpResponse::new(200, body.to_string()));
        self.with_route(path, Some((name, value)), |r| r.standing = Some(reply));
    }

    /// One-shot reply for `path`, served before the standing reply.
    pub fn enqueue(&self, path: &str, response: HttpResponse) {
        self.with_route(path, None, |r| r.queue.push_back(Reply::Response(response)));
    }

    /// One-shot connection failure for `path`.
    pub fn enqueue_failure(&self, path: &str, message: &str) {
        self.with_route(path, None, |r| r.queue.push_back(Reply::Fail(message.to_string())));
    }

    /// Standing connection failure for every route (offline).
    pub fn go_offline(&self) {
        for route in self.routes.lock().iter_mut() {
            route.queue.clear();
            route.standing = Some(Reply::Fail("offline".into()));
        }
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    #[must_use]
    pub fn call_count(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|(_, r)| r.url.path() == path).count()
    }

    /// When each request reached the transport.
    #[must_use]
    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    fn next_reply(&self, request: &HttpRequest) -> Option<Reply> {
        let mut routes = self.routes.lock();
        let pick = routes
            .iter()
            .position(|r| r.param.is_some() && r.matches(request))
            .or_else(|| routes.iter().position(|r| r.param.is_none() && r.matches(request)))?;
        let route = &mut routes[pick];
        route.queue.pop_front().or_else(|| route.standing.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().push((Instant::now(), request.clone()));
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.next_reply(&request) {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(TransportError::Connect(message)),
            None => Ok(HttpResponse::new(404, "")),
        }
    }
}
