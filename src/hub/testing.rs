//! In-memory hub transport for tests

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::transport::{Connector, Transport};
use crate::error::{Error, Result};

/// Connector handing each new connection's server side to the test
pub(crate) struct FakeConnector {
    connections: mpsc::UnboundedSender<ServerEnd>,
    connects: AtomicUsize,
    attempts: AtomicUsize,
    failures: AtomicUsize,
    auths: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connections: tx,
            connects: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            auths: Arc::new(AtomicUsize::new(0)),
        });
        (connector, rx)
    }

    /// Make the next `n` connect attempts fail with a transport error
    pub(crate) fn fail_next_connects(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Connect attempts so far, failed ones included
    pub(crate) fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful connects so far
    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Auth frames written by the client so far
    pub(crate) fn auth_count(&self) -> usize {
        self.auths.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::ConnectionDropped("connection refused".into()));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        self.connections
            .send(ServerEnd { to_client, from_client })
            .map_err(|_| Error::ConnectionDropped("fake hub gone".into()))?;
        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeTransport {
            from_server,
            to_server: Some(to_server),
            auths: self.auths.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "fake://hub".into()
    }
}

struct FakeTransport {
    from_server: mpsc::UnboundedReceiver<Result<String>>,
    to_server: Option<mpsc::UnboundedSender<String>>,
    auths: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if text.contains("\"type\":\"auth\"") {
            self.auths.fetch_add(1, Ordering::SeqCst);
        }
        let sender = self
            .to_server
            .as_ref()
            .ok_or_else(|| Error::ConnectionDropped("closed".into()))?;
        sender
            .send(text)
            .map_err(|_| Error::ConnectionDropped("hub hung up".into()))
    }

    async fn recv_text(&mut self) -> Result<String> {
        match self.from_server.recv().await {
            Some(frame) => frame,
            None => Err(Error::ConnectionDropped("hub hung up".into())),
        }
    }

    async fn close(&mut self) {
        self.to_server = None;
    }
}

/// Server side of one fake connection
pub(crate) struct ServerEnd {
    to_client: mpsc::UnboundedSender<Result<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub(crate) fn send_json(&self, frame: Value) {
        let _ = self.to_client.send(Ok(frame.to_string()));
    }

    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Ok(text.to_string()));
    }

    /// Next frame written by the client, None once it closed the connection
    pub(crate) async fn recv_json(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        Some(serde_json::from_str(&text).expect("client sends JSON"))
    }

    pub(crate) async fn expect_auth(&mut self, token: &str) {
        let frame = self.recv_json().await.expect("auth frame");
        assert_eq!(frame["type"], "auth");
        assert_eq!(frame["access_token"], token);
    }

    /// Reset the connection after any frames already sent
    pub(crate) fn reset(self) {
        let _ = self
            .to_client
            .send(Err(Error::ConnectionDropped("connection reset by peer".into())));
    }

    /// Wait until the client closes or drops its transport
    pub(crate) async fn closed(mut self) {
        while self.from_client.recv().await.is_some() {}
    }
}
