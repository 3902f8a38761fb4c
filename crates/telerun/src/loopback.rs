//! In-process transport that hands payloads straight to a `Dispatcher`.
//!
//! Behaves like a network channel for one identity, without sockets. Closing
//! it abandons a pending call the same way a dropped connection would.

use std::sync::Arc;

use tokio::sync::watch;

use crate::dispatch::Dispatcher;
use crate::identity::Identity;
use crate::transport;
use crate::transport::Transport;

pub struct LoopbackTransport {
    identity: Identity,
    dispatcher: Arc<Dispatcher>,
    turn: tokio::sync::Mutex<()>,
    closed: watch::Sender<bool>,
}

impl LoopbackTransport {
    pub fn new(identity: Identity, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            identity,
            dispatcher,
            turn: tokio::sync::Mutex::new(()),
            closed: watch::Sender::new(false),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let _turn = self.turn.lock().await;
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(transport::Error::ChannelClosed);
        }
        // The dispatcher keeps running a job it already handed to a worker;
        // only the wait is abandoned.
        tokio::select! {
            reply = self.dispatcher.handle(&self.identity, payload) => Ok(reply),
            _ = closed.wait_for(|closed| *closed) => Err(transport::Error::ChannelClosed),
        }
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}
