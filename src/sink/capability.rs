//! Optional transport capabilities: hijack, push and close notification.

use axum::http::HeaderMap;
use hyper::upgrade::{OnUpgrade, Upgraded};
use tokio::sync::watch;

use crate::net::connection::ConnectionId;
use crate::sink::SinkError;

/// A connection taken over from the response pipeline.
///
/// The caller is expected to have committed a `101 Switching Protocols`
/// head; awaiting [`HijackedConnection::upgraded`] then yields the raw IO.
#[derive(Debug)]
pub struct HijackedConnection {
    connection: ConnectionId,
    upgrade: OnUpgrade,
}

impl HijackedConnection {
    pub(crate) fn new(connection: ConnectionId, upgrade: OnUpgrade) -> Self {
        Self {
            connection,
            upgrade,
        }
    }

    /// Identity of the transport connection that was taken over.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Wait for hyper to hand over the upgraded connection.
    pub async fn upgraded(self) -> Result<Upgraded, hyper::Error> {
        self.upgrade.await
    }
}

/// Server push capability.
pub trait Pusher: Send {
    /// Initiate a push of `target` with the given request headers.
    fn push(&mut self, target: &str, headers: &HeaderMap) -> Result<(), SinkError>;
}

/// Resolves once the transport releases the response body.
///
/// That happens when the client goes away and also when a finished response
/// has been fully sent, so it does not by itself mean the client disconnected.
#[derive(Debug, Clone)]
pub struct CloseNotify {
    rx: watch::Receiver<bool>,
}

impl CloseNotify {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_closed(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait for the body to be released. A dropped notifier counts as closed.
    pub async fn closed(&mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}

/// Fires the close notification when dropped.
#[derive(Debug)]
pub(crate) struct DisconnectGuard(pub(crate) watch::Sender<bool>);

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_notify_resolves_on_guard_drop() {
        let (tx, rx) = watch::channel(false);
        let guard = DisconnectGuard(tx);
        let mut notify = CloseNotify::new(rx);
        assert!(!notify.is_closed());

        drop(guard);
        notify.closed().await;
        assert!(notify.is_closed());
    }
}
