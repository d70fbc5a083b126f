use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::StreamExt;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, info};

use super::EventStream;
use crate::{constants::DIAGNOSTICS_TARGET, types::event::Diagnostic};

/// Sends diagnostics to the log and, when attached, to a channel.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticChannel {
    sender: Option<mpsc::UnboundedSender<Diagnostic>>,
}

impl DiagnosticChannel {
    pub fn new(sender: mpsc::UnboundedSender<Diagnostic>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::Event(log) => {
                info!(target: DIAGNOSTICS_TARGET, event = ?log, "event received")
            }
            Diagnostic::Error(message) => {
                error!(target: DIAGNOSTICS_TARGET, %message, "subscription error")
            }
        }

        if let Some(sender) = &self.sender {
            // Nobody listening any more is not an error for the listener.
            let _ = sender.send(diagnostic);
        }
    }
}

/// Standing event listener.
///
/// The listener runs on its own task until [`SubscriptionHandle::unsubscribe`]
/// is called, the handle is dropped, or the event source ends.
#[derive(Debug)]
pub struct SubscriptionHandle {
    event: String,
    received: Arc<AtomicU64>,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn spawn(event: &str, mut stream: EventStream, diagnostics: DiagnosticChannel) -> Self {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let received = Arc::new(AtomicU64::new(0));
        let counter = received.clone();
        let name = event.to_string();

        let task = tokio::spawn(async move {
            loop {
                select! {
                    // Fires on unsubscribe and when the handle is dropped.
                    _ = &mut cancel_rx => break,
                    item = stream.next() => match item {
                        Some(Ok(log)) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                            diagnostics.emit(Diagnostic::Event(log));
                        }
                        Some(Err(e)) => diagnostics.emit(Diagnostic::Error(format!("{:#}", e))),
                        None => break,
                    },
                }
            }
            info!(target: DIAGNOSTICS_TARGET, event = %name, "listener stopped");
        });

        Self {
            event: event.to_string(),
            received,
            cancel: cancel_tx,
            task,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Number of events delivered so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the listener and waits for its task to end.
    pub async fn unsubscribe(self) {
        let Self { cancel, task, .. } = self;

        let _ = cancel.send(());
        let _ = task.await;
    }
}
