//! Single-shot terminal outcome signal

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::types::TerminalSignal;

/// Receiving side of an [`OutcomeSignal`], awaited by the session
pub type OutcomeReceiver = oneshot::Receiver<TerminalSignal>;

/// Sending side of the session outcome
///
/// At most one terminal signal is ever delivered. Raising again after the
/// first signal, or after the signal was closed, has no effect.
#[derive(Debug)]
pub struct OutcomeSignal {
    sender: Option<oneshot::Sender<TerminalSignal>>,
    raised: Option<TerminalSignal>,
}

impl OutcomeSignal {
    /// Create a signal together with its receiver
    pub fn channel() -> (Self, OutcomeReceiver) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
                raised: None,
            },
            receiver,
        )
    }

    /// Raise a terminal signal
    ///
    /// Returns `true` if this call delivered the session outcome.
    pub fn raise(&mut self, signal: TerminalSignal) -> bool {
        if let Some(first) = self.raised {
            warn!(?first, ignored = ?signal, "Terminal signal already raised");
            return false;
        }

        self.raised = Some(signal);
        match self.sender.take() {
            Some(sender) => {
                if sender.send(signal).is_err() {
                    debug!(?signal, "Outcome receiver already gone");
                }
                true
            }
            None => {
                debug!(?signal, "Outcome signal closed, not delivering");
                false
            }
        }
    }

    /// Signal raised so far, if any
    pub fn raised(&self) -> Option<TerminalSignal> {
        self.raised
    }

    pub fn is_raised(&self) -> bool {
        self.raised.is_some()
    }

    /// Drop the sender so the receiver observes that no outcome will come
    pub fn close(&mut self) {
        self.sender = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_delivers_once() {
        let (mut signal, receiver) = OutcomeSignal::channel();

        assert!(!signal.is_raised());
        assert!(signal.raise(TerminalSignal::Connected));
        assert!(!signal.raise(TerminalSignal::ConnectionFailed));

        assert_eq!(signal.raised(), Some(TerminalSignal::Connected));
        assert_eq!(receiver.await.unwrap(), TerminalSignal::Connected);
    }

    #[tokio::test]
    async fn test_close_without_raise() {
        let (mut signal, receiver) = OutcomeSignal::channel();

        signal.close();
        assert!(receiver.await.is_err());
        assert!(!signal.raise(TerminalSignal::AuthenticationFailed));
    }

    #[test]
    fn test_raise_after_receiver_dropped() {
        let (mut signal, receiver) = OutcomeSignal::channel();
        drop(receiver);

        assert!(signal.raise(TerminalSignal::AuthenticationFailed));
        assert!(signal.is_raised());
    }
}
