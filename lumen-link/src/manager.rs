use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::stack::{Credentials, DisconnectReason, LinkEvent, NetworkStack};
use super::state::{Action, ConnectionState, Connectivity};

/// Result of waiting for connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Ready,
    PermanentFailure,
    Timeout,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("timed out waiting for connectivity")]
    Timeout,

    #[error("connection retries exhausted")]
    PermanentFailure,
}

impl ConnectionOutcome {
    pub fn into_result(self) -> Result<(), ConnectivityError> {
        match self {
            Self::Ready => Ok(()),
            Self::PermanentFailure => Err(ConnectivityError::PermanentFailure),
            Self::Timeout => Err(ConnectivityError::Timeout),
        }
    }
}

/// Read-only view of the connectivity state.
///
/// The connectivity driver is the single writer, any number of readers
/// can be cloned from it.
#[derive(Debug, Clone)]
pub struct Readiness(watch::Receiver<ConnectionState>);

impl Readiness {
    /// Whether the network session is usable right now.
    ///
    /// This turns false as soon as the link is lost, before any retry.
    pub fn is_ready(&self) -> bool {
        *self.0.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.0.borrow()
    }

    /// Wait until the connectivity gives up for good
    pub async fn failed(&mut self) {
        // An error means the driver is gone, which is just as final
        let _ = self
            .0
            .wait_for(|state| *state == ConnectionState::Failed)
            .await;
    }

    /// Create a readiness signal that is not attached to any driver,
    /// fixed at the given state.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fixed(state: ConnectionState) -> Self {
        let (_, rx) = watch::channel(state);
        Self(rx)
    }
}

/// Owns the network session state, applying the retry policy to the events
/// emitted by the network stack.
pub struct ConnectivityManager<S> {
    driver: Option<(S, mpsc::UnboundedReceiver<LinkEvent>)>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl<S> ConnectivityManager<S>
where
    S: NetworkStack + Send + 'static,
{
    /// Create a new manager for the given stack and its event channel.
    ///
    /// No request is made until [`Self::connect`] is called.
    pub fn new(stack: S, events: mpsc::UnboundedReceiver<LinkEvent>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            driver: Some((stack, events)),
            state_tx,
            state_rx,
        }
    }

    pub fn readiness(&self) -> Readiness {
        Readiness(self.state_rx.clone())
    }

    /// Start connecting and wait until the session is ready or has failed
    /// for good.
    ///
    /// The wait is bounded by `timeout`. Network events keep being processed
    /// in the background after this returns, so the readiness signal stays
    /// current for the lifetime of the process.
    #[instrument(name = "connect", skip_all, fields(ssid = %credentials.ssid, max_retries = max_retries))]
    pub async fn connect(
        &mut self,
        credentials: Credentials,
        max_retries: u32,
        timeout: Duration,
    ) -> ConnectionOutcome {
        if let Some((stack, events)) = self.driver.take() {
            info!("connecting");
            let machine = Connectivity::new(max_retries);
            tokio::spawn(drive(
                stack,
                credentials,
                machine,
                events,
                self.state_tx.clone(),
            ));
        }

        let mut state_rx = self.state_rx.clone();
        let wait = state_rx.wait_for(|state| {
            matches!(state, ConnectionState::Connected | ConnectionState::Failed)
        });
        let res = tokio::time::timeout(timeout, wait)
            .await
            .map(|res| res.map(|state| *state));

        match res {
            Ok(Ok(ConnectionState::Connected)) => ConnectionOutcome::Ready,
            Ok(_) => ConnectionOutcome::PermanentFailure,
            Err(_) => {
                warn!("timed out after {timeout:?}");
                ConnectionOutcome::Timeout
            }
        }
    }
}

/// Connectivity driver. This is the only writer of the connection state.
async fn drive<S: NetworkStack>(
    stack: S,
    credentials: Credentials,
    mut machine: Connectivity,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut pending = VecDeque::new();
    if let Some(action) = machine.start() {
        state_tx.send_replace(machine.state());
        perform(&stack, &credentials, &machine, action, &mut pending);
    }

    loop {
        let event = match pending.pop_front() {
            Some(event) => event,
            None => match events.recv().await {
                Some(event) => event,
                None => {
                    debug!("network stack event channel closed");
                    break;
                }
            },
        };
        debug!(?event, "network event");

        let actions = machine.apply(event);

        // Publish the new state before acting on it, readers must never see
        // a stale connected state while a retry is being issued
        state_tx.send_replace(machine.state());

        for action in actions {
            perform(&stack, &credentials, &machine, action, &mut pending);
        }

        if machine.state() == ConnectionState::Failed {
            break;
        }
    }
}

fn perform<S: NetworkStack>(
    stack: &S,
    credentials: &Credentials,
    machine: &Connectivity,
    action: Action,
    pending: &mut VecDeque<LinkEvent>,
) {
    match action {
        Action::RequestConnect => {
            if let ConnectionState::RetryPending(n) = machine.state() {
                info!("retrying connection {n}");
            }
            if let Err(e) = stack.request_connect(credentials) {
                warn!("connection request failed: {e}");
                pending.push_back(LinkEvent::LinkDown(DisconnectReason::REQUEST_FAILED));
            }
        }
        Action::RequestAddress => {
            debug!("link up, acquiring address");
            if let Err(e) = stack.request_address() {
                warn!("address request failed: {e}");
                pending.push_back(LinkEvent::LinkDown(DisconnectReason::REQUEST_FAILED));
            }
        }
        Action::Ready(address) => info!(%address, "connected"),
        Action::Lost(reason) => warn!(%reason, "disconnected"),
        Action::GiveUp => error!(retries = machine.retries(), "connection failed permanently"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{AuthMode, StackError};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));

    #[derive(Clone, Default)]
    struct FakeStack {
        requests: Arc<AtomicUsize>,
        reject: bool,
    }

    impl NetworkStack for FakeStack {
        fn request_connect(&self, _: &Credentials) -> Result<(), StackError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(StackError::Rejected("no driver".into()));
            }
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            ssid: "SBC".into(),
            password: "password".into(),
            auth_threshold: AuthMode::Wpa2Psk,
        }
    }

    fn link_down() -> LinkEvent {
        LinkEvent::LinkDown(DisconnectReason::NO_AP_FOUND)
    }

    #[tokio::test]
    async fn it_reports_ready_once_an_address_is_acquired() {
        let stack = FakeStack::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectivityManager::new(stack.clone(), rx);
        let readiness = manager.readiness();
        assert!(!readiness.is_ready());

        tx.send(LinkEvent::LinkUp).unwrap();
        tx.send(LinkEvent::AddressAcquired(ADDR)).unwrap();

        let outcome = manager
            .connect(credentials(), 10, Duration::from_secs(30))
            .await;

        assert_eq!(outcome, ConnectionOutcome::Ready);
        assert!(readiness.is_ready());
        assert_eq!(stack.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn it_fails_permanently_after_exhausting_retries() {
        let stack = FakeStack::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectivityManager::new(stack.clone(), rx);

        for _ in 0..11 {
            tx.send(link_down()).unwrap();
        }

        let outcome = manager
            .connect(credentials(), 10, Duration::from_secs(30))
            .await;

        assert_eq!(outcome, ConnectionOutcome::PermanentFailure);
        assert_eq!(manager.readiness().state(), ConnectionState::Failed);
        // the initial request plus one per allowed retry
        assert_eq!(stack.requests.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn it_stops_requesting_after_failing() {
        let stack = FakeStack::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectivityManager::new(stack.clone(), rx);

        for _ in 0..3 {
            tx.send(link_down()).unwrap();
        }
        let outcome = manager
            .connect(credentials(), 2, Duration::from_secs(30))
            .await;
        assert_eq!(outcome, ConnectionOutcome::PermanentFailure);

        // the driver has exited, further events are never processed
        let _ = tx.send(link_down());
        tokio::task::yield_now().await;
        assert_eq!(stack.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn it_times_out_without_events() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectivityManager::new(FakeStack::default(), rx);

        let outcome = manager
            .connect(credentials(), 10, Duration::from_secs(30))
            .await;

        assert_eq!(outcome, ConnectionOutcome::Timeout);
        assert_eq!(
            outcome.into_result(),
            Err(ConnectivityError::Timeout)
        );
    }

    #[tokio::test]
    async fn it_treats_rejected_requests_as_disconnects() {
        let stack = FakeStack {
            reject: true,
            ..Default::default()
        };
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectivityManager::new(stack.clone(), rx);

        let outcome = manager
            .connect(credentials(), 3, Duration::from_secs(30))
            .await;

        assert_eq!(outcome, ConnectionOutcome::PermanentFailure);
        assert_eq!(stack.requests.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn it_clears_readiness_immediately_on_disconnect() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = ConnectivityManager::new(FakeStack::default(), rx);
        let mut readiness = manager.readiness();

        tx.send(LinkEvent::LinkUp).unwrap();
        tx.send(LinkEvent::AddressAcquired(ADDR)).unwrap();
        let outcome = manager
            .connect(credentials(), 1, Duration::from_secs(30))
            .await;
        assert_eq!(outcome, ConnectionOutcome::Ready);

        tx.send(link_down()).unwrap();
        let mut state_rx = manager.state_rx.clone();
        state_rx
            .wait_for(|s| *s == ConnectionState::RetryPending(1))
            .await
            .unwrap();
        assert!(!readiness.is_ready());

        // losing the link again exhausts the single retry
        tx.send(link_down()).unwrap();
        readiness.failed().await;
        assert_eq!(readiness.state(), ConnectionState::Failed);
    }
}
