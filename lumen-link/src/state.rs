use std::fmt::Display;
use std::net::IpAddr;

use super::stack::{DisconnectReason, LinkEvent};

/// Network session state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// The link was lost `n` times since the last successful connection
    RetryPending(u32),
    Failed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::RetryPending(n) => write!(f, "retry pending ({n})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Side effects requested by a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Issue a new connection request to the network stack
    RequestConnect,
    /// Issue an address acquisition request to the network stack
    RequestAddress,
    /// The session is usable
    Ready(IpAddr),
    /// The session was lost
    Lost(DisconnectReason),
    /// No more connection requests will be issued
    GiveUp,
}

/// Connectivity state machine.
///
/// Transitions are driven exclusively by [`LinkEvent`]s and produce the
/// [`Action`]s the caller needs to perform. The machine does no I/O so it can
/// be fed synthetic event sequences.
#[derive(Debug, Clone)]
pub struct Connectivity {
    state: ConnectionState,
    retries: u32,
    max_retries: u32,
}

impl Connectivity {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Idle,
            retries: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Start connecting. Only has an effect on an idle machine.
    pub fn start(&mut self) -> Option<Action> {
        if self.state != ConnectionState::Idle {
            return None;
        }
        self.state = ConnectionState::Connecting;
        Some(Action::RequestConnect)
    }

    /// Apply a network event, returning the actions to perform in order
    pub fn apply(&mut self, event: LinkEvent) -> Vec<Action> {
        use ConnectionState::*;

        // Nothing moves the machine out of these states
        if matches!(self.state, Idle | Failed) {
            return Vec::new();
        }

        match event {
            LinkEvent::LinkUp => match self.state {
                Connecting | RetryPending(_) => {
                    self.state = Connecting;
                    vec![Action::RequestAddress]
                }
                _ => Vec::new(),
            },

            LinkEvent::AddressAcquired(address) => {
                self.state = Connected;
                self.retries = 0;
                vec![Action::Ready(address)]
            }

            LinkEvent::LinkDown(reason) => {
                let attempt = self.retries.saturating_add(1);
                self.retries = attempt;
                if attempt <= self.max_retries {
                    self.state = RetryPending(attempt);
                    vec![Action::Lost(reason), Action::RequestConnect]
                } else {
                    self.state = Failed;
                    vec![Action::Lost(reason), Action::GiveUp]
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 42));

    fn link_down() -> LinkEvent {
        LinkEvent::LinkDown(DisconnectReason::BEACON_TIMEOUT)
    }

    fn count_requests(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| **a == Action::RequestConnect)
            .count()
    }

    #[test]
    fn it_requests_a_connection_on_start() {
        let mut machine = Connectivity::new(10);
        assert_eq!(machine.start(), Some(Action::RequestConnect));
        assert_eq!(machine.state(), ConnectionState::Connecting);

        // starting twice does nothing
        assert_eq!(machine.start(), None);
    }

    #[test]
    fn it_ignores_events_before_start() {
        let mut machine = Connectivity::new(10);
        assert!(machine.apply(LinkEvent::LinkUp).is_empty());
        assert!(machine.apply(link_down()).is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn it_requests_an_address_on_link_up() {
        let mut machine = Connectivity::new(10);
        machine.start();

        assert_eq!(
            machine.apply(LinkEvent::LinkUp),
            vec![Action::RequestAddress]
        );
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn it_becomes_ready_when_an_address_is_acquired() {
        let mut machine = Connectivity::new(10);
        machine.start();
        machine.apply(LinkEvent::LinkUp);

        assert_eq!(
            machine.apply(LinkEvent::AddressAcquired(ADDR)),
            vec![Action::Ready(ADDR)]
        );
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn it_retries_once_per_disconnect_while_under_the_limit() {
        let max_retries = 5;
        let mut machine = Connectivity::new(max_retries);
        machine.start();

        for n in 0..max_retries {
            let actions = machine.apply(link_down());
            assert_eq!(machine.state(), ConnectionState::RetryPending(n + 1));
            assert_eq!(count_requests(&actions), 1);
        }
    }

    #[test]
    fn it_fails_permanently_once_retries_are_exhausted() {
        let mut machine = Connectivity::new(10);
        machine.start();

        let mut requests = 0;
        for _ in 0..10 {
            requests += count_requests(&machine.apply(link_down()));
        }
        assert_eq!(requests, 10);
        assert_eq!(machine.state(), ConnectionState::RetryPending(10));

        let actions = machine.apply(link_down());
        assert_eq!(
            actions,
            vec![
                Action::Lost(DisconnectReason::BEACON_TIMEOUT),
                Action::GiveUp
            ]
        );
        assert_eq!(machine.state(), ConnectionState::Failed);
    }

    #[test]
    fn it_never_requests_a_connection_after_failing() {
        let mut machine = Connectivity::new(0);
        machine.start();
        machine.apply(link_down());
        assert_eq!(machine.state(), ConnectionState::Failed);

        for event in [link_down(), LinkEvent::LinkUp, LinkEvent::AddressAcquired(ADDR)] {
            assert!(machine.apply(event).is_empty());
            assert_eq!(machine.state(), ConnectionState::Failed);
        }
    }

    #[test]
    fn it_resets_the_retry_counter_on_success() {
        let mut machine = Connectivity::new(3);
        machine.start();
        machine.apply(link_down());
        machine.apply(link_down());
        assert_eq!(machine.retries(), 2);

        machine.apply(LinkEvent::LinkUp);
        machine.apply(LinkEvent::AddressAcquired(ADDR));
        assert_eq!(machine.retries(), 0);

        // a full retry budget is available again
        for n in 1..=3 {
            machine.apply(link_down());
            assert_eq!(machine.state(), ConnectionState::RetryPending(n));
        }
    }

    #[test]
    fn it_reports_lost_sessions_from_any_state() {
        let mut machine = Connectivity::new(10);
        machine.start();
        machine.apply(LinkEvent::LinkUp);
        machine.apply(LinkEvent::AddressAcquired(ADDR));

        let actions = machine.apply(LinkEvent::LinkDown(DisconnectReason::ASSOC_LEAVE));
        assert_eq!(actions[0], Action::Lost(DisconnectReason::ASSOC_LEAVE));
        assert_eq!(machine.state(), ConnectionState::RetryPending(1));
    }
}
