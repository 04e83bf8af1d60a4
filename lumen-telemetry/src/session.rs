use tokio::sync::watch;

/// Create a transport session flag, returning its only writer and a reader
pub fn channel() -> (SessionWriter, Session) {
    let (tx, rx) = watch::channel(false);
    (SessionWriter(tx), Session(rx))
}

/// Write side of the session flag, owned by the transport event handler
#[derive(Debug)]
pub struct SessionWriter(watch::Sender<bool>);

impl SessionWriter {
    /// Update the flag, returning whether it changed
    pub fn set_active(&self, active: bool) -> bool {
        self.0.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        })
    }
}

/// Read side of the session flag
#[derive(Debug, Clone)]
pub struct Session(watch::Receiver<bool>);

impl Session {
    pub fn is_active(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until the session becomes active.
    ///
    /// Returns false if the writer went away before that happened.
    pub async fn active(&mut self) -> bool {
        self.0.wait_for(|active| *active).await.is_ok()
    }
}
