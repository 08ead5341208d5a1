use tokio::sync::watch;

/// Signals cancellation to every HTTP call and sleep a handler issues
/// through the scraper context. Every suspension point the handler can
/// reach is selected against this token, so cancellation is visible at its
/// next await, not just at task start.
#[derive(Debug)]
pub struct CancelTrigger(watch::Sender<bool>);

#[derive(Clone, Debug)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelTrigger {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelTrigger(tx), CancelToken(rx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        while self.0.changed().await.is_ok() {
            if *self.0.borrow() {
                return;
            }
        }
    }
}
