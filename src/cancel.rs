use crate::ClientError;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Trigger side of a [`Cancellation`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Deadline and/or manual cancellation threaded through one call.
///
/// The default never fires.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn none() -> Self {
        Self::default()
    }

    /// A cancellation tripped by the returned handle.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                rx: Some(rx),
                deadline: None,
            },
            CancelHandle { tx },
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(d) => d.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The reason this has already fired, if it has.
    pub fn check(&self) -> Option<ClientError> {
        if self.rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(ClientError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(ClientError::DeadlineExceeded);
        }
        None
    }

    /// Resolves once cancelled or past the deadline; pending forever otherwise.
    pub async fn fired(&self) -> ClientError {
        let manual = async {
            match self.rx.clone() {
                Some(mut rx) => {
                    let tripped = rx.wait_for(|c| *c).await.is_ok();
                    if tripped {
                        return;
                    }
                    // A dropped handle can never cancel.
                    std::future::pending::<()>().await
                }
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = manual => ClientError::Cancelled,
            _ = deadline => ClientError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_after_timeout() {
        let c = Cancellation::none().with_timeout(Duration::from_secs(5));
        assert_eq!(c.check(), None);
        let start = Instant::now();
        assert_eq!(c.fired().await, ClientError::DeadlineExceeded);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(c.check(), Some(ClientError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn handle_trips_all_clones() {
        let (c, handle) = Cancellation::new();
        let c2 = c.clone();
        handle.cancel();
        assert_eq!(c.fired().await, ClientError::Cancelled);
        assert_eq!(c2.check(), Some(ClientError::Cancelled));
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let c = Cancellation::none()
            .with_deadline(now + Duration::from_secs(10))
            .with_deadline(now + Duration::from_secs(1));
        assert_eq!(c.deadline, Some(now + Duration::from_secs(1)));
    }
}
