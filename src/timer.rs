use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

use crate::error::AppError;

// Dropping the timer before the deadline cancels it.
pub struct InactivityTimer {
    token: u64,
    _cancel: Sender<()>,
}

impl InactivityTimer {
    pub fn start<F>(token: u64, timeout: Duration, on_fire: F) -> Result<Self, AppError>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let (cancel, cancelled) = bounded::<()>(1);

        thread::Builder::new()
            .name(format!("inactivity-timer-{token}"))
            .spawn(move || match cancelled.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => on_fire(token),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })
            .map_err(|e| AppError::Runtime(format!("Failed to spawn inactivity timer {token}: {e}")))?;

        Ok(Self {
            token,
            _cancel: cancel,
        })
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    #[test]
    fn fires_after_timeout_with_its_token() {
        let fired = Arc::new(AtomicU64::new(0));
        let flag = fired.clone();
        let timer = InactivityTimer::start(7, Duration::from_millis(20), move |token| {
            flag.store(token, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(timer.token(), 7);

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn drop_cancels_before_fire() {
        let fired = Arc::new(AtomicU64::new(0));
        let flag = fired.clone();
        let timer = InactivityTimer::start(1, Duration::from_millis(100), move |token| {
            flag.store(token, Ordering::SeqCst);
        })
        .unwrap();
        drop(timer);

        thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
