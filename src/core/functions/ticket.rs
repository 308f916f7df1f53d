use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// One outstanding function call. Resolved exactly once.
#[derive(Debug)]
pub struct FunctionCallTicket {
    id: String,
    name: String,
    deadline: Instant,
    responded: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
}

impl FunctionCallTicket {
    pub(crate) fn new(id: impl Into<String>, name: impl Into<String>, deadline: Instant) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            deadline,
            responded: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Moves the ticket from pending to responded. Only the first caller gets
    /// `true` and may send the response.
    pub(crate) fn try_resolve(&self) -> bool {
        self.responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn attach_task(&self, handle: AbortHandle) {
        *self.task.lock() = Some(handle);
    }

    pub(crate) fn abort_task(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_resolves_once() {
        let ticket = FunctionCallTicket::new("call-1", "get_weather", Instant::now());
        assert!(!ticket.is_responded());
        assert!(ticket.try_resolve());
        assert!(!ticket.try_resolve());
        assert!(ticket.is_responded());
    }

    #[test]
    fn test_concurrent_resolve_has_single_winner() {
        let ticket = Arc::new(FunctionCallTicket::new(
            "call-1",
            "get_weather",
            Instant::now() + Duration::from_secs(1),
        ));

        let winners: usize = (0..8)
            .map(|_| {
                let ticket = ticket.clone();
                std::thread::spawn(move || ticket.try_resolve())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }
}
