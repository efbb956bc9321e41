use std::sync::atomic::{AtomicU32, Ordering};

pub type Pid = u32;

/// Who is running right now. Supplied by the scheduler.
pub trait CurrentProcess: Send + Sync {
    fn current_pid(&self) -> Pid;
}

/// A scheduler stand-in: one running pid, switched by the caller.
#[derive(Debug, Default)]
pub struct RunningProcess(AtomicU32);

impl RunningProcess {
    pub fn new(pid: Pid) -> Self {
        Self(AtomicU32::new(pid))
    }

    pub fn switch_to(&self, pid: Pid) {
        self.0.store(pid, Ordering::Relaxed);
    }
}

impl CurrentProcess for RunningProcess {
    fn current_pid(&self) -> Pid {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn switching_is_seen_through_the_trait() {
        let running = Arc::new(RunningProcess::new(3));
        let process: Arc<dyn CurrentProcess> = running.clone();
        assert_eq!(3, process.current_pid());
        running.switch_to(8);
        assert_eq!(8, process.current_pid());
    }
}
