//! Memory sampling for prerender render processes.

use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::Pid;
use sysinfo::ProcessRefreshKind;
use sysinfo::ProcessesToUpdate;
use sysinfo::System;

/// Source of per-process memory figures.
pub trait MemorySampler: Send + Sync {
    /// Private bytes of `pid`, or `None` when the process cannot be inspected.
    fn private_bytes(&self, pid: u32) -> Option<u64>;
}

/// Samples the operating system's process table.
#[derive(Debug, Default)]
pub struct SystemMemorySampler {
    system: Mutex<System>,
}

impl SystemMemorySampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl MemorySampler for SystemMemorySampler {
    fn private_bytes(&self, pid: u32) -> Option<u64> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system.process(pid).map(|process| process.memory())
    }
}

/// Watches one render process against a memory ceiling.
///
/// The process is bound on first successful lookup and kept afterwards.
pub struct ResourceGuard {
    sampler: Arc<dyn MemorySampler>,
    pid: Option<u32>,
}

impl ResourceGuard {
    pub fn new(sampler: Arc<dyn MemorySampler>) -> Self {
        Self { sampler, pid: None }
    }

    pub fn is_bound(&self) -> bool {
        self.pid.is_some()
    }

    /// Binds to `pid` unless already bound.
    pub fn bind(&mut self, pid: Option<u32>) {
        if self.pid.is_none() {
            self.pid = pid;
        }
    }

    pub fn private_bytes(&self) -> Option<u64> {
        self.pid.and_then(|pid| self.sampler.private_bytes(pid))
    }

    /// True when the bound process is known to exceed `max_bytes`.
    pub fn exceeds(&self, max_bytes: u64) -> bool {
        self.private_bytes().is_some_and(|bytes| bytes > max_bytes)
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySampler;
    use super::ResourceGuard;
    use super::SystemMemorySampler;
    use std::sync::Arc;

    struct FixedSampler(u64);

    impl MemorySampler for FixedSampler {
        fn private_bytes(&self, _pid: u32) -> Option<u64> {
            Some(self.0)
        }
    }

    #[test]
    fn unbound_guard_never_exceeds() {
        let guard = ResourceGuard::new(Arc::new(FixedSampler(u64::MAX)));
        assert!(!guard.is_bound());
        assert!(!guard.exceeds(1));
    }

    #[test]
    fn binding_is_sticky() {
        let mut guard = ResourceGuard::new(Arc::new(FixedSampler(10)));
        guard.bind(Some(1));
        guard.bind(Some(2));
        assert!(guard.is_bound());
        assert!(guard.exceeds(9));
        assert!(!guard.exceeds(10));
    }

    #[test]
    fn system_sampler_sees_current_process() {
        let sampler = SystemMemorySampler::new();
        let bytes = sampler.private_bytes(std::process::id());
        assert!(bytes.is_some_and(|bytes| bytes > 0));
    }
}
