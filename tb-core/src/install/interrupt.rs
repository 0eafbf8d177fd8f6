// tb-core/src/install/interrupt.rs
//! Process-wide SIGINT flag. The handler only stores into an atomic; the installer polls
//! the flag at step boundaries and unwinds through its normal rollback path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tb_common::error::{Result, TbError};
use tracing::debug;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Keeps the SIGINT handler installed while an install session runs. Dropping it puts back
/// whatever disposition was there before, so other commands keep the default Ctrl-C.
pub struct InterruptGuard {
    previous: libc::sighandler_t,
}

impl InterruptGuard {
    pub fn install() -> Self {
        INTERRUPTED.store(false, Ordering::SeqCst);
        let handler = on_sigint as extern "C" fn(libc::c_int);
        // SAFETY: the handler only performs an atomic store, which is async-signal-safe.
        let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
        debug!("SIGINT handler installed");
        Self { previous }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // SAFETY: restores the disposition returned by the matching `signal` call.
        unsafe {
            libc::signal(libc::SIGINT, self.previous);
        }
        debug!("SIGINT handler removed");
    }
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Where an install session looks for interrupts: the process SIGINT flag, or a flag of
/// its own.
#[derive(Debug, Clone, Default)]
pub enum InterruptSource {
    #[default]
    Process,
    Flag(Arc<AtomicBool>),
}

impl InterruptSource {
    pub fn is_raised(&self) -> bool {
        match self {
            Self::Process => is_interrupted(),
            Self::Flag(flag) => flag.load(Ordering::SeqCst),
        }
    }

    /// Fails with `Interrupted` once the flag is raised.
    pub fn check(&self, name: &str) -> Result<()> {
        if self.is_raised() {
            debug!("[{}] Interrupt observed", name);
            return Err(TbError::Interrupted(name.to_string()));
        }
        Ok(())
    }
}
