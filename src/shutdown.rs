//! Cooperative cancellation.
//!
//! A one-way flag raised by the SIGINT/SIGTERM handler. The copy loop checks it
//! between chunks and the orchestrator checks it at every file boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (idempotent).
    #[inline]
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Raise this flag on Ctrl-C / SIGTERM. May only be installed once per process.
    pub fn install_signal_handler(&self) -> anyhow::Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.is_requested() {
                // Second interrupt: the user wants out now.
                std::process::exit(crate::exit_codes::exit::CANCELLED);
            }
            eprintln!("Interrupt received; finishing the current file and saving progress...");
            flag.request();
        })?;
        Ok(())
    }
}
