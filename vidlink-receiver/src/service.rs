//! Receiver service core logic.
//!
//! Wires the probed display environment, the built-in pipeline
//! catalog, and the kiosk hooks into a failover controller, then runs
//! it until the stop handle flips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use vidlink_core::{builtin_catalog, FailoverController};

use crate::config::ReceiverConfig;
use crate::kiosk::KioskSignals;
use crate::probe;

/// The top-level receiver service.
pub struct ReceiverService {
    config: ReceiverConfig,
    running: Arc<AtomicBool>,
}

impl ReceiverService {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops the service from another task (Ctrl-C
    /// handler, tests).
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until stopped.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);

        let display = probe::probe_display();
        let catalog = builtin_catalog(&display);
        info!(candidates = catalog.len(), "pipeline catalog built");

        let gate = KioskSignals::from_config(&self.config.kiosk);
        let controller = FailoverController::new(
            self.config.to_options(),
            catalog,
            display,
            Arc::clone(&self.running),
        );

        controller.run(&gate).await;
    }
}
