//! Process panic hook that reports panics through `tracing`.
//!
//! Worker panics are already caught per job and turned into failed
//! outcomes; this hook makes sure the location and message still reach the
//! log, and that panics anywhere else (dispatcher thread, sink) are visible
//! in the same place as the rest of the run's events.

use std::panic::{self, PanicInfo};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, warn};

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Installs the hook once; later calls are no-ops.
pub fn install_panic_hook() {
    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        warn!("Panic hook already installed, skipping");
        return;
    }

    panic::set_hook(Box::new(|panic_info| {
        handle_panic(panic_info);
    }));

    tracing::debug!("Panic hook installed");
}

fn handle_panic(panic_info: &PanicInfo) {
    PANIC_COUNT.fetch_add(1, Ordering::SeqCst);

    let location = panic_info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "unknown location".to_string());

    let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic message".to_string()
    };

    error!(
        "Panic in thread {:?} at {}: {}",
        std::thread::current().name().unwrap_or("unnamed"),
        location,
        message
    );
}

pub fn is_panic_hook_installed() -> bool {
    PANIC_HOOK_INSTALLED.load(Ordering::SeqCst)
}

/// Panics observed since the hook was installed, caught or not.
pub fn panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_hook_installation_is_idempotent() {
        install_panic_hook();
        assert!(is_panic_hook_installed());

        install_panic_hook();
        assert!(is_panic_hook_installed());
    }

    #[test]
    fn test_caught_panic_is_counted() {
        install_panic_hook();
        let before = panic_count();

        let result = panic::catch_unwind(|| panic!("row exploded"));
        assert!(result.is_err());
        assert!(panic_count() > before);
    }
}
