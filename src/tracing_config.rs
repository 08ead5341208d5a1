use std::sync::atomic::{AtomicBool, Ordering};

use tracing::subscriber::set_global_default;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs a process-wide subscriber once. Later calls are no-ops, so
/// binaries and tests can both call this unconditionally. `name` is the
/// process name attached to every event, for disambiguating logs when
/// multiple binaries run side by side.
pub fn configure(name: impl Into<String>) {
    if INITIALIZED.swap(true, Ordering::Acquire) {
        return;
    }

    let env_filter = EnvFilter::try_from_env("LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    set_global_default(subscriber).expect("setting global tracing subscriber");

    tracing::info!(process = %name.into(), "tracing configured");
}
