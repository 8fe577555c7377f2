//! Global logging system.

use std::{
    env,
    panic,
};
use backtrace::Backtrace;
use tracing_subscriber::{
    fmt::{
        self,
        time::uptime,
    },
    prelude::*,
    Registry,
    EnvFilter,
};


/// Default logging environment filter. This crate is debug, everything else is warn.
const DEFAULT_FILTER: &'static str = "warn,sip_dispatch=debug";

/// Initializes a `tracing` logging backend which outputs to stdout. Accepts ecosystem-standard
/// `RUST_LOG` env filters. Configures some other logging tweaks too.
///
/// For embedding processes that don't already install their own subscriber. The library itself
/// only emits `tracing` events.
pub fn init_logging() {
    // initialize and install logging system
    let format = fmt::format()
        .compact()
        .with_timer(uptime())
        .with_line_number(true);
    let stdout_log = fmt::layer()
        .event_format(format);

    let mut filter = DEFAULT_FILTER.to_owned();
    if let Ok(env_filter) = env::var(EnvFilter::DEFAULT_ENV) {
        filter.push(',');
        filter.push_str(&env_filter);
    }

    let subscriber = Registry::default()
        .with(EnvFilter::new(filter))
        .with(stdout_log);
    tracing::subscriber::set_global_default(subscriber)
        .expect("unable to install log subscriber");
    info!("logging initialized");

    // make panic messages and backtrace go through logging system
    panic::set_hook(Box::new(|info| {
        error!("{}", info);
        if env::var("RUST_BACKTRACE").map(|val| val == "1").unwrap_or(true) {
            error!("{:?}", Backtrace::new());
        }
    }));
    trace!("installed custom panic hook");
}


#[test]
fn test_init_logging_installs_subscriber() {
    init_logging();
    info!("logging smoke test");
}
