//! Client-side session layer: wires the transport, the reconcilers,
//! and the REST collaborators into one task per authenticated user.

pub mod api;
pub mod config;
pub mod session;

mod handlers;

use tracing_subscriber::{fmt, EnvFilter};

pub use api::{ForumApi, NullApi};
pub use config::SessionConfig;
pub use session::{spawn_session, SessionCommand, SessionUpdate};

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// default filter. Call once, before spawning any session.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("murmur_client=debug,murmur_net=debug,murmur_sync=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
