use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Installs a compact fmt subscriber that writes through the test capture.
///
/// Defaults to `warn`; `RUST_LOG` overrides. Safe to call from every test.
pub fn init_test_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::init_test_tracing;

    #[test]
    fn unit_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
        tracing::warn!(check = "logging", "still usable after repeated init");
    }
}
