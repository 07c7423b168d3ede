//! Process-wide logger setup.

use env_logger::{Builder, Env};
use std::io::Write;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "NOMA_LOG";

/// Install the `env_logger` backend once; later calls are ignored.
///
/// `default_level` applies when neither `NOMA_LOG` nor `RUST_LOG` is set.
pub fn init(default_level: &str) {
    let env = Env::default()
        .filter_or(LOG_ENV, std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string()));
    let mut builder = Builder::from_env(env);
    builder.format(|buf, record| {
        let ts = buf.timestamp_seconds();
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
