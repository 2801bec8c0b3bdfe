use std::io::Write;

/// Initialize the process-wide logger. The filter is read from the
/// `RUST_LOG` environment variable and defaults to `info`.
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = record.level();
            let target = record.target();
            let style = buf.default_level_style(level);
            let timestamp = buf.timestamp_millis();
            let args = record.args();
            writeln!(
                buf,
                "[{timestamp} {style}{level}{style:#} {target}] {args}"
            )
        })
        .init();
}
