use std::env;

use chrono::Local;
use log::LevelFilter;

pub fn level_from_env(value: Option<&str>) -> LevelFilter {
    match value {
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("warn") => LevelFilter::Warn,
        Some("error") => LevelFilter::Error,
        _ => LevelFilter::Info, // Deployment output must reach the log by default
    }
}

pub fn setup_logging() -> Result<(), fern::InitError> {
    let level = level_from_env(env::var("LOG_LEVEL").ok().as_deref());

    // Lambda forwards stderr to CloudWatch
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}] {}: {}",
                Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("aws_smithy_runtime", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_level_from_env() {
        assert_eq!(level_from_env(Some("debug")), LevelFilter::Debug);
        assert_eq!(level_from_env(Some("error")), LevelFilter::Error);
        assert_eq!(level_from_env(Some("verbose")), LevelFilter::Info);
        assert_eq!(level_from_env(None), LevelFilter::Info);
    }
}
