use color_eyre::eyre;
use tracing_subscriber::layer::SubscriberExt;

use crate::config::LogStyle;

/// Install the global subscriber. `LOG_LEVEL` sets the default directive;
/// an explicit `RUST_LOG` still wins.
pub fn setup_logging(style: LogStyle, level: &str) -> eyre::Result<()> {
    let default_env_filter = tracing_subscriber::filter::EnvFilter::builder()
        .with_regex(true)
        .parse(level.to_ascii_lowercase())?;

    let env_filter = match std::env::var("RUST_LOG").ok() {
        Some(directive) => {
            match tracing_subscriber::filter::EnvFilter::builder().parse(directive) {
                Ok(env_filter) => env_filter,
                Err(err) => {
                    eprintln!("invalid log filter: {err}");
                    eprintln!("falling back to default logging");
                    default_env_filter
                }
            }
        }
        None => default_env_filter,
    };

    let fmt_layer_plain = tracing_subscriber::fmt::Layer::new()
        .compact()
        .with_writer(std::io::stdout);
    let fmt_layer_json = tracing_subscriber::fmt::Layer::new()
        .json()
        .with_writer(std::io::stdout);

    let subscriber = tracing_subscriber::registry()
        .with((style == LogStyle::Json).then_some(fmt_layer_json))
        .with((style == LogStyle::Plain).then_some(fmt_layer_plain))
        .with(env_filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
