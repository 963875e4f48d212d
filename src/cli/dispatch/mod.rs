use crate::api::handlers::breach::{
    DEFAULT_IP_HEADER, DEFAULT_RATE_LIMIT_MAX, DEFAULT_RATE_LIMIT_WINDOW,
};
use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let breach_upstream = matches.get_one::<String>("breach-upstream").cloned();
    if let Some(upstream) = &breach_upstream {
        Url::parse(upstream).context("invalid breach upstream URL")?;
    }

    let breach_rate_limit = matches
        .get_one::<u64>("breach-rate-limit")
        .copied()
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX);

    let breach_rate_window_seconds = matches
        .get_one::<u64>("breach-rate-window")
        .copied()
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW.as_secs());

    let ip_header = matches
        .get_one::<String>("ip-header")
        .cloned()
        .unwrap_or_else(|| DEFAULT_IP_HEADER.to_string());

    let mail_url = matches.get_one::<String>("mail-url").cloned();
    let cache_required = matches.get_flag("cache-required");

    Ok(Action::Server(Args {
        port,
        dsn,
        breach_upstream,
        breach_rate_limit,
        breach_rate_window_seconds,
        ip_header,
        mail_url,
        cache_required,
    }))
}
