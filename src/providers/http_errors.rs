use anyhow::anyhow;
use std::error::Error as StdError;
use std::io::ErrorKind;

fn error_chain_matches(err: &(dyn StdError + 'static), kind: ErrorKind, needle: &str) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>()
            && io_err.kind() == kind
        {
            return true;
        }

        if source.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }

        current = source.source();
    }

    false
}

fn error_chain_has_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    error_chain_matches(err, ErrorKind::ConnectionRefused, "connection refused")
}

fn error_chain_has_timeout(err: &(dyn StdError + 'static)) -> bool {
    error_chain_matches(err, ErrorKind::TimedOut, "timed out")
}

pub(crate) fn api_request_error(
    err: reqwest::Error,
    api_url: &str,
    timeout_secs: u64,
) -> anyhow::Error {
    if err.is_timeout() || error_chain_has_timeout(&err) {
        return anyhow!(
            "Generation request timed out after {}s while calling '{}'. \
             Increase REQUEST_TIMEOUT_SECS or check API responsiveness.",
            timeout_secs,
            api_url
        );
    }

    if err.is_connect() {
        if error_chain_has_connection_refused(&err) {
            return anyhow!(
                "Connection refused by generation API at '{}'. \
                 Ensure GEMINI_BASE_URL points at a reachable endpoint.",
                api_url
            );
        }

        return anyhow!(
            "Failed to connect to generation API at '{}'. \
             Check GEMINI_BASE_URL and network connectivity.",
            api_url
        );
    }

    anyhow!("Failed to call generation API at '{}': {}", api_url, err)
}
