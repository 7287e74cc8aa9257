//! Shared adapter helpers.

use ms_domain::{EngineErrorKind, Error};

/// Map a reqwest transport error onto the per-engine error taxonomy.
pub(crate) fn from_reqwest(engine: &str, e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        EngineErrorKind::Timeout
    } else if e.is_decode() {
        EngineErrorKind::Parse
    } else if e.is_status() {
        EngineErrorKind::Http
    } else {
        EngineErrorKind::Network
    };
    Error::Engine {
        engine: engine.to_string(),
        kind,
        message: e.to_string(),
    }
}

/// Build an engine error for a non-2xx response. 429 is reported as
/// ratelimited so the aggregator does not count it as a hard failure.
pub(crate) fn from_status(engine: &str, status: reqwest::StatusCode) -> Error {
    let kind = if status.as_u16() == 429 {
        EngineErrorKind::RateLimited
    } else {
        EngineErrorKind::Http
    };
    Error::Engine {
        engine: engine.to_string(),
        kind,
        message: format!("upstream returned {status}"),
    }
}

/// Parse-stage failure.
pub(crate) fn parse_error(engine: &str, message: impl Into<String>) -> Error {
    Error::Engine {
        engine: engine.to_string(),
        kind: EngineErrorKind::Parse,
        message: message.into(),
    }
}

/// Registrable host portion of an absolute URL, for the result `domain`
/// field.
pub(crate) fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_www() {
        assert_eq!(
            host_of("https://www.example.com/a/b").as_deref(),
            Some("example.com")
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn status_429_maps_to_ratelimited() {
        let err = from_status("brave", reqwest::StatusCode::TOO_MANY_REQUESTS);
        match err {
            Error::Engine { kind, .. } => assert_eq!(kind, EngineErrorKind::RateLimited),
            other => panic!("unexpected error: {other}"),
        }
    }
}
