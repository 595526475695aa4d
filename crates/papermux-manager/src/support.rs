use std::time::Duration;

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = Vec::<String>::new();
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = cur {
        let s = cause.to_string();
        cur = cause.source();
        if s.is_empty() {
            continue;
        }
        // thiserror's `{0}` formatting often repeats the source verbatim.
        if parts.last().is_some_and(|last| last.ends_with(&s)) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

/// Every wait the manager performs goes through here, so the countdown and
/// settle delays can be observed without sleeping in tests.
pub(crate) trait Pacer {
    async fn pause(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TokioPacer;

impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
