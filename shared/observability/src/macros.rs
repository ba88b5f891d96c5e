//! Logging macros shared by the RAG crates.

/// Run a block and log how long it took under the `timing` target.
#[macro_export]
macro_rules! log_timed {
    ($name:expr, $block:expr) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(target: "timing", operation = $name, duration_ms = duration_ms, "operation completed");
        result
    }};
}

/// Log a graph database operation
#[macro_export]
macro_rules! log_db {
    ($operation:expr, $label:expr) => {
        tracing::debug!(target: "database", operation = $operation, label = $label, "db operation");
    };
    ($operation:expr, $label:expr, $count:expr) => {
        tracing::debug!(target: "database", operation = $operation, label = $label, count = $count, "db operation");
    };
}

/// Log a call to an LLM or embedding provider
#[macro_export]
macro_rules! log_external_call {
    ($service:expr, $endpoint:expr) => {
        tracing::debug!(target: "external", service = $service, endpoint = $endpoint, "calling external service");
    };
    ($service:expr, $endpoint:expr, $duration_ms:expr, $status:expr) => {
        tracing::debug!(target: "external", service = $service, endpoint = $endpoint, duration_ms = $duration_ms, status = $status, "external call completed");
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_compile() {
        let value = log_timed!("sum", { 1 + 2 });
        assert_eq!(value, 3);

        log_db!("MERGE", "__Community__");
        log_db!("SET", "__Entity__", 12);

        log_external_call!("groq", "/chat/completions");
        log_external_call!("groq", "/chat/completions", 120u64, 200u16);
    }
}
