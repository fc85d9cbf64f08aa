/// Retries an async collaborator call while `$retryable` accepts the error,
/// up to three attempts with a growing pause between them.
macro_rules! retry_collaborator_call {
    ($context:expr, $operation:expr, $retryable:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const BASE_DELAY_MILLIS: u64 = 250;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS || !($retryable)(&err) => {
                    log::warn!(
                        "Giving up on {} after {} attempt(s): {}",
                        context_value,
                        attempt,
                        err
                    );
                    break Err(err);
                }
                Err(err) => {
                    let delay_millis = BASE_DELAY_MILLIS * u64::from(attempt);
                    log::debug!(
                        "{} failed on attempt {}/{}: {}; next try in {}ms",
                        context_value,
                        attempt,
                        MAX_ATTEMPTS,
                        err,
                        delay_millis
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_millis)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_collaborator_call;
