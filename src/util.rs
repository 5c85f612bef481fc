use anyhow::anyhow;
use sentry_core::protocol::SpanStatus;
use std::any::Any;
use std::future::Future;

/// Turns the payload of a caught panic into an error carrying its message.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<&'static str>() {
        anyhow!("panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<String>() {
        anyhow!("panicked: {message}")
    } else {
        anyhow!("panicked")
    }
}

/// Runs `callback` inside a Sentry performance transaction named after the job.
pub(crate) async fn with_sentry_transaction<F, R, E, Fut>(
    transaction_name: &str,
    callback: F,
) -> Result<R, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let tx_ctx = sentry_core::TransactionContext::new(transaction_name, "queue.task");
    let tx = sentry_core::start_transaction(tx_ctx);

    let result = callback().await;

    tx.set_status(if result.is_ok() {
        SpanStatus::Ok
    } else {
        SpanStatus::UnknownError
    });
    tx.finish();

    result
}
