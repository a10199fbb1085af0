// ============================================================================
// RUNTIME - timeouts, sleep y spawn independientes de la plataforma
// ============================================================================
// wasm32: gloo-timers + wasm_bindgen_futures (event loop del navegador)
// nativo: tokio current-thread (spawn_local exige estar dentro de un LocalSet)
// ============================================================================

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Ejecuta `fut` con un límite de tiempo; al vencer, el futuro se abandona
#[cfg(target_arch = "wasm32")]
pub async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Result<F::Output, Elapsed> {
    use futures::future::{select, Either};

    let millis = limit.as_millis().min(u32::MAX as u128) as u32;
    let timer = gloo_timers::future::TimeoutFuture::new(millis);
    futures::pin_mut!(fut);

    match select(fut, timer).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(_) => Err(Elapsed(limit)),
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed(limit))
}

#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await
}

#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

/// Lanza una tarea en el executor local (sin `Send`)
#[cfg(target_arch = "wasm32")]
pub fn spawn_local<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// # Panics
///
/// Fuera de un `tokio::task::LocalSet`.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_local<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(future));
}
