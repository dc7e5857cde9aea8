//! Async transforms: projecting, chaining, caching, and combining async
//! cells.
//!
//! All of these spawn onto the ambient Tokio runtime when they need to run
//! or re-run an operation. Failures inside a mapper surface as the result's
//! error state rather than propagating into the source's notification loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::cell::{AsyncCell, AsyncState, ListenerId, OpError, StateCell, WeakStateCell};
use crate::transform::{link_lifecycles, TimerSlot};

/// An async cell mirroring the source with `mapper` applied to its data.
///
/// `Err` from the mapper becomes the result's error state. Stale data is
/// mapped best-effort: a stale value the mapper rejects is simply dropped.
pub fn map_async<T, U, F>(source: &AsyncCell<T>, mapper: F) -> AsyncCell<U>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> Result<U, OpError> + Send + Sync + 'static,
{
    let project = move |state: &AsyncState<T>| -> AsyncState<U> {
        match state {
            AsyncState::Idle => AsyncState::Idle,
            AsyncState::Loading { stale } => AsyncState::Loading {
                stale: stale.as_ref().and_then(|value| mapper(value).ok()),
            },
            AsyncState::Success { data } => match mapper(data) {
                Ok(mapped) => AsyncState::Success { data: mapped },
                Err(error) => AsyncState::Error { error, stale: None },
            },
            AsyncState::Error { error, stale } => AsyncState::Error {
                error: error.clone(),
                stale: stale.as_ref().and_then(|value| mapper(value).ok()),
            },
        }
    };

    let result = AsyncCell::builder()
        .id(format!("{}:map_async", source.id()))
        .config(source.base().config().clone())
        .build();
    result.set_state(project(&source.state()));

    let listener = ListenerId::new();
    let weak_result = result.downgrade();
    source.subscribe(listener, move |state| {
        if let Some(result) = weak_result.upgrade() {
            result.set_state(project(state));
        }
    });

    link_lifecycles(source.base(), result.base(), listener, None);
    result
}

/// An async cell following the source's state after `duration` of silence.
pub fn debounce_async<T>(source: &AsyncCell<T>, duration: Duration) -> AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let result = AsyncCell::builder()
        .id(format!("{}:debounce", source.id()))
        .config(source.base().config().clone())
        .build();
    result.set_state(source.state());

    let timer = TimerSlot::new();
    let listener = ListenerId::new();
    let weak_result = result.downgrade();
    let timer_for_listener = timer.clone();
    source.subscribe(listener, move |state| {
        let state = state.clone();
        let weak_result = weak_result.clone();
        timer_for_listener.replace(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(result) = weak_result.upgrade() {
                result.set_state(state);
            }
        }));
    });

    link_lifecycles(source.base(), result.base(), listener, Some(timer));
    result
}

/// Run `continuation` on every success of `source`, exposing its lifecycle
/// as a new async cell.
///
/// The continuation goes through the result's own `execute`, so overlapping
/// successes obey latest-wins. Source `Idle`, `Loading`, and `Error` states
/// are mirrored directly.
pub fn chain<T, U, F>(source: &AsyncCell<T>, continuation: F) -> AsyncCell<U>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(T) -> BoxFuture<'static, Result<U, OpError>> + Send + Sync + 'static,
{
    let result = AsyncCell::builder()
        .id(format!("{}:chain", source.id()))
        .config(source.base().config().clone())
        .build();

    let weak_result = result.downgrade();
    let relay = move |state: &AsyncState<T>| {
        let Some(result) = weak_result.upgrade() else {
            return;
        };
        match state {
            AsyncState::Idle => result.clear(),
            AsyncState::Loading { .. } => {
                result.set_state(AsyncState::Loading { stale: None });
            }
            AsyncState::Error { error, .. } => result.set_error(error.clone()),
            AsyncState::Success { data } => {
                let operation = continuation(data.clone());
                tokio::spawn(async move {
                    let _ = result.execute(move || operation, false).await;
                });
            }
        }
    };

    relay(&source.state());

    let listener = ListenerId::new();
    source.subscribe(listener, move |state| relay(state));

    link_lifecycles(source.base(), result.base(), listener, None);
    result
}

/// Forward successes and clear them back to idle after `ttl`.
///
/// Every new success restarts the one-shot TTL timer. Non-success source
/// states are ignored: the cache keeps serving its value until it expires.
pub fn cached<T>(source: &AsyncCell<T>, ttl: Duration) -> AsyncCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let result = AsyncCell::builder()
        .id(format!("{}:cached", source.id()))
        .config(source.base().config().clone())
        .build();

    let timer = TimerSlot::new();
    let weak_result = result.downgrade();

    let store = {
        let timer = timer.clone();
        let weak_result = weak_result.clone();
        move |data: T| {
            let Some(result) = weak_result.upgrade() else {
                return;
            };
            result.set_data(data);
            let weak_result = weak_result.clone();
            timer.replace(tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                if let Some(result) = weak_result.upgrade() {
                    result.clear();
                }
            }));
        }
    };

    if let AsyncState::Success { data } = source.state() {
        store(data);
    }

    let listener = ListenerId::new();
    source.subscribe(listener, move |state| {
        if let AsyncState::Success { data } = state {
            store(data.clone());
        }
    });

    link_lifecycles(source.base(), result.base(), listener, Some(timer));
    result
}

/// An async cell recomputed by running `op` over the sources' current
/// values whenever any of them changes. Runs once eagerly.
pub fn computed_async<T, U, F>(sources: &[StateCell<T>], op: F) -> AsyncCell<U>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(Vec<T>) -> BoxFuture<'static, Result<U, OpError>> + Send + Sync + 'static,
{
    let result: AsyncCell<U> = AsyncCell::builder().build();

    let weak_sources: Vec<WeakStateCell<T>> =
        sources.iter().map(StateCell::downgrade).collect();
    let weak_result = result.downgrade();
    let launch: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        let Some(result) = weak_result.upgrade() else {
            return;
        };
        let mut values = Vec::with_capacity(weak_sources.len());
        for weak in &weak_sources {
            match weak.upgrade() {
                Some(cell) => values.push(cell.get()),
                None => return,
            }
        }
        let operation = op(values);
        tokio::spawn(async move {
            let _ = result.execute(move || operation, false).await;
        });
    });

    (*launch)();

    for source in sources {
        let listener = ListenerId::new();
        let launch = Arc::clone(&launch);
        source.subscribe(listener, move |_| (*launch)());
        link_lifecycles(source, result.base(), listener, None);
    }

    result
}

/// Aggregate a list of async cells into one.
///
/// No inputs is an immediate empty success. Otherwise the first error in
/// input order wins; any loading input makes the result loading; once every
/// input has succeeded the result carries their values in input order; a
/// remaining idle input (with nothing loading or failed) leaves the result
/// idle.
pub fn combine_async<T>(sources: &[AsyncCell<T>]) -> AsyncCell<Vec<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let result: AsyncCell<Vec<T>> = AsyncCell::builder().build();
    if sources.is_empty() {
        result.set_data(Vec::new());
        return result;
    }

    let weak_sources: Vec<_> = sources.iter().map(AsyncCell::downgrade).collect();
    let weak_result = result.downgrade();
    let recompute: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
        let Some(result) = weak_result.upgrade() else {
            return;
        };
        let mut values = Vec::with_capacity(weak_sources.len());
        let mut any_loading = false;
        let mut any_idle = false;
        for weak in &weak_sources {
            let Some(cell) = weak.upgrade() else {
                return;
            };
            match cell.state() {
                AsyncState::Error { error, .. } => {
                    result.set_state(AsyncState::Error { error, stale: None });
                    return;
                }
                AsyncState::Loading { .. } => any_loading = true,
                AsyncState::Idle => any_idle = true,
                AsyncState::Success { data } => values.push(data),
            }
        }
        if any_loading {
            result.set_state(AsyncState::Loading { stale: None });
        } else if any_idle {
            result.set_state(AsyncState::Idle);
        } else {
            result.set_state(AsyncState::Success { data: values });
        }
    });

    (*recompute)();

    for source in sources {
        let listener = ListenerId::new();
        let recompute = Arc::clone(&recompute);
        source.subscribe(listener, move |_| (*recompute)());
        link_lifecycles(source.base(), result.base(), listener, None);
    }

    result
}

/// Run `op` through `cell`, retrying on failure.
///
/// At most `max_retries` attempts are made (always at least one). The delay
/// before attempt `n` grows linearly: `delay * (n - 1)`. The whole retry
/// loop is one `execute`, so the cell shows a single loading phase and the
/// final outcome; the last error propagates to the caller.
pub async fn execute_with_retry<T, F, Fut>(
    cell: &AsyncCell<T>,
    op: F,
    max_retries: u32,
    delay: Duration,
) -> Result<T, OpError>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, OpError>>,
{
    cell.execute(
        move || async move {
            let mut attempt = 1u32;
            loop {
                match op().await {
                    Ok(value) => return Ok(value),
                    Err(error) => {
                        if attempt >= max_retries {
                            return Err(error);
                        }
                        tokio::time::sleep(delay * attempt).await;
                        attempt += 1;
                    }
                }
            }
        },
        false,
    )
    .await
}
