//! Time-based transforms: debounce and throttle.
//!
//! Both operate on plain cells. `debounce` owns a one-shot timer task and
//! therefore needs a Tokio runtime; `throttle` only compares instants.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::cell::{ListenerId, StateCell};
use crate::transform::{link_lifecycles, TimerSlot};

/// Forward only the latest value after `duration` of source silence.
///
/// Every source notification restarts the timer, so a burst of writes
/// produces exactly one forward carrying the final value.
pub fn debounce<T>(source: &StateCell<T>, duration: Duration) -> StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let result = StateCell::builder(source.get())
        .id(format!("{}:debounce", source.id()))
        .config(source.config().clone())
        .build();

    let timer = TimerSlot::new();
    let listener = ListenerId::new();
    let weak_result = result.downgrade();
    let timer_for_listener = timer.clone();
    source.subscribe(listener, move |value| {
        let value = value.clone();
        let weak_result = weak_result.clone();
        timer_for_listener.replace(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(result) = weak_result.upgrade() {
                result.force_set(value);
            }
        }));
    });

    link_lifecycles(source, &result, listener, Some(timer));
    result
}

/// Forward the first value immediately, then suppress forwarding until
/// `duration` has elapsed since the last forward.
///
/// Values arriving inside the suppression window are dropped, not queued:
/// nothing is delivered when the window reopens until the source notifies
/// again.
pub fn throttle<T>(source: &StateCell<T>, duration: Duration) -> StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    let result = StateCell::builder(source.get())
        .id(format!("{}:throttle", source.id()))
        .config(source.config().clone())
        .build();

    let last_forward: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let listener = ListenerId::new();
    let weak_result = result.downgrade();
    source.subscribe(listener, move |value| {
        let now = Instant::now();
        {
            let mut last = last_forward.lock();
            let open = last.map_or(true, |at| now.duration_since(at) >= duration);
            if !open {
                return;
            }
            *last = Some(now);
        }
        if let Some(result) = weak_result.upgrade() {
            result.force_set(value.clone());
        }
    });

    link_lifecycles(source, &result, listener, None);
    result
}
