use std::future::Future;
use tokio::runtime::Handle;
use tracing::warn;

/// Run `f` on a later turn of the runtime, never inline.
///
/// Outside of a tokio runtime there is no later turn to post to, so the call
/// happens immediately and a warning is logged.
pub(crate) fn defer(f: impl FnOnce() + Send + 'static) {
	match Handle::try_current() {
		Ok(handle) => {
			handle.spawn(async move { f() });
		}
		Err(_) => {
			warn!("no tokio runtime to defer onto, running callback inline");
			f()
		}
	}
}

/// Spawn `future` on the current runtime. Returns false, with a warning, when
/// there is none.
pub(crate) fn try_spawn(future: impl Future<Output = ()> + Send + 'static) -> bool {
	match Handle::try_current() {
		Ok(handle) => {
			handle.spawn(future);
			true
		}
		Err(_) => {
			warn!("no tokio runtime to spawn onto");
			false
		}
	}
}

#[tokio::test]
async fn defer_is_not_inline() {
	use std::sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	};
	let ran = Arc::new(AtomicBool::new(false));
	defer({
		let ran = ran.clone();
		move || ran.store(true, Ordering::SeqCst)
	});
	assert!(!ran.load(Ordering::SeqCst));
	tokio::task::yield_now().await;
	assert!(ran.load(Ordering::SeqCst));
}
