//! One-shot asynchronous results.
//!
//! A [`PendingOperation`] is finished exactly once, either successfully or
//! with a [`TpError`]. The finished notification is always published on a later
//! turn of the runtime, so a caller that receives an operation can always
//! start awaiting it before it completes, even when the result was already
//! known at creation time.

use crate::{
	TpError, TpResult,
	constants::ERROR_HANDLING_ERROR,
	event_loop::{defer, try_spawn},
};
use futures::{
	FutureExt,
	future::BoxFuture,
	stream::{FuturesUnordered, StreamExt},
};
use parking_lot::Mutex;
use std::{
	fmt,
	future::{Future, IntoFuture},
	sync::Arc,
};
use tokio::sync::watch;
use tracing::warn;

struct OperationShared {
	label: &'static str,
	// recorded synchronously by the setters, guards against double finishing
	result: Mutex<Option<TpResult>>,
	// published on the deferred turn
	finished: watch::Sender<Option<TpResult>>,
}
impl Drop for OperationShared {
	fn drop(&mut self) {
		if self.result.get_mut().is_none() {
			warn!(
				operation = self.label,
				"still pending when it was dropped, finished will never be emitted"
			);
		}
	}
}

/// Handle to an asynchronous operation. Clones refer to the same operation.
#[derive(Clone)]
pub struct PendingOperation {
	shared: Arc<OperationShared>,
}
impl PendingOperation {
	pub fn new(label: &'static str) -> Self {
		let (finished, _) = watch::channel(None);
		PendingOperation {
			shared: Arc::new(OperationShared {
				label,
				result: Mutex::new(None),
				finished,
			}),
		}
	}

	/// An operation that succeeds on the next turn.
	pub fn succeeded() -> Self {
		let op = Self::new("PendingSuccess");
		op.set_finished();
		op
	}
	/// An operation that fails with `error` on the next turn.
	pub fn failed(error: TpError) -> Self {
		let op = Self::new("PendingFailure");
		op.set_finished_with_error(error);
		op
	}

	/// Finish successfully. Ignored with a warning if already finished.
	pub fn set_finished(&self) {
		self.finish(Ok(()));
	}

	/// Finish with `error`. Ignored with a warning if already finished.
	pub fn set_finished_with_error(&self, mut error: TpError) {
		if error.name.is_empty() {
			warn!(
				operation = self.shared.label,
				"should be given a non-empty error name"
			);
			error.name = ERROR_HANDLING_ERROR.to_string();
		}
		self.finish(Err(error));
	}

	fn finish(&self, result: TpResult) {
		{
			let mut recorded = self.shared.result.lock();
			if let Some(previous) = recorded.as_ref() {
				match (previous, &result) {
					(Ok(()), Ok(())) => warn!(
						operation = self.shared.label,
						"trying to finish with success, but already succeeded"
					),
					(Err(e), Ok(())) => warn!(
						operation = self.shared.label,
						"trying to finish with success, but already failed with {e}"
					),
					(Ok(()), Err(new)) => warn!(
						operation = self.shared.label,
						"trying to fail with {}, but already succeeded", new.name
					),
					(Err(e), Err(new)) => warn!(
						operation = self.shared.label,
						"trying to fail with {}, but already failed with {e}", new.name
					),
				}
				return;
			}
			*recorded = Some(result.clone());
		}

		// The clone keeps the operation alive until the notification is out.
		let shared = self.shared.clone();
		defer(move || {
			shared.finished.send_replace(Some(result));
		});
	}

	pub fn is_finished(&self) -> bool {
		self.shared.finished.borrow().is_some()
	}
	/// Finished and succeeded.
	pub fn is_valid(&self) -> bool {
		matches!(*self.shared.finished.borrow(), Some(Ok(())))
	}
	/// Finished and failed.
	pub fn is_error(&self) -> bool {
		matches!(*self.shared.finished.borrow(), Some(Err(_)))
	}
	pub fn error(&self) -> Option<TpError> {
		match &*self.shared.finished.borrow() {
			Some(Err(e)) => Some(e.clone()),
			_ => None,
		}
	}
	pub fn error_name(&self) -> Option<String> {
		self.error().map(|e| e.name)
	}
	pub fn error_message(&self) -> Option<String> {
		self.error().map(|e| e.message)
	}

	/// Wait for the finished notification.
	pub fn finished(&self) -> impl Future<Output = TpResult> + Send + use<> {
		let mut rx = self.shared.finished.subscribe();
		async move {
			match rx.wait_for(Option::is_some).await {
				Ok(result) => result.clone().unwrap_or(Ok(())),
				// every handle was dropped without finishing
				Err(_) => Err(TpError::cancelled("Operation was dropped before finishing")),
			}
		}
	}

	/// Receiver that observes the published result.
	pub fn subscribe(&self) -> watch::Receiver<Option<TpResult>> {
		self.shared.finished.subscribe()
	}

	/// Whether both handles refer to the same operation.
	pub fn ptr_eq(&self, other: &PendingOperation) -> bool {
		Arc::ptr_eq(&self.shared, &other.shared)
	}
}
impl IntoFuture for PendingOperation {
	type Output = TpResult;
	type IntoFuture = BoxFuture<'static, TpResult>;

	fn into_future(self) -> Self::IntoFuture {
		let finished = self.finished();
		async move {
			// the handle itself keeps the sender alive while waiting
			let _op = self;
			finished.await
		}
		.boxed()
	}
}
impl fmt::Debug for PendingOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingOperation")
			.field("label", &self.shared.label)
			.field("result", &*self.shared.finished.borrow())
			.finish()
	}
}

/// Finish a fresh operation with the output of `future` once it resolves.
///
/// This is how a D-Bus call reply becomes a [`PendingOperation`]. Outside of a
/// tokio runtime the future is dropped and the operation fails with
/// `NotAvailable`.
pub fn spawn_operation<F>(label: &'static str, future: F) -> PendingOperation
where
	F: Future<Output = TpResult> + Send + 'static,
{
	let op = PendingOperation::new(label);
	let spawned = try_spawn({
		let op = op.clone();
		async move {
			match future.await {
				Ok(()) => op.set_finished(),
				Err(e) => op.set_finished_with_error(e),
			}
		}
	});
	if !spawned {
		op.set_finished_with_error(TpError::not_available(
			"No tokio runtime to run the operation on",
		));
	}
	op
}

/// Combines several operations into one.
pub struct PendingComposite;
impl PendingComposite {
	/// Finishes when all `operations` have finished.
	///
	/// With `fail_on_first_error` the composite fails as soon as any operation
	/// fails. Otherwise it waits for all of them and reports the first error in
	/// completion order, if any.
	pub fn new(
		operations: impl IntoIterator<Item = PendingOperation>,
		fail_on_first_error: bool,
	) -> PendingOperation {
		let mut waiting: FuturesUnordered<_> =
			operations.into_iter().map(|op| op.finished()).collect();
		spawn_operation("PendingComposite", async move {
			let mut first_error = None;
			while let Some(result) = waiting.next().await {
				if let Err(e) = result {
					if fail_on_first_error {
						return Err(e);
					}
					first_error.get_or_insert(e);
				}
			}
			first_error.map_or(Ok(()), Err)
		})
	}
}

#[cfg(test)]
pub(crate) async fn settle() {
	for _ in 0..64 {
		tokio::task::yield_now().await;
	}
}

#[tokio::test]
async fn finished_is_deferred() {
	let op = PendingOperation::new("test");
	op.set_finished();
	assert!(!op.is_finished());
	settle().await;
	assert!(op.is_finished());
	assert!(op.is_valid());
	assert!(!op.is_error());
}

#[tokio::test]
async fn single_assignment() {
	let op = PendingOperation::new("test");
	op.set_finished_with_error(TpError::not_available("first"));
	op.set_finished();
	op.set_finished_with_error(TpError::cancelled("second"));
	let result = op.clone().await;
	assert_eq!(result, Err(TpError::not_available("first")));
	assert_eq!(op.error_message().as_deref(), Some("first"));
}

#[tokio::test]
async fn empty_error_name_is_replaced() {
	let op = PendingOperation::failed(TpError::new("", "oops"));
	let err = op.await.unwrap_err();
	assert_eq!(err.name, ERROR_HANDLING_ERROR);
	assert_eq!(err.message, "oops");
}

#[tokio::test]
async fn await_after_finish() {
	let op = PendingOperation::succeeded();
	settle().await;
	assert!(op.is_finished());
	assert_eq!(op.finished().await, Ok(()));
}

#[tokio::test]
async fn composite_waits_for_all_and_keeps_first_error() {
	let a = PendingOperation::new("a");
	let b = PendingOperation::new("b");
	let c = PendingOperation::new("c");
	let composite = PendingComposite::new([a.clone(), b.clone(), c.clone()], false);

	b.set_finished_with_error(TpError::not_available("b"));
	settle().await;
	a.set_finished_with_error(TpError::cancelled("a"));
	settle().await;
	assert!(!composite.is_finished());

	c.set_finished();
	assert_eq!(composite.await, Err(TpError::not_available("b")));
}

#[tokio::test]
async fn composite_fails_fast() {
	let a = PendingOperation::new("a");
	let b = PendingOperation::new("b");
	let composite = PendingComposite::new([a.clone(), b.clone()], true);

	a.set_finished_with_error(TpError::cancelled("a"));
	assert_eq!(composite.await, Err(TpError::cancelled("a")));
	b.set_finished();
}

#[tokio::test]
async fn composite_of_nothing_succeeds() {
	let composite = PendingComposite::new(Vec::new(), true);
	assert_eq!(composite.await, Ok(()));
}

#[test]
fn spawn_without_runtime_fails() {
	let op = spawn_operation("test", async { Ok(()) });
	assert!(op.is_finished());
	assert_eq!(
		op.error_name().as_deref(),
		Some(crate::constants::ERROR_NOT_AVAILABLE)
	);
}

#[tokio::test]
async fn finished_outlives_the_handle() {
	let op = PendingOperation::new("test");
	let finished = op.clone().finished();
	op.set_finished();
	assert_eq!(finished.await, Ok(()));
}
