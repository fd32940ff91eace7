//! Dependency-ordered feature introspection.
//!
//! Every proxy owns a [`ReadinessHelper`] describing which [`Feature`]s it
//! can fetch and how. [`ReadinessHelper::become_ready`] pulls in the
//! dependency closure of the requested features and starts every feature
//! whose own dependencies are satisfied, so independent features are fetched
//! in parallel. Each introspection reports back through
//! [`IntrospectRequest::complete`], which unlocks whatever depended on it.
//!
//! Every state transition that can notify a caller happens on a later turn of
//! the runtime than the call that caused it.

#[cfg(test)]
mod tests;

use crate::{
	DBusProxy, TpError, TpResult,
	event_loop::defer,
	feature::{Feature, Features},
	pending_ready::PendingReady,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
	sync::{Arc, Weak},
};
use tokio::{runtime::Handle, sync::broadcast, task::AbortHandle};
use tracing::{debug, warn};

/// Callback that starts fetching a feature. It must eventually call
/// [`IntrospectRequest::complete`], either inline or from a spawned task.
pub type IntrospectFunc = Arc<dyn Fn(IntrospectRequest) + Send + Sync>;

/// How a single feature is fetched.
#[derive(Clone)]
pub struct Introspectable {
	makes_sense_for_statuses: BTreeSet<u32>,
	depends_on_features: Features,
	depends_on_interfaces: Vec<String>,
	introspect: IntrospectFunc,
	critical: bool,
}
impl Introspectable {
	pub fn new(
		makes_sense_for_statuses: impl IntoIterator<Item = u32>,
		depends_on_features: Features,
		depends_on_interfaces: &[&str],
		introspect: impl Fn(IntrospectRequest) + Send + Sync + 'static,
	) -> Self {
		Introspectable {
			makes_sense_for_statuses: makes_sense_for_statuses.into_iter().collect(),
			depends_on_features,
			depends_on_interfaces: depends_on_interfaces.iter().map(ToString::to_string).collect(),
			introspect: Arc::new(introspect),
			critical: false,
		}
	}
	pub fn with_critical(mut self, critical: bool) -> Self {
		self.critical = critical;
		self
	}

	pub fn makes_sense_for(&self, status: u32) -> bool {
		self.makes_sense_for_statuses.contains(&status)
	}
	pub fn makes_sense_for_statuses(&self) -> &BTreeSet<u32> {
		&self.makes_sense_for_statuses
	}
	pub fn depends_on_features(&self) -> &Features {
		&self.depends_on_features
	}
	pub fn depends_on_interfaces(&self) -> &[String] {
		&self.depends_on_interfaces
	}
	pub fn is_critical(&self) -> bool {
		self.critical
	}
}
impl fmt::Debug for Introspectable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Introspectable")
			.field("makes_sense_for_statuses", &self.makes_sense_for_statuses)
			.field("depends_on_features", &self.depends_on_features)
			.field("depends_on_interfaces", &self.depends_on_interfaces)
			.field("critical", &self.critical)
			.finish_non_exhaustive()
	}
}

pub type Introspectables = BTreeMap<Feature, Introspectable>;

/// Handed to an [`IntrospectFunc`] when its feature is started.
pub struct IntrospectRequest {
	helper: ReadinessHelper,
	feature: Feature,
	status: u32,
}
impl IntrospectRequest {
	pub fn feature(&self) -> &Feature {
		&self.feature
	}
	/// Status the introspection was started for.
	pub fn status(&self) -> u32 {
		self.status
	}
	pub fn helper(&self) -> &ReadinessHelper {
		&self.helper
	}
	/// Report the outcome of the introspection.
	pub fn complete(self, result: TpResult) {
		self.helper.set_introspect_completed(&self.feature, result);
	}
}

#[derive(Default)]
struct HelperState {
	current_status: u32,
	interfaces: Vec<String>,
	introspectables: Introspectables,
	supported_statuses: BTreeSet<u32>,
	supported_features: Features,
	satisfied: Features,
	requested: Features,
	missing: Features,
	pending: Features,
	in_flight: Features,
	missing_errors: FxHashMap<Feature, TpError>,
	pending_operations: Vec<PendingReady>,
	pending_status_change: bool,
	pending_status: u32,
	invalidation_watch: Option<AbortHandle>,
}
impl HelperState {
	fn register(&mut self, introspectables: Introspectables) {
		for (feature, introspectable) in introspectables {
			if self.introspectables.contains_key(&feature) {
				warn!(
					%feature,
					"trying to add an introspectable for a feature that already has one"
				);
				continue;
			}
			self.supported_statuses
				.extend(introspectable.makes_sense_for_statuses.iter().copied());
			self.supported_features.insert(feature.clone());
			self.introspectables.insert(feature, introspectable);
		}
	}

	/// Transitive feature dependencies of `feature`, not including itself.
	fn deps_for(&self, feature: &Feature) -> Features {
		let mut deps = Features::new();
		let mut stack = vec![feature.clone()];
		while let Some(next) = stack.pop() {
			let Some(introspectable) = self.introspectables.get(&next) else {
				continue;
			};
			for dep in &introspectable.depends_on_features {
				if deps.insert(dep.clone()) {
					stack.push(dep.clone());
				}
			}
		}
		deps
	}

	fn record_completion(&mut self, feature: &Feature, result: TpResult) {
		match result {
			Ok(()) => {
				self.satisfied.insert(feature.clone());
			}
			Err(error) => {
				if error.name.is_empty() {
					warn!(%feature, "introspection failed but no error name was given");
				}
				self.missing.insert(feature.clone());
				self.missing_errors.insert(feature.clone(), error);
			}
		}
		self.pending.remove(feature);
		self.in_flight.remove(feature);
	}

	/// Switch to `status` and queue everything requested again.
	fn reset_for_status(&mut self, status: u32) {
		self.current_status = status;
		self.satisfied.clear();
		self.missing.clear();
		self.missing_errors.clear();
		// requested already contains the dependency closures
		self.pending = self.requested.clone();
	}
}

struct HelperShared {
	proxy: Option<Weak<DBusProxy>>,
	state: Mutex<HelperState>,
	status_ready: broadcast::Sender<u32>,
}
impl Drop for HelperShared {
	fn drop(&mut self) {
		let state = self.state.get_mut();
		if let Some(watch) = state.invalidation_watch.take() {
			watch.abort();
		}
		for operation in state.pending_operations.drain(..) {
			operation.set_finished_with_error(TpError::cancelled("Destroyed"));
		}
	}
}

/// Drives the introspection of an object's features. Clones share state.
#[derive(Clone)]
pub struct ReadinessHelper {
	shared: Arc<HelperShared>,
}
impl ReadinessHelper {
	/// Helper for an object that cannot be invalidated.
	pub fn new(current_status: u32, introspectables: Introspectables) -> Self {
		Self::build(None, current_status, introspectables)
	}
	/// Helper whose readiness follows the validity of `proxy`.
	pub fn for_proxy(
		proxy: Weak<DBusProxy>,
		current_status: u32,
		introspectables: Introspectables,
	) -> Self {
		Self::build(Some(proxy), current_status, introspectables)
	}
	fn build(
		proxy: Option<Weak<DBusProxy>>,
		current_status: u32,
		introspectables: Introspectables,
	) -> Self {
		let mut state = HelperState {
			current_status,
			..Default::default()
		};
		state.register(introspectables);
		let (status_ready, _) = broadcast::channel(16);
		ReadinessHelper {
			shared: Arc::new(HelperShared {
				proxy,
				state: Mutex::new(state),
				status_ready,
			}),
		}
	}

	/// Register more features. Features that already have an introspectable
	/// are skipped with a warning, never replaced.
	pub fn add_introspectables(&self, introspectables: Introspectables) {
		let mut state = self.shared.state.lock();
		state.register(introspectables);
		debug!(
			supported_statuses = ?state.supported_statuses,
			supported_features = ?state.supported_features,
			"introspectables added"
		);
	}

	pub fn current_status(&self) -> u32 {
		self.shared.state.lock().current_status
	}

	/// Change the status, restarting introspection of everything requested so
	/// far. While features are in flight the change is held back until the
	/// last of them completes.
	pub fn set_current_status(&self, status: u32) {
		let mut state = self.shared.state.lock();
		if state.pending_status_change {
			state.pending_status = status;
			return;
		}
		if state.current_status == status {
			return;
		}
		if !state.in_flight.is_empty() {
			debug!(status, "status changed while introspection process was running");
			state.pending_status_change = true;
			state.pending_status = status;
			return;
		}
		state.reset_for_status(status);
		drop(state);
		self.schedule_iteration();
	}

	/// Set the status without restarting introspection. Useful when the status
	/// only becomes known during the first introspection run.
	pub fn force_current_status(&self, status: u32) {
		self.shared.state.lock().current_status = status;
	}

	pub fn interfaces(&self) -> Vec<String> {
		self.shared.state.lock().interfaces.clone()
	}
	/// Interfaces the object implements, checked against each
	/// introspectable's interface dependencies.
	pub fn set_interfaces(&self, interfaces: impl IntoIterator<Item = impl Into<String>>) {
		self.shared.state.lock().interfaces = interfaces.into_iter().map(Into::into).collect();
	}

	pub fn supported_features(&self) -> Features {
		self.shared.state.lock().supported_features.clone()
	}
	pub fn supported_statuses(&self) -> BTreeSet<u32> {
		self.shared.state.lock().supported_statuses.clone()
	}
	pub fn requested_features(&self) -> Features {
		self.shared.state.lock().requested.clone()
	}
	/// Features that were introspected successfully.
	pub fn actual_features(&self) -> Features {
		self.shared.state.lock().satisfied.clone()
	}
	pub fn missing_features(&self) -> Features {
		self.shared.state.lock().missing.clone()
	}
	pub fn missing_feature_error(&self, feature: &Feature) -> Option<TpError> {
		self.shared.state.lock().missing_errors.get(feature).cloned()
	}

	/// Subscribe to notifications that every requested feature is either
	/// satisfied or missing for the contained status.
	pub fn subscribe_status_ready(&self) -> broadcast::Receiver<u32> {
		self.shared.status_ready.subscribe()
	}

	fn proxy_invalidation(&self) -> Option<TpError> {
		let proxy = self.shared.proxy.as_ref()?;
		match proxy.upgrade() {
			Some(proxy) => proxy.invalidation(),
			None => Some(TpError::cancelled("Proxy was destroyed")),
		}
	}

	fn check_feature_ready_locked(&self, state: &HelperState, feature: &Feature) -> TpResult {
		if let Some(error) = self.proxy_invalidation() {
			return Err(error);
		}
		if !state.supported_features.contains(feature) {
			return Err(TpError::invalid_argument("Unsupported feature"));
		}

		let ready = if feature.is_critical() {
			state.satisfied.contains(feature)
		} else {
			state.satisfied.contains(feature) || state.missing.contains(feature)
		};
		if ready {
			return Ok(());
		}
		Err(state
			.missing_errors
			.get(feature)
			.cloned()
			.unwrap_or_else(|| TpError::not_yet("Feature is not ready yet")))
	}

	fn check_ready_locked(&self, state: &HelperState, features: &Features) -> TpResult {
		if let Some(error) = self.proxy_invalidation() {
			return Err(error);
		}
		features
			.iter()
			.try_for_each(|feature| self.check_feature_ready_locked(state, feature))
	}

	/// Whether `feature` is usable, and why not if it isn't.
	///
	/// A critical feature is ready only once satisfied. A non-critical one is
	/// also considered ready once it failed, since nothing more will happen
	/// to it.
	pub fn check_feature_ready(&self, feature: &Feature) -> TpResult {
		let state = self.shared.state.lock();
		self.check_feature_ready_locked(&state, feature)
	}
	pub fn is_feature_ready(&self, feature: &Feature) -> bool {
		self.check_feature_ready(feature).is_ok()
	}

	/// Like [`Self::check_feature_ready`] for every feature, reporting the first error.
	pub fn check_ready(&self, features: &Features) -> TpResult {
		let state = self.shared.state.lock();
		self.check_ready_locked(&state, features)
	}
	pub fn is_ready(&self, features: &Features) -> bool {
		self.check_ready(features).is_ok()
	}

	/// Start introspecting `requested` and everything it depends on.
	///
	/// Asking again for exactly the same set while a previous request is still
	/// in progress returns the same operation.
	pub fn become_ready(&self, requested: Features) -> PendingReady {
		self.watch_proxy_invalidation();

		if let Some(error) = self.proxy_invalidation() {
			let operation = PendingReady::new(requested, self.shared.proxy.clone());
			operation.set_finished_with_error(error);
			return operation;
		}

		let mut state = self.shared.state.lock();
		if !requested.is_subset(&state.supported_features) {
			warn!(
				?requested,
				supported = ?state.supported_features,
				"become_ready called with unsupported features"
			);
			let operation = PendingReady::new(requested, self.shared.proxy.clone());
			operation.set_finished_with_error(TpError::invalid_argument(
				"Requested features contains unsupported feature",
			));
			return operation;
		}

		if let Some(operation) = state
			.pending_operations
			.iter()
			.find(|operation| operation.requested_features() == &requested)
		{
			return operation.clone();
		}

		let mut with_deps = requested.clone();
		for feature in &requested {
			with_deps.extend(state.deps_for(feature));
		}
		state.requested.extend(with_deps.iter().cloned());
		state.pending.extend(with_deps);

		let operation = PendingReady::new(requested, self.shared.proxy.clone());
		state.pending_operations.push(operation.clone());
		drop(state);

		self.schedule_iteration();
		operation
	}

	/// Record the outcome of a feature's introspection and continue.
	pub fn set_introspect_completed(&self, feature: &Feature, result: TpResult) {
		if self.proxy_invalidation().is_some() {
			debug!(%feature, "ignoring introspection result, proxy is invalidated");
			return;
		}

		let mut state = self.shared.state.lock();
		debug!(%feature, success = result.is_ok(), "introspection completed");

		if !state.in_flight.contains(feature) {
			warn!(%feature, "introspection completed for a feature that is not in flight");
			return;
		}
		state.record_completion(feature, result);

		if state.pending_status_change {
			if !state.in_flight.is_empty() {
				return;
			}
			state.pending_status_change = false;
			let status = state.pending_status;
			if status != state.current_status {
				state.reset_for_status(status);
			}
		}
		drop(state);
		self.schedule_iteration();
	}

	fn schedule_iteration(&self) {
		let shared = Arc::downgrade(&self.shared);
		defer(move || {
			if let Some(shared) = shared.upgrade() {
				ReadinessHelper { shared }.iterate_introspection();
			}
		});
	}

	/// One scheduling pass. Resolves finished operations, then starts every
	/// pending feature whose dependencies are satisfied.
	pub fn iterate_introspection(&self) {
		if self.proxy_invalidation().is_some() {
			debug!("not iterating as the proxy is invalidated");
			return;
		}

		let mut resolved = Vec::new();
		let mut to_start = Vec::new();
		let mut status_ready = None;
		let mut reschedule = false;
		let status;
		{
			let mut guard = self.shared.state.lock();
			let state = &mut *guard;
			// Finishing operations or claiming readiness now would report on a
			// status that is about to be replaced.
			if state.pending_status_change {
				debug!("not iterating as a status change is pending");
				return;
			}
			status = state.current_status;

			// a dependency nobody registered can never be introspected
			let unregistered: Vec<Feature> = state
				.pending
				.iter()
				.filter(|feature| !state.introspectables.contains_key(*feature))
				.filter(|feature| !state.missing.contains(*feature))
				.cloned()
				.collect();
			for feature in unregistered {
				warn!(%feature, "depended on, but no introspectable was added for it");
				state.missing.insert(feature.clone());
				state.missing_errors.insert(
					feature,
					TpError::not_available("Feature has no introspectable"),
				);
			}

			let unreachable: Vec<Feature> = state
				.pending
				.iter()
				.filter(|feature| !state.missing.contains(*feature))
				.filter(|feature| !state.deps_for(feature).is_disjoint(&state.missing))
				.cloned()
				.collect();
			for feature in unreachable {
				debug!(%feature, "depends on a missing feature");
				state.missing.insert(feature.clone());
				state.missing_errors.insert(
					feature,
					TpError::not_available(
						"Feature depends on other features that are not available",
					),
				);
			}

			let completed: Features = state.satisfied.union(&state.missing).cloned().collect();

			let (finished, waiting): (Vec<_>, Vec<_>) =
				std::mem::take(&mut state.pending_operations)
					.into_iter()
					.partition(|operation| operation.requested_features().is_subset(&completed));
			state.pending_operations = waiting;
			for operation in finished {
				let result = self.check_ready_locked(state, operation.requested_features());
				resolved.push((operation, result));
			}

			if state.requested.is_subset(&completed) {
				status_ready = Some(status);
			} else {
				state.pending.retain(|feature| !completed.contains(feature));

				let ready_to_introspect: Vec<Feature> = state
					.pending
					.iter()
					.filter(|feature| {
						state.introspectables.get(*feature).is_some_and(|introspectable| {
							introspectable.depends_on_features.is_subset(&state.satisfied)
						})
					})
					.cloned()
					.collect();

				for feature in ready_to_introspect {
					if state.in_flight.contains(&feature) {
						continue;
					}
					let Some(introspectable) = state.introspectables.get(&feature).cloned() else {
						continue;
					};
					state.in_flight.insert(feature.clone());

					if !introspectable.makes_sense_for(status) {
						// nothing to fetch in this status
						state.record_completion(&feature, Ok(()));
						reschedule = true;
						break;
					}

					if let Some(interface) = introspectable
						.depends_on_interfaces
						.iter()
						.find(|interface| !state.interfaces.contains(interface))
					{
						debug!(%feature, %interface, "required interface is not present");
						state.record_completion(
							&feature,
							Err(TpError::not_available(
								"Feature depend on interfaces that are not available",
							)),
						);
						reschedule = true;
						break;
					}

					to_start.push((introspectable.introspect, feature));
				}
			}
		}

		for (operation, result) in resolved {
			match result {
				Ok(()) => operation.set_finished(),
				Err(error) => operation.set_finished_with_error(error),
			}
		}

		if let Some(status) = status_ready {
			debug!(status, "all requested features are ready");
			let _ = self.shared.status_ready.send(status);
			return;
		}

		for (introspect, feature) in to_start {
			debug!(%feature, status, "introspecting");
			introspect(IntrospectRequest {
				helper: self.clone(),
				feature,
				status,
			});
		}

		if reschedule {
			self.schedule_iteration();
		}
	}

	fn watch_proxy_invalidation(&self) {
		let Some(proxy) = self.shared.proxy.as_ref().and_then(Weak::upgrade) else {
			return;
		};
		let Ok(runtime) = Handle::try_current() else {
			return;
		};
		let mut state = self.shared.state.lock();
		if state.invalidation_watch.is_some() {
			return;
		}

		let mut invalidated = proxy.subscribe_invalidated();
		let shared = Arc::downgrade(&self.shared);
		let task = runtime.spawn(async move {
			let error = match invalidated.wait_for(Option::is_some).await {
				Ok(error) => error.clone(),
				Err(_) => return,
			};
			if let (Some(error), Some(shared)) = (error, shared.upgrade()) {
				ReadinessHelper { shared }.on_proxy_invalidated(error);
			}
		});
		state.invalidation_watch = Some(task.abort_handle());
	}

	fn on_proxy_invalidated(&self, error: TpError) {
		let operations = {
			let mut state = self.shared.state.lock();
			state.satisfied.clear();
			state.missing.clear();
			std::mem::take(&mut state.pending_operations)
		};
		debug!(%error, aborted = operations.len(), "proxy invalidated, aborting operations");
		for operation in operations {
			operation.set_finished_with_error(error.clone());
		}
	}
}
impl fmt::Debug for ReadinessHelper {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.shared.state.lock();
		f.debug_struct("ReadinessHelper")
			.field("current_status", &state.current_status)
			.field("requested", &state.requested)
			.field("satisfied", &state.satisfied)
			.field("missing", &state.missing)
			.field("pending", &state.pending)
			.field("in_flight", &state.in_flight)
			.finish()
	}
}
