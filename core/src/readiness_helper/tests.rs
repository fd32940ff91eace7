use super::*;
use crate::{
	constants::{
		DBUS_ERROR_NAME_HAS_NO_OWNER, ERROR_CANCELLED, ERROR_INVALID_ARGUMENT, ERROR_NOT_AVAILABLE,
		ERROR_NOT_YET,
	},
	pending_operation::settle,
};

const CORE: Feature = Feature::critical("Test", 0);
const A: Feature = Feature::new("Test", 1);
const B: Feature = Feature::new("Test", 2);
const C: Feature = Feature::new("Test", 3);
const D: Feature = Feature::critical("Test", 4);

/// Records every introspection start and holds the requests open until the
/// test completes them.
#[derive(Clone, Default)]
struct Calls {
	started: Arc<Mutex<Vec<(Feature, u32)>>>,
	open: Arc<Mutex<Vec<IntrospectRequest>>>,
}
impl Calls {
	fn introspectable(&self, statuses: &[u32], depends_on: Features) -> Introspectable {
		let calls = self.clone();
		Introspectable::new(statuses.iter().copied(), depends_on, &[], move |request| {
			calls
				.started
				.lock()
				.push((request.feature().clone(), request.status()));
			calls.open.lock().push(request);
		})
	}

	fn started(&self) -> Vec<Feature> {
		self.started.lock().iter().map(|(f, _)| f.clone()).collect()
	}

	fn complete(&self, feature: &Feature, result: TpResult) {
		let request = {
			let mut open = self.open.lock();
			let index = open
				.iter()
				.position(|request| request.feature() == feature)
				.expect("feature was never started");
			open.remove(index)
		};
		request.complete(result);
	}
}

#[tokio::test]
async fn dependencies_are_introspected_first() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(B, calls.introspectable(&[0], features![A])),
		]),
	);

	let ready = helper.become_ready(features![B]);
	assert_eq!(ready.requested_features(), &features![B]);
	assert_eq!(helper.requested_features(), features![A, B]);
	assert!(calls.started().is_empty());

	settle().await;
	assert_eq!(calls.started(), vec![A]);
	assert_eq!(helper.check_feature_ready(&B).unwrap_err().name, ERROR_NOT_YET);

	calls.complete(&A, Ok(()));
	settle().await;
	assert_eq!(calls.started(), vec![A, B]);
	assert!(!ready.is_finished());

	calls.complete(&B, Ok(()));
	settle().await;
	assert!(ready.is_valid());
	assert_eq!(helper.actual_features(), features![A, B]);
	assert!(helper.missing_features().is_empty());
}

#[tokio::test]
async fn independent_features_start_together() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(B, calls.introspectable(&[0], features![])),
			(C, calls.introspectable(&[0], features![])),
			(D, calls.introspectable(&[0], features![A, B])),
		]),
	);

	let ready = helper.become_ready(features![C, D]);
	settle().await;
	assert_eq!(calls.started(), vec![A, B, C]);

	calls.complete(&B, Ok(()));
	calls.complete(&C, Ok(()));
	settle().await;
	assert_eq!(calls.started(), vec![A, B, C]);

	calls.complete(&A, Ok(()));
	settle().await;
	assert_eq!(calls.started(), vec![A, B, C, D]);

	calls.complete(&D, Ok(()));
	assert_eq!(ready.await, Ok(()));
}

#[tokio::test]
async fn failed_dependency_makes_dependents_missing() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(D, calls.introspectable(&[0], features![A])),
		]),
	);
	let mut status_ready = helper.subscribe_status_ready();

	let ready = helper.become_ready(features![D]);
	settle().await;
	calls.complete(&A, Err(TpError::not_available("no such thing")));
	settle().await;

	assert_eq!(calls.started(), vec![A]);
	assert_eq!(helper.missing_features(), features![A, D]);
	let error = helper.missing_feature_error(&D).unwrap();
	assert_eq!(error.name, ERROR_NOT_AVAILABLE);
	assert_eq!(
		error.message,
		"Feature depends on other features that are not available"
	);
	assert_eq!(ready.error(), Some(error));
	assert_eq!(status_ready.try_recv(), Ok(0));
}

#[tokio::test]
async fn failure_spreads_along_a_dependency_chain() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(B, calls.introspectable(&[0], features![A])),
			(D, calls.introspectable(&[0], features![B])),
		]),
	);

	let ready = helper.become_ready(features![D]);
	assert_eq!(helper.requested_features(), features![A, B, D]);
	settle().await;
	calls.complete(&A, Err(TpError::not_available("no such thing")));
	settle().await;

	assert_eq!(calls.started(), vec![A]);
	assert_eq!(helper.missing_features(), features![A, B, D]);
	assert_eq!(
		helper.missing_feature_error(&D),
		Some(TpError::not_available(
			"Feature depends on other features that are not available"
		))
	);
	assert!(ready.is_error());
}

#[tokio::test]
async fn unregistered_dependency_is_missing() {
	let calls = Calls::default();
	let unregistered = Feature::new("Test", 9);
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(D, calls.introspectable(&[0], features![unregistered]))]),
	);

	let ready = helper.become_ready(features![D]);
	settle().await;

	assert!(calls.started().is_empty());
	assert_eq!(helper.missing_features(), features![D, unregistered]);
	assert_eq!(
		helper.missing_feature_error(&unregistered),
		Some(TpError::not_available("Feature has no introspectable"))
	);
	let error = ready.await.unwrap_err();
	assert_eq!(error.name, ERROR_NOT_AVAILABLE);
	assert_eq!(
		error.message,
		"Feature depends on other features that are not available"
	);
}

#[tokio::test]
async fn criticality_decides_readiness_after_failure() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(D, calls.introspectable(&[0], features![])),
		]),
	);

	let optional = helper.become_ready(features![A]);
	let critical = helper.become_ready(features![D]);
	settle().await;
	calls.complete(&A, Err(TpError::not_available("optional")));
	calls.complete(&D, Err(TpError::not_available("critical")));
	settle().await;

	assert_eq!(optional.await, Ok(()));
	assert!(helper.is_feature_ready(&A));
	assert_eq!(critical.await, Err(TpError::not_available("critical")));
	assert!(!helper.is_feature_ready(&D));
	assert_eq!(
		helper.check_ready(&features![A, D]),
		Err(TpError::not_available("critical"))
	);
	assert_eq!(helper.missing_features(), features![A, D]);
}

#[tokio::test]
async fn same_request_shares_an_operation() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(B, calls.introspectable(&[0], features![])),
		]),
	);

	let first = helper.become_ready(features![A]);
	let second = helper.become_ready(features![A]);
	let other = helper.become_ready(features![A, B]);
	assert!(first.ptr_eq(&second));
	assert!(!first.ptr_eq(&other));

	settle().await;
	assert_eq!(calls.started(), vec![A, B]);
	calls.complete(&A, Ok(()));
	settle().await;
	assert!(first.is_valid());
	assert!(second.is_valid());
	assert!(!other.is_finished());

	// finished operations are not handed out again
	let third = helper.become_ready(features![A]);
	assert!(!third.ptr_eq(&first));
	assert_eq!(third.await, Ok(()));
	assert_eq!(calls.started(), vec![A, B]);
}

#[tokio::test]
async fn unsupported_feature_is_rejected() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, calls.introspectable(&[0], features![]))]),
	);
	let unknown = Feature::new("Elsewhere", 9);

	let ready = helper.become_ready(features![A, unknown]);
	assert!(!ready.is_finished());
	settle().await;
	assert_eq!(ready.error_name().as_deref(), Some(ERROR_INVALID_ARGUMENT));
	assert!(calls.started().is_empty());
	assert!(helper.requested_features().is_empty());

	let error = helper.check_feature_ready(&unknown).unwrap_err();
	assert_eq!(error, TpError::invalid_argument("Unsupported feature"));
}

#[tokio::test]
async fn duplicate_registration_is_ignored() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, calls.introspectable(&[0], features![]))]),
	);
	helper.add_introspectables(Introspectables::from([
		(
			A,
			Introspectable::new([5], features![], &[], |_| {
				panic!("replacement introspectable must not be used")
			}),
		),
		(B, calls.introspectable(&[0], features![])),
	]));

	assert_eq!(helper.supported_features(), features![A, B]);
	assert_eq!(helper.supported_statuses(), BTreeSet::from([0]));

	let ready = helper.become_ready(features![A]);
	settle().await;
	calls.complete(&A, Ok(()));
	assert_eq!(ready.await, Ok(()));
}

#[tokio::test]
async fn missing_interface_makes_feature_missing() {
	let calls = Calls::default();
	let started = calls.clone();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([
			(
				D,
				Introspectable::new([0], features![], &["org.example.Needed"], move |request| {
					started.open.lock().push(request)
				}),
			),
			(A, calls.introspectable(&[0], features![])),
		]),
	);
	helper.set_interfaces(["org.example.Other"]);

	let ready = helper.become_ready(features![A, D]);
	settle().await;
	assert!(calls.open.lock().iter().all(|request| request.feature() != &D));
	assert_eq!(
		helper.missing_feature_error(&D),
		Some(TpError::not_available(
			"Feature depend on interfaces that are not available"
		))
	);
	assert_eq!(calls.started(), vec![A]);

	calls.complete(&A, Ok(()));
	let error = ready.await.unwrap_err();
	assert_eq!(error.name, ERROR_NOT_AVAILABLE);
	assert_eq!(helper.actual_features(), features![A]);
}

#[tokio::test]
async fn feature_outside_its_statuses_is_satisfied_without_fetching() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		2,
		Introspectables::from([
			(A, calls.introspectable(&[0], features![])),
			(B, calls.introspectable(&[0, 2], features![A])),
		]),
	);

	let ready = helper.become_ready(features![B]);
	settle().await;
	assert_eq!(calls.started(), vec![B]);
	assert_eq!(helper.actual_features(), features![A]);

	calls.complete(&B, Ok(()));
	assert_eq!(ready.await, Ok(()));
	assert_eq!(helper.actual_features(), features![A, B]);
}

#[tokio::test]
async fn status_change_waits_for_in_flight_features() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, calls.introspectable(&[0, 1], features![]))]),
	);
	let mut status_ready = helper.subscribe_status_ready();

	let ready = helper.become_ready(features![A]);
	settle().await;
	helper.set_current_status(1);
	assert_eq!(helper.current_status(), 0);

	calls.complete(&A, Ok(()));
	assert_eq!(helper.current_status(), 1);
	assert!(helper.actual_features().is_empty());
	settle().await;
	assert!(!ready.is_finished());
	assert_eq!(*calls.started.lock(), vec![(A, 0), (A, 1)]);

	calls.complete(&A, Ok(()));
	settle().await;
	assert!(ready.is_valid());
	assert_eq!(status_ready.try_recv(), Ok(1));
	assert!(status_ready.try_recv().is_err());
}

#[tokio::test]
async fn status_change_back_to_current_keeps_results() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, calls.introspectable(&[0, 1], features![]))]),
	);

	let ready = helper.become_ready(features![A]);
	settle().await;
	helper.set_current_status(1);
	helper.set_current_status(0);

	calls.complete(&A, Ok(()));
	assert_eq!(ready.await, Ok(()));
	assert_eq!(helper.current_status(), 0);
	assert_eq!(calls.started(), vec![A]);
}

#[tokio::test]
async fn force_current_status_does_not_restart() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, calls.introspectable(&[0, 1], features![]))]),
	);
	let ready = helper.become_ready(features![A]);
	settle().await;
	calls.complete(&A, Ok(()));
	assert_eq!(ready.await, Ok(()));

	helper.force_current_status(1);
	settle().await;
	assert_eq!(helper.current_status(), 1);
	assert_eq!(helper.actual_features(), features![A]);
	assert_eq!(calls.started(), vec![A]);
}

#[tokio::test]
async fn proxy_invalidation_fails_outstanding_operations() {
	let calls = Calls::default();
	let proxy = DBusProxy::new(":1.7", "/org/example/Object", CORE);
	let helper = proxy.readiness_helper();
	helper.add_introspectables(Introspectables::from([
		(CORE, calls.introspectable(&[0], features![])),
		(A, calls.introspectable(&[0], features![])),
	]));

	let core_ready = proxy.become_ready(features![]);
	let optional = helper.become_ready(features![A]);
	settle().await;
	assert_eq!(calls.started(), vec![CORE, A]);

	let error = TpError::new(DBUS_ERROR_NAME_HAS_NO_OWNER, "Name owner lost");
	proxy.invalidate(error.clone());
	settle().await;
	assert_eq!(core_ready.error(), Some(error.clone()));
	assert_eq!(optional.error(), Some(error.clone()));

	calls.complete(&CORE, Ok(()));
	settle().await;
	assert!(helper.actual_features().is_empty());
	assert_eq!(helper.check_feature_ready(&CORE), Err(error.clone()));

	let later = helper.become_ready(features![A]);
	assert_eq!(later.await, Err(error));
}

#[tokio::test]
async fn late_completion_is_ignored() {
	let calls = Calls::default();
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, calls.introspectable(&[0], features![]))]),
	);
	helper.set_introspect_completed(&A, Ok(()));
	assert!(helper.actual_features().is_empty());

	let ready = helper.become_ready(features![A]);
	settle().await;
	calls.complete(&A, Ok(()));
	helper.set_introspect_completed(&A, Err(TpError::not_available("twice")));
	assert_eq!(ready.await, Ok(()));
	assert!(helper.missing_features().is_empty());
}

#[tokio::test]
async fn dropping_helper_cancels_operations() {
	let helper = ReadinessHelper::new(
		0,
		Introspectables::from([(A, Introspectable::new([0], features![], &[], drop))]),
	);
	let ready = helper.become_ready(features![A]);
	settle().await;
	assert!(!ready.is_finished());

	drop(helper);
	let error = ready.await.unwrap_err();
	assert_eq!(error.name, ERROR_CANCELLED);
	assert_eq!(error.message, "Destroyed");
}

#[tokio::test]
async fn nested_ready_follows_the_proxy() {
	let proxy = DBusProxy::new(":1.8", "/org/example/Object", CORE);
	proxy.readiness_helper().add_introspectables(Introspectables::from([(
		CORE,
		Introspectable::new([0], features![], &[], |request| request.complete(Ok(()))),
	)]));

	let nothing = PendingReady::nested(&proxy, features![]);
	assert_eq!(nothing.await, Ok(()));
	assert!(!proxy.is_ready(&features![]));

	let nested = PendingReady::nested(&proxy, features![CORE]);
	assert!(nested.proxy().is_some());
	assert_eq!(nested.await, Ok(()));
	assert!(proxy.is_ready(&features![CORE]));
}
