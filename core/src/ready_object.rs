use crate::{
	DBusProxy,
	feature::{Feature, Features},
	pending_ready::PendingReady,
	readiness_helper::{Introspectables, ReadinessHelper},
};
use std::sync::Weak;

/// An object with a core feature and a [`ReadinessHelper`]. Asking about an
/// empty feature set means asking about the core feature.
#[derive(Debug)]
pub struct ReadyObject {
	core_features: Features,
	helper: ReadinessHelper,
}
impl ReadyObject {
	pub fn new(core_feature: Feature) -> Self {
		ReadyObject {
			core_features: crate::features![core_feature],
			helper: ReadinessHelper::new(0, Introspectables::new()),
		}
	}
	pub(crate) fn for_proxy(proxy: Weak<DBusProxy>, core_feature: Feature) -> Self {
		ReadyObject {
			core_features: crate::features![core_feature],
			helper: ReadinessHelper::for_proxy(proxy, 0, Introspectables::new()),
		}
	}

	fn or_core<'a>(&'a self, features: &'a Features) -> &'a Features {
		if features.is_empty() {
			&self.core_features
		} else {
			features
		}
	}

	pub fn is_ready(&self, features: &Features) -> bool {
		self.helper.is_ready(self.or_core(features))
	}
	pub fn become_ready(&self, features: Features) -> PendingReady {
		if features.is_empty() {
			return self.helper.become_ready(self.core_features.clone());
		}
		self.helper.become_ready(features)
	}

	pub fn core_features(&self) -> &Features {
		&self.core_features
	}
	pub fn requested_features(&self) -> Features {
		self.helper.requested_features()
	}
	pub fn actual_features(&self) -> Features {
		self.helper.actual_features()
	}
	pub fn missing_features(&self) -> Features {
		self.helper.missing_features()
	}
	pub fn readiness_helper(&self) -> &ReadinessHelper {
		&self.helper
	}
}

#[tokio::test]
async fn empty_request_means_core() {
	use crate::readiness_helper::Introspectable;

	const CORE: Feature = Feature::critical("Thing", 0);
	let object = ReadyObject::new(CORE);
	object.readiness_helper().add_introspectables(Introspectables::from([(
		CORE,
		Introspectable::new([0], Features::new(), &[], |request| request.complete(Ok(()))),
	)]));

	assert!(!object.is_ready(&Features::new()));
	let ready = object.become_ready(Features::new());
	assert_eq!(ready.requested_features(), &crate::features![CORE]);
	assert_eq!(ready.await, Ok(()));
	assert!(object.is_ready(&Features::new()));
	assert_eq!(object.actual_features(), crate::features![CORE]);
}
