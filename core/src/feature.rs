//! Named units of lazily fetched proxy state.

use std::{
	borrow::Cow,
	cmp::Ordering,
	collections::BTreeSet,
	fmt,
	hash::{Hash, Hasher},
};

/// A feature of a proxy object that has to be introspected before use.
///
/// Identity is `(namespace, id)`. The critical flag travels with the value but
/// is not part of it, so a set can never hold the same feature twice with
/// different criticality.
#[derive(Debug, Clone)]
pub struct Feature {
	namespace: Cow<'static, str>,
	id: u32,
	critical: bool,
}
impl Feature {
	pub const fn new(namespace: &'static str, id: u32) -> Self {
		Feature {
			namespace: Cow::Borrowed(namespace),
			id,
			critical: false,
		}
	}
	/// A feature whose failure means the object can never be ready for it.
	pub const fn critical(namespace: &'static str, id: u32) -> Self {
		Feature {
			namespace: Cow::Borrowed(namespace),
			id,
			critical: true,
		}
	}
	pub fn with_namespace(namespace: impl Into<String>, id: u32, critical: bool) -> Self {
		Feature {
			namespace: Cow::Owned(namespace.into()),
			id,
			critical,
		}
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}
	pub fn id(&self) -> u32 {
		self.id
	}
	pub fn is_critical(&self) -> bool {
		self.critical
	}
}

impl PartialEq for Feature {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id && self.namespace == other.namespace
	}
}
impl Eq for Feature {}
impl Hash for Feature {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.namespace.hash(state);
		self.id.hash(state);
	}
}
impl PartialOrd for Feature {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Feature {
	fn cmp(&self, other: &Self) -> Ordering {
		self.namespace
			.cmp(&other.namespace)
			.then(self.id.cmp(&other.id))
	}
}
impl fmt::Display for Feature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.namespace, self.id)
	}
}

/// Ordered set of features. The ordering doubles as the order in which
/// simultaneously unblocked features are started.
pub type Features = BTreeSet<Feature>;

/// Build a [`Features`] set from a list of features.
#[macro_export]
macro_rules! features {
	() => { $crate::feature::Features::new() };
	($($f:expr),+ $(,)?) => {{
		let mut set = $crate::feature::Features::new();
		$(set.insert(::std::clone::Clone::clone(&$f));)+
		set
	}};
}

#[test]
fn identity_ignores_criticality() {
	const A: Feature = Feature::new("Connection", 1);
	let a_critical = Feature::critical("Connection", 1);
	assert_eq!(A, a_critical);

	let set = features![A, a_critical, Feature::new("Connection", 0)];
	assert_eq!(set.len(), 2);
	assert_eq!(set.iter().next().map(Feature::id), Some(0));
	assert_eq!(A.to_string(), "Connection#1");
}

#[test]
fn ordering_by_namespace_then_id() {
	let a = Feature::with_namespace("Account", 7, false);
	let c = Feature::new("Channel", 0);
	assert!(a < c);
	assert!(Feature::new("Channel", 0) < Feature::new("Channel", 1));
}
