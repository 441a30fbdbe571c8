use std::fmt::{Debug, Formatter};
use std::sync::Arc;


/// Partitions all stored protocol state, e.g. per connection or per tenant. The delivery engine
///  passes it through to the store and the delivery handler without looking inside.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    pub fn new(key: impl AsRef<str>) -> Scope {
        Scope(Arc::from(key.as_ref()))
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scope({})", self.0)
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope::new(value)
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Scope(Arc::from(value))
    }
}
