use crate::{prelude::*, sv::Store};

/// Feature switch for premium functionality.
pub struct Gate<'a> {
  store: Store<'a>,
  basic: &'a HashSet<String>,
}

impl<'a> Gate<'a> {
  pub fn new(store: Store<'a>, basic: &'a HashSet<String>) -> Self {
    Self { store, basic }
  }

  /// Basic features are always on; everything else needs an active license.
  pub async fn allows(&self, feature: &str) -> Result<bool> {
    if self.basic.contains(feature) {
      return Ok(true);
    }
    self.store.is_active().await
  }
}
