//! Process-wide spec registry
//!
//! Maps namespaced identifiers to specs. Registration is
//! idempotent-overwrite (last write wins) and immediately visible to
//! subsequent lookups. Lookups clone the `Arc<Spec>` out of the lock, so
//! readers never observe a half-written entry and evaluation never holds
//! the lock while walking a spec — which is what makes lazily-resolved
//! recursive spec graphs safe.

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::{Result, SpecError};
use crate::ident::Ident;
use crate::spec::Spec;

static SPECS: OnceCell<RwLock<HashMap<Ident, Arc<Spec>>>> = OnceCell::new();

fn cell() -> &'static RwLock<HashMap<Ident, Arc<Spec>>> {
    SPECS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn read() -> RwLockReadGuard<'static, HashMap<Ident, Arc<Spec>>> {
    match cell().read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write() -> RwLockWriteGuard<'static, HashMap<Ident, Arc<Spec>>> {
    match cell().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Register a spec under an identifier, overwriting any previous entry
pub fn register(id: impl Into<Ident>, spec: Spec) {
    let id = id.into();
    debug!(ident = %id, "registering spec");
    write().insert(id, Arc::new(spec));
}

/// Look up a registered spec
pub fn lookup(id: &Ident) -> Result<Arc<Spec>> {
    read()
        .get(id)
        .cloned()
        .ok_or_else(|| SpecError::UnknownSpec(id.clone()))
}

/// Whether an identifier is registered
pub fn is_registered(id: &Ident) -> bool {
    read().contains_key(id)
}
