//! Process-wide function registry
//!
//! Maps dotted names (`"math.sum"`, `"os.clock.now"`) to constructors that
//! return fresh node implementations. Registration is one-shot and happens
//! before the engine starts; the map is read-only on the hot path.
//!
//! The module separator is a single period, with no leading or trailing
//! separator and no consecutive separators. A duplicate or malformed name is
//! a hard error at program start.

use crate::node::Func;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type Constructor = Arc<dyn Fn() -> Box<dyn Func> + Send + Sync>;

fn registry() -> &'static Mutex<HashMap<String, Constructor>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Constructor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// True when the name satisfies the dotted-name shape.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(|segment| !segment.is_empty())
}

/// Register a constructor under a dotted name.
///
/// # Panics
///
/// Panics on a malformed name or a duplicate registration; both are
/// programming errors that must surface at startup.
pub fn register<F>(name: impl Into<String>, ctor: F)
where
    F: Fn() -> Box<dyn Func> + Send + Sync + 'static,
{
    let name = name.into();
    if !valid_name(&name) {
        panic!("invalid function name {:?}", name);
    }
    let mut map = registry().lock();
    if map.contains_key(&name) {
        panic!("function {:?} registered twice", name);
    }
    map.insert(name, Arc::new(ctor));
}

/// Build a fresh node implementation by full name.
pub fn lookup(name: &str) -> Option<Box<dyn Func>> {
    let ctor = registry().lock().get(name).cloned();
    ctor.map(|build| build())
}

/// True when a full name is registered.
pub fn contains(name: &str) -> bool {
    registry().lock().contains_key(name)
}

/// All registered names under a module prefix, with the prefix stripped,
/// in sorted order.
///
/// `lookup_prefix("math")` returns `["prod", "sum"]` when `"math.prod"` and
/// `"math.sum"` are registered.
pub fn lookup_prefix(prefix: &str) -> Vec<String> {
    let dotted = format!("{}.", prefix);
    let mut names: Vec<String> = registry()
        .lock()
        .keys()
        .filter_map(|name| name.strip_prefix(&dotted).map(str::to_string))
        .collect();
    names.sort();
    names
}
