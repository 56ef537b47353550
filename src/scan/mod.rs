//! Declarative HTML extraction.
//!
//! Types opt into scanning by describing their [`Shape`], a tree of
//! primitives, records and sequences whose record fields carry
//! `selector@attribute` specs. The shape compiles once into a [`Plan`]
//! memoized process-wide by the type's identity; running a plan walks the
//! DOM and produces a [`Value`] tree the type assembles itself from.
//!
//! ```
//! use skitter::{Field, Scannable, Shape, Value};
//!
//! struct Product {
//!     title: String,
//!     price: u64,
//! }
//!
//! impl Scannable for Product {
//!     fn shape() -> Shape {
//!         Shape::Record(vec![
//!             Field::new("title", "h1.title", Shape::Text),
//!             Field::new("price", "span.price@data-cents", Shape::Uint),
//!         ])
//!     }
//!
//!     fn from_value(value: &Value) -> Self {
//!         Self {
//!             title: value.get("title").map(Value::as_text).unwrap_or_default().to_string(),
//!             price: value.get("price").map(Value::as_uint).unwrap_or_default(),
//!         }
//!     }
//! }
//! ```
//!
//! Compilation errors, an invalid selector or a shape the scanner cannot
//! support, surface on the type's first use; extraction itself never
//! errors.

mod plan;
mod value;

pub use value::{Field, Shape, Value};

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use scraper::ElementRef;
use thiserror::Error;

use plan::{Opts, Plan};

/// Scan errors, all reported at plan compile time.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan: invalid selector {selector:?} in {type_name}")]
    Selector {
        selector: String,
        type_name: &'static str,
    },

    #[error("scan: {type_name} has no field selectors")]
    NoFields { type_name: &'static str },

    #[error("scan: sequence in {type_name} requires a selector")]
    SequenceSelector { type_name: &'static str },
}

/// A type that can be extracted from HTML.
pub trait Scannable: 'static {
    /// Describes how the type is extracted.
    fn shape() -> Shape;

    /// Assembles the type from an extracted value tree.
    fn from_value(value: &Value) -> Self;
}

/// Compiled plans, keyed by destination type identity.
///
/// Compilation failures are not cached; a broken type errors on every use.
static PLANS: Lazy<RwLock<HashMap<TypeId, Arc<Plan>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Scans a DOM node into `T`.
pub fn scan<T: Scannable>(root: ElementRef<'_>) -> Result<T, ScanError> {
    let plan = plan_for::<T>()?;
    Ok(T::from_value(&plan.run(root)))
}

fn plan_for<T: Scannable>() -> Result<Arc<Plan>, ScanError> {
    let id = TypeId::of::<T>();

    if let Some(plan) = PLANS.read().get(&id) {
        return Ok(Arc::clone(plan));
    }

    let plan = Arc::new(plan::compile(&T::shape(), Opts::default(), type_name::<T>())?);

    let mut plans = PLANS.write();
    Ok(Arc::clone(plans.entry(id).or_insert(plan)))
}
