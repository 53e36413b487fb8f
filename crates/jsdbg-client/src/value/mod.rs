//! Client-side mirrors of remote VM values.

mod cache;
mod mirror;

pub use cache::{LoadError, MirrorsCallback, PropertyLoad, ValueCache};
pub use mirror::{Property, PropertySet, Scalar, TypeTag, ValueMirror};
