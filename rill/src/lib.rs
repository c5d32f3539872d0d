//! Rill's top level crate.
//! Reexports all others.

#![deny(missing_docs)]
#![deny(unused)]
#![deny(bad_style)]
#![deny(future_incompatible)]
#![deny(rust_2018_compatibility)]
#![deny(rust_2018_idioms)]

#[doc(inline)]
pub use rill_chain as chain;

#[doc(inline)]
pub use rill_graph as graph;
