//! Polymorphic protocol dispatch with per-operation, type-keyed caches.
//!
//! This crate provides:
//! - Protocol declaration (a named, open set of operation signatures)
//! - A binding registry mapping (operation, type) to implementations
//! - Dispatching operations with tiered resolution: static slot, dispatch
//!   cache, cold registry lookup, declared default
//! - Open extension: third-party types gain protocol support at run time
//!   without modifying their own definition
//! - Introspection of cache contents and resolvability, for tooling
//!
//! # Resolution Order
//!
//! A type authored with built-in knowledge of a protocol carries *static
//! slots* in its [`TypeDescriptor`]; those always win and never touch the
//! cache. Everything else resolves through the per-operation
//! [`DispatchCache`], falling back to the protocol's binding table on a
//! cold miss. The cache is a pure optimization: clearing it changes
//! latency, never results.
//!
//! # Example
//!
//! ```
//! use polyproto::{op_fn, Arity, ProtocolRegistry, TypeBuilder, TypeRegistry, Value};
//!
//! let protocols = ProtocolRegistry::new();
//! let types = TypeRegistry::new();
//!
//! let fs = protocols.declare("FileSystem", &[("ls", Arity::Exact(1))]).unwrap();
//! let container = TypeBuilder::new("Container").build(&types);
//!
//! // Open extension: Container did not declare FileSystem support.
//! fs.register_binding("ls", container.type_id(), op_fn(|recv, _args| {
//!     Ok(recv.as_instance().unwrap().state().clone())
//! })).unwrap();
//!
//! let ls = fs.operation("ls").unwrap();
//! let value = Value::instance(container, Value::str("contents"));
//! assert_eq!(ls.invoke(&value, &[Value::Unit]).unwrap(), Value::str("contents"));
//! ```

pub mod cache;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod type_obj;
pub mod value;

// Re-export the public surface.
pub use cache::DispatchCache;
pub use dispatch::DispatchOp;
pub use error::{DispatchResult, ProtocolError};
pub use protocol::{global_protocols, Arity, OpId, OpSig, Protocol, ProtocolRegistry};
pub use type_obj::{global_types, TypeBuilder, TypeDescriptor, TypeFlags, TypeId, TypeRegistry};
pub use value::{op_fn, Instance, OpFn, Value};
