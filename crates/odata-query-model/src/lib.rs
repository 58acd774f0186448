//! Model types for the OData query engine.
//!
//! This crate holds everything the engine consumes but does not own: the
//! entity metadata supplied by the registration subsystem, the EDM primitive
//! type system, and the error taxonomy returned to the HTTP layer.

pub mod edm;
pub mod error;
pub mod metadata;

pub use edm::{EdmType, TypeClass};
pub use error::{ErrorKind, QueryError, QueryResult};
pub use metadata::{
    EntityMetadata, EnumMember, Multiplicity, NavigationDescriptor, PropertyMetadata, Schema, snake_case,
};
