//! Sources, derivative identities and the file-backed derivative cache.

mod gateway;
mod identity;
mod origin;
mod sources;
mod store;

pub use gateway::{Derivation, DerivativeGateway, Provenance};
pub use identity::{DerivativeId, RequesterId, SourceId};
pub use origin::OriginFetcher;
pub use sources::{Ingested, SourceLibrary};
pub use store::Store;
