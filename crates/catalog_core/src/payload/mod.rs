//! Raw provider payloads.
//!
//! These types mirror what each backend actually returns and are only ever touched by the
//! matching source adapter and the mapper. Everything downstream sees `CatalogItem`.

pub mod chat;
pub mod xtream;
