//! The user aggregate: canonical record, its two projections, and the
//! persistence gateway that owns the durable store.

pub mod gateway;
pub mod memory;
pub mod user;

pub use gateway::{hash_credential, PgUserGateway, UserGateway};
pub use memory::MemoryUserGateway;
pub use user::{User, UserProfile, UserRecord};
