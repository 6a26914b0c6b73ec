//! Ingress: how counter snapshots get from the array onto local disk.

pub mod scp;

pub use self::scp::{fetch, FetchError, ScpConfig};
