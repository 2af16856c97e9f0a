/// Sharded, tenant-isolated vector storage routing

pub mod router;

#[cfg(test)]
mod tests;

pub use router::{ShardQueryResult, ShardRouter};
