pub mod params;
pub mod verified;

pub use params::MerkleTreeParams;
pub use verified::VerifiedCache;
