//! Read-time authentication of file data against a Merkle hash tree.
//!
//! # Overview
//! A verity-enabled file carries a Merkle tree over its data blocks and a
//! trusted root hash. Data read back from untrusted storage is accepted only
//! after its block digest has been chained up to the root hash. Tree blocks
//! proven authentic are remembered while their pages stay in memory, so most
//! reads only hash the data itself.
//!
//! # Components
//! - [`merkletree::MerkleTreeParams`]: tree geometry, from the block size,
//!   the hash algorithm and the file size
//! - [`merkletree::VerifiedCache`]: which tree blocks are currently trusted,
//!   per page or per block depending on the geometry
//! - [`verify::verify_data_block`]: the ascend/descend walk for one data block
//! - [`verify::VerifyContext`]: batches the blocks of one I/O unit, pairing
//!   them for two-lane hashing
//! - [`verify::verify_blocks`] and [`verify::verify_bio`]: entry points for a
//!   freshly read page range and for a completed multi-segment read
//! - [`workqueue`]: a dedicated thread pool for deferred verification
//!
//! Tree pages come from a [`treefile::ReadMerkleTreePage`], usually a
//! [`treefile::TreeFile`] page cache.
//!
//! # Example
//! ```no_run
//! use verity::{config::VerityConfig, test_helper, verify, DataPage};
//!
//! let config = VerityConfig::default();
//! let data = vec![0x5au8; 1 << 20];
//! let sealed = test_helper::seal(&config, &data).unwrap();
//! let vi = sealed.info(&config, 1).unwrap();
//! let tree = sealed.tree_file();
//!
//! let page = DataPage::new(3, &data[3 * 4096..4 * 4096]);
//! assert!(verify::verify_page(&vi, &tree, page));
//! ```
//!
//! # Thread Safety
//! A [`VerityInfo`] may be shared by any number of verifying threads; the
//! verified-state cache is updated with atomic operations only.

pub mod bio;
pub mod config;
pub mod def;
pub mod error;
pub mod info;
pub mod merkletree;
pub mod report;
pub mod utils;
pub mod verify;
pub mod workqueue;

// for test
pub mod test_helper;

pub use bio::{Bio, BioVec, DataPage};
pub use error::VerityError;
pub use info::VerityInfo;
pub use verify::{verify_bio, verify_blocks, verify_data_block, verify_page, VerifyContext};
pub use workqueue::{enqueue_verify_work, exit_workqueue, init_workqueue};
