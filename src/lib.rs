//! # fastfair
//!
//! A concurrent, crash-consistent persistent B+-tree whose nodes live in a
//! byte-addressable pool mapped into the address space.
//!
//! The tree keeps every node readable at all times:
//! - Intra-node inserts and deletes shift entries in place, flushing only
//!   at cache-line boundaries, so a crash mid-shift leaves a node that
//!   still reads correctly.
//! - Splits build the new sibling off to the side, persist it, link it
//!   into the per-level sibling chain, and update the parent last; readers
//!   that miss cross the chain instead of failing.
//! - Readers take no locks. Each node scan is bracketed by two reads of a
//!   per-node switch counter whose parity encodes the valid scan
//!   direction; writers toggle it around shifts to force retries.
//!
//! ## Durability model
//!
//! Each completed operation is either fully visible or fully absent after
//! a crash. The pool never reuses space, node links are pool-relative
//! offsets, and the only volatile state - the per-node writer locks - is
//! rebuilt empty on reopen.
//!
//! ## Example
//!
//! ```no_run
//! use fastfair::FastFair;
//!
//! let tree = FastFair::open("/mnt/pmem0/fastfair.pool", 1 << 30)?;
//! tree.insert(42, 4200)?;
//! assert_eq!(tree.search(42), Some(4200));
//!
//! let mut buf = Vec::new();
//! tree.range(0, 100, &mut buf);
//! # Ok::<(), fastfair::Error>(())
//! ```

mod error;
mod lock;
mod node;
mod persist;
mod pool;
mod tree;

pub use error::{Error, Result};
pub use node::{Key, Value, CARDINALITY, PAGE_SIZE};
pub use persist::{set_write_latency, write_latency};
pub use tree::FastFair;
