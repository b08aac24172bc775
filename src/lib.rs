//! slabkit: a slab-allocating container toolkit for servers.
//!
//! Three tightly coupled layers:
//! - A per-core slab allocator returning 16-byte-aligned, zero-filled
//!   memory, coexisting with (but independent of) the system allocator.
//! - Containers that allocate from it: dynamic array, insertion-ordered
//!   hash map/set, binary string with small-string optimisation,
//!   intrusive list, and an atomic ref-count envelope.
//! - Risky Hash and its deterministic PRNG derivative, keying every map.
//!
//! # Usage
//!
//! ```ignore
//! // Optionally, as the process allocator:
//! #[global_allocator]
//! static GLOBAL: slabkit::SlabAlloc = slabkit::SlabAlloc;
//!
//! let mut m: slabkit::OrderedMap<String, u32> = slabkit::OrderedMap::new();
//! m.insert_keyed("answer".into(), 42);
//! ```
//!
//! Containers are not thread-safe (callers serialise); the allocator, the
//! ref-count envelope, and the PRNG are. After `fork()`, call
//! [`slab::after_fork`] in the child to reset the allocator locks.

/// Build-time tunables generated from `slabkit.toml` (see `build.rs`).
pub mod config {
    include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
}

mod macros;

pub mod array;
pub mod block;
pub mod list;
pub mod map;
pub mod numeric;
pub mod platform;
pub mod rand;
pub mod refcount;
pub mod risky;
pub mod slab;
#[cfg(feature = "stats")]
pub mod stats;
pub mod string;
pub mod sync;
pub mod tag;

// Re-export the working set at crate root for convenience.
pub use array::Array;
pub use map::{KeyHash, OrderedMap, OrderedSet};
pub use numeric::{atol, ftoa, ltoa};
pub use rand::{rand64, rand_bytes};
pub use refcount::Ref;
pub use risky::risky_hash;
pub use slab::SlabAlloc;
pub use string::{BinStr, StrInfo};
pub use tag::TaggedPtr;
