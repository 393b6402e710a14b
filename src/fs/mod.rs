//! Building staged trees from real storage.

mod dir;

pub use dir::{Listing, Loading, LocalListing};
