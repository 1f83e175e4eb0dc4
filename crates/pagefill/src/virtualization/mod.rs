//! Page-tree virtualization.
//!
//! Bounds resident memory by writing parts of the produced page tree to a
//! [`SwapSpace`] and reloading them on demand:
//!
//! - [`VirtualizationStore`] owns frame child lists handed over by the fill
//!   engine and knows how to encode and decode elements and pages.
//! - [`PageStore`] keeps a document's completed pages, swapping out the
//!   oldest ones past a configured limit.
//! - [`VirtualizationOutput`] and [`VirtualizationInput`] are the byte sink
//!   and source of the encoding.

mod codec;
mod page;
mod store;
mod swap;

pub use codec::{VirtualizationInput, VirtualizationOutput};
pub use page::PageStore;
pub use store::VirtualizationStore;
pub use swap::{FileSwap, MemorySwap, SwapSpace};
