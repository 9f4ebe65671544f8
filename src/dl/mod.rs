//! Display list building blocks.
//!
//! A [`DlBody`] is a flat array of register writes in DMA memory. A
//! [`DlList`] is what gets scheduled: a primary body, optional fragment
//! bodies and chained lists, described to the device by a [`DlHeader`] in
//! header mode.

pub mod body;
pub mod header;
pub mod list;

pub use body::{DlBody, DlEntry, DL_ENTRY_SIZE};
pub use header::{DlHeader, DlHeaderList, HeaderFlags, DL_HEADER_SIZE, DL_MAX_BODIES};
pub use list::{DlList, DlListId, DL_NUM_ENTRIES};
