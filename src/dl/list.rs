//! Display lists (command lists).

use core::fmt;
use core::ptr::NonNull;

use alloc::sync::Arc;
use alloc::vec::{self, Vec};

use super::body::DlBody;
use super::header::{DlHeader, HeaderLink, DL_HEADER_SIZE, DL_MAX_BODIES};
use crate::errors::{DlError, DlResult, ModeOp, Rejected};
use crate::hw::{AddressingMode, CyclingMode, HwProgram};
use crate::mem::{DmaAddr, DmaAllocator};

/// Register writes a display list's primary body can hold.
pub const DL_NUM_ENTRIES: usize = 256;

/// Identity of a pooled display list.
///
/// Lists are allocated once when their manager is created and then
/// recycled, so the id stays stable for the lifetime of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DlListId {
    manager: u32,
    index: u32,
}

impl DlListId {
    pub(crate) const fn new(manager: u32, index: u32) -> Self {
        Self { manager, index }
    }

    /// Id of the manager that owns the list.
    pub fn manager(&self) -> u32 {
        self.manager
    }

    /// Position of the list in its manager's initial pool.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for DlListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dl{}.{}", self.manager, self.index)
    }
}

/// A display list: the unit of work handed to the device.
///
/// Obtained from [`DlManager::get`](crate::manager::DlManager::get),
/// filled through [`write`](Self::write), then handed back with
/// [`DlManager::commit`](crate::manager::DlManager::commit) or
/// [`DlManager::put`](crate::manager::DlManager::put).
pub struct DlList {
    id: DlListId,
    mode: AddressingMode,
    /// Primary body; in header mode the header follows its entries
    body0: DlBody,
    /// Bus address of the header, header mode only
    header_dma: Option<DmaAddr>,
    /// Extra bodies, processed after body0 in order
    fragments: Vec<DlBody>,
    /// Lists processed after this one without CPU intervention
    chain: Vec<DlList>,
    /// Completion is reported as internal
    internal: bool,
}

impl DlList {
    /// Allocate a list's DMA memory.
    ///
    /// Body and header share one allocation, header right after the body,
    /// to avoid fragmenting DMA memory.
    pub(crate) fn new(
        id: DlListId,
        mode: AddressingMode,
        dma: &Arc<dyn DmaAllocator>,
    ) -> DlResult<Self> {
        let header_size = match mode {
            AddressingMode::Header => DL_HEADER_SIZE,
            AddressingMode::Headerless => 0,
        };

        let body0 = DlBody::allocate(dma, DL_NUM_ENTRIES, header_size)?;

        let mut list = Self {
            id,
            mode,
            header_dma: None,
            body0,
            fragments: Vec::new(),
            chain: Vec::new(),
            internal: false,
        };

        if mode == AddressingMode::Header {
            list.header_dma = Some(list.body0.extra_dma());
            list.write_header(DlHeader::initial(list.body0.dma_addr()));
        }

        Ok(list)
    }

    pub fn id(&self) -> DlListId {
        self.id
    }

    /// Append a register write to the primary body.
    ///
    /// Up to [`DL_NUM_ENTRIES`] writes fit in a list.
    #[inline]
    pub fn write(&mut self, reg: u32, data: u32) {
        self.body0.write(reg, data);
    }

    /// Attach a fragment body.
    ///
    /// Fragments are processed after the primary body, in the order they
    /// are added. The list takes ownership of the body and frees it once
    /// the list is released. Header mode only; a refused body is handed
    /// back.
    pub fn add_fragment(&mut self, body: DlBody) -> Result<(), Rejected<DlBody>> {
        if self.mode != AddressingMode::Header {
            return Err(Rejected::new(DlError::InvalidMode(ModeOp::AddFragment), body));
        }

        if self.fragments.len() + 1 >= DL_MAX_BODIES {
            return Err(Rejected::new(DlError::TooManyBodies { max: DL_MAX_BODIES }, body));
        }

        self.fragments.push(body);
        Ok(())
    }

    /// Append `list` to this list's chain.
    ///
    /// The device processes the chain after this list without CPU
    /// intervention, and the frame end interrupt only fires once the last
    /// list of the chain has completed. The head owns the chained lists
    /// and releases them along with itself. Header mode only; a refused
    /// list is handed back.
    pub fn add_to_chain(&mut self, list: DlList) -> Result<(), Rejected<DlList>> {
        if self.mode != AddressingMode::Header {
            return Err(Rejected::new(DlError::InvalidMode(ModeOp::AddChain), list));
        }

        if list.id.manager != self.id.manager {
            let error = DlError::ForeignList { list: list.id, manager: self.id.manager };
            return Err(Rejected::new(error, list));
        }

        self.chain.push(list);
        Ok(())
    }

    /// The primary body.
    pub fn body(&self) -> &DlBody {
        &self.body0
    }

    pub fn fragments(&self) -> &[DlBody] {
        &self.fragments
    }

    pub fn chain(&self) -> &[DlList] {
        &self.chain
    }

    pub fn has_chain(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Fragments owned by this list and every list chained to it.
    pub(crate) fn fragment_count(&self) -> usize {
        self.fragments.len() + self.chain.iter().map(DlList::fragment_count).sum::<usize>()
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn mode(&self) -> AddressingMode {
        self.mode
    }

    /// Bus address of the header, `None` in headerless mode.
    pub fn header_dma(&self) -> Option<DmaAddr> {
        self.header_dma
    }

    /// Read back the header as the device will see it.
    pub fn header(&self) -> Option<DlHeader> {
        self.header_dma?;
        // SAFETY: header mode lists reserve DL_HEADER_SIZE bytes after body0.
        Some(unsafe { self.header_ptr().as_ptr().read_volatile() })
    }

    /// Fill the headers of this list and of every chained list.
    ///
    /// Each list links to the next one in the chain. Only the last list
    /// (this one, without a chain) links according to `cycling`.
    pub(crate) fn fill_headers(&mut self, cycling: CyclingMode) {
        let first = self.chain.first().and_then(DlList::header_dma);
        self.fill_header(first, cycling);

        for i in 0..self.chain.len() {
            let next = self.chain.get(i + 1).and_then(DlList::header_dma);
            self.chain[i].fill_header(next, cycling);
        }
    }

    /// Fill this list's header. `next` is the header of the following
    /// list in the chain, `None` when this list is the last one.
    pub(crate) fn fill_header(&mut self, next: Option<DmaAddr>, cycling: CyclingMode) {
        let Some(this) = self.header_dma else {
            return;
        };

        let link = match (next, cycling) {
            (Some(next), _) => HeaderLink::Next(next),
            // The device loops on this list until told otherwise.
            (None, CyclingMode::Continuous) => HeaderLink::Loop(this),
            // Mem-to-mem: the next list must not start on its own.
            (None, CyclingMode::SingleShot) => HeaderLink::Stop,
        };

        let bodies = core::iter::once(&self.body0)
            .chain(self.fragments.iter())
            .map(|body| (body.dma_addr(), body.size_bytes()));

        self.write_header(DlHeader::describe(bodies, link));
    }

    /// How the device is to be pointed at this list.
    pub(crate) fn hw_program(&self) -> HwProgram {
        match self.header_dma {
            Some(header) => HwProgram::Header { header },
            None => HwProgram::Headerless {
                body: self.body0.dma_addr(),
                size: self.body0.size_bytes(),
            },
        }
    }

    pub(crate) fn set_internal(&mut self, internal: bool) {
        self.internal = internal;
    }

    /// Detach the chained lists, keeping the chain's storage for reuse.
    pub(crate) fn drain_chain(&mut self) -> vec::Drain<'_, DlList> {
        self.chain.drain(..)
    }

    /// Prepare the list for reuse.
    ///
    /// Fragments are moved to `orphans` for deferred freeing; nothing is
    /// freed here.
    pub(crate) fn recycle(&mut self, orphans: &mut Vec<DlBody>) {
        orphans.extend(self.fragments.drain(..));
        self.body0.reset();
        self.internal = false;
    }

    fn header_ptr(&self) -> NonNull<DlHeader> {
        self.body0.extra_ptr().cast()
    }

    fn write_header(&mut self, header: DlHeader) {
        debug_assert!(self.header_dma.is_some());
        // SAFETY: only called in header mode, where DL_HEADER_SIZE bytes
        // follow body0's entries.
        unsafe { self.header_ptr().as_ptr().write_volatile(header) };
    }
}

impl fmt::Debug for DlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlList")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("entries", &self.body0.len())
            .field("fragments", &self.fragments.len())
            .field("chain", &self.chain.len())
            .field("internal", &self.internal)
            .finish()
    }
}
