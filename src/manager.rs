//! Display list manager.
//!
//! The manager owns a fixed pool of display lists and moves them through
//! three pipeline slots:
//!
//! - `active`: the list the device is currently executing
//! - `queued`: the list programmed into the device for the next frame,
//!   not yet confirmed taken
//! - `pending`: a list committed while the device had not yet taken the
//!   queued one; it is programmed from the next frame end interrupt
//!
//! All slots, the free pool and the fragments awaiting collection are
//! protected by one [`IrqMutex`] shared with the frame end interrupt
//! handler. Nothing is freed while that lock is held: fragments detached
//! from released lists are parked and handed to the platform
//! [`WorkQueue`].

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use portable_atomic::{AtomicU32, AtomicU64, Ordering};

use crate::arch::barriers::MemoryBarriers;
use crate::arch::{Arch, DefaultArch};
use crate::dl::{DlBody, DlList, DlListId, DL_MAX_BODIES};
use crate::errors::{DlError, DlResult, Rejected};
use crate::gc::{GcWork, Reclaim, WorkQueue};
use crate::hw::{AddressingMode, CyclingMode, DlChannel, DlHardware};
use crate::mem::DmaAllocator;
use crate::sync::IrqMutex;

/// Manager id generator.
static NEXT_MANAGER_ID: AtomicU32 = AtomicU32::new(1);

bitflags! {
    /// Result of [`DlManager::on_frame_end_interrupt`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameEndFlags: u32 {
        /// A display list completed and a new one became active.
        const COMPLETED = 1 << 0;
        /// The list that became active was committed as internal.
        const INTERNAL = 1 << 1;
    }
}

impl FrameEndFlags {
    pub fn completed(&self) -> bool {
        self.contains(Self::COMPLETED)
    }

    pub fn internal(&self) -> bool {
        self.contains(Self::INTERNAL)
    }
}

/// Immutable manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlConfig {
    /// Pipeline output index
    pub index: u32,
    pub addressing: AddressingMode,
    pub cycling: CyclingMode,
    /// Number of display lists allocated up front
    pub prealloc: usize,
}

impl DlConfig {
    /// Configuration for pipeline output `index`.
    ///
    /// Output 0 of a display pipeline runs headerless; every other output,
    /// and every mem-to-mem pipeline, runs in header mode. Mem-to-mem
    /// pipelines stop after each list, display pipelines loop.
    pub fn for_pipeline(index: u32, mem_to_mem: bool) -> Self {
        let addressing = if index == 0 && !mem_to_mem {
            AddressingMode::Headerless
        } else {
            AddressingMode::Header
        };

        let cycling = if mem_to_mem {
            CyclingMode::SingleShot
        } else {
            CyclingMode::Continuous
        };

        Self { index, addressing, cycling, prealloc: 2 }
    }
}

impl Default for DlConfig {
    fn default() -> Self {
        Self {
            index: 0,
            addressing: AddressingMode::Header,
            cycling: CyclingMode::Continuous,
            prealloc: 2,
        }
    }
}

/// Builder for [`DlManager`].
pub struct DlManagerBuilder {
    config: DlConfig,
}

impl DlManagerBuilder {
    pub fn new() -> Self {
        Self { config: DlConfig::default() }
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: DlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.config.index = index;
        self
    }

    pub fn addressing(mut self, mode: AddressingMode) -> Self {
        self.config.addressing = mode;
        self
    }

    pub fn cycling(mut self, mode: CyclingMode) -> Self {
        self.config.cycling = mode;
        self
    }

    pub fn prealloc(mut self, count: usize) -> Self {
        self.config.prealloc = count;
        self
    }

    /// Allocate the display list pool and create the manager.
    pub fn build<H, A>(
        self,
        hw: H,
        dma: Arc<dyn DmaAllocator>,
        queue: Arc<dyn WorkQueue>,
    ) -> DlResult<DlManager<H, A>>
    where
        H: DlHardware,
        A: Arch + 'static,
    {
        DlManager::new(self.config, hw, dma, queue)
    }
}

impl Default for DlManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager statistics.
#[derive(Debug, Default)]
pub struct DlStats {
    /// Lists committed
    pub commits: AtomicU64,
    /// Frame end interrupts that completed a list
    pub frames_completed: AtomicU64,
    /// Frame end interrupts that found the device still busy taking the
    /// queued list
    pub frames_delayed: AtomicU64,
    /// Pending lists released unprocessed because a newer one replaced them
    pub pending_replaced: AtomicU64,
    /// Fragments handed to the garbage collector
    pub fragments_queued: AtomicU64,
    /// Fragments freed by the garbage collector
    pub fragments_reclaimed: AtomicU64,
}

impl DlStats {
    pub fn snapshot(&self) -> DlStatsSnapshot {
        DlStatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_delayed: self.frames_delayed.load(Ordering::Relaxed),
            pending_replaced: self.pending_replaced.load(Ordering::Relaxed),
            fragments_queued: self.fragments_queued.load(Ordering::Relaxed),
            fragments_reclaimed: self.fragments_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DlStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DlStatsSnapshot {
    pub commits: u64,
    pub frames_completed: u64,
    pub frames_delayed: u64,
    pub pending_replaced: u64,
    pub fragments_queued: u64,
    pub fragments_reclaimed: u64,
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub active: Option<DlListId>,
    pub queued: Option<DlListId>,
    pub pending: Option<DlListId>,
    /// Lists in the free pool
    pub free: usize,
    /// Fragments awaiting collection
    pub gc_backlog: usize,
    /// Fragments the backlog can hold without growing
    pub gc_capacity: usize,
}

/// Everything protected by the manager lock.
struct PipelineState {
    free: VecDeque<DlList>,
    active: Option<DlList>,
    queued: Option<DlList>,
    pending: Option<DlList>,
    /// Fragments detached from released lists, freed by the GC work
    gc_fragments: Vec<DlBody>,
}

impl PipelineState {
    /// Return `list` and its chained lists to the free pool.
    ///
    /// Fragments are parked in `gc_fragments`. Returns whether any were.
    fn release(&mut self, mut list: DlList) -> bool {
        let mut orphaned = !list.fragments().is_empty();

        for child in list.drain_chain() {
            orphaned |= self.release(child);
        }

        list.recycle(&mut self.gc_fragments);
        self.free.push_back(list);

        orphaned
    }

    /// Backlog size reached if every list in a slot were released now.
    fn backlog_bound(&self) -> usize {
        let in_flight: usize = [&self.active, &self.queued, &self.pending]
            .into_iter()
            .flatten()
            .map(DlList::fragment_count)
            .sum();

        self.gc_fragments.len() + in_flight
    }

    fn release_slot(&mut self, slot: Option<DlList>) -> bool {
        match slot {
            Some(list) => self.release(list),
            None => false,
        }
    }
}

/// State shared with the garbage collector.
struct DlCore<A: Arch> {
    state: IrqMutex<PipelineState, A>,
    stats: DlStats,
}

impl<A: Arch> Reclaim for DlCore<A> {
    fn reclaim(&self) {
        loop {
            // One body per lock cycle; freeing may sleep.
            let body = self.state.lock().gc_fragments.pop();

            match body {
                Some(body) => {
                    drop(body);
                    self.stats.fragments_reclaimed.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

/// Display list manager for one pipeline output.
///
/// `H` programs the device; `A` masks local interrupts around the lock
/// shared with [`on_frame_end_interrupt`](Self::on_frame_end_interrupt).
pub struct DlManager<H, A: Arch + 'static = DefaultArch> {
    id: u32,
    config: DlConfig,
    hw: H,
    dma: Arc<dyn DmaAllocator>,
    queue: Arc<dyn WorkQueue>,
    gc: GcWork,
    core: Arc<DlCore<A>>,
}

impl DlManager<()> {
    /// Start building a manager.
    pub fn builder() -> DlManagerBuilder {
        DlManagerBuilder::new()
    }
}

impl<H: DlHardware, A: Arch + 'static> DlManager<H, A> {
    /// Create a manager and allocate its pool of `config.prealloc` lists.
    ///
    /// Fails with [`DlError::OutOfMemory`] if any list cannot be allocated;
    /// lists allocated so far are freed.
    pub fn new(
        config: DlConfig,
        hw: H,
        dma: Arc<dyn DmaAllocator>,
        queue: Arc<dyn WorkQueue>,
    ) -> DlResult<Self> {
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);

        let mut free = VecDeque::with_capacity(config.prealloc);
        for index in 0..config.prealloc {
            let list = DlList::new(DlListId::new(id, index as u32), config.addressing, &dma)
                .map_err(|err| {
                    log::warn!("dlm{}: pool allocation failed at list {}: {}", id, index, err);
                    err
                })?;
            free.push_back(list);
        }

        log::debug!(
            "dlm{}: {} lists, {:?} {:?}, output {}",
            id,
            config.prealloc,
            config.addressing,
            config.cycling,
            config.index
        );

        let state = PipelineState {
            free,
            active: None,
            queued: None,
            pending: None,
            gc_fragments: Vec::with_capacity(config.prealloc * (DL_MAX_BODIES - 1)),
        };

        let core = Arc::new(DlCore {
            state: IrqMutex::new(state),
            stats: DlStats::default(),
        });

        let target: Arc<dyn Reclaim> = core.clone();
        let gc = GcWork::new(Arc::downgrade(&target));
        queue.register(&gc);

        Ok(Self { id, config, hw, dma, queue, gc, core })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> &DlConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// The garbage collection work item of this manager.
    pub fn gc_work(&self) -> &GcWork {
        &self.gc
    }

    fn channel(&self) -> DlChannel {
        DlChannel { index: self.config.index, mode: self.config.addressing }
    }

    /// Take a list from the free pool.
    ///
    /// Returns `None` when every list is in use. Never blocks.
    pub fn get(&self) -> Option<DlList> {
        let mut list = self.core.state.lock().free.pop_front()?;
        list.set_internal(false);
        Some(list)
    }

    /// Return an unused list (and its chain) to the free pool.
    ///
    /// Fragments are freed later by the garbage collector. Safe to call
    /// from interrupt context for lists without fragments. A list carrying
    /// fragments may grow the fragment backlog, which allocates.
    ///
    /// A list allocated by another manager is handed back untouched.
    pub fn put(&self, list: DlList) -> Result<(), Rejected<DlList>> {
        if list.id().manager() != self.id {
            log::warn!("dlm{}: put of foreign list {}", self.id, list.id());
            let error = DlError::ForeignList { list: list.id(), manager: self.id };
            return Err(Rejected::new(error, list));
        }

        self.reserve_backlog(list.fragment_count());

        let mut state = self.core.state.lock();
        let orphaned = self.release_locked(&mut state, Some(list));
        drop(state);

        if orphaned {
            self.queue.schedule(&self.gc);
        }

        Ok(())
    }

    /// Make room in the fragment backlog for every fragment that can be
    /// parked from interrupt context, plus `incoming`.
    ///
    /// Grows the backlog outside the lock: the new buffer is allocated
    /// before and the old one freed after.
    fn reserve_backlog(&self, incoming: usize) {
        loop {
            let (needed, capacity) = {
                let state = self.core.state.lock();
                (state.backlog_bound() + incoming, state.gc_fragments.capacity())
            };
            if capacity >= needed {
                return;
            }

            let mut grown = Vec::with_capacity(needed.max(capacity * 2));

            let mut state = self.core.state.lock();
            if state.backlog_bound() + incoming > grown.capacity() {
                continue;
            }
            grown.append(&mut state.gc_fragments);
            let old = core::mem::replace(&mut state.gc_fragments, grown);
            drop(state);

            drop(old);
            return;
        }
    }

    /// Allocate a standalone fragment body for `num_entries` writes.
    ///
    /// The body belongs to the caller until attached to a list.
    pub fn alloc_fragment(&self, num_entries: usize) -> DlResult<DlBody> {
        DlBody::new(&self.dma, num_entries)
    }

    /// Hand a list to the device.
    ///
    /// In header mode the headers of the list and its chain are filled
    /// first. `internal` marks a list whose completion is reported with
    /// [`FrameEndFlags::INTERNAL`].
    ///
    /// Single-shot managers program the device at once; the caller must
    /// have made sure the device is idle. Continuous managers queue the
    /// list for the next frame, or keep it pending if the device has not
    /// yet taken the previously queued list.
    ///
    /// A list allocated by another manager is handed back untouched.
    pub fn commit(&self, mut list: DlList, internal: bool) -> Result<(), Rejected<DlList>> {
        if list.id().manager() != self.id {
            let error = DlError::ForeignList { list: list.id(), manager: self.id };
            return Err(Rejected::new(error, list));
        }

        if self.config.addressing == AddressingMode::Header {
            list.fill_headers(self.config.cycling);
        }
        list.set_internal(internal);

        // Releasing lists from the interrupt handler must not allocate.
        self.reserve_backlog(list.fragment_count());

        // Header and body writes must reach memory before the device is
        // pointed at them.
        MemoryBarriers::dma_write_barrier();

        self.core.stats.commits.fetch_add(1, Ordering::Relaxed);

        let mut state = self.core.state.lock();
        let orphaned = match self.config.cycling {
            CyclingMode::SingleShot => self.commit_single_shot(&mut state, list),
            CyclingMode::Continuous => self.commit_continuous(&mut state, list),
        };
        drop(state);

        if orphaned {
            self.queue.schedule(&self.gc);
        }

        Ok(())
    }

    fn commit_single_shot(&self, state: &mut PipelineState, list: DlList) -> bool {
        log::debug!("dlm{}: commit {} single-shot", self.id, list.id());

        self.hw.enqueue(self.channel(), list.hw_program());

        let previous = state.active.replace(list);
        if let Some(previous) = &previous {
            log::warn!(
                "dlm{}: commit while {} still active, device may be busy",
                self.id,
                previous.id()
            );
        }

        self.release_locked(state, previous)
    }

    fn commit_continuous(&self, state: &mut PipelineState, list: DlList) -> bool {
        // The device has not taken the queued list yet. Programming now
        // would race with it, so keep the list until the next frame end.
        if self.update_pending(state) {
            log::debug!("dlm{}: commit {} pending", self.id, list.id());

            let previous = state.pending.replace(list);
            if let Some(previous) = &previous {
                if previous.is_internal() {
                    log::warn!(
                        "dlm{}: internal list {} replaced before being processed",
                        self.id,
                        previous.id()
                    );
                    debug_assert!(false, "internal pending display list dropped");
                }
                self.core.stats.pending_replaced.fetch_add(1, Ordering::Relaxed);
            }

            return self.release_locked(state, previous);
        }

        log::debug!("dlm{}: commit {} queued", self.id, list.id());

        self.hw.enqueue(self.channel(), list.hw_program());

        let previous = state.queued.replace(list);
        self.release_locked(state, previous)
    }

    /// Advance the pipeline on a frame end interrupt.
    ///
    /// Called from the interrupt handler. In continuous mode a frame end
    /// that races with a commit reports nothing and the transition happens
    /// on the next frame end, one frame late.
    pub fn on_frame_end_interrupt(&self) -> FrameEndFlags {
        let mut flags = FrameEndFlags::empty();

        let mut state = self.core.state.lock();

        let orphaned = match self.config.cycling {
            CyclingMode::SingleShot => {
                flags |= FrameEndFlags::COMPLETED;
                let active = state.active.take();
                self.release_locked(&mut state, active)
            }
            CyclingMode::Continuous => {
                if self.update_pending(&state) {
                    log::trace!("dlm{}: frame end, update still pending", self.id);
                    self.core.stats.frames_delayed.fetch_add(1, Ordering::Relaxed);
                    return flags;
                }

                let mut orphaned = false;

                if let Some(mut queued) = state.queued.take() {
                    if queued.is_internal() {
                        flags |= FrameEndFlags::INTERNAL;
                    }
                    queued.set_internal(false);

                    log::trace!("dlm{}: {} active", self.id, queued.id());

                    let previous = state.active.replace(queued);
                    orphaned |= self.release_locked(&mut state, previous);
                    flags |= FrameEndFlags::COMPLETED;
                }

                if let Some(pending) = state.pending.take() {
                    log::trace!("dlm{}: {} queued from pending", self.id, pending.id());
                    self.hw.enqueue(self.channel(), pending.hw_program());
                    state.queued = Some(pending);
                }

                orphaned
            }
        };

        drop(state);

        if flags.completed() {
            self.core.stats.frames_completed.fetch_add(1, Ordering::Relaxed);
        }
        if orphaned {
            self.queue.schedule(&self.gc);
        }

        flags
    }

    /// Release the lists of all three pipeline slots.
    ///
    /// Used to recover after the device has been reset.
    pub fn reset(&self) {
        let mut state = self.core.state.lock();

        let active = state.active.take();
        let queued = state.queued.take();
        let pending = state.pending.take();

        let mut orphaned = self.release_locked(&mut state, active);
        orphaned |= self.release_locked(&mut state, queued);
        orphaned |= self.release_locked(&mut state, pending);
        drop(state);

        log::debug!("dlm{}: reset", self.id);

        if orphaned {
            self.queue.schedule(&self.gc);
        }
    }

    /// One-time display list unit setup for this manager's cycling mode.
    pub fn setup_hardware(&self) {
        self.hw.setup(self.config.cycling);
    }

    /// Ids of the lists in each slot, with pool and GC counts.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let state = self.core.state.lock();
        PipelineSnapshot {
            active: state.active.as_ref().map(DlList::id),
            queued: state.queued.as_ref().map(DlList::id),
            pending: state.pending.as_ref().map(DlList::id),
            free: state.free.len(),
            gc_backlog: state.gc_fragments.len(),
            gc_capacity: state.gc_fragments.capacity(),
        }
    }

    pub fn stats(&self) -> DlStatsSnapshot {
        self.core.stats.snapshot()
    }

    /// The update pending check is only meaningful with a list queued.
    fn update_pending(&self, state: &PipelineState) -> bool {
        state.queued.is_some() && self.hw.update_pending(self.channel())
    }

    /// Release the list in `slot`, counting fragments handed to the GC.
    fn release_locked(&self, state: &mut PipelineState, slot: Option<DlList>) -> bool {
        let before = state.gc_fragments.len();
        let orphaned = state.release_slot(slot);

        let parked = state.gc_fragments.len() - before;
        if parked > 0 {
            self.core
                .stats
                .fragments_queued
                .fetch_add(parked as u64, Ordering::Relaxed);
        }

        orphaned
    }
}

impl<H: DlHardware, A: Arch + 'static> fmt::Debug for DlManager<H, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DlManager")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("pipeline", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::NoOpArch;
    use crate::gc::PollingWorkQueue;
    use crate::mem::HeapDma;
    use crate::tests::helpers::FakeHardware;

    type Manager = DlManager<FakeHardware, NoOpArch>;

    fn manager(addressing: AddressingMode, cycling: CyclingMode) -> Manager {
        DlManager::builder()
            .addressing(addressing)
            .cycling(cycling)
            .prealloc(3)
            .build(
                FakeHardware::new(),
                Arc::new(HeapDma::new()),
                Arc::new(PollingWorkQueue::new()),
            )
            .unwrap()
    }

    #[test]
    fn test_config_for_pipeline() {
        let display0 = DlConfig::for_pipeline(0, false);
        assert_eq!(display0.addressing, AddressingMode::Headerless);
        assert_eq!(display0.cycling, CyclingMode::Continuous);

        let display1 = DlConfig::for_pipeline(1, false);
        assert_eq!(display1.addressing, AddressingMode::Header);

        let m2m = DlConfig::for_pipeline(0, true);
        assert_eq!(m2m.addressing, AddressingMode::Header);
        assert_eq!(m2m.cycling, CyclingMode::SingleShot);
    }

    #[test]
    fn test_get_resets_internal_flag() {
        let dlm = manager(AddressingMode::Header, CyclingMode::Continuous);
        let mut list = dlm.get().unwrap();
        list.set_internal(true);
        dlm.put(list).unwrap();

        for _ in 0..3 {
            let list = dlm.get().unwrap();
            assert!(!list.is_internal());
            dlm.put(list).unwrap();
        }
    }

    #[test]
    fn test_free_pool_is_fifo() {
        let dlm = manager(AddressingMode::Header, CyclingMode::Continuous);
        let a = dlm.get().unwrap();
        let b = dlm.get().unwrap();
        let (ida, idb) = (a.id(), b.id());

        dlm.put(b).unwrap();
        dlm.put(a).unwrap();

        let c = dlm.get().unwrap();
        assert_eq!(c.id().index(), 2);
        assert_eq!(dlm.get().unwrap().id(), idb);
        assert_eq!(dlm.get().unwrap().id(), ida);
    }

    #[test]
    fn test_frame_end_flags() {
        let flags = FrameEndFlags::COMPLETED | FrameEndFlags::INTERNAL;
        assert!(flags.completed());
        assert!(flags.internal());
        assert!(!FrameEndFlags::empty().completed());
    }

    #[test]
    fn test_update_pending_ignored_without_queued_list() {
        let dlm = manager(AddressingMode::Header, CyclingMode::Continuous);
        dlm.hardware().set_update_pending(true);

        let list = dlm.get().unwrap();
        let id = list.id();
        dlm.commit(list, false).unwrap();

        assert_eq!(dlm.snapshot().queued, Some(id));
        assert_eq!(dlm.snapshot().pending, None);
    }

    #[test]
    fn test_commit_rejects_foreign_list() {
        let a = manager(AddressingMode::Header, CyclingMode::Continuous);
        let b = manager(AddressingMode::Header, CyclingMode::Continuous);

        let list = b.get().unwrap();
        let rejected = a.commit(list, false).unwrap_err();
        assert_eq!(
            rejected.error,
            DlError::ForeignList { list: DlListId::new(b.id(), 0), manager: a.id() }
        );
        assert_eq!(a.snapshot().queued, None);
        assert!(a.hardware().programs().is_empty());

        b.put(rejected.into_inner()).unwrap();
        assert_eq!(b.snapshot().free, 3);
    }
}
