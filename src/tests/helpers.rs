//! Test helper utilities: fake hardware, fake registers and allocators.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::arch::NoOpArch;
use crate::gc::PollingWorkQueue;
use crate::hw::{AddressingMode, CyclingMode, DlChannel, DlHardware, HwProgram, RegisterIo};
use crate::manager::DlManager;
use crate::mem::{DmaAllocator, DmaRegion, HeapDma};

/// Manager type used throughout the tests.
pub type TestManager = DlManager<FakeHardware, NoOpArch>;

/// Register file that records every write.
#[derive(Default)]
pub struct FakeRegisters {
    values: spin::Mutex<BTreeMap<u32, u32>>,
    writes: spin::Mutex<Vec<(u32, u32)>>,
}

impl FakeRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset a register as the device would, without logging a write.
    pub fn set(&self, addr: u32, value: u32) {
        self.values.lock().insert(addr, value);
    }

    pub fn get(&self, addr: u32) -> u32 {
        self.values.lock().get(&addr).copied().unwrap_or(0)
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.writes.lock().clone()
    }
}

impl RegisterIo for FakeRegisters {
    fn read(&self, addr: u32) -> u32 {
        self.get(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        self.values.lock().insert(addr, value);
        self.writes.lock().push((addr, value));
    }
}

impl RegisterIo for Arc<FakeRegisters> {
    fn read(&self, addr: u32) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: u32, value: u32) {
        (**self).write(addr, value)
    }
}

/// Scripted [`DlHardware`].
///
/// The update pending answer is set by the test. A latching instance
/// behaves like the device: every enqueue raises update pending until the
/// test calls [`accept`](Self::accept).
#[derive(Default)]
pub struct FakeHardware {
    update_pending: AtomicBool,
    latching: bool,
    enqueued: AtomicUsize,
    programs: spin::Mutex<Vec<(DlChannel, HwProgram)>>,
    setups: spin::Mutex<Vec<CyclingMode>>,
}

impl FakeHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latching() -> Self {
        Self { latching: true, ..Self::default() }
    }

    pub fn set_update_pending(&self, pending: bool) {
        self.update_pending.store(pending, Ordering::SeqCst);
    }

    /// The device takes the last program.
    pub fn accept(&self) {
        self.set_update_pending(false);
    }

    pub fn programs(&self) -> Vec<HwProgram> {
        self.programs.lock().iter().map(|(_, program)| *program).collect()
    }

    pub fn channels(&self) -> Vec<DlChannel> {
        self.programs.lock().iter().map(|(channel, _)| *channel).collect()
    }

    pub fn last_program(&self) -> Option<HwProgram> {
        self.programs.lock().last().map(|(_, program)| *program)
    }

    pub fn enqueue_count(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> Vec<CyclingMode> {
        self.setups.lock().clone()
    }
}

impl DlHardware for FakeHardware {
    fn update_pending(&self, _channel: DlChannel) -> bool {
        self.update_pending.load(Ordering::SeqCst)
    }

    fn enqueue(&self, channel: DlChannel, program: HwProgram) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        self.programs.lock().push((channel, program));
        if self.latching {
            self.update_pending.store(true, Ordering::SeqCst);
        }
    }

    fn setup(&self, cycling: CyclingMode) {
        self.setups.lock().push(cycling);
    }
}

/// Allocator that fails every request after the first `budget`.
pub struct FailingDma {
    inner: HeapDma,
    budget: AtomicUsize,
}

impl FailingDma {
    pub fn new(budget: usize) -> Self {
        Self { inner: HeapDma::new(), budget: AtomicUsize::new(budget) }
    }

    pub fn live_regions(&self) -> usize {
        self.inner.live_regions()
    }
}

// SAFETY: regions come straight from the inner HeapDma.
unsafe impl DmaAllocator for FailingDma {
    fn alloc(&self, size: usize) -> Option<DmaRegion> {
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .ok()?;
        self.inner.alloc(size)
    }

    unsafe fn free(&self, region: DmaRegion) {
        // SAFETY: forwarded under the caller's guarantees.
        unsafe { self.inner.free(region) }
    }
}

/// A manager with its allocator and work queue exposed.
pub struct Fixture {
    pub dlm: TestManager,
    pub heap: Arc<HeapDma>,
    pub queue: Arc<PollingWorkQueue>,
}

impl Fixture {
    pub fn new(addressing: AddressingMode, cycling: CyclingMode, prealloc: usize) -> Self {
        Self::with_hardware(FakeHardware::new(), addressing, cycling, prealloc)
    }

    pub fn with_hardware(
        hw: FakeHardware,
        addressing: AddressingMode,
        cycling: CyclingMode,
        prealloc: usize,
    ) -> Self {
        let heap = Arc::new(HeapDma::new());
        let queue = Arc::new(PollingWorkQueue::new());

        let dlm = DlManager::builder()
            .index(1)
            .addressing(addressing)
            .cycling(cycling)
            .prealloc(prealloc)
            .build(hw, heap.clone(), queue.clone())
            .expect("Failed to create manager");

        Self { dlm, heap, queue }
    }

    pub fn hw(&self) -> &FakeHardware {
        self.dlm.hardware()
    }
}
