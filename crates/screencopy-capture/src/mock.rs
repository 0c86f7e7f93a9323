//! Instrumented stand-ins for the compositor, GPU allocator and renderer.
//!
//! Every resource the engine can create bumps a counter on creation and on
//! release, so tests can assert that each is released exactly once.

use std::collections::VecDeque;
use std::fs::File;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use screencopy_core::{CaptureError, ColorFormat, DmabufLayout, FrameDescriptor};

use crate::outputs::{AdvertisedOutput, OutputRegistry};
use crate::protocol::{
    BufferDevice, BufferSharing, DmabufSource, FrameProtocol, FrameReport, FrameStatus, GraphicsContext,
    GraphicsScope,
};

/// Poll `cond` until it holds, panicking after a few seconds.
pub fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CounterSet {
    allocations: AtomicU64,
    allocations_released: AtomicU64,
    wire_buffers: AtomicU64,
    wire_buffers_released: AtomicU64,
    frames: AtomicU64,
    frames_released: AtomicU64,
    roundtrips: AtomicU64,
    blocking_waits: AtomicU64,
    disconnects: AtomicU64,
    mismatched_copies: AtomicU64,
    fail_next_allocation: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MockCounters(Arc<CounterSet>);

macro_rules! counter {
    ($($name:ident),* $(,)?) => {
        impl MockCounters {
            $(pub fn $name(&self) -> u64 {
                self.0.$name.load(Ordering::SeqCst)
            })*
        }
    };
}

counter!(
    allocations,
    allocations_released,
    wire_buffers,
    wire_buffers_released,
    frames,
    frames_released,
    roundtrips,
    blocking_waits,
    disconnects,
    mismatched_copies,
);

impl MockCounters {
    pub fn fail_next_allocation(&self) {
        self.0.fail_next_allocation.store(true, Ordering::SeqCst);
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Compositor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockOutput {
    pub name: String,
}

impl MockOutput {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
}

/// Registry of named mock outputs, globals numbered from 1.
pub fn registry(names: &[&str]) -> OutputRegistry<MockOutput> {
    registry_from(1, names)
}

/// Registry of named mock outputs, globals numbered from `first_global`.
pub fn registry_from(first_global: u32, names: &[&str]) -> OutputRegistry<MockOutput> {
    OutputRegistry::from_advertised(names.iter().enumerate().map(|(i, name)| AdvertisedOutput {
        global: first_global + i as u32,
        handle: MockOutput::new(name),
        name: Some((*name).to_owned()),
        description: None,
    }))
}

/// `ready_after` value for a copy that never completes.
const NEVER: u32 = u32::MAX;

/// What the compositor does for one capture cycle.
#[derive(Debug, Clone)]
pub struct CycleScript {
    formats: Vec<FrameDescriptor>,
    capture_fails: bool,
    copy_fails: bool,
    ready_after: u32,
}

impl CycleScript {
    pub fn success(descriptor: FrameDescriptor) -> Self {
        Self { formats: vec![descriptor], capture_fails: false, copy_fails: false, ready_after: 1 }
    }

    pub fn capture_failure() -> Self {
        Self { formats: Vec::new(), capture_fails: true, copy_fails: false, ready_after: 1 }
    }

    /// The compositor only offers shm buffers.
    pub fn no_format() -> Self {
        Self { formats: Vec::new(), capture_fails: false, copy_fails: false, ready_after: 1 }
    }

    pub fn copy_failure(descriptor: FrameDescriptor) -> Self {
        Self { copy_fails: true, ..Self::success(descriptor) }
    }

    /// Negotiates, then never answers the copy request.
    pub fn stalled(descriptor: FrameDescriptor) -> Self {
        Self { ready_after: NEVER, ..Self::success(descriptor) }
    }

    /// Superseded format reports sent before the final one.
    pub fn with_earlier_formats(mut self, earlier: impl IntoIterator<Item = FrameDescriptor>) -> Self {
        let mut formats: Vec<_> = earlier.into_iter().collect();
        formats.append(&mut self.formats);
        self.formats = formats;
        self
    }

    /// Dispatches (round-trips or blocking waits) after the copy request
    /// before `ready`/`failed` arrives.
    pub fn with_ready_after(mut self, dispatches: u32) -> Self {
        self.ready_after = dispatches;
        self
    }
}

#[derive(Default)]
struct ScriptState {
    cycles: VecDeque<CycleScript>,
    repeat: Option<CycleScript>,
    captured: Vec<String>,
    captured_at: Vec<Instant>,
    connection_broken: bool,
    outputs: Option<OutputRegistry<MockOutput>>,
}

/// Control handle shared with a compositor that may live on another thread.
#[derive(Clone, Default)]
pub struct MockScript(Arc<Mutex<ScriptState>>);

impl MockScript {
    pub fn push(&self, cycle: CycleScript) {
        self.0.lock().unwrap().cycles.push_back(cycle);
    }

    /// Used whenever the queue is empty. Without it, cycles fail to capture.
    pub fn repeat(&self, cycle: CycleScript) {
        self.0.lock().unwrap().repeat = Some(cycle);
    }

    pub fn break_connection(&self) {
        self.0.lock().unwrap().connection_broken = true;
    }

    /// Output names in the order capture was requested.
    pub fn captured(&self) -> Vec<String> {
        self.0.lock().unwrap().captured.clone()
    }

    /// When each capture was requested.
    pub fn captured_at(&self) -> Vec<Instant> {
        self.0.lock().unwrap().captured_at.clone()
    }

    /// Simulate a hot-plug: the compositor's outputs become `outputs`.
    pub fn change_outputs(&self, outputs: OutputRegistry<MockOutput>) {
        self.0.lock().unwrap().outputs = Some(outputs);
    }

    fn take_outputs(&self) -> Option<OutputRegistry<MockOutput>> {
        self.0.lock().unwrap().outputs.take()
    }

    fn next(&self, output: &MockOutput) -> CycleScript {
        let mut state = self.0.lock().unwrap();
        state.captured.push(output.name.clone());
        state.captured_at.push(Instant::now());
        match state.cycles.pop_front() {
            Some(cycle) => cycle,
            None => state.repeat.clone().unwrap_or_else(CycleScript::capture_failure),
        }
    }

    fn connection_broken(&self) -> bool {
        self.0.lock().unwrap().connection_broken
    }
}

#[derive(Default)]
struct GateState {
    held: bool,
    waiting: bool,
}

/// Blocks compositor round-trips while held.
#[derive(Clone, Default)]
pub struct MockGate(Arc<(Mutex<GateState>, Condvar)>);

impl MockGate {
    pub fn hold(&self) {
        self.0 .0.lock().unwrap().held = true;
    }

    pub fn release(&self) {
        self.0 .0.lock().unwrap().held = false;
        self.0 .1.notify_all();
    }

    /// Wait until a round-trip is parked at the gate.
    pub fn wait_until_blocked(&self) {
        let (lock, cond) = &*self.0;
        let guard = lock.lock().unwrap();
        let (_guard, timeout) = cond
            .wait_timeout_while(guard, Duration::from_secs(5), |g| !g.waiting)
            .unwrap();
        assert!(!timeout.timed_out(), "no round-trip reached the gate");
    }

    fn pass(&self) {
        let (lock, cond) = &*self.0;
        let mut guard = lock.lock().unwrap();
        if !guard.held {
            return;
        }
        guard.waiting = true;
        cond.notify_all();
        let mut guard = cond.wait_while(guard, |g| g.held).unwrap();
        guard.waiting = false;
    }
}

pub struct MockFrame {
    id: u64,
    counters: MockCounters,
}

impl Drop for MockFrame {
    fn drop(&mut self) {
        MockCounters::bump(&self.counters.0.frames_released);
    }
}

pub struct MockWire {
    pub descriptor: FrameDescriptor,
    pub allocation_id: u32,
    counters: MockCounters,
}

impl Drop for MockWire {
    fn drop(&mut self) {
        MockCounters::bump(&self.counters.0.wire_buffers_released);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Requested,
    Negotiated,
    Copying { dispatches: u32 },
}

struct ActiveFrame {
    id: u64,
    script: CycleScript,
    phase: Phase,
    report: FrameReport,
    mismatched: bool,
}

pub struct MockCompositor {
    counters: MockCounters,
    script: MockScript,
    gate: MockGate,
    next_frame: u64,
    active: Option<ActiveFrame>,
}

impl MockCompositor {
    pub fn new() -> Self {
        Self::with_counters(MockCounters::default())
    }

    pub fn with_counters(counters: MockCounters) -> Self {
        Self { counters, script: MockScript::default(), gate: MockGate::default(), next_frame: 0, active: None }
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }

    pub fn script(&self) -> MockScript {
        self.script.clone()
    }

    pub fn gate(&self) -> MockGate {
        self.gate.clone()
    }

    pub fn push(&mut self, cycle: CycleScript) {
        self.script.push(cycle);
    }

    pub fn break_connection(&mut self) {
        self.script.break_connection();
    }

    /// A wire buffer not backed by any allocation.
    pub fn wire_for(&self, descriptor: FrameDescriptor) -> MockWire {
        MockCounters::bump(&self.counters.0.wire_buffers);
        MockWire { descriptor, allocation_id: 0, counters: self.counters.clone() }
    }
}

impl Drop for MockCompositor {
    fn drop(&mut self) {
        MockCounters::bump(&self.counters.0.disconnects);
    }
}

impl FrameProtocol for MockCompositor {
    type Output = MockOutput;
    type Frame = MockFrame;
    type Buffer = MockWire;

    fn capture_output(&mut self, output: &MockOutput) -> Result<MockFrame, CaptureError> {
        self.next_frame += 1;
        let id = self.next_frame;
        let script = self.script.next(output);
        self.active = Some(ActiveFrame {
            id,
            script,
            phase: Phase::Requested,
            report: FrameReport::default(),
            mismatched: false,
        });
        MockCounters::bump(&self.counters.0.frames);
        Ok(MockFrame { id, counters: self.counters.clone() })
    }

    fn copy(&mut self, frame: &MockFrame, buffer: &MockWire) {
        let Some(active) = self.active.as_mut().filter(|a| a.id == frame.id) else {
            return;
        };
        if active.report.descriptor != Some(buffer.descriptor) {
            active.mismatched = true;
            MockCounters::bump(&self.counters.0.mismatched_copies);
        }
        active.phase = Phase::Copying { dispatches: 0 };
    }

    fn roundtrip(&mut self) -> Result<(), CaptureError> {
        MockCounters::bump(&self.counters.0.roundtrips);
        self.gate.pass();
        self.deliver()
    }

    fn dispatch_blocking(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        MockCounters::bump(&self.counters.0.blocking_waits);
        let stalled = self
            .active
            .as_ref()
            .is_some_and(|a| a.script.ready_after == NEVER && matches!(a.phase, Phase::Copying { .. }));
        if stalled {
            std::thread::sleep(timeout);
            return Ok(());
        }
        self.deliver()
    }

    fn report(&self, frame: &MockFrame) -> FrameReport {
        self.active.as_ref().filter(|a| a.id == frame.id).map(|a| a.report).unwrap_or_default()
    }

    fn take_outputs(&mut self) -> Option<OutputRegistry<MockOutput>> {
        self.script.take_outputs()
    }
}

impl MockCompositor {
    /// Advance the active frame by one batch of events.
    fn deliver(&mut self) -> Result<(), CaptureError> {
        if self.script.connection_broken() {
            return Err(CaptureError::connection_lost("mock compositor hung up"));
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        match active.phase {
            Phase::Requested => {
                active.report.descriptor = active.script.formats.last().copied();
                if active.script.capture_fails {
                    active.report.status = FrameStatus::Failed;
                }
                active.phase = Phase::Negotiated;
            }
            Phase::Negotiated => {}
            Phase::Copying { dispatches } => {
                let dispatches = dispatches + 1;
                active.phase = Phase::Copying { dispatches };
                if dispatches >= active.script.ready_after && active.report.status == FrameStatus::Pending {
                    active.report.status = if active.script.copy_fails || active.mismatched {
                        FrameStatus::Failed
                    } else {
                        FrameStatus::Ready { timestamp: Duration::from_millis(active.id * 16) }
                    };
                }
            }
        }
        Ok(())
    }
}

impl BufferSharing for MockCompositor {
    fn import_dmabuf(&mut self, layout: &DmabufLayout<'_>) -> Result<MockWire, CaptureError> {
        MockCounters::bump(&self.counters.0.wire_buffers);
        Ok(MockWire { descriptor: layout.descriptor, allocation_id: layout.offset, counters: self.counters.clone() })
    }
}

// ── GPU allocator ─────────────────────────────────────────────────────────────

pub struct MockAllocation {
    file: File,
    id: u32,
    descriptor: FrameDescriptor,
    counters: MockCounters,
}

impl DmabufSource for MockAllocation {
    /// The allocation id travels in `offset` so wire buffers can be traced back.
    fn layout(&self) -> DmabufLayout<'_> {
        DmabufLayout {
            fd: self.file.as_fd(),
            offset: self.id,
            stride: self.descriptor.width * 4,
            modifier: 0,
            descriptor: self.descriptor,
        }
    }
}

impl Drop for MockAllocation {
    fn drop(&mut self) {
        MockCounters::bump(&self.counters.0.allocations_released);
    }
}

pub struct MockDevice {
    counters: MockCounters,
    next_id: u32,
}

impl MockDevice {
    pub fn new() -> Self {
        Self { counters: MockCounters::default(), next_id: 0 }
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }
}

impl BufferDevice for MockDevice {
    type Allocation = MockAllocation;

    fn allocate(&mut self, descriptor: &FrameDescriptor) -> Result<MockAllocation, CaptureError> {
        if self.counters.0.fail_next_allocation.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::allocation_failed("mock device out of memory"));
        }
        let file = File::open("/dev/null")?;
        self.next_id += 1;
        MockCounters::bump(&self.counters.0.allocations);
        Ok(MockAllocation { file, id: self.next_id, descriptor: *descriptor, counters: self.counters.clone() })
    }
}

// ── Renderer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTexture {
    pub id: u64,
    pub descriptor: FrameDescriptor,
    pub format: ColorFormat,
}

#[derive(Default)]
pub struct GpuState {
    next_id: u64,
    created: u64,
    destroyed: u64,
    live: Vec<u64>,
    fail_next_import: bool,
}

#[derive(Default)]
pub struct MockGpu {
    state: Mutex<GpuState>,
}

impl MockGpu {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn textures_created(&self) -> u64 {
        self.state.lock().unwrap().created
    }

    pub fn textures_destroyed(&self) -> u64 {
        self.state.lock().unwrap().destroyed
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn fail_next_import(&self) {
        self.state.lock().unwrap().fail_next_import = true;
    }
}

pub struct MockScope<'a>(MutexGuard<'a, GpuState>);

impl GraphicsContext for MockGpu {
    type Texture = MockTexture;
    type Scope<'a> = MockScope<'a>;

    fn enter(&self) -> MockScope<'_> {
        MockScope(self.state.lock().unwrap())
    }
}

impl GraphicsScope for MockScope<'_> {
    type Texture = MockTexture;

    fn import_dmabuf(&mut self, layout: &DmabufLayout<'_>, format: ColorFormat) -> Result<MockTexture, CaptureError> {
        if std::mem::take(&mut self.0.fail_next_import) {
            return Err(CaptureError::allocation_failed("mock texture import rejected"));
        }
        self.0.next_id += 1;
        self.0.created += 1;
        let id = self.0.next_id;
        self.0.live.push(id);
        Ok(MockTexture { id, descriptor: layout.descriptor, format })
    }

    fn destroy_texture(&mut self, texture: MockTexture) {
        let before = self.0.live.len();
        self.0.live.retain(|&id| id != texture.id);
        assert_eq!(self.0.live.len() + 1, before, "texture {} destroyed twice", texture.id);
        self.0.destroyed += 1;
    }
}
