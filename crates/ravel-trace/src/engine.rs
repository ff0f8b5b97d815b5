//! The analysis engine: worker loop, trace decoding, and control
//! surface.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use ravel_core::{Data, DataKind, Entity, Function, Instruction};
use ravel_decode::{Context, InstructionDecoder};
use ravel_image::Image;
use tracing::{debug, warn};

use crate::listener::ListenerSet;
use crate::{DisassemblyData, DisassemblyListener, EngineError, WorkItem};

/// Everything the analyzer worker owns: the work queue, the store, and
/// the per-address function associations. The association map points
/// at functions by their start address; the store's function table
/// holds the single record per function.
struct AnalysisState {
    queue: BinaryHeap<Reverse<WorkItem>>,
    data: DisassemblyData,
    function_info: BTreeMap<u64, u64>,
    ctx: Context,
}

/// Events collected while the state lock is held and dispatched to
/// listeners after it is released.
enum Event {
    Error(u64),
    Change(u64),
}

struct Worker {
    handle: JoinHandle<()>,
    finished: Arc<AtomicBool>,
}

/// The trace-driven disassembler.
///
/// Construction registers every import as a named function and queues
/// code work at the image entry point. A dedicated worker then drains
/// the queue: code items become linear instruction traces, data items
/// become decoded data, and instruction operands feed new work back
/// into the queue. After the queue drains, a post-pass renames
/// single-jump trampolines after their targets.
pub struct Disassembler<I: Image + 'static> {
    image: Arc<I>,
    decoder: Arc<InstructionDecoder>,
    state: Arc<Mutex<AnalysisState>>,
    listeners: ListenerSet,
    cancel: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl<I: Image + 'static> Disassembler<I> {
    /// Creates an engine over an image and a prepared decoder.
    pub fn new(image: Arc<I>, decoder: Arc<InstructionDecoder>) -> Self {
        let mut data = DisassemblyData::new();
        let mut function_info = BTreeMap::new();

        for (&addr, name) in image.imports() {
            function_info.insert(addr, addr);
            data.insert_function(Function::with_name(addr, name.clone()));
            data.function_renamed(addr);
        }

        let entry = image.code_entry_point_mem();
        if !function_info.contains_key(&entry) {
            function_info.insert(entry, entry);
            data.insert_function(Function::with_name(entry, "start"));
        }

        let mut queue = BinaryHeap::new();
        queue.push(Reverse(WorkItem::code(entry)));

        Self {
            image,
            decoder,
            state: Arc::new(Mutex::new(AnalysisState {
                queue,
                data,
                function_info,
                ctx: Context::new(),
            })),
            listeners: ListenerSet::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Creates an engine over an image with the builtin opcode table.
    pub fn with_builtin_decoder(image: Arc<I>) -> Self {
        Self::new(image, Arc::new(InstructionDecoder::with_builtin_table()))
    }

    /// Registers a listener.
    pub fn add_listener(&self, listener: Arc<dyn DisassemblyListener>) {
        self.listeners.add(listener);
    }

    /// Removes a previously registered listener (by identity).
    pub fn remove_listener(&self, listener: &Arc<dyn DisassemblyListener>) {
        self.listeners.remove(listener);
    }

    /// Starts the analyzer worker. Fails if one is already running;
    /// a worker that finished on its own is reaped and replaced.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut slot = lock(&self.worker);
        if let Some(worker) = slot.as_ref() {
            if !worker.finished.load(Ordering::SeqCst) {
                return Err(EngineError::AlreadyRunning);
            }
        }
        if let Some(worker) = slot.take() {
            let _ = worker.handle.join();
        }

        self.cancel.store(false, Ordering::SeqCst);
        for listener in self.listeners.snapshot() {
            listener.on_analyze_start();
        }

        let finished = Arc::new(AtomicBool::new(false));
        let handle = {
            let image = Arc::clone(&self.image);
            let decoder = Arc::clone(&self.decoder);
            let state = Arc::clone(&self.state);
            let listeners = self.listeners.clone();
            let cancel = Arc::clone(&self.cancel);
            let finished = Arc::clone(&finished);
            std::thread::Builder::new()
                .name("ravel-analyzer".into())
                .spawn(move || {
                    worker_loop(&image, &decoder, &state, &listeners, &cancel);
                    finished.store(true, Ordering::SeqCst);
                    for listener in listeners.snapshot() {
                        listener.on_analyze_stop();
                    }
                })?
        };
        *slot = Some(Worker { handle, finished });
        Ok(())
    }

    /// Signals cancellation and joins the worker. Partial state is
    /// preserved; a later `start` resumes from the remaining queue.
    pub fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            self.cancel.store(true, Ordering::SeqCst);
            let _ = worker.handle.join();
            self.cancel.store(false, Ordering::SeqCst);
        }
    }

    /// Joins the worker without cancelling it.
    pub fn wait(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.handle.join();
        }
    }

    /// Drops the entity at `addr` and queues a fresh code trace there,
    /// starting the analyzer if it is idle.
    pub fn reanalyze(&self, addr: u64) -> Result<(), EngineError> {
        let events: Vec<Event> = {
            let mut state = lock(&self.state);
            state.data.clear_decoded_entity(addr);
            state.queue.push(Reverse(WorkItem::code(addr)));
            state.data.take_pending().into_iter().map(Event::Change).collect()
        };
        dispatch(&self.listeners, &events);

        match self.start() {
            Err(EngineError::AlreadyRunning) => Ok(()),
            other => other,
        }
    }

    /// Resolves an address to a function name when it is a function
    /// start.
    pub fn resolve_address(&self, addr: u64) -> Option<String> {
        let state = lock(&self.state);
        let &id = state.function_info.get(&addr)?;
        let function = state.data.function(id)?;
        if function.start() == addr {
            Some(function.name().to_string())
        } else {
            None
        }
    }

    /// Runs a closure against the store.
    pub fn with_data<R>(&self, f: impl FnOnce(&DisassemblyData) -> R) -> R {
        let state = lock(&self.state);
        f(&state.data)
    }

    /// Snapshot of the discovered functions in start order.
    pub fn functions(&self) -> Vec<Function> {
        let state = lock(&self.state);
        state.data.functions().cloned().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch(listeners: &ListenerSet, events: &[Event]) {
    if events.is_empty() {
        return;
    }
    let snapshot = listeners.snapshot();
    for event in events {
        for listener in &snapshot {
            match event {
                Event::Error(addr) => listener.on_analyze_error(*addr),
                Event::Change(addr) => listener.on_change(*addr),
            }
        }
    }
}

fn worker_loop<I: Image>(
    image: &Arc<I>,
    decoder: &InstructionDecoder,
    state: &Mutex<AnalysisState>,
    listeners: &ListenerSet,
    cancel: &AtomicBool,
) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            debug!("analyzer cancelled");
            break;
        }
        let item = {
            let mut st = lock(state);
            st.queue.pop().map(|Reverse(item)| item)
        };
        let Some(item) = item else {
            break;
        };

        let mut events = Vec::new();
        {
            let mut st = lock(state);
            match item.data {
                None => disassemble_trace(&mut st, image, decoder, item.address, &mut events),
                Some(data) => analyze_data(&mut st, image, data, &mut events),
            }
            for addr in st.data.take_pending() {
                events.push(Event::Change(addr));
            }
        }
        dispatch(listeners, &events);
    }

    let mut events = Vec::new();
    {
        let mut st = lock(state);
        post_pass(&mut st);
        for addr in st.data.take_pending() {
            events.push(Event::Change(addr));
        }
    }
    dispatch(listeners, &events);
}

/// Decodes a linear trace starting at `addr` until a control-flow
/// terminator, an already-decoded address, or an error.
fn disassemble_trace<I: Image>(
    st: &mut AnalysisState,
    image: &Arc<I>,
    decoder: &InstructionDecoder,
    addr: u64,
    events: &mut Vec<Event>,
) {
    let mut mem_addr = addr;
    let mut current = st.function_info.get(&addr).copied();

    loop {
        if let Some(entity) = st.data.entity_on_exact_address(mem_addr) {
            if entity.is_instruction() {
                // already traced
                break;
            }
        }
        if st.data.find_entity_on_address(mem_addr).is_some() {
            warn!("{:#010x} already covered by another decoding", mem_addr);
            break;
        }
        if !image.is_valid_address(mem_addr) {
            break;
        }

        st.ctx.reset();
        st.ctx.set_instruction_pointer(mem_addr);
        let decoded = match image.byte_sequence(mem_addr) {
            Ok(mut seq) => decoder.decode(&mut seq, &mut st.ctx),
            Err(err) => {
                warn!("byte sequence unavailable at {:#010x}: {}", mem_addr, err);
                events.push(Event::Error(mem_addr));
                break;
            }
        };
        let inst = match decoded {
            Ok(Some(inst)) => inst,
            Ok(None) => {
                events.push(Event::Error(mem_addr));
                break;
            }
            Err(err) => {
                warn!("disassemble error at {:#010x}: {}", mem_addr, err);
                events.push(Event::Error(mem_addr));
                break;
            }
        };

        let size = inst.size as u64;
        let stops = inst.stops_trace();
        if st.data.insert_entity(Entity::Instruction(inst.clone())).is_none() {
            break;
        }

        examine_instruction(st, image, &inst, &mut current, events);

        if stops {
            break;
        }
        mem_addr += size;

        // A function that never returns can run straight into the next
        // one; switch the attribution at the boundary.
        if let Some(&next) = st.function_info.get(&mem_addr) {
            current = Some(next);
        }
    }

    if let Some(start) = current {
        let grown = st
            .data
            .function(start)
            .map(|f| f.end() < mem_addr)
            .unwrap_or(false);
        if grown {
            st.data.update_function_end(start, mem_addr);
        }
    }
}

/// Inspects a freshly decoded instruction for new work: branch
/// targets, associated data, and probable pointers.
fn examine_instruction<I: Image>(
    st: &mut AnalysisState,
    image: &Arc<I>,
    inst: &Instruction,
    current: &mut Option<u64>,
    events: &mut Vec<Event>,
) {
    let src_addr = inst.address;

    for target in inst.branch_targets() {
        if image.is_valid_address(target) {
            if inst.is_call() {
                st.data.insert_reference(src_addr, target);
                if !st.function_info.contains_key(&target) {
                    st.function_info.insert(target, target);
                    st.data.insert_function(Function::new(target));
                    st.data.function_renamed(target);
                }
            } else if let Some(cur) = *current {
                // a plain branch target belongs to the function being
                // traced, unless it is already claimed
                st.function_info.entry(target).or_insert(cur);
            }
            st.queue.push(Reverse(WorkItem::code(target)));
            break;
        } else {
            warn!(
                "code at {:#010x} references invalid address {:#010x}",
                src_addr, target
            );
            events.push(Event::Error(src_addr));
        }
    }

    for data in inst.associated_data() {
        let addr = data.address();
        if !image.is_valid_address(addr) {
            continue;
        }
        st.data.insert_reference(src_addr, addr);
        st.queue.push(Reverse(WorkItem::data(data)));
    }

    for ptr in inst.probable_data_pointers() {
        if !image.is_valid_address(ptr) {
            continue;
        }
        if st.data.entity_on_exact_address(ptr).is_some() {
            continue;
        }
        st.data.insert_reference(src_addr, ptr);
        if image.is_code_address(ptr) {
            st.queue.push(Reverse(WorkItem::code(ptr)));
        } else {
            st.queue
                .push(Reverse(WorkItem::data(Data::new(ptr, DataKind::Unknown))));
        }
    }
}

/// Analyzes one queued datum and attaches it to its referents.
fn analyze_data<I: Image>(
    st: &mut AnalysisState,
    image: &Arc<I>,
    data: Data,
    events: &mut Vec<Event>,
) {
    let mem_addr = data.address();
    if let Some(cover) = st.data.info_covering_address(mem_addr) {
        if cover.has_instruction() {
            // data must not overwrite code
            return;
        }
        if cover.has_data() {
            // refinement of known data is not supported
            return;
        }
    }

    let mut data = data;
    let analyzed = match image.byte_sequence(mem_addr) {
        Ok(mut seq) => data.analyze(&mut seq),
        Err(err) => Err(err),
    };
    if let Err(err) = analyzed {
        warn!("data decode error at {:#010x}: {}", mem_addr, err);
        events.push(Event::Error(mem_addr));
        return;
    }

    if st.data.insert_entity(Entity::Data(data.clone())).is_some() {
        let refs: Vec<u64> = st
            .data
            .info_on_exact_address(mem_addr)
            .map(|entry| entry.references().iter().copied().collect())
            .unwrap_or_default();
        for src in refs {
            st.data.attach_data(src, data.clone());
            st.data.tell_listeners(src);
        }
    }
}

/// Renames single-jump trampolines after the function they jump to.
fn post_pass(st: &mut AnalysisState) {
    let starts: Vec<u64> = st.data.functions().map(|f| f.start()).collect();
    for start in starts {
        let target = {
            let Some(entry) = st.data.info_on_exact_address(start) else {
                continue;
            };
            let Some(inst) = entry.entity().and_then(|e| e.as_instruction()) else {
                continue;
            };
            if !inst.is_unconditional_jump() {
                continue;
            }
            let mut targets: Vec<u64> =
                inst.associated_data().iter().map(|d| d.address()).collect();
            targets.extend(inst.branch_targets());
            if targets.len() != 1 {
                continue;
            }
            targets[0]
        };

        let Some(&real_id) = st.function_info.get(&target) else {
            continue;
        };
        let Some(real) = st.data.function(real_id) else {
            continue;
        };
        let name = format!("!{}", real.name());
        let already = st
            .data
            .function(start)
            .map(|f| f.name() == name)
            .unwrap_or(true);
        if already {
            continue;
        }
        st.data.rename_function(start, name);
        st.data.tell_listeners(target);
    }
}
