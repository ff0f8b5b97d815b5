//! End-to-end analysis scenarios over flat images.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};

use ravel_core::DataKind;
use ravel_image::{RawImage, SectionInfo, SectionKind};
use ravel_trace::{Disassembler, DisassemblyListener, EngineError};

const BASE: u64 = 0x1000;

#[derive(Default)]
struct Recorder {
    errors: Mutex<Vec<u64>>,
    changes: Mutex<Vec<u64>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl DisassemblyListener for Recorder {
    fn on_analyze_start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_analyze_stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_analyze_error(&self, addr: u64) {
        self.errors.lock().unwrap().push(addr);
    }
    fn on_change(&self, addr: u64) {
        self.changes.lock().unwrap().push(addr);
    }
}

fn run(image: RawImage) -> (Disassembler<RawImage>, Arc<Recorder>) {
    let engine = Disassembler::with_builtin_decoder(Arc::new(image));
    let recorder = Arc::new(Recorder::default());
    engine.add_listener(recorder.clone());
    engine.start().unwrap();
    engine.wait();
    (engine, recorder)
}

/// Invariant sweep over the final store: addresses key their own
/// entities, and no two entities overlap.
fn check_invariants(engine: &Disassembler<RawImage>) {
    engine.with_data(|data| {
        let mut last_end = 0u64;
        for (&addr, entry) in data.entries() {
            if let Some(entity) = entry.entity() {
                assert_eq!(entity.address(), addr);
                assert!(addr >= last_end, "entities overlap at {:#x}", addr);
                last_end = addr + entity.length();
            }
        }
    });
}

#[test]
fn test_entry_point_nop_ret() {
    let image = RawImage::new(BASE, vec![0x90, 0xc3]);
    let (engine, recorder) = run(image);

    engine.with_data(|data| {
        let nop = data.entity_on_exact_address(BASE).unwrap();
        let ret = data.entity_on_exact_address(BASE + 1).unwrap();
        assert_eq!(nop.as_instruction().unwrap().mnemonic, "nop");
        assert_eq!(ret.as_instruction().unwrap().mnemonic, "ret");

        let function = data.function(BASE).unwrap();
        assert_eq!(function.start(), BASE);
        assert_eq!(function.end(), BASE + 1);

        // no cross-references anywhere
        for (_, entry) in data.entries() {
            assert!(entry.references().is_empty());
        }
    });
    assert!(recorder.errors.lock().unwrap().is_empty());
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 1);
    check_invariants(&engine);
}

#[test]
fn test_call_and_return() {
    // call +4; ret; three nops; ret
    let bytes = vec![0xe8, 0x04, 0x00, 0x00, 0x00, 0xc3, 0x90, 0x90, 0x90, 0xc3];
    let (engine, recorder) = run(RawImage::new(BASE, bytes));

    let callee = BASE + 9;
    engine.with_data(|data| {
        let caller = data.function(BASE).unwrap();
        assert_eq!(caller.end(), BASE + 5);

        let f = data.function(callee).unwrap();
        assert_eq!(f.start(), callee);
        assert_eq!(f.end(), callee);
        assert_eq!(f.name(), "sub_00001009");

        // the call created an edge from the call site to the callee
        let entry = data.info_on_exact_address(callee).unwrap();
        assert!(entry.references().contains(&BASE));
    });
    assert_eq!(engine.resolve_address(callee).unwrap(), "sub_00001009");
    assert!(recorder.errors.lock().unwrap().is_empty());
    check_invariants(&engine);
}

#[test]
fn test_trampoline_takes_import_name() {
    // jmp [0x2000], with the import slot inside a data section
    let mut bytes = vec![0u8; 0x1004];
    bytes[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x20, 0x00, 0x00]);
    bytes[0x1000..0x1004].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
    let image = RawImage::new(BASE, bytes)
        .with_section(SectionInfo::new(".text", BASE, 0x1000, SectionKind::Code))
        .with_section(SectionInfo::new(".idata", 0x2000, 4, SectionKind::Imports))
        .with_import(0x2000, "ExitProcess");

    let (engine, recorder) = run(image);

    engine.with_data(|data| {
        let stub = data.function(BASE).unwrap();
        assert_eq!(stub.name(), "!ExitProcess");

        // the import slot was analyzed as data and linked back
        let slot = data.entity_on_exact_address(0x2000).unwrap();
        assert_eq!(slot.as_data().unwrap().value(), Some(0x12345678));
        let entry = data.info_on_exact_address(0x2000).unwrap();
        assert!(entry.references().contains(&BASE));
        let jmp_entry = data.info_on_exact_address(BASE).unwrap();
        assert_eq!(jmp_entry.attached_data().len(), 1);
    });
    assert_eq!(engine.resolve_address(0x2000).unwrap(), "ExitProcess");
    // the rename notified the import slot's observers
    assert!(recorder.changes.lock().unwrap().contains(&0x2000));
    check_invariants(&engine);
}

#[test]
fn test_direct_jump_trampoline() {
    // jmp rel32 straight to an imported function address
    let mut bytes = vec![0u8; 0x10];
    bytes[..5].copy_from_slice(&[0xe9, 0x0b, 0x00, 0x00, 0x00]);
    bytes[0x10 - 1] = 0xc3;
    let target = BASE + 0x10;
    let mut full = bytes;
    full.push(0xc3); // byte at the import address itself
    let image = RawImage::new(BASE, full).with_import(target, "ExitProcess");

    let (engine, _recorder) = run(image);

    engine.with_data(|data| {
        assert_eq!(data.function(BASE).unwrap().name(), "!ExitProcess");
        // the import kept its own identity
        assert_eq!(data.function(target).unwrap().name(), "ExitProcess");
    });
    check_invariants(&engine);
}

#[test]
fn test_unknown_opcode_reports_error_and_stops() {
    // 0F 05 matches nothing in the table
    let (engine, recorder) = run(RawImage::new(BASE, vec![0x0f, 0x05, 0x90]));

    assert_eq!(recorder.errors.lock().unwrap().as_slice(), &[BASE]);
    engine.with_data(|data| {
        assert!(data.entity_on_exact_address(BASE).is_none());
    });
}

#[test]
fn test_invalid_branch_target_continues_trace() {
    // je far outside the image, then fall through to ret
    let (engine, recorder) = run(RawImage::new(BASE, vec![0x74, 0x7f, 0xc3]));

    assert_eq!(recorder.errors.lock().unwrap().as_slice(), &[BASE]);
    engine.with_data(|data| {
        assert!(data.entity_on_exact_address(BASE).is_some());
        assert!(data.entity_on_exact_address(BASE + 2).is_some());
        assert_eq!(data.function(BASE).unwrap().end(), BASE + 2);
    });
    check_invariants(&engine);
}

#[test]
fn test_probable_pointer_promotes_data() {
    // mov eax, 0x1008; ret; then a string at 0x1008
    let mut bytes = vec![0xb8, 0x08, 0x10, 0x00, 0x00, 0xc3];
    bytes.extend_from_slice(b"  ravel\0");
    let image = RawImage::new(BASE, bytes)
        .with_section(SectionInfo::new(".text", BASE, 6, SectionKind::Code))
        .with_section(SectionInfo::new(".data", BASE + 6, 10, SectionKind::Data));

    let (engine, _recorder) = run(image);

    engine.with_data(|data| {
        let datum = data.entity_on_exact_address(0x1008).unwrap();
        let datum = datum.as_data().unwrap();
        assert_eq!(datum.kind(), DataKind::String);
        assert_eq!(datum.text(), Some("ravel"));
        let entry = data.info_on_exact_address(0x1008).unwrap();
        assert!(entry.references().contains(&BASE));
    });
    check_invariants(&engine);
}

#[test]
fn test_fall_through_into_known_function() {
    // entry: nop; nop; then the bytes of a function discovered via a
    // call from later code would switch attribution. Simpler shape:
    // call creates the callee first, then the caller falls through.
    //
    //   0x1000: call 0x1005
    //   0x1005: nop          <- callee start (fall-through target too)
    //   0x1006: ret
    let bytes = vec![0xe8, 0x00, 0x00, 0x00, 0x00, 0x90, 0xc3];
    let (engine, _recorder) = run(RawImage::new(BASE, bytes));

    engine.with_data(|data| {
        let callee = data.function(BASE + 5).unwrap();
        assert_eq!(callee.end(), BASE + 6);
        // once attribution switches, the tail belongs to the callee;
        // the entry function's range never grew past its start
        let caller = data.function(BASE).unwrap();
        assert_eq!(caller.end(), BASE);
    });
    check_invariants(&engine);
}

fn listing(engine: &Disassembler<RawImage>) -> Vec<String> {
    let mut lines = Vec::new();
    engine.with_data(|data| {
        for (&addr, entry) in data.entries() {
            let entity = entry
                .entity()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".into());
            let refs: Vec<String> = entry
                .references()
                .iter()
                .map(|r| format!("{:x}", r))
                .collect();
            lines.push(format!("{:x} {} [{}]", addr, entity, refs.join(",")));
        }
        for function in data.functions() {
            lines.push(format!(
                "fn {:x}..{:x} {}",
                function.start(),
                function.end(),
                function.name()
            ));
        }
    });
    lines
}

fn busy_image() -> RawImage {
    let bytes = vec![0xe8, 0x04, 0x00, 0x00, 0x00, 0xc3, 0x90, 0x90, 0x90, 0xc3];
    RawImage::new(BASE, bytes)
}

#[test]
fn test_runs_are_deterministic() {
    let (first, _) = run(busy_image());
    let (second, _) = run(busy_image());
    assert_eq!(listing(&first), listing(&second));
}

#[test]
fn test_stop_and_resume_matches_uninterrupted_run() {
    let (reference, _) = run(busy_image());

    let engine = Disassembler::with_builtin_decoder(Arc::new(busy_image()));
    engine.start().unwrap();
    engine.stop();
    engine.start().unwrap();
    engine.wait();

    assert_eq!(listing(&engine), listing(&reference));
}

struct Blocker {
    entered: Sender<()>,
    release: Mutex<std::sync::mpsc::Receiver<()>>,
    tripped: AtomicUsize,
}

impl DisassemblyListener for Blocker {
    fn on_change(&self, _addr: u64) {
        if self.tripped.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.entered.send(());
            let _ = self.release.lock().unwrap().recv();
        }
    }
}

#[test]
fn test_second_start_fails_while_running() {
    let engine = Disassembler::with_builtin_decoder(Arc::new(busy_image()));

    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel();
    engine.add_listener(Arc::new(Blocker {
        entered: entered_tx,
        release: Mutex::new(release_rx),
        tripped: AtomicUsize::new(0),
    }));

    engine.start().unwrap();
    entered_rx.recv().unwrap();
    assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
    release_tx.send(()).unwrap();
    engine.wait();

    // after the worker finished, a new run may begin
    engine.start().unwrap();
    engine.wait();
}

#[test]
fn test_reanalyze_after_patch() {
    let image = Arc::new(RawImage::new(BASE, vec![0x90, 0xc3]));
    let engine = Disassembler::with_builtin_decoder(image.clone());
    engine.start().unwrap();
    engine.wait();

    engine.with_data(|data| {
        assert_eq!(
            data.entity_on_exact_address(BASE)
                .unwrap()
                .as_instruction()
                .unwrap()
                .mnemonic,
            "nop"
        );
    });

    // patch the nop into int3 and reanalyze the trace
    image.patch_byte(BASE, 0xcc).unwrap();
    engine.reanalyze(BASE).unwrap();
    engine.wait();

    engine.with_data(|data| {
        assert_eq!(
            data.entity_on_exact_address(BASE)
                .unwrap()
                .as_instruction()
                .unwrap()
                .mnemonic,
            "int3"
        );
    });
    check_invariants(&engine);
}

#[test]
fn test_imports_resolve_before_start() {
    let image = RawImage::new(BASE, vec![0xc3]).with_import(BASE, "EntryImport");
    let engine = Disassembler::with_builtin_decoder(Arc::new(image));
    assert_eq!(engine.resolve_address(BASE).unwrap(), "EntryImport");
    assert_eq!(engine.resolve_address(BASE + 1), None);
}

#[test]
fn test_group_extension_and_prefix_scenarios_end_to_end() {
    // add eax, 5; cmp eax, 5; movdqa xmm0, [eax]; ret
    let bytes = vec![
        0x83, 0xc0, 0x05, // add eax, 5
        0x83, 0xf8, 0x05, // cmp eax, 5
        0x66, 0x0f, 0x6f, 0x00, // movdqa xmm0, [eax]
        0xc3, // ret
    ];
    let (engine, recorder) = run(RawImage::new(BASE, bytes));

    engine.with_data(|data| {
        let mnemonics: Vec<&str> = data
            .entries()
            .filter_map(|(_, e)| e.entity())
            .filter_map(|e| e.as_instruction())
            .map(|i| i.mnemonic)
            .collect();
        assert_eq!(mnemonics, vec!["add", "cmp", "movdqa", "ret"]);
    });
    assert!(recorder.errors.lock().unwrap().is_empty());
    check_invariants(&engine);
}
