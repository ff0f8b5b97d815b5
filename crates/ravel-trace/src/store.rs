//! The disassembly data store.

use std::collections::{BTreeMap, BTreeSet};

use ravel_core::{Data, Entity, Function};
use tracing::{debug, warn};

/// Per-address record: the decoded entity (at most one), the addresses
/// of entries referencing this one, and resolved data attached for
/// display next to the referencing entity.
#[derive(Debug, Clone)]
pub struct DataEntry {
    address: u64,
    entity: Option<Entity>,
    references: BTreeSet<u64>,
    attached_data: Vec<Data>,
}

impl DataEntry {
    fn new(address: u64) -> Self {
        Self {
            address,
            entity: None,
            references: BTreeSet::new(),
            attached_data: Vec::new(),
        }
    }

    /// Address of this entry.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The decoded entity, if one has been placed here.
    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    /// Addresses of entries that reference this one.
    pub fn references(&self) -> &BTreeSet<u64> {
        &self.references
    }

    /// Data resolved for targets this entry references.
    pub fn attached_data(&self) -> &[Data] {
        &self.attached_data
    }

    /// Returns true if an instruction is decoded here.
    pub fn has_instruction(&self) -> bool {
        matches!(self.entity, Some(Entity::Instruction(_)))
    }

    /// Returns true if a datum is decoded here.
    pub fn has_data(&self) -> bool {
        matches!(self.entity, Some(Entity::Data(_)))
    }

    fn covers(&self, addr: u64) -> bool {
        match &self.entity {
            Some(entity) => addr >= self.address && addr < self.address + entity.length(),
            None => false,
        }
    }
}

/// Address-indexed map of decoded entities with reference edges,
/// function records, and queued change notifications.
///
/// Entries are non-overlapping (first decoding wins), so the covering
/// lookup is the predecessor with an entity. Change notifications are
/// queued here and flushed to listeners by the engine after each work
/// item.
#[derive(Debug, Default)]
pub struct DisassemblyData {
    entries: BTreeMap<u64, DataEntry>,
    functions: BTreeMap<u64, Function>,
    pending: BTreeSet<u64>,
}

impl DisassemblyData {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entity at its address. The first entity at an address
    /// wins; a second insert is rejected and reported.
    pub fn insert_entity(&mut self, entity: Entity) -> Option<&DataEntry> {
        let addr = entity.address();
        let entry = self
            .entries
            .entry(addr)
            .or_insert_with(|| DataEntry::new(addr));
        if entry.entity.is_some() {
            warn!("entity conflict at {:#010x}, keeping first", addr);
            return None;
        }
        entry.entity = Some(entity);
        self.pending.insert(addr);
        self.entries.get(&addr)
    }

    /// The entity stored exactly at `addr`, if any.
    pub fn entity_on_exact_address(&self, addr: u64) -> Option<&Entity> {
        self.entries.get(&addr).and_then(|entry| entry.entity())
    }

    /// The entity whose span covers `addr`, if any.
    pub fn find_entity_on_address(&self, addr: u64) -> Option<&Entity> {
        self.info_covering_address(addr).and_then(|e| e.entity())
    }

    /// The entry whose entity covers `addr`, if any. Entries without
    /// entities (bare reference targets) never cover anything.
    pub fn info_covering_address(&self, addr: u64) -> Option<&DataEntry> {
        self.entries
            .range(..=addr)
            .rev()
            .find(|(_, entry)| entry.entity.is_some())
            .map(|(_, entry)| entry)
            .filter(|entry| entry.covers(addr))
    }

    /// The entry stored exactly at `addr`, if any.
    pub fn info_on_exact_address(&self, addr: u64) -> Option<&DataEntry> {
        self.entries.get(&addr)
    }

    /// Drops the entity at `addr` and detaches resolved data from the
    /// entries that reference it. Reference edges survive so a
    /// re-decode reconnects to them.
    pub fn clear_decoded_entity(&mut self, addr: u64) {
        let sources = match self.entries.get_mut(&addr) {
            Some(entry) => {
                entry.entity = None;
                entry.references.iter().copied().collect::<Vec<_>>()
            }
            None => return,
        };
        for src in sources {
            if let Some(entry) = self.entries.get_mut(&src) {
                entry.attached_data.retain(|d| d.address() != addr);
                self.pending.insert(src);
            }
        }
        self.pending.insert(addr);
    }

    /// Records a reference edge from the entry at `src` to `target`,
    /// creating the target entry if needed.
    pub fn insert_reference(&mut self, src: u64, target: u64) {
        let entry = self
            .entries
            .entry(target)
            .or_insert_with(|| DataEntry::new(target));
        entry.references.insert(src);
        self.pending.insert(target);
    }

    /// Attaches a resolved datum to the entry at `addr`.
    pub fn attach_data(&mut self, addr: u64, data: Data) {
        if let Some(entry) = self.entries.get_mut(&addr) {
            entry.attached_data.retain(|d| d.address() != data.address());
            entry.attached_data.push(data);
        }
    }

    /// Registers a function. A function already known at the same
    /// start address is kept.
    pub fn insert_function(&mut self, function: Function) {
        let start = function.start();
        self.functions.entry(start).or_insert(function);
        self.pending.insert(start);
    }

    /// Grows a function's end address. Never shrinks.
    pub fn update_function_end(&mut self, start: u64, end: u64) {
        if let Some(function) = self.functions.get_mut(&start) {
            function.grow_end(end);
            self.pending.insert(start);
        }
    }

    /// Renames a function and fans the change out to the function's
    /// start, end, and referencing entries.
    pub fn rename_function(&mut self, start: u64, name: impl Into<String>) {
        if let Some(function) = self.functions.get_mut(&start) {
            function.set_name(name);
            self.function_renamed(start);
        }
    }

    /// Queues change notifications for a renamed function: its start,
    /// its end, and everything referencing its entry.
    pub fn function_renamed(&mut self, start: u64) {
        let Some(function) = self.functions.get(&start) else {
            return;
        };
        let end = function.end();
        let Some(entry) = self.entries.get(&start) else {
            debug!("renamed function at {:#010x} has no decoded entry", start);
            return;
        };
        let refs: Vec<u64> = entry.references.iter().copied().collect();
        self.pending.insert(start);
        self.pending.insert(end);
        for addr in refs {
            self.pending.insert(addr);
        }
    }

    /// The function starting at `start`, if any.
    pub fn function(&self, start: u64) -> Option<&Function> {
        self.functions.get(&start)
    }

    /// The function whose range contains `addr`, if any.
    pub fn function_covering(&self, addr: u64) -> Option<&Function> {
        self.functions
            .range(..=addr)
            .next_back()
            .map(|(_, f)| f)
            .filter(|f| f.contains(addr))
    }

    /// All known functions in start-address order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    /// All entries in address order.
    pub fn entries(&self) -> impl Iterator<Item = (&u64, &DataEntry)> {
        self.entries.iter()
    }

    /// Queues a change notification for an address.
    pub fn tell_listeners(&mut self, addr: u64) {
        self.pending.insert(addr);
    }

    /// Drains the queued change notifications.
    pub fn take_pending(&mut self) -> Vec<u64> {
        let pending = std::mem::take(&mut self.pending);
        pending.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravel_core::{DataKind, Instruction, Operation};

    fn nop_at(addr: u64) -> Entity {
        Entity::Instruction(Instruction {
            address: addr,
            size: 1,
            bytes: vec![0x90],
            mnemonic: "nop",
            operation: Operation::Nop,
            operands: vec![],
            lock: false,
            rep: false,
            repne: false,
        })
    }

    fn wide_at(addr: u64, size: usize) -> Entity {
        Entity::Instruction(Instruction {
            address: addr,
            size,
            bytes: vec![0; size],
            mnemonic: "mov",
            operation: Operation::Move,
            operands: vec![],
            lock: false,
            rep: false,
            repne: false,
        })
    }

    #[test]
    fn test_first_entity_wins() {
        let mut store = DisassemblyData::new();
        assert!(store.insert_entity(nop_at(0x1000)).is_some());
        assert!(store.insert_entity(wide_at(0x1000, 2)).is_none());
        assert!(store
            .entity_on_exact_address(0x1000)
            .unwrap()
            .as_instruction()
            .is_some());
    }

    #[test]
    fn test_covering_lookup() {
        let mut store = DisassemblyData::new();
        store.insert_entity(wide_at(0x1000, 5));
        assert!(store.find_entity_on_address(0x1003).is_some());
        assert!(store.find_entity_on_address(0x1005).is_none());
        assert!(store.find_entity_on_address(0x0fff).is_none());

        // a bare reference target between entities does not cover
        store.insert_reference(0x2000, 0x1002);
        assert_eq!(
            store.find_entity_on_address(0x1002).unwrap().address(),
            0x1000
        );
    }

    #[test]
    fn test_references_are_symmetric() {
        let mut store = DisassemblyData::new();
        store.insert_entity(nop_at(0x1000));
        store.insert_reference(0x1000, 0x2000);
        let entry = store.info_on_exact_address(0x2000).unwrap();
        assert!(entry.entity().is_none());
        assert!(entry.references().contains(&0x1000));
    }

    #[test]
    fn test_clear_decoded_entity_detaches() {
        let mut store = DisassemblyData::new();
        store.insert_entity(nop_at(0x1000));
        store.insert_reference(0x1000, 0x2000);
        store.insert_entity(Entity::Data(Data::new(0x2000, DataKind::Dword)));
        store.attach_data(0x1000, Data::new(0x2000, DataKind::Dword));

        store.clear_decoded_entity(0x2000);
        assert!(store.entity_on_exact_address(0x2000).is_none());
        assert!(store
            .info_on_exact_address(0x1000)
            .unwrap()
            .attached_data()
            .is_empty());
        // the edge survives for re-analysis
        assert!(store
            .info_on_exact_address(0x2000)
            .unwrap()
            .references()
            .contains(&0x1000));
    }

    #[test]
    fn test_function_table() {
        let mut store = DisassemblyData::new();
        store.insert_function(Function::new(0x1000));
        store.insert_function(Function::with_name(0x1000, "other"));
        assert_eq!(store.function(0x1000).unwrap().name(), "sub_00001000");

        store.update_function_end(0x1000, 0x1010);
        assert_eq!(store.function(0x1000).unwrap().end(), 0x1010);
        assert_eq!(store.function_covering(0x1008).unwrap().start(), 0x1000);
        assert!(store.function_covering(0x1011).is_none());
    }

    #[test]
    fn test_pending_notifications_drain() {
        let mut store = DisassemblyData::new();
        store.insert_entity(nop_at(0x1000));
        store.tell_listeners(0x3000);
        let pending = store.take_pending();
        assert_eq!(pending, vec![0x1000, 0x3000]);
        assert!(store.take_pending().is_empty());
    }
}
