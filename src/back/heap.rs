//! The managed heap: a mark-and-sweep collector over a live object table.
//!
//! Objects are addressed by an opaque `u32` handle into a `Vec`, not by raw
//! byte offsets into a bump-allocated byte array. A GC-compacted C heap needs
//! `memmove` and pointer fixup to keep handles valid; a `Vec`-backed table
//! gets that for free from the host language, so this crate uses the table
//! instead of porting the flexible-array-member layout in the original.

use tracing::debug;

use crate::error::RuntimeError;

const MAX_HEAP_BYTES: usize = 65536;
const HEADER_BYTES: usize = 8;

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub size: usize,
    pub marked: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    pub bytes_allocated: usize,
    pub gc_threshold: usize,
    pub gc_count: u32,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
            bytes_allocated: 0,
            gc_threshold: 4096,
            gc_count: 0,
        }
    }

    pub fn needs_collection(&self) -> bool {
        self.bytes_allocated > self.gc_threshold
    }

    pub fn alloc(&mut self, size: usize) -> Result<u32, RuntimeError> {
        if self.bytes_allocated + HEADER_BYTES + size > MAX_HEAP_BYTES {
            return Err(RuntimeError::OutOfHeap { line: 0 });
        }
        let handle = self.objects.len() as u32;
        self.objects.push(Some(HeapObject {
            size,
            marked: false,
            data: vec![0; size],
        }));
        self.bytes_allocated += HEADER_BYTES + size;
        Ok(handle)
    }

    pub fn get(&self, handle: u32) -> Option<&HeapObject> {
        self.objects.get(handle as usize).and_then(|o| o.as_ref())
    }

    pub fn get_mut(&mut self, handle: u32) -> Option<&mut HeapObject> {
        self.objects.get_mut(handle as usize).and_then(|o| o.as_mut())
    }

    pub fn unmark_all(&mut self) {
        for obj in self.objects.iter_mut().flatten() {
            obj.marked = false;
        }
    }

    pub fn mark(&mut self, handle: u32) {
        if let Some(Some(obj)) = self.objects.get_mut(handle as usize) {
            obj.marked = true;
        }
    }

    /// Drops every unmarked object and returns the number of bytes reclaimed.
    pub fn sweep(&mut self) -> usize {
        let mut reclaimed = 0;
        for slot in self.objects.iter_mut() {
            let unmarked = matches!(slot, Some(obj) if !obj.marked);
            if unmarked {
                if let Some(obj) = slot.take() {
                    reclaimed += HEADER_BYTES + obj.size;
                }
            }
        }
        self.bytes_allocated -= reclaimed;
        reclaimed
    }

    pub fn on_collection_complete(&mut self) {
        self.gc_count += 1;
        if self.bytes_allocated > self.gc_threshold {
            self.gc_threshold *= 2;
        }
        debug!(
            bytes_allocated = self.bytes_allocated,
            gc_threshold = self.gc_threshold,
            gc_count = self.gc_count,
            "gc cycle complete"
        );
    }

    pub fn live_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }
}
