//! Per-writer staging of dirty pages.
//!
//! A page appears at most once; staging it again overwrites the previous
//! image in place, so same-transaction writes to one page collapse to the
//! last value before anything reaches the log. `drain` yields pages in
//! first-staged order, which is the order their records land in the WAL.

use hashbrown::HashMap;
use smallvec::SmallVec;

#[derive(Debug, Clone)]
pub struct StagedPage {
    pub page_id: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct WriteBuffer {
    pages: SmallVec<[StagedPage; 8]>,
    index: HashMap<u32, usize>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, page_id: u32, data: &[u8]) {
        match self.index.get(&page_id) {
            Some(&slot) => self.pages[slot].data = data.to_vec(),
            None => {
                self.index.insert(page_id, self.pages.len());
                self.pages.push(StagedPage {
                    page_id,
                    data: data.to_vec(),
                });
            }
        }
    }

    pub fn drain(&mut self) -> SmallVec<[StagedPage; 8]> {
        self.index.clear();
        std::mem::take(&mut self.pages)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
