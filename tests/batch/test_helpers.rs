//! Shared fixtures for batch BDD scenarios.

use std::cell::RefCell;

use jupyfly::test_support::{MemoryControlPlane, MemoryRecordStore};
use jupyfly::{BatchReport, CancelFlag};
use rstest::fixture;

#[derive(Debug, Default)]
pub struct BatchContext {
    pub plane: MemoryControlPlane,
    pub records: MemoryRecordStore,
    pub cancel: CancelFlag,
    pub contents: RefCell<String>,
    pub report: RefCell<Option<BatchReport>>,
}

impl BatchContext {
    pub fn push_line(&self, line: &str) {
        let mut contents = self.contents.borrow_mut();
        contents.push_str(line);
        contents.push('\n');
    }
}

#[fixture]
pub fn batch_context() -> BatchContext {
    BatchContext::default()
}
