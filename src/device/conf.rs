//! Device Configuration - Block Device Switch
//!
//! Based on Mach4 device/conf.h/c
//! Maps driver names to the block drivers that serve them.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::device::blkio::BlockDevice;
use crate::device::io_req::IoReturn;

// ============================================================================
// Block Device Switch
// ============================================================================

struct BdevEntry {
    name: String,
    dev: Arc<dyn BlockDevice>,
}

/// Registry of block drivers
#[derive(Default)]
pub struct BlockDevSwitch {
    entries: Vec<BdevEntry>,
}

impl BlockDevSwitch {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `dev` under `name`
    pub fn register(&mut self, name: &str, dev: Arc<dyn BlockDevice>) -> Result<(), IoReturn> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(IoReturn::AlreadyOpen);
        }
        self.entries.push(BdevEntry {
            name: String::from(name),
            dev,
        });
        Ok(())
    }

    /// Find the driver registered as `name`
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn BlockDevice>, IoReturn> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.dev))
            .ok_or(IoReturn::NoSuchDevice)
    }

    /// List all registered driver names
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

impl core::fmt::Debug for BlockDevSwitch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.name.as_str()))
            .finish()
    }
}

// ============================================================================
// Global State
// ============================================================================

static BDEVSW: spin::Once<Mutex<BlockDevSwitch>> = spin::Once::new();

/// Get the global block device switch
pub fn bdevsw() -> &'static Mutex<BlockDevSwitch> {
    BDEVSW.call_once(|| Mutex::new(BlockDevSwitch::new()))
}

pub fn bdev_register(name: &str, dev: Arc<dyn BlockDevice>) -> Result<(), IoReturn> {
    bdevsw().lock().register(name, dev)
}

pub fn bdev_lookup(name: &str) -> Result<Arc<dyn BlockDevice>, IoReturn> {
    bdevsw().lock().lookup(name)
}
