//! The linear memory pool.
//!
//! One `Value` array backs both allocation disciplines so that `@` and `!`
//! see a single address space: heap-style allocations (`alloc`, `resize`,
//! `free`) bump upward from zero, per-call allotments (`allot`) bump
//! downward from the top and are released when their scope unwinds. The two
//! fronts meeting is pool exhaustion.

use sabr_foundation::value::Value;

use crate::RuntimeError;

#[derive(Debug)]
pub struct MemoryPool {
    cells: Vec<Value>,
    /// First free cell of the upward-growing region.
    global_top: u64,
    /// First used cell of the downward-growing region.
    local_bottom: u64,
}

impl MemoryPool {
    pub fn new(size: usize) -> Self {
        Self {
            cells: vec![Value::ZERO; size],
            global_top: 0,
            local_bottom: size as u64,
        }
    }

    pub fn size(&self) -> u64 {
        self.cells.len() as u64
    }

    pub fn alloc_global(&mut self, count: u64) -> Result<u64, RuntimeError> {
        let base = self.global_top;
        let new_top = base.checked_add(count).ok_or(RuntimeError::MemoryPoolExhausted)?;
        if new_top > self.local_bottom {
            return Err(RuntimeError::MemoryPoolExhausted);
        }
        self.global_top = new_top;
        Ok(base)
    }

    /// Re-sizes the allocation at `base`, assuming it is the topmost one.
    pub fn resize_global(&mut self, base: u64, count: u64) -> Result<(), RuntimeError> {
        if base > self.global_top {
            return Err(RuntimeError::InvalidPoolOperation);
        }
        let new_top = base.checked_add(count).ok_or(RuntimeError::MemoryPoolExhausted)?;
        if new_top > self.local_bottom {
            return Err(RuntimeError::MemoryPoolExhausted);
        }
        self.global_top = new_top;
        Ok(())
    }

    pub fn free_global(&mut self, count: u64) -> Result<(), RuntimeError> {
        self.global_top = self
            .global_top
            .checked_sub(count)
            .ok_or(RuntimeError::InvalidPoolOperation)?;
        Ok(())
    }

    pub fn alloc_local(&mut self, count: u64) -> Result<u64, RuntimeError> {
        let new_bottom = self
            .local_bottom
            .checked_sub(count)
            .ok_or(RuntimeError::MemoryPoolExhausted)?;
        if new_bottom < self.global_top {
            return Err(RuntimeError::MemoryPoolExhausted);
        }
        self.local_bottom = new_bottom;
        Ok(new_bottom)
    }

    pub fn free_local(&mut self, count: u64) -> Result<(), RuntimeError> {
        let new_bottom = self
            .local_bottom
            .checked_add(count)
            .ok_or(RuntimeError::InvalidPoolOperation)?;
        if new_bottom > self.size() {
            return Err(RuntimeError::InvalidPoolOperation);
        }
        self.local_bottom = new_bottom;
        Ok(())
    }

    pub fn read(&self, address: u64) -> Result<Value, RuntimeError> {
        self.cells
            .get(address as usize)
            .copied()
            .ok_or(RuntimeError::AddressOutOfRange { address })
    }

    pub fn write(&mut self, address: u64, value: Value) -> Result<(), RuntimeError> {
        match self.cells.get_mut(address as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(RuntimeError::AddressOutOfRange { address }),
        }
    }
}
