use core::marker::PhantomData;

use riscv::register::stvec::TrapMode;

pub use super::csr::TrapVector;
use super::csr::{GuardCsrs, Hart};

pub fn is_interrupt_enabled() -> bool {
    Hart::interrupt_enabled()
}

pub unsafe fn enable_interrupt() {
    Hart::set_interrupt_enabled(true);
}

pub unsafe fn disable_interrupt() {
    Hart::set_interrupt_enabled(false);
}

pub fn get_trap_handler() -> TrapVector {
    Hart::trap_vector()
}

/// Every trap jumps to `handler_addr`.
pub unsafe fn set_trap_handler(handler_addr: usize) {
    Hart::set_trap_vector(TrapVector {
        addr: handler_addr,
        mode: TrapMode::Direct,
    });
}

/// Disable interrupt and resume to the interrupt state before when it gets
/// dropped.
pub struct InterruptGuard<C: GuardCsrs = Hart> {
    interrupt_before: bool,
    _csrs: PhantomData<C>,
}

impl<C: GuardCsrs> InterruptGuard<C> {
    pub fn new() -> Self {
        let interrupt_before = C::interrupt_enabled();
        unsafe { C::set_interrupt_enabled(false) };
        Self {
            interrupt_before,
            _csrs: PhantomData,
        }
    }
}

impl<C: GuardCsrs> Drop for InterruptGuard<C> {
    fn drop(&mut self) {
        if self.interrupt_before {
            unsafe { C::set_interrupt_enabled(true) };
        }
    }
}

/// Install a vectored trap table and put the previous `stvec` (address and
/// mode) back when dropped.
pub struct TrapHandlerGuard<C: GuardCsrs = Hart> {
    trap_handler_before: TrapVector,
    _csrs: PhantomData<C>,
}

impl<C: GuardCsrs> TrapHandlerGuard<C> {
    /// Exceptions enter at `vector_base`, interrupt `n` at
    /// `vector_base + 4 * n`.
    pub fn new_vectored(vector_base: usize) -> Self {
        let trap_handler_before = C::trap_vector();
        unsafe {
            C::set_trap_vector(TrapVector {
                addr: vector_base,
                mode: TrapMode::Vectored,
            })
        };
        Self {
            trap_handler_before,
            _csrs: PhantomData,
        }
    }
}

impl<C: GuardCsrs> Drop for TrapHandlerGuard<C> {
    fn drop(&mut self) {
        unsafe { C::set_trap_vector(self.trap_handler_before) }
    }
}
