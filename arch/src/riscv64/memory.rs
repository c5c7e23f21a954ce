use core::marker::PhantomData;

use riscv::register::satp;

use super::csr::{GuardCsrs, Hart};

pub fn current_page_table_token() -> usize {
    satp::read().bits()
}

/// Write `page_table_token` into satp and sfence.vma
pub unsafe fn switch_page_table(page_table_token: usize) {
    satp::write(page_table_token);
    riscv::asm::sfence_vma_all();
}

/// Permit supervisor access to user pages (`sstatus.SUM`) while alive.
///
/// Nests: only the outermost guard that actually set the bit clears it.
pub struct SumGuard<C: GuardCsrs = Hart> {
    sum_before: bool,
    _csrs: PhantomData<C>,
}

impl<C: GuardCsrs> SumGuard<C> {
    pub fn new() -> Self {
        let sum_before = C::user_access_enabled();
        if !sum_before {
            unsafe { C::set_user_access_enabled(true) };
        }
        Self {
            sum_before,
            _csrs: PhantomData,
        }
    }
}

impl<C: GuardCsrs> Drop for SumGuard<C> {
    fn drop(&mut self) {
        if !self.sum_before {
            unsafe { C::set_user_access_enabled(false) };
        }
    }
}

#[cfg(test)]
mod tests {
    use riscv::register::stvec::TrapMode;

    use super::*;
    use crate::{csr::TrapVector, interrupts::tests::FakeHart};

    #[test]
    fn only_the_guard_that_set_sum_clears_it() {
        let stvec = TrapVector {
            addr: 0,
            mode: TrapMode::Direct,
        };
        FakeHart::reset(false, false, stvec);
        {
            let _outer = SumGuard::<FakeHart>::new();
            {
                let _inner = SumGuard::<FakeHart>::new();
                assert!(FakeHart::user_access_enabled());
            }
            assert!(FakeHart::user_access_enabled());
        }
        assert!(!FakeHart::user_access_enabled());

        FakeHart::reset(false, true, stvec);
        drop(SumGuard::<FakeHart>::new());
        assert!(FakeHart::user_access_enabled());
    }
}
