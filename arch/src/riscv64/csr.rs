//! The supervisor CSR bits the scoped guards save and restore.
//!
//! Guards are generic over [`GuardCsrs`] so their save/restore order can be
//! checked against a fake hart on the host. [`Hart`] is the real one.

use riscv::register::{
    sstatus,
    stvec::{self, TrapMode},
};

/// Address and mode held by `stvec`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapVector {
    pub addr: usize,
    pub mode: TrapMode,
}

pub trait GuardCsrs {
    /// `sstatus.SIE`
    fn interrupt_enabled() -> bool;
    unsafe fn set_interrupt_enabled(enabled: bool);
    /// `sstatus.SUM`
    fn user_access_enabled() -> bool;
    unsafe fn set_user_access_enabled(enabled: bool);
    fn trap_vector() -> TrapVector;
    unsafe fn set_trap_vector(vector: TrapVector);
}

/// The CSRs of the hart this code runs on.
pub struct Hart;

impl GuardCsrs for Hart {
    fn interrupt_enabled() -> bool {
        sstatus::read().sie()
    }

    unsafe fn set_interrupt_enabled(enabled: bool) {
        // Without `irq` the kernel never takes interrupts in supervisor mode.
        #[cfg(feature = "irq")]
        {
            if enabled {
                sstatus::set_sie();
            } else {
                sstatus::clear_sie();
            }
        }
        #[cfg(not(feature = "irq"))]
        let _ = enabled;
    }

    fn user_access_enabled() -> bool {
        sstatus::read().sum()
    }

    unsafe fn set_user_access_enabled(enabled: bool) {
        if enabled {
            sstatus::set_sum();
        } else {
            sstatus::clear_sum();
        }
    }

    fn trap_vector() -> TrapVector {
        let stvec = stvec::read();
        TrapVector {
            addr: stvec.address(),
            // The two reserved mode encodings are never written by this kernel.
            mode: stvec.trap_mode().unwrap_or(TrapMode::Direct),
        }
    }

    unsafe fn set_trap_vector(vector: TrapVector) {
        stvec::write(vector.addr, vector.mode);
    }
}
