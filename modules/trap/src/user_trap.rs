use crate::cause::{AccessType, ExceptionCause, TrapCause};

/// Why the user program came back to the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserTrap {
    pub cause: TrapCause,
    pub stval: usize,
}

impl UserTrap {
    pub fn current() -> Self {
        Self {
            cause: TrapCause::current(),
            stval: riscv::register::stval::read(),
        }
    }

    pub fn is_syscall(&self) -> bool {
        self.cause == TrapCause::Exception(ExceptionCause::UserEnvCall)
    }

    /// Faulting address and access kind, if this was a page fault.
    pub fn page_fault(&self) -> Option<(usize, AccessType)> {
        self.cause
            .page_fault_access()
            .map(|access| (self.stval, access))
    }
}

#[cfg(target_arch = "riscv64")]
mod hw {
    use arch::{
        interrupts::disable_interrupt,
        memory::{current_page_table_token, switch_page_table},
    };

    use super::UserTrap;
    use crate::{set_kernel_trap_entry, set_user_trap_entry, TrapContext};

    extern "C" {
        /// Saves the kernel's callee-saved registers into `cx`, loads the user
        /// registers from it and `sret`s. It comes back, as an ordinary return,
        /// only when `__trap_from_user` runs on the next user trap.
        fn __return_to_user(cx: *mut TrapContext, token: usize);
    }

    /// Run the user program described by `cx` in the address space `token`
    /// until it traps, then report why.
    ///
    /// Returns with interrupts disabled and the kernel trap entry installed;
    /// `cx` now holds the user registers as they were at the trap.
    pub fn return_to_user(cx: &mut TrapContext, token: usize) -> UserTrap {
        // Important! An interrupt between installing the user entry and
        // `sret` would be taken by `__trap_from_user` in kernel mode.
        unsafe { disable_interrupt() };

        if current_page_table_token() != token {
            unsafe { switch_page_table(token) };
        }

        set_user_trap_entry();

        // NOTE: float registers are reloaded with whatever `sstatus.FS` the
        // kernel runs with, which boot code leaves enabled.
        cx.user_fx.restore();

        unsafe { __return_to_user(cx, token) };

        set_kernel_trap_entry();
        cx.user_fx.mark_save_if_needed(cx.sstatus);

        let trap = UserTrap::current();
        log::trace!(
            "[return_to_user] back from user, {:?}, stval = {:#x}, sepc = {:#x}",
            trap.cause,
            trap.stval,
            cx.sepc
        );
        trap
    }
}

#[cfg(target_arch = "riscv64")]
pub use hw::return_to_user;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::InterruptCause;

    #[test]
    fn classifies_syscalls_and_page_faults() {
        let ecall = UserTrap {
            cause: TrapCause::from_bits(8),
            stval: 0,
        };
        assert!(ecall.is_syscall());
        assert_eq!(ecall.page_fault(), None);

        let store = UserTrap {
            cause: TrapCause::from_bits(15),
            stval: 0x4000_1234,
        };
        assert!(!store.is_syscall());
        assert_eq!(store.page_fault(), Some((0x4000_1234, AccessType::Write)));

        let timer = UserTrap {
            cause: TrapCause::Interrupt(InterruptCause::SupervisorTimer),
            stval: 0,
        };
        assert_eq!(timer.page_fault(), None);
    }
}
