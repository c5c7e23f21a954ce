//! Trap handling functionality
//!
//! Entry and exit paths between user and kernel mode, the kernel-mode trap
//! entry, and a probe that touches one byte of user memory without letting a
//! bad pointer fault the kernel.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cause;
mod context;
/// Kernel trap handler
pub mod kernel_trap;
/// On-target checks of the assembly paths
#[cfg(all(feature = "selftest", target_arch = "riscv64"))]
pub mod selftest;
pub mod user_access;
/// Fault-tolerant single byte user memory access
pub mod user_rw;
/// Return to user and come back
pub mod user_trap;

pub use cause::{AccessType, ExceptionCause, InterruptCause, TrapCause};
pub use context::{slot, TrapContext, UserFloatContext};
pub use kernel_trap::{KernelTrap, KernelTrapIf};
pub use user_rw::UserFault;
pub use user_trap::UserTrap;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        use core::arch::global_asm;

        use arch::interrupts::set_trap_handler;

        global_asm!(include_str!("trap.S"));

        extern "C" {
            fn __trap_from_user();
            fn __trap_from_kernel();
        }

        pub fn init() {
            set_kernel_trap_entry();
        }

        /// Traps taken in supervisor mode go to `__trap_from_kernel`.
        pub fn set_kernel_trap_entry() {
            unsafe { set_trap_handler(__trap_from_kernel as usize) };
        }

        fn set_user_trap_entry() {
            unsafe { set_trap_handler(__trap_from_user as usize) };
        }
    }
}
