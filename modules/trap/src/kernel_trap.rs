//! `__trap_from_kernel` saves the caller-saved registers and calls the fixed
//! symbol `kernel_trap_handler`. That symbol lives here and forwards the
//! decoded trap to whatever kernel implements [`KernelTrapIf`].

use crate_interface::call_interface;
use riscv::register::{sepc, stval};

use crate::cause::TrapCause;

/// A trap taken while the hart was already in supervisor mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelTrap {
    pub cause: TrapCause,
    pub stval: usize,
    /// Where execution resumes once the handler returns. `__trap_from_kernel`
    /// saves `sepc` on entry and writes it back before `sret`, so the
    /// handler cannot move the resume point: a kernel fault that must not
    /// resume has to end in a panic.
    pub sepc: usize,
}

impl KernelTrap {
    pub fn current() -> Self {
        Self {
            cause: TrapCause::current(),
            stval: stval::read(),
            sepc: sepc::read(),
        }
    }
}

/// Implemented by the kernel to decide what a kernel-mode trap means: timer
/// ticks, device interrupts, or a fatal fault.
///
/// The implementation runs on the interrupted stack, must return normally,
/// and may itself be interrupted; `__trap_from_kernel` nests.
#[crate_interface::def_interface]
pub trait KernelTrapIf {
    fn handle_kernel_trap(trap: KernelTrap);
}

#[cfg_attr(not(target_arch = "riscv64"), allow(dead_code))]
pub(crate) fn dispatch(trap: KernelTrap) {
    log::trace!(
        "[kernel_trap] {:?}, stval = {:#x}, sepc = {:#x}",
        trap.cause,
        trap.stval,
        trap.sepc
    );
    #[cfg(all(feature = "selftest", target_arch = "riscv64"))]
    if crate::selftest::take_soft_interrupt(&trap) {
        return;
    }
    call_interface!(KernelTrapIf::handle_kernel_trap(trap));
}

/// Kernel trap handler
#[cfg(target_arch = "riscv64")]
#[no_mangle]
extern "C" fn kernel_trap_handler() {
    dispatch(KernelTrap::current());
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cause::{ExceptionCause, InterruptCause};

    static SEEN: Mutex<Vec<KernelTrap>> = Mutex::new(Vec::new());

    struct RecordingKernel;

    #[crate_interface::impl_interface]
    impl KernelTrapIf for RecordingKernel {
        fn handle_kernel_trap(trap: KernelTrap) {
            SEEN.lock().unwrap().push(trap);
        }
    }

    #[test]
    fn dispatch_reaches_the_kernel_in_order() {
        let timer = KernelTrap {
            cause: TrapCause::Interrupt(InterruptCause::SupervisorTimer),
            stval: 0,
            sepc: 0xffff_ffc0_8020_1000,
        };
        let breakpoint = KernelTrap {
            cause: TrapCause::Exception(ExceptionCause::Breakpoint),
            stval: 0,
            sepc: 0xffff_ffc0_8020_2000,
        };
        dispatch(timer);
        dispatch(breakpoint);
        assert_eq!(*SEEN.lock().unwrap(), [timer, breakpoint]);
    }
}
