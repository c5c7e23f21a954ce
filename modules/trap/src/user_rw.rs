//! Touch one byte of user memory, turning a fault into an `Err`.
//!
//! While a probe runs, `stvec` points at `__user_rw_trap_vector` in
//! vectored mode: load/store faults land in `__user_rw_exception_entry`,
//! which skips the faulting instruction and makes the probe return a
//! failure flag, and everything else still goes to `__trap_from_kernel`.
//! The vector is only ever installed by [`UserRwTrapGuard`] around a single
//! probe, with interrupts off, so no other kernel code runs under it.
//!
//! Kernel memory is mapped for supervisor access and would never fault, so
//! addresses outside user space are refused before anything is installed.

use arch::{
    csr::{GuardCsrs, Hart},
    interrupts::{InterruptGuard, TrapHandlerGuard},
    memory::SumGuard,
};
use config::mm::USER_SPACE_END;
use systype::SysError;

use crate::cause::{AccessType, ExceptionCause, TrapCause};

/// A probed access to user memory faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserFault {
    pub cause: TrapCause,
    pub addr: usize,
}

impl From<UserFault> for SysError {
    fn from(_: UserFault) -> Self {
        SysError::EFAULT
    }
}

/// Refuse `vaddr` if it is not a user address, reporting the page fault the
/// access would have raised had the kernel half been unmapped.
#[cfg_attr(not(target_arch = "riscv64"), allow(dead_code))]
fn check_user_addr(vaddr: usize, access: AccessType) -> Result<(), UserFault> {
    if vaddr < USER_SPACE_END {
        return Ok(());
    }
    let cause = match access {
        AccessType::Write => ExceptionCause::StorePageFault,
        AccessType::Read | AccessType::Execute => ExceptionCause::LoadPageFault,
    };
    Err(UserFault {
        cause: TrapCause::Exception(cause),
        addr: vaddr,
    })
}

/// `(a0, a1)` as left by `__try_read_user` / `__try_write_user`.
#[cfg_attr(not(target_arch = "riscv64"), allow(dead_code))]
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct TryOpRet {
    flag: usize,
    value: usize,
}

impl TryOpRet {
    #[cfg_attr(not(target_arch = "riscv64"), allow(dead_code))]
    fn into_result(self, addr: usize) -> Result<u8, UserFault> {
        match self.flag {
            0 => Ok(self.value as u8),
            _ => Err(UserFault {
                cause: TrapCause::from_bits(self.value),
                addr,
            }),
        }
    }
}

/// Interrupts off, user pages accessible and the probe vector installed.
/// Dropping it undoes the three in reverse order.
pub struct UserRwTrapGuard<C: GuardCsrs = Hart> {
    _trap: TrapHandlerGuard<C>,
    _sum: SumGuard<C>,
    _irq: InterruptGuard<C>,
}

impl<C: GuardCsrs> UserRwTrapGuard<C> {
    #[cfg_attr(not(target_arch = "riscv64"), allow(dead_code))]
    fn install(vector_base: usize) -> Self {
        // Interrupts first: nothing may run between installing the table and
        // the probe itself.
        let irq = InterruptGuard::new();
        let sum = SumGuard::new();
        let trap = TrapHandlerGuard::new_vectored(vector_base);
        Self {
            _trap: trap,
            _sum: sum,
            _irq: irq,
        }
    }
}

#[cfg(target_arch = "riscv64")]
mod hw {
    use super::{check_user_addr, TryOpRet, UserFault, UserRwTrapGuard};
    use crate::cause::AccessType;

    extern "C" {
        fn __user_rw_trap_vector();
        fn __try_read_user(vaddr: usize) -> TryOpRet;
        fn __try_write_user(vaddr: usize, byte: u8) -> TryOpRet;
    }

    impl UserRwTrapGuard {
        pub fn new() -> Self {
            Self::install(__user_rw_trap_vector as usize)
        }

        pub fn read(&self, vaddr: usize) -> Result<u8, UserFault> {
            check_user_addr(vaddr, AccessType::Read)?;
            unsafe { __try_read_user(vaddr) }.into_result(vaddr)
        }

        pub fn write(&self, vaddr: usize, byte: u8) -> Result<(), UserFault> {
            check_user_addr(vaddr, AccessType::Write)?;
            unsafe { __try_write_user(vaddr, byte) }
                .into_result(vaddr)
                .map(|_| ())
        }
    }

    /// Entry of the raw read routine, for calling it from assembly.
    #[cfg(feature = "selftest")]
    pub(crate) fn raw_read_entry() -> usize {
        __try_read_user as usize
    }
}

#[cfg(all(feature = "selftest", target_arch = "riscv64"))]
pub(crate) use hw::raw_read_entry;

#[cfg(target_arch = "riscv64")]
fn log_fault<T>(res: Result<T, UserFault>) -> Result<T, UserFault> {
    if let Err(fault) = &res {
        log::debug!("[user_rw] {:?} at {:#x}", fault.cause, fault.addr);
    }
    res
}

/// Read the byte at user address `vaddr`.
#[cfg(target_arch = "riscv64")]
pub fn try_read_user(vaddr: usize) -> Result<u8, UserFault> {
    check_user_addr(vaddr, AccessType::Read)?;
    let guard: UserRwTrapGuard = UserRwTrapGuard::new();
    log_fault(guard.read(vaddr))
}

/// Store `byte` at user address `vaddr`.
#[cfg(target_arch = "riscv64")]
pub fn try_write_user(vaddr: usize, byte: u8) -> Result<(), UserFault> {
    check_user_addr(vaddr, AccessType::Write)?;
    let guard: UserRwTrapGuard = UserRwTrapGuard::new();
    log_fault(guard.write(vaddr, byte))
}

#[cfg(target_arch = "riscv64")]
pub fn will_read_fail(vaddr: usize) -> bool {
    try_read_user(vaddr).is_err()
}

/// Checks that `vaddr` is writable by storing back the byte already there,
/// so a successful check leaves user memory as it was.
#[cfg(target_arch = "riscv64")]
pub fn will_write_fail(vaddr: usize) -> bool {
    if check_user_addr(vaddr, AccessType::Write).is_err() {
        return true;
    }
    let guard: UserRwTrapGuard = UserRwTrapGuard::new();
    let res = guard
        .read(vaddr)
        .and_then(|byte| guard.write(vaddr, byte));
    log_fault(res).is_err()
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use arch::csr::TrapVector;
    use riscv::register::stvec::TrapMode;

    use super::*;

    thread_local! {
        static SIE: Cell<bool> = const { Cell::new(true) };
        static SUM: Cell<bool> = const { Cell::new(false) };
        static STVEC: Cell<TrapVector> = const {
            Cell::new(TrapVector { addr: 0, mode: TrapMode::Direct })
        };
        static WRITES: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    }

    /// Records every CSR write in order.
    struct FakeHart;

    impl GuardCsrs for FakeHart {
        fn interrupt_enabled() -> bool {
            SIE.get()
        }
        unsafe fn set_interrupt_enabled(enabled: bool) {
            WRITES.with_borrow_mut(|w| w.push(if enabled { "sie on" } else { "sie off" }));
            SIE.set(enabled)
        }
        fn user_access_enabled() -> bool {
            SUM.get()
        }
        unsafe fn set_user_access_enabled(enabled: bool) {
            WRITES.with_borrow_mut(|w| w.push(if enabled { "sum on" } else { "sum off" }));
            SUM.set(enabled)
        }
        fn trap_vector() -> TrapVector {
            STVEC.get()
        }
        unsafe fn set_trap_vector(vector: TrapVector) {
            WRITES.with_borrow_mut(|w| {
                w.push(match vector.mode {
                    TrapMode::Direct => "stvec direct",
                    TrapMode::Vectored => "stvec vectored",
                })
            });
            STVEC.set(vector)
        }
    }

    #[test]
    fn guard_installs_in_order_and_restores_everything() {
        let kernel_entry = TrapVector {
            addr: 0xffff_ffc0_8020_0000,
            mode: TrapMode::Direct,
        };
        STVEC.set(kernel_entry);
        {
            let _guard = UserRwTrapGuard::<FakeHart>::install(0xffff_ffc0_8021_0000);
            assert!(!SIE.get());
            assert!(SUM.get());
            assert_eq!(
                STVEC.get(),
                TrapVector {
                    addr: 0xffff_ffc0_8021_0000,
                    mode: TrapMode::Vectored
                }
            );
        }
        assert!(SIE.get());
        assert!(!SUM.get());
        assert_eq!(STVEC.get(), kernel_entry);
        assert_eq!(
            WRITES.take(),
            [
                "sie off",
                "sum on",
                "stvec vectored",
                "stvec direct",
                "sum off",
                "sie on"
            ]
        );
    }

    #[test]
    fn kernel_addresses_are_refused() {
        let kernel = 0xffff_ffc0_8020_0000;
        assert_eq!(
            check_user_addr(kernel, AccessType::Write),
            Err(UserFault {
                cause: TrapCause::Exception(ExceptionCause::StorePageFault),
                addr: kernel,
            })
        );
        assert_eq!(
            check_user_addr(USER_SPACE_END, AccessType::Read)
                .unwrap_err()
                .cause,
            TrapCause::Exception(ExceptionCause::LoadPageFault)
        );
        assert_eq!(check_user_addr(USER_SPACE_END - 1, AccessType::Write), Ok(()));
        assert_eq!(check_user_addr(0, AccessType::Read), Ok(()));
    }

    #[test]
    fn success_flag_carries_the_byte() {
        let ret = TryOpRet {
            flag: 0,
            value: 0xa5,
        };
        assert_eq!(ret.into_result(0x1000), Ok(0xa5));
    }

    #[test]
    fn failure_flag_carries_the_cause() {
        let ret = TryOpRet { flag: 1, value: 13 };
        let fault = ret.into_result(0xdead_0000).unwrap_err();
        assert_eq!(
            fault.cause,
            TrapCause::Exception(ExceptionCause::LoadPageFault)
        );
        assert_eq!(fault.addr, 0xdead_0000);
        assert_eq!(SysError::from(fault), SysError::EFAULT);
    }

    #[test]
    fn abi_return_is_two_registers() {
        assert_eq!(core::mem::size_of::<TryOpRet>(), 16);
        assert_eq!(core::mem::offset_of!(TryOpRet, value), 8);
    }

    #[test]
    fn forwarded_exceptions_reinstall_the_kernel_entry_first() {
        let asm = include_str!("trap.S");
        let entry = asm.split("__user_rw_exception_entry:").nth(1).unwrap();
        let forward = entry.split("\n1:").next().unwrap();
        let reinstall = forward.find("csrw stvec").unwrap();
        let jump = forward.find("j __trap_from_kernel").unwrap();
        assert!(reinstall < jump);
        assert!(forward[..reinstall].contains("la t0, __trap_from_kernel"));
    }
}
