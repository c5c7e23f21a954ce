//! Checks of the assembly paths that only mean something on a real hart.
//!
//! A kernel built with the `selftest` feature calls [`run`] once it can offer
//! a user address space, typically right after boot under QEMU. The run
//! stops at the first mismatch and names it.

use core::{
    arch::asm,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use arch::{
    interrupts::{get_trap_handler, is_interrupt_enabled, InterruptGuard},
    memory::{current_page_table_token, switch_page_table},
};
use riscv::register::{
    sie, sip,
    sstatus::{self, SPP},
};

use crate::{
    cause::{InterruptCause, TrapCause},
    kernel_trap::KernelTrap,
    set_kernel_trap_entry,
    user_rw::{raw_read_entry, try_read_user, try_write_user, UserRwTrapGuard},
    user_trap::return_to_user,
    TrapContext,
};

/// What the kernel under test has mapped in the user address space `token`.
pub struct SelfTestEnv {
    pub token: usize,
    /// A readable user byte and the value stored there.
    pub readable: usize,
    pub readable_byte: u8,
    /// A byte on a user page mapped read-only.
    pub read_only: usize,
    /// A user address with nothing mapped.
    pub unmapped: usize,
    /// A user-executable address holding an `ecall`.
    pub ecall_entry: usize,
}

macro_rules! check {
    ($cond:expr, $what:expr) => {
        if !$cond {
            log::error!("[selftest] {} failed", $what);
            return Err($what);
        }
    };
}

pub fn run(env: &SelfTestEnv) -> Result<(), &'static str> {
    user_memory(env)?;
    fault_entry_keeps_registers(env.unmapped)?;
    user_round_trip(env)?;
    kernel_trap(false)?;
    kernel_trap(true)?;
    log::info!("[selftest] trap layer ok");
    Ok(())
}

const fn pattern(reg: usize) -> usize {
    0x7e57_0000_0000_0000 | reg
}

fn user_memory(env: &SelfTestEnv) -> Result<(), &'static str> {
    static CANARY: AtomicUsize = AtomicUsize::new(0x5afe);

    let vector = get_trap_handler();
    let irq = is_interrupt_enabled();
    let sum = sstatus::read().sum();

    check!(
        try_read_user(env.readable) == Ok(env.readable_byte),
        "read of a mapped byte"
    );
    check!(
        try_read_user(env.unmapped).map_err(|f| f.cause.is_user_rw_fault()) == Err(true),
        "read of an unmapped address"
    );
    check!(
        try_write_user(env.unmapped, 0x5a).is_err(),
        "write to an unmapped address"
    );

    let before = try_read_user(env.read_only);
    check!(before.is_ok(), "read of a read-only byte");
    check!(
        try_write_user(env.read_only, !before.unwrap_or(0)).is_err(),
        "write to a read-only page"
    );
    check!(
        try_read_user(env.read_only) == before,
        "read-only byte left alone"
    );

    check!(
        try_write_user(CANARY.as_ptr() as usize, 0).is_err(),
        "write to kernel memory"
    );
    check!(
        CANARY.load(Ordering::Relaxed) == 0x5afe,
        "kernel memory left alone"
    );

    check!(get_trap_handler() == vector, "trap vector restored");
    check!(is_interrupt_enabled() == irq, "interrupt state restored");
    check!(sstatus::read().sum() == sum, "SUM restored");
    Ok(())
}

/// Calls `__try_read_user` on an unmapped address straight from assembly,
/// so the compiler assumes every callee-saved register survives the fault.
fn fault_entry_keeps_registers(unmapped: usize) -> Result<(), &'static str> {
    let mut s = [0usize; 10];
    let (flag, cause): (usize, usize);
    {
        let _guard: UserRwTrapGuard = UserRwTrapGuard::new();
        unsafe {
            asm!(
                "jalr {f}",
                f = in(reg) raw_read_entry(),
                inout("a0") unmapped => flag,
                lateout("a1") cause,
                inout("s2") pattern(18) => s[0],
                inout("s3") pattern(19) => s[1],
                inout("s4") pattern(20) => s[2],
                inout("s5") pattern(21) => s[3],
                inout("s6") pattern(22) => s[4],
                inout("s7") pattern(23) => s[5],
                inout("s8") pattern(24) => s[6],
                inout("s9") pattern(25) => s[7],
                inout("s10") pattern(26) => s[8],
                inout("s11") pattern(27) => s[9],
                clobber_abi("C"),
            );
        }
    }
    check!(flag == 1, "fault reported to the caller");
    check!(
        TrapCause::from_bits(cause).is_user_rw_fault(),
        "fault cause reported"
    );
    check!(
        s.iter().enumerate().all(|(i, &v)| v == pattern(18 + i)),
        "s2-s11 kept across a fault"
    );
    Ok(())
}

#[inline(always)]
fn kernel_sp_tp() -> (usize, usize) {
    let (sp, tp);
    unsafe { asm!("mv {}, sp", "mv {}, tp", out(reg) sp, out(reg) tp) };
    (sp, tp)
}

fn user_round_trip(env: &SelfTestEnv) -> Result<(), &'static str> {
    let _irq: InterruptGuard = InterruptGuard::new();
    let kernel_token = current_page_table_token();

    let mut cx = TrapContext::new(env.ecall_entry, 0);
    for (i, reg) in cx.user_x.iter_mut().enumerate().skip(1) {
        *reg = pattern(i);
    }
    let user_x = cx.user_x;

    let kernel_before = kernel_sp_tp();
    let trap = return_to_user(&mut cx, env.token);
    let kernel_after = kernel_sp_tp();
    if current_page_table_token() != kernel_token {
        unsafe { switch_page_table(kernel_token) };
    }

    check!(trap.is_syscall(), "user ecall trapped as a syscall");
    check!(cx.sepc == env.ecall_entry, "user pc captured");
    check!(cx.user_x == user_x, "user registers round trip");
    check!(cx.sstatus.spp() == SPP::User, "trap came from user mode");
    check!(kernel_before == kernel_after, "kernel sp and tp round trip");
    Ok(())
}

static ARMED: AtomicBool = AtomicBool::new(false);
static NEST: AtomicBool = AtomicBool::new(false);
static DEPTH: AtomicUsize = AtomicUsize::new(0);
/// One decimal digit per event: 1 and 2 enter depth 1 and 2, 3 and 4 leave
/// depth 2 and 1.
static EVENTS: AtomicUsize = AtomicUsize::new(0);

fn record(event: usize) {
    let events = EVENTS.load(Ordering::Relaxed);
    EVENTS.store(events * 10 + event, Ordering::Relaxed);
}

/// Takes the software interrupts [`kernel_trap`] raises; anything else goes
/// on to the kernel.
pub(crate) fn take_soft_interrupt(trap: &KernelTrap) -> bool {
    if trap.cause != TrapCause::Interrupt(InterruptCause::SupervisorSoft)
        || !ARMED.load(Ordering::Relaxed)
    {
        return false;
    }
    unsafe { sip::clear_ssoft() };
    let depth = DEPTH.fetch_add(1, Ordering::Relaxed) + 1;
    record(depth);
    if depth == 1 && NEST.load(Ordering::Relaxed) {
        unsafe {
            sip::set_ssoft();
            // the nested trap is taken between these two
            sstatus::set_sie();
            sstatus::clear_sie();
        }
    }
    record(if depth == 1 { 4 } else { 3 });
    DEPTH.fetch_sub(1, Ordering::Relaxed);
    true
}

/// Raise a software interrupt with known values in every register
/// `__trap_from_kernel` saves or must leave alone, optionally with a second
/// one taken from inside the handler.
fn kernel_trap(nest: bool) -> Result<(), &'static str> {
    let _irq: InterruptGuard = InterruptGuard::new();
    set_kernel_trap_entry();
    EVENTS.store(0, Ordering::Relaxed);
    DEPTH.store(0, Ordering::Relaxed);
    NEST.store(nest, Ordering::Relaxed);
    ARMED.store(true, Ordering::Relaxed);

    // x10..x17, x18..x27, x28..x31
    let mut regs = [0usize; 22];
    unsafe {
        sie::set_ssoft();
        asm!(
            "csrsi sip, 2",
            "csrsi sstatus, 2",
            // taken before this instruction runs
            "csrci sstatus, 2",
            inout("a0") pattern(10) => regs[0],
            inout("a1") pattern(11) => regs[1],
            inout("a2") pattern(12) => regs[2],
            inout("a3") pattern(13) => regs[3],
            inout("a4") pattern(14) => regs[4],
            inout("a5") pattern(15) => regs[5],
            inout("a6") pattern(16) => regs[6],
            inout("a7") pattern(17) => regs[7],
            inout("s2") pattern(18) => regs[8],
            inout("s3") pattern(19) => regs[9],
            inout("s4") pattern(20) => regs[10],
            inout("s5") pattern(21) => regs[11],
            inout("s6") pattern(22) => regs[12],
            inout("s7") pattern(23) => regs[13],
            inout("s8") pattern(24) => regs[14],
            inout("s9") pattern(25) => regs[15],
            inout("s10") pattern(26) => regs[16],
            inout("s11") pattern(27) => regs[17],
            inout("t3") pattern(28) => regs[18],
            inout("t4") pattern(29) => regs[19],
            inout("t5") pattern(30) => regs[20],
            inout("t6") pattern(31) => regs[21],
        );
        sie::clear_ssoft();
    }
    ARMED.store(false, Ordering::Relaxed);

    let expected = if nest { 1234 } else { 14 };
    check!(
        EVENTS.load(Ordering::Relaxed) == expected,
        "kernel traps unwind in LIFO order"
    );
    check!(
        regs.iter().enumerate().all(|(i, &v)| v == pattern(10 + i)),
        "registers kept across a kernel trap"
    );
    Ok(())
}
