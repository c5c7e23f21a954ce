//! Implementation of [`TrapContext`]
//!
//! The assembly in `trap.S` addresses every field by a raw offset before any
//! structured access is possible, so the layout below is part of the ABI.
//! The `slot` constants name those offsets (in 8-byte units) and the
//! assertions at the bottom of this file pin the struct to them.

use core::mem::offset_of;

use arch::sstatus::Sstatus;
use riscv::register::sstatus::{FS, SPP};

/// 8-byte slot indices used by `trap.S`.
pub mod slot {
    /// `x1..x31` live at slot `n`; slot 0 (`zero`) is never written.
    pub const USER_X: usize = 0;
    /// The user stack pointer is `x2`.
    pub const USER_SP: usize = 2;
    pub const SSTATUS: usize = 32;
    pub const SEPC: usize = 33;
    pub const KERNEL_SP: usize = 34;
    pub const KERNEL_RA: usize = 35;
    /// `s0..s11`, `s0` doubling as the frame pointer.
    pub const KERNEL_S: usize = 36;
    pub const KERNEL_TP: usize = 48;
    pub const USER_FX: usize = 49;
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct TrapContext {
    // NOTE: User to kernel should save these:
    /// General regs from x0 to x31. `user_x[2]` is the user stack pointer.
    pub user_x: [usize; 32],
    /// CSR sstatus
    pub sstatus: Sstatus, // 32
    /// CSR sepc
    pub sepc: usize, // 33

    // NOTE: Kernel to user should save these. Only meaningful between a
    // `__return_to_user` and the `__trap_from_user` that ends the excursion.
    pub kernel_sp: usize, // 34
    ///
    pub kernel_ra: usize, // 35
    /// s0(fp) - s11
    pub kernel_s: [usize; 12], // 36 - 47
    /// kernel hart address
    pub kernel_tp: usize, // 48

    /// Float regs
    pub user_fx: UserFloatContext, // 49 - 81

    /// `a0` as it was when the last syscall trapped, for restarting it.
    pub last_a0: usize,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct UserFloatContext {
    pub user_fx: [f64; 32],
    pub fcsr: u32,
    pub need_save: u8,
    pub need_restore: u8,
}

impl UserFloatContext {
    pub const fn new() -> Self {
        Self {
            user_fx: [0.0; 32],
            fcsr: 0,
            need_save: 0,
            need_restore: 0,
        }
    }

    /// Called right after a user trap: the user touched float registers iff
    /// the hardware marked them dirty.
    pub fn mark_save_if_needed(&mut self, sstatus: Sstatus) {
        self.need_save |= (sstatus.fs() == FS::Dirty) as u8;
    }

    /// The hart is about to run someone else; spill and reload on return.
    pub fn yield_task(&mut self) {
        self.save();
        self.need_restore = 1;
    }

    /// Save reg -> mem
    pub fn save(&mut self) {
        if self.need_save == 0 {
            return;
        }
        self.need_save = 0;
        #[cfg(target_arch = "riscv64")]
        unsafe {
            let mut _t: usize = 1; // alloc a register but not zero.
            core::arch::asm!(
                ".irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31",
                "fsd f\\n, \\n*8({0})",
                ".endr",
                "csrr {1}, fcsr",
                "sw  {1}, 32*8({0})",
                in(reg) self as *mut Self,
                inout(reg) _t,
            );
        }
    }

    /// Restore mem -> reg
    pub fn restore(&mut self) {
        if self.need_restore == 0 {
            return;
        }
        self.need_restore = 0;
        #[cfg(target_arch = "riscv64")]
        unsafe {
            core::arch::asm!(
                ".irp n, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31",
                "fld f\\n, \\n*8({0})",
                ".endr",
                "lw  {0}, 32*8({0})",
                "csrw fcsr, {0}",
                inout(reg) self as *mut Self => _,
            );
        }
    }
}

impl TrapContext {
    /// Init user context
    pub fn new(entry: usize, sp: usize) -> Self {
        let mut cx = Self {
            user_x: [0; 32],
            sstatus: Self::user_sstatus(),
            sepc: entry,
            // Filled in by `__return_to_user` on every entry to user mode.
            kernel_sp: 0,
            kernel_ra: 0,
            kernel_s: [0; 12],
            kernel_tp: 0,
            user_fx: UserFloatContext::new(),
            last_a0: 0,
        };
        cx.set_user_sp(sp);
        cx
    }

    /// Status a fresh user thread starts with: `sret` drops to user mode
    /// with float registers usable but clean.
    fn user_sstatus() -> Sstatus {
        let mut sstatus = Sstatus::empty();
        // set CPU privilege to User after trap return
        sstatus.set_spp(SPP::User);
        sstatus.set_sie(false);
        sstatus.set_spie(false);
        sstatus.set_fs(FS::Initial);
        sstatus
    }

    // NOTE: this function must not refresh `sstatus` from the live CSR,
    // otherwise `__return_to_user` could enable interrupts halfway through
    // loading user registers.
    pub fn init_user(
        &mut self,
        user_sp: usize,
        sepc: usize,
        argc: usize,
        argv: usize,
        envp: usize,
    ) {
        self.user_x[2] = user_sp;
        self.user_x[10] = argc;
        self.user_x[11] = argv;
        self.user_x[12] = envp;
        self.sepc = sepc;
        self.user_fx = UserFloatContext::new()
    }

    /// Syscall number
    pub fn syscall_no(&self) -> usize {
        // a7 == x17
        self.user_x[17]
    }

    pub fn syscall_args(&self) -> [usize; 6] {
        [
            self.user_x[10],
            self.user_x[11],
            self.user_x[12],
            self.user_x[13],
            self.user_x[14],
            self.user_x[15],
        ]
    }

    pub fn user_sp(&self) -> usize {
        self.user_x[slot::USER_SP]
    }

    /// Set stack pointer to x_2 reg (sp)
    pub fn set_user_sp(&mut self, sp: usize) {
        self.user_x[slot::USER_SP] = sp;
    }

    pub fn set_user_a0(&mut self, val: usize) {
        // a0 == x10
        self.user_x[10] = val;
    }

    pub fn set_user_tp(&mut self, val: usize) {
        // tp == x4
        self.user_x[4] = val;
    }

    pub fn save_last_user_a0(&mut self) {
        self.last_a0 = self.user_x[10];
    }

    pub fn restore_last_user_a0(&mut self) {
        self.user_x[10] = self.last_a0;
    }

    /// Set entry point
    pub fn set_entry_point(&mut self, entry: usize) {
        self.sepc = entry;
    }

    /// Skip the trapping instruction, e.g. the `ecall` of a finished syscall.
    pub fn set_user_pc_to_next(&mut self) {
        self.sepc += 4;
    }
}

const _: () = {
    assert!(offset_of!(TrapContext, user_x) == slot::USER_X * 8);
    assert!(offset_of!(TrapContext, sstatus) == slot::SSTATUS * 8);
    assert!(offset_of!(TrapContext, sepc) == slot::SEPC * 8);
    assert!(offset_of!(TrapContext, kernel_sp) == slot::KERNEL_SP * 8);
    assert!(offset_of!(TrapContext, kernel_ra) == slot::KERNEL_RA * 8);
    assert!(offset_of!(TrapContext, kernel_s) == slot::KERNEL_S * 8);
    assert!(offset_of!(TrapContext, kernel_tp) == slot::KERNEL_TP * 8);
    assert!(offset_of!(TrapContext, user_fx) == slot::USER_FX * 8);
    assert!(offset_of!(UserFloatContext, fcsr) == 32 * 8);
    assert!(core::mem::size_of::<Sstatus>() == 8);
};

#[cfg(test)]
mod tests {
    use systype::SysError;

    use super::*;

    #[test]
    fn fields_sit_at_the_offsets_trap_s_uses() {
        assert_eq!(offset_of!(TrapContext, user_x) + 2 * 8, 16);
        assert_eq!(offset_of!(TrapContext, sstatus), 256);
        assert_eq!(offset_of!(TrapContext, sepc), 264);
        assert_eq!(offset_of!(TrapContext, kernel_sp), 272);
        assert_eq!(offset_of!(TrapContext, kernel_ra), 280);
        assert_eq!(offset_of!(TrapContext, kernel_s), 288);
        assert_eq!(offset_of!(TrapContext, kernel_s) + 11 * 8, 376);
        assert_eq!(offset_of!(TrapContext, kernel_tp), 384);
        assert_eq!(offset_of!(TrapContext, user_fx), 392);
    }

    #[test]
    fn new_context_returns_to_user_mode() {
        let cx = TrapContext::new(0x1000, 0x3fff_f000);
        assert_eq!(cx.sepc, 0x1000);
        assert_eq!(cx.user_sp(), 0x3fff_f000);
        assert_eq!(cx.sstatus.spp(), SPP::User);
        assert!(!cx.sstatus.sie());
        assert!(!cx.sstatus.spie());
        assert_eq!(cx.sstatus.fs(), FS::Initial);
        assert_eq!(cx.user_x[0], 0);
    }

    #[test]
    fn syscall_registers() {
        let mut cx = TrapContext::new(0, 0);
        for (i, reg) in (10..=17).enumerate() {
            cx.user_x[reg] = 100 + i;
        }
        assert_eq!(cx.syscall_no(), 107);
        assert_eq!(cx.syscall_args(), [100, 101, 102, 103, 104, 105]);

        cx.save_last_user_a0();
        cx.set_user_a0(SysError::EINTR.as_syscall_ret());
        assert_eq!(cx.user_x[10] as isize, -4);
        cx.restore_last_user_a0();
        assert_eq!(cx.user_x[10], 100);
    }

    #[test]
    fn init_user_sets_entry_arguments() {
        let mut cx = TrapContext::new(0, 0);
        cx.sstatus.set_sum(true);
        cx.user_fx.need_save = 1;
        cx.init_user(0x8000, 0x2000, 2, 0x7f00, 0x7f80);
        assert_eq!(cx.user_sp(), 0x8000);
        assert_eq!(cx.sepc, 0x2000);
        assert_eq!(&cx.user_x[10..13], &[2, 0x7f00, 0x7f80]);
        assert_eq!(cx.user_fx.need_save, 0);
        // status is left alone
        assert!(cx.sstatus.sum());

        cx.set_user_pc_to_next();
        assert_eq!(cx.sepc, 0x2004);
    }

    #[test]
    fn float_state_is_saved_only_when_dirty() {
        let mut fx = UserFloatContext::new();
        let mut status = Sstatus::empty();
        status.set_fs(FS::Clean);
        fx.mark_save_if_needed(status);
        assert_eq!(fx.need_save, 0);

        status.set_fs(FS::Dirty);
        fx.mark_save_if_needed(status);
        assert_eq!(fx.need_save, 1);

        // a clean trap afterwards does not forget the pending save
        status.set_fs(FS::Clean);
        fx.mark_save_if_needed(status);
        assert_eq!(fx.need_save, 1);
    }

    #[test]
    fn yielding_schedules_a_restore() {
        let mut fx = UserFloatContext::new();
        fx.need_save = 1;
        fx.yield_task();
        assert_eq!((fx.need_save, fx.need_restore), (0, 1));
        fx.restore();
        assert_eq!(fx.need_restore, 0);
    }
}
