//! A plain copy of `sstatus`, as stored in a trap context.

use bit_field::BitField;
use riscv::register::sstatus::{FS, SPP};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct Sstatus {
    bits: usize,
}

impl Sstatus {
    const SIE_BIT: usize = 1;
    const SPIE_BIT: usize = 5;
    const SPP_BIT: usize = 8;
    const FS_BITS: core::ops::Range<usize> = 13..15;
    const SUM_BIT: usize = 18;

    pub const fn from_bits(bits: usize) -> Self {
        Self { bits }
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    pub fn sie(&self) -> bool {
        self.bits.get_bit(Self::SIE_BIT)
    }

    pub fn spie(&self) -> bool {
        self.bits.get_bit(Self::SPIE_BIT)
    }

    pub fn spp(&self) -> SPP {
        if self.bits.get_bit(Self::SPP_BIT) {
            SPP::Supervisor
        } else {
            SPP::User
        }
    }

    pub fn sum(&self) -> bool {
        self.bits.get_bit(Self::SUM_BIT)
    }

    pub fn fs(&self) -> FS {
        match self.bits.get_bits(Self::FS_BITS) {
            0 => FS::Off,
            1 => FS::Initial,
            2 => FS::Clean,
            _ => FS::Dirty,
        }
    }

    pub fn set_spie(&mut self, val: bool) {
        self.bits.set_bit(Self::SPIE_BIT, val);
    }

    pub fn set_sie(&mut self, val: bool) {
        self.bits.set_bit(Self::SIE_BIT, val);
    }

    pub fn set_spp(&mut self, spp: SPP) {
        self.bits.set_bit(Self::SPP_BIT, spp == SPP::Supervisor);
    }

    pub fn set_sum(&mut self, val: bool) {
        self.bits.set_bit(Self::SUM_BIT, val);
    }

    pub fn set_fs(&mut self, fs: FS) {
        let v = match fs {
            FS::Off => 0,
            FS::Initial => 1,
            FS::Clean => 2,
            FS::Dirty => 3,
        };
        self.bits.set_bits(Self::FS_BITS, v);
    }

    pub const fn empty() -> Self {
        Self { bits: 0 }
    }
}
