#![cfg_attr(not(test), no_std)]

mod riscv64;

pub use riscv64::*;
