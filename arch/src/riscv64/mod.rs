pub mod csr;
pub mod interrupts;
pub mod memory;
pub mod sstatus;
