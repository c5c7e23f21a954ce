//! Decoding of the supervisor `scause` register.
//!
//! Every cause the privileged architecture defines for S-mode is listed here.

use strum::FromRepr;

const INTERRUPT_BIT: usize = 1 << (usize::BITS - 1);

#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum ExceptionCause {
    InstructionMisaligned = 0,
    InstructionFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadMisaligned = 4,
    LoadFault = 5,
    StoreMisaligned = 6,
    StoreFault = 7,
    UserEnvCall = 8,
    SupervisorEnvCall = 9,
    InstructionPageFault = 12,
    LoadPageFault = 13,
    StorePageFault = 15,
}

#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum InterruptCause {
    SupervisorSoft = 1,
    SupervisorTimer = 5,
    SupervisorExternal = 9,
    CounterOverflow = 13,
}

/// Kind of memory access that raised a fault.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrapCause {
    Interrupt(InterruptCause),
    Exception(ExceptionCause),
    /// Reserved or platform-defined code, kept raw.
    Unknown(usize),
}

impl TrapCause {
    pub fn from_bits(bits: usize) -> Self {
        let code = bits & !INTERRUPT_BIT;
        let cause = if bits & INTERRUPT_BIT != 0 {
            InterruptCause::from_repr(code).map(Self::Interrupt)
        } else {
            ExceptionCause::from_repr(code).map(Self::Exception)
        };
        cause.unwrap_or(Self::Unknown(bits))
    }

    pub fn bits(&self) -> usize {
        match *self {
            Self::Interrupt(i) => INTERRUPT_BIT | i as usize,
            Self::Exception(e) => e as usize,
            Self::Unknown(bits) => bits,
        }
    }

    /// Reads the live `scause` CSR.
    pub fn current() -> Self {
        Self::from_bits(riscv::register::scause::read().bits())
    }

    pub fn is_interrupt(&self) -> bool {
        self.bits() & INTERRUPT_BIT != 0
    }

    /// Faults a single probed load or store can raise when the address is
    /// bad: missing mapping, missing permission or a PMP/bus refusal.
    /// Misaligned causes are impossible for a byte access and are not
    /// included.
    pub fn is_user_rw_fault(&self) -> bool {
        matches!(
            self,
            Self::Exception(
                ExceptionCause::LoadFault
                    | ExceptionCause::StoreFault
                    | ExceptionCause::LoadPageFault
                    | ExceptionCause::StorePageFault
            )
        )
    }

    /// For page faults, the access that missed.
    pub fn page_fault_access(&self) -> Option<AccessType> {
        match self {
            Self::Exception(ExceptionCause::LoadPageFault) => Some(AccessType::Read),
            Self::Exception(ExceptionCause::StorePageFault) => Some(AccessType::Write),
            Self::Exception(ExceptionCause::InstructionPageFault) => Some(AccessType::Execute),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_interrupts_and_exceptions() {
        assert_eq!(
            TrapCause::from_bits(INTERRUPT_BIT | 5),
            TrapCause::Interrupt(InterruptCause::SupervisorTimer)
        );
        assert_eq!(
            TrapCause::from_bits(13),
            TrapCause::Exception(ExceptionCause::LoadPageFault)
        );
        assert_eq!(
            TrapCause::from_bits(8),
            TrapCause::Exception(ExceptionCause::UserEnvCall)
        );
        assert!(TrapCause::from_bits(INTERRUPT_BIT | 9).is_interrupt());
        assert!(!TrapCause::from_bits(9).is_interrupt());
    }

    #[test]
    fn reserved_codes_stay_raw() {
        for bits in [10, 11, 14, 16, 24, INTERRUPT_BIT | 3, INTERRUPT_BIT | 16] {
            let cause = TrapCause::from_bits(bits);
            assert_eq!(cause, TrapCause::Unknown(bits));
            assert_eq!(cause.bits(), bits);
        }
    }

    #[test]
    fn bits_round_trip_for_known_causes() {
        for code in 0..16 {
            for bits in [code, INTERRUPT_BIT | code] {
                let cause = TrapCause::from_bits(bits);
                assert_eq!(cause.bits(), bits);
            }
        }
    }

    #[test]
    fn only_data_faults_are_recoverable_by_the_probe() {
        let recoverable: [usize; 4] = [5, 7, 13, 15];
        for code in 0..16 {
            let exception = TrapCause::from_bits(code);
            assert_eq!(
                exception.is_user_rw_fault(),
                recoverable.contains(&code),
                "exception {code}"
            );
            assert!(!TrapCause::from_bits(INTERRUPT_BIT | code).is_user_rw_fault());
        }
    }

    #[test]
    fn page_fault_access_type() {
        assert_eq!(
            TrapCause::from_bits(15).page_fault_access(),
            Some(AccessType::Write)
        );
        assert_eq!(
            TrapCause::from_bits(12).page_fault_access(),
            Some(AccessType::Execute)
        );
        assert_eq!(TrapCause::from_bits(7).page_fault_access(), None);
    }
}
