//! Bytecode operation codes.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One-byte operation codes, in wire order.
///
/// The numeric values are part of the binary format; new operations are
/// appended, never inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Noop = 0,
    /// Copy a value into a destination.
    Set,
    /// Copy with numeric conversion.
    Conv,
    /// Bitwise complement.
    AriNot,
    /// Arithmetic negation.
    AriNeg,
    /// Multiplication.
    AriMul,
    /// Division.
    AriDiv,
    /// Remainder.
    AriMod,
    /// Addition.
    AriAdd,
    /// Subtraction.
    AriSub,
    /// Left shift.
    AriLsh,
    /// Right shift.
    AriRsh,
    /// Bitwise and.
    AriAnd,
    /// Bitwise exclusive or.
    AriXor,
    /// Bitwise or.
    AriOr,
    /// Pointer plus byte offset.
    PAdd,
    /// Pointer minus byte offset.
    PSub,
    /// Difference between two pointers, in bytes.
    PDif,
    /// Three-way comparison.
    Cmp,
    /// Compare equal.
    Ceq,
    /// Compare not equal.
    Cne,
    /// Compare greater.
    Cgt,
    /// Compare greater or equal.
    Cge,
    /// Compare less.
    Clt,
    /// Compare less or equal.
    Cle,
    /// Test for zero.
    Cze,
    /// Test for nonzero.
    Cnz,
    /// Unconditional branch.
    Br,
    /// Branch if equal.
    Beq,
    /// Branch if not equal.
    Bne,
    /// Branch if greater.
    Bgt,
    /// Branch if greater or equal.
    Bge,
    /// Branch if less.
    Blt,
    /// Branch if less or equal.
    Ble,
    /// Branch if zero.
    Bze,
    /// Branch if nonzero.
    Bnz,
    /// Multi-way branch on a selector value.
    Sw,
    /// Direct call to a method in this module.
    Call,
    /// Indirect call through a code pointer.
    Callv,
    /// Return from a void method.
    Ret,
    /// Return a value.
    Retv,
    /// Diagnostic dump of an operand.
    Dump,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(u8::from(Opcode::Noop), 0);
        assert_eq!(u8::from(Opcode::Set), 1);
        assert_eq!(u8::from(Opcode::AriOr), 14);
        assert_eq!(u8::from(Opcode::PAdd), 15);
        assert_eq!(u8::from(Opcode::Cmp), 18);
        assert_eq!(u8::from(Opcode::Br), 27);
        assert_eq!(u8::from(Opcode::Sw), 36);
        assert_eq!(u8::from(Opcode::Call), 37);
        assert_eq!(u8::from(Opcode::Dump), 41);
    }

    #[test]
    fn round_trips_through_u8() {
        for raw in 0..=u8::from(Opcode::Dump) {
            let op = Opcode::try_from(raw).unwrap();
            assert_eq!(u8::from(op), raw);
        }
        assert!(Opcode::try_from(42).is_err());
    }
}
