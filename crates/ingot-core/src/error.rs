//! Error types for module construction.
//!
//! Every error here is a caller-contract violation: the front-end passed a
//! bad id, redefined an entity, or emitted an instruction its method cannot
//! hold. Errors are signaled synchronously at the offending call and are
//! not recoverable: a failed operation writes nothing, but previously
//! committed state is left intact.

use thiserror::Error;

use crate::ids::{LabelId, MethodId, NameId, OffsetId, SignatureId, TypeId};

/// Errors produced while building a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    /// An identifier string does not satisfy the identifier syntax
    /// (letter/underscore/`$` first, alphanumeric/underscore/`$` after).
    #[error("invalid identifier '{name}'")]
    InvalidIdentifier { name: String },

    /// A name id was not issued by this builder.
    #[error("unknown name id {id}")]
    UnknownName { id: NameId },

    /// A name is already bound to a different kind of entity.
    #[error("'{name}' is already declared as a {found}, expected {expected}")]
    NameKindMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A type id was not issued by this builder.
    #[error("unknown type id {id}")]
    UnknownType { id: TypeId },

    /// A method id was not issued by this builder.
    #[error("unknown method id {id}")]
    UnknownMethod { id: MethodId },

    /// A signature id was not issued by this builder.
    #[error("unknown signature id {id}")]
    UnknownSignature { id: SignatureId },

    /// A field-offset path id was not issued by this builder.
    #[error("unknown offset id {id}")]
    UnknownOffset { id: OffsetId },

    /// The entity was already defined; definitions are one-shot.
    #[error("{kind} '{name}' is already defined")]
    AlreadyDefined { kind: &'static str, name: String },

    /// A writer is already attached to this entity.
    #[error("a writer is already attached to {kind} '{name}'")]
    WriterLive { kind: &'static str, name: String },

    /// Export was requested while a writer was still attached.
    #[error("{kind} '{name}' has an unfinished writer")]
    WriterUnfinished { kind: &'static str, name: String },

    /// A struct declared the same field name twice.
    #[error("duplicate field {name}")]
    DuplicateField { name: NameId },

    /// A signature or call exceeds the parameter cap.
    #[error("too many parameters: {count} (max {max})")]
    TooManyParameters { count: usize, max: usize },

    /// A global definition exceeds the initializer cap.
    #[error("too many initializers: {count} (max {max})")]
    TooManyInitializers { count: usize, max: usize },

    /// A stack-slot operand indexes past the declared locals.
    #[error("stack slot {index} out of range ({declared} locals declared)")]
    StackSlotOutOfRange { index: u32, declared: usize },

    /// A parameter operand indexes past the signature's parameter list.
    #[error("parameter {index} out of range ({count} parameters)")]
    ParamOutOfRange { index: u32, count: usize },

    /// A constant operand was used as an instruction destination.
    #[error("a constant operand cannot be written to")]
    ConstantDestination,

    /// A constant operand carried an access prefix or field path.
    #[error("constant operands cannot carry an access prefix or field path")]
    ModifiedConstant,

    /// A constant operand's declared type has no bytecode encoding.
    #[error("constant of type {ty} is not a valid instruction operand")]
    UnencodableConstant { ty: TypeId },

    /// A label id was never declared in this method.
    #[error("label {label} was not declared in this method")]
    UndeclaredLabel { label: LabelId },

    /// A label was bound to a bytecode offset twice.
    #[error("label {label} is already bound")]
    LabelBoundTwice { label: LabelId },

    /// A branch targets a label that was never bound.
    #[error("label {label} is referenced but never bound")]
    UnboundLabel { label: LabelId },

    /// A switch was emitted with no target labels.
    #[error("switch requires at least one target label")]
    EmptySwitch,

    /// `ret` was emitted in a method with a return value.
    #[error("method has a return value; use retv")]
    PlainReturnInValueMethod,

    /// `retv` was emitted in a void method.
    #[error("method has no return value; use ret")]
    ValueReturnInVoidMethod,

    /// A non-void method does not end with `retv`.
    #[error("a non-void method must end with retv")]
    MissingReturn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = AssembleError::InvalidIdentifier {
            name: "3bad".into(),
        };
        assert_eq!(format!("{err}"), "invalid identifier '3bad'");

        let err = AssembleError::StackSlotOutOfRange {
            index: 2,
            declared: 2,
        };
        assert_eq!(
            format!("{err}"),
            "stack slot 2 out of range (2 locals declared)"
        );

        let err = AssembleError::NameKindMismatch {
            name: "x".into(),
            expected: "type",
            found: "method",
        };
        assert_eq!(
            format!("{err}"),
            "'x' is already declared as a method, expected type"
        );
    }
}
