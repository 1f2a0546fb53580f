//! Built-in primitive catalog, identifier syntax and format constants.

use crate::ids::TypeId;

/// Cap on signature parameters and call arguments.
pub const MAX_PARAMETER_COUNT: usize = 256;
/// Cap on initializer values in one global definition.
pub const MAX_INITIALIZER_COUNT: usize = 65536;

/// Magic bytes opening an emitted module.
pub const MODULE_MAGIC: &[u8; 4] = b"PINT";
/// Footer bytes closing an emitted module.
pub const MODULE_FOOTER: &[u8; 3] = b"END";

/// One built-in primitive type: its fixed id, source name, and byte size.
#[derive(Debug, Clone, Copy)]
pub struct BaseType {
    pub index: TypeId,
    pub name: &'static str,
    pub size: usize,
}

const PTR_SIZE: usize = std::mem::size_of::<usize>();

/// The built-in primitives, in type-id order. Seeded into every module's
/// type table at construction.
pub const BASE_TYPES: [BaseType; 12] = [
    BaseType { index: TypeId::I8, name: "byte", size: 1 },
    BaseType { index: TypeId::U8, name: "ubyte", size: 1 },
    BaseType { index: TypeId::I16, name: "short", size: 2 },
    BaseType { index: TypeId::U16, name: "ushort", size: 2 },
    BaseType { index: TypeId::I32, name: "int", size: 4 },
    BaseType { index: TypeId::U32, name: "uint", size: 4 },
    BaseType { index: TypeId::I64, name: "long", size: 8 },
    BaseType { index: TypeId::U64, name: "ulong", size: 8 },
    BaseType { index: TypeId::F32, name: "float", size: 4 },
    BaseType { index: TypeId::F64, name: "double", size: 8 },
    BaseType { index: TypeId::VPTR, name: "void*", size: PTR_SIZE },
    BaseType { index: TypeId::VOID, name: "void", size: 0 },
];

/// Alias names interned at construction; each maps to the host-appropriate
/// pointer-width integer type (`offset` signed, `size` unsigned).
pub const ALIAS_TYPES: [&str; 2] = ["offset", "size"];

fn is_identifier_char(c: char, first: bool) -> bool {
    if c.is_ascii_alphabetic() || c == '_' || c == '$' {
        return true;
    }
    !first && c.is_ascii_digit()
}

/// Check identifier syntax: a letter, underscore or `$` first, then
/// alphanumerics, underscores or `$`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_identifier_char(c, true) => chars.all(|c| is_identifier_char(c, false)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_types_are_in_id_order() {
        for (i, base) in BASE_TYPES.iter().enumerate() {
            assert_eq!(base.index.index(), i as u32);
        }
    }

    #[test]
    fn base_type_sizes() {
        assert_eq!(BASE_TYPES[TypeId::I8.index() as usize].size, 1);
        assert_eq!(BASE_TYPES[TypeId::F64.index() as usize].size, 8);
        assert_eq!(
            BASE_TYPES[TypeId::VPTR.index() as usize].size,
            std::mem::size_of::<usize>()
        );
        assert_eq!(BASE_TYPES[TypeId::VOID.index() as usize].size, 0);
    }

    #[test]
    fn identifier_syntax() {
        assert!(is_valid_identifier("x"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("$gen0"));
        assert!(is_valid_identifier("snake_case_2"));

        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("dash-ed"));
    }
}
