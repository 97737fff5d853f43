use phf::{phf_map, phf_ordered_map, phf_set};

use crate::die::DieTag;

/// Tag names as the disassembler prints them. The set is closed: DWARF 4/5
/// defines it, and DIEs outside it only matter for parent tracking.
pub static DIE_TAGS: phf::Map<&'static str, DieTag> = phf_map! {
    "compile_unit" => DieTag::CompileUnit,
    "namespace" => DieTag::Namespace,
    "class_type" => DieTag::ClassType,
    "structure_type" => DieTag::StructureType,
    "union_type" => DieTag::UnionType,
    "enumeration_type" => DieTag::EnumerationType,
    "array_type" => DieTag::ArrayType,
    "subroutine_type" => DieTag::SubroutineType,
    "base_type" => DieTag::BaseType,
    "const_type" => DieTag::ConstType,
    "pointer_type" => DieTag::PointerType,
    "reference_type" => DieTag::ReferenceType,
    "volatile_type" => DieTag::VolatileType,
    "typedef" => DieTag::Typedef,
    "ptr_to_member_type" => DieTag::PtrToMemberType,
    "subprogram" => DieTag::Subprogram,
    "inlined_subroutine" => DieTag::InlinedSubroutine,
    "lexical_block" => DieTag::LexicalBlock,
    "variable" => DieTag::Variable,
    "member" => DieTag::Member,
    "enumerator" => DieTag::Enumerator,
    "inheritance" => DieTag::Inheritance,
    "formal_parameter" => DieTag::FormalParameter,
    "unspecified_parameters" => DieTag::UnspecifiedParameters,
    "subrange_type" => DieTag::SubrangeType,
};

/// File extensions that mark a declaration site as a header.
pub static HEADER_EXTS: phf::Set<&'static str> = phf_set! {
    "h", "hh", "hp", "hxx", "hpp", "h++",
};

/// Default template arguments of well-known standard containers, elided
/// during canonicalization so two builds name the same instantiation
/// identically. `$` stands for the first template argument.
pub static STD_DEFAULT_ARGS: phf::OrderedMap<&'static str, &'static [&'static str]> = phf_ordered_map! {
    "std::vector" => &["std::allocator<$>"],
    "std::set" => &["std::less<$>", "std::allocator<$>"],
    "std::basic_string" => &["std::char_traits<$>", "std::allocator<$>"],
};

/// Mangling prefixes removed under `--skip-cxx`: libstdc++ internals and
/// their typeinfo records.
pub const SKIP_CXX_PREFIXES: &[&str] = &[
    "_ZS", "_ZNS", "_ZNKS", "_ZN9__gnu_cxx", "_ZNK9__gnu_cxx", "_ZTIS", "_ZTSS",
];

static REGS_X86_64: phf::Map<u16, &'static str> = phf_map! {
    0u16 => "rax", 1u16 => "rdx", 2u16 => "rcx", 3u16 => "rbx",
    4u16 => "rsi", 5u16 => "rdi", 6u16 => "rbp", 7u16 => "rsp",
    8u16 => "r8", 9u16 => "r9", 10u16 => "r10", 11u16 => "r11",
    12u16 => "r12", 13u16 => "r13", 14u16 => "r14", 15u16 => "r15",
    16u16 => "rip",
    17u16 => "xmm0", 18u16 => "xmm1", 19u16 => "xmm2", 20u16 => "xmm3",
    21u16 => "xmm4", 22u16 => "xmm5", 23u16 => "xmm6", 24u16 => "xmm7",
};

static REGS_X86: phf::Map<u16, &'static str> = phf_map! {
    0u16 => "eax", 1u16 => "ecx", 2u16 => "edx", 3u16 => "ebx",
    4u16 => "esp", 5u16 => "ebp", 6u16 => "esi", 7u16 => "edi",
    8u16 => "eip",
};

static REGS_ARM: phf::Map<u16, &'static str> = phf_map! {
    0u16 => "r0", 1u16 => "r1", 2u16 => "r2", 3u16 => "r3",
    4u16 => "r4", 5u16 => "r5", 6u16 => "r6", 7u16 => "r7",
    8u16 => "r8", 9u16 => "r9", 10u16 => "r10", 11u16 => "r11",
    12u16 => "r12", 13u16 => "sp", 14u16 => "lr", 15u16 => "pc",
};

static REGS_AARCH64: phf::Map<u16, &'static str> = phf_map! {
    0u16 => "x0", 1u16 => "x1", 2u16 => "x2", 3u16 => "x3",
    4u16 => "x4", 5u16 => "x5", 6u16 => "x6", 7u16 => "x7",
    8u16 => "x8", 9u16 => "x9", 10u16 => "x10", 11u16 => "x11",
    12u16 => "x12", 13u16 => "x13", 14u16 => "x14", 15u16 => "x15",
    16u16 => "x16", 17u16 => "x17", 18u16 => "x18", 19u16 => "x19",
    20u16 => "x20", 21u16 => "x21", 22u16 => "x22", 23u16 => "x23",
    24u16 => "x24", 25u16 => "x25", 26u16 => "x26", 27u16 => "x27",
    28u16 => "x28", 29u16 => "x29", 30u16 => "x30", 31u16 => "sp",
};

/// DWARF register-number table for an architecture token as reported by
/// the ELF file header.
pub fn registers_for(arch: &str) -> Option<&'static phf::Map<u16, &'static str>> {
    match arch {
        "x86_64" => Some(&REGS_X86_64),
        "x86" => Some(&REGS_X86),
        "arm" => Some(&REGS_ARM),
        "aarch64" => Some(&REGS_AARCH64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_table_covers_the_closed_set() {
        assert_eq!(DIE_TAGS.len(), 25);
        assert_eq!(DIE_TAGS.get("compile_unit"), Some(&DieTag::CompileUnit));
        assert_eq!(
            DIE_TAGS.get("ptr_to_member_type"),
            Some(&DieTag::PtrToMemberType)
        );
        assert!(DIE_TAGS.get("template_type_parameter").is_none());
    }

    #[test]
    fn register_tables_resolve_by_arch() {
        assert_eq!(registers_for("x86_64").unwrap().get(&5), Some(&"rdi"));
        assert_eq!(registers_for("aarch64").unwrap().get(&0), Some(&"x0"));
        assert!(registers_for("s390").is_none());
    }

    #[test]
    fn header_extensions() {
        for ext in ["h", "hh", "hp", "hxx", "hpp", "h++"] {
            assert!(HEADER_EXTS.contains(ext));
        }
        assert!(!HEADER_EXTS.contains("cpp"));
    }
}
