use std::collections::{BTreeMap, HashMap, HashSet};

/// DIE identity: the hexadecimal offset printed by the disassembler.
pub type Offset = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DieTag {
    CompileUnit,
    Namespace,
    ClassType,
    StructureType,
    UnionType,
    EnumerationType,
    ArrayType,
    SubroutineType,
    BaseType,
    ConstType,
    PointerType,
    ReferenceType,
    VolatileType,
    Typedef,
    PtrToMemberType,
    Subprogram,
    InlinedSubroutine,
    LexicalBlock,
    Variable,
    Member,
    Enumerator,
    Inheritance,
    FormalParameter,
    UnspecifiedParameters,
    SubrangeType,
}

impl DieTag {
    /// Tags that produce a type record.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            DieTag::ClassType
                | DieTag::StructureType
                | DieTag::UnionType
                | DieTag::EnumerationType
                | DieTag::ArrayType
                | DieTag::SubroutineType
                | DieTag::BaseType
                | DieTag::ConstType
                | DieTag::PointerType
                | DieTag::ReferenceType
                | DieTag::VolatileType
                | DieTag::Typedef
                | DieTag::PtrToMemberType
        )
    }

    /// Tags that open a name scope for the `namespace` walk.
    pub fn is_scope(self) -> bool {
        matches!(
            self,
            DieTag::Namespace
                | DieTag::ClassType
                | DieTag::StructureType
                | DieTag::UnionType
                | DieTag::Subprogram
                | DieTag::LexicalBlock
        )
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            DieTag::ClassType | DieTag::StructureType | DieTag::UnionType
        )
    }
}

/// Location of a value at runtime, decoded from `exprloc`/`sec_offset`
/// location attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Offset of another DIE.
    Ref(Offset),
    Str(String),
    Int(i64),
    /// Enumerated keyword with its trailing `(N)` annotation stripped.
    Keyword(String),
    Flag(bool),
    /// Code or data address, with the symbol the disassembler resolved it to.
    Addr { addr: u64, sym: Option<String> },
    /// Frame-relative location (`fbreg N`).
    FrameOffset(i64),
    /// Register location (`regN`).
    Register(u16),
    /// Offset into the location-list table, resolved later.
    LocList(u64),
}

impl AttrValue {
    pub fn as_ref_offset(&self) -> Option<Offset> {
        match self {
            AttrValue::Ref(off) => Some(*off),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// One debugging-information entry. Immutable once scanning is done.
#[derive(Debug)]
pub struct Die {
    pub offset: Offset,
    pub tag: DieTag,
    pub depth: usize,
    /// Offset of the owning compile unit.
    pub unit: Offset,
    attrs: HashMap<String, AttrValue>,
}

impl Die {
    pub fn new(offset: Offset, tag: DieTag, depth: usize, unit: Offset) -> Self {
        Self {
            offset,
            tag,
            depth,
            unit,
            attrs: HashMap::new(),
        }
    }

    pub fn set_attr(&mut self, name: &str, value: AttrValue) {
        self.attrs.insert(name.to_owned(), value);
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn ref_attr(&self, name: &str) -> Option<Offset> {
        self.attr(name).and_then(AttrValue::as_ref_offset)
    }

    pub fn int_attr(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(AttrValue::as_int)
    }

    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_str)
    }

    pub fn keyword(&self, name: &str) -> Option<&str> {
        match self.attr(name) {
            Some(AttrValue::Keyword(k)) => Some(k),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.attr(name), Some(AttrValue::Flag(true)))
    }

    pub fn name(&self) -> Option<&str> {
        self.str_attr("name")
    }

    /// The `<symbol>` token the disassembler attached to an address-valued
    /// attribute.
    pub fn addr_sym(&self, name: &str) -> Option<&str> {
        match self.attr(name) {
            Some(AttrValue::Addr { sym, .. }) => sym.as_deref(),
            _ => None,
        }
    }
}

/// The reassembled DIE graph of one object file, keyed by offset, with the
/// derived edges the resolvers need.
#[derive(Default)]
pub struct DieStore {
    dies: BTreeMap<Offset, Die>,
    /// Lexical parent of every scanned DIE, including ones whose tag is
    /// outside the closed set (they still nest).
    parent_of: HashMap<Offset, Offset>,
    children: HashMap<Offset, Vec<Offset>>,
    spec_of: HashMap<Offset, Offset>,
    origin_of: HashMap<Offset, Offset>,
    methods: HashMap<Offset, Vec<Offset>>,
    locals: HashSet<Offset>,
    units: Vec<Offset>,
}

impl DieStore {
    pub fn insert(&mut self, die: Die) {
        if die.tag == DieTag::CompileUnit {
            self.units.push(die.offset);
        }
        self.dies.insert(die.offset, die);
    }

    pub fn note_parent(&mut self, child: Offset, parent: Offset) {
        self.parent_of.insert(child, parent);
    }

    pub fn get(&self, off: Offset) -> Option<&Die> {
        self.dies.get(&off)
    }

    pub fn len(&self) -> usize {
        self.dies.len()
    }

    pub fn units(&self) -> &[Offset] {
        &self.units
    }

    /// All DIEs in document (= offset) order.
    pub fn iter(&self) -> impl Iterator<Item = &Die> {
        self.dies.values()
    }

    /// Known ancestors of a DIE, innermost first. Walks through DIEs whose
    /// tag fell outside the closed set.
    pub fn ancestors(&self, off: Offset) -> impl Iterator<Item = &Die> {
        let mut cur = self.parent_of.get(&off).copied();
        std::iter::from_fn(move || {
            while let Some(p) = cur {
                cur = self.parent_of.get(&p).copied();
                if let Some(die) = self.dies.get(&p) {
                    return Some(die);
                }
            }
            None
        })
    }

    pub fn parent(&self, off: Offset) -> Option<&Die> {
        self.ancestors(off).next()
    }

    /// Nearest enclosing scope DIE (namespace, aggregate, subprogram, or
    /// lexical block).
    pub fn namespace_scope(&self, off: Offset) -> Option<&Die> {
        self.ancestors(off).find(|d| d.tag.is_scope())
    }

    fn children_with(&self, off: Offset, pred: impl Fn(DieTag) -> bool) -> Vec<&Die> {
        self.children
            .get(&off)
            .into_iter()
            .flatten()
            .filter_map(|c| self.dies.get(c))
            .filter(|d| pred(d.tag))
            .collect()
    }

    /// Ordered `member`/`enumerator` children of an aggregate.
    pub fn members(&self, off: Offset) -> Vec<&Die> {
        self.children_with(off, |t| matches!(t, DieTag::Member | DieTag::Enumerator))
    }

    pub fn inheritances(&self, off: Offset) -> Vec<&Die> {
        self.children_with(off, |t| t == DieTag::Inheritance)
    }

    /// Ordered parameter children of a function-like DIE, including the
    /// ellipsis placeholder.
    pub fn params(&self, off: Offset) -> Vec<&Die> {
        self.children_with(off, |t| {
            matches!(t, DieTag::FormalParameter | DieTag::UnspecifiedParameters)
        })
    }

    pub fn subranges(&self, off: Offset) -> Vec<&Die> {
        self.children_with(off, |t| t == DieTag::SubrangeType)
    }

    /// The defining DIE whose `specification` attribute points at `decl`.
    pub fn specification_of(&self, decl: Offset) -> Option<&Die> {
        self.spec_of.get(&decl).and_then(|o| self.dies.get(o))
    }

    pub fn abstract_origin_of(&self, origin: Offset) -> Option<&Die> {
        self.origin_of.get(&origin).and_then(|o| self.dies.get(o))
    }

    /// Subprogram/variable children of a class or struct aggregate,
    /// including ones collected through the aggregate's `specification`
    /// target.
    pub fn class_methods(&self, agg: Offset) -> &[Offset] {
        self.methods.get(&agg).map_or(&[], Vec::as_slice)
    }

    /// Whether the DIE was declared inside a function body.
    pub fn is_local(&self, off: Offset) -> bool {
        self.locals.contains(&off)
    }

    /// Build the reverse and derived indices. Call once after scanning.
    pub fn finalize(&mut self) {
        let mut children: HashMap<Offset, Vec<Offset>> = HashMap::new();
        let mut spec_of = HashMap::new();
        let mut origin_of = HashMap::new();
        let mut methods: HashMap<Offset, Vec<Offset>> = HashMap::new();
        let mut locals = HashSet::new();

        for die in self.dies.values() {
            if let Some(&parent) = self.parent_of.get(&die.offset) {
                children.entry(parent).or_default().push(die.offset);
            }
            if let Some(target) = die.ref_attr("specification") {
                spec_of.insert(target, die.offset);
            }
            if let Some(target) = die.ref_attr("abstract_origin") {
                origin_of.insert(target, die.offset);
            }
        }
        self.children = children;

        for die in self.dies.values() {
            if matches!(die.tag, DieTag::Subprogram | DieTag::Variable) {
                if let Some(parent) = self.parent(die.offset) {
                    if matches!(parent.tag, DieTag::ClassType | DieTag::StructureType) {
                        methods.entry(parent.offset).or_default().push(die.offset);
                        if let Some(target) = parent.ref_attr("specification") {
                            methods.entry(target).or_default().push(die.offset);
                        }
                    }
                }
            }

            let mut in_subprogram = false;
            for anc in self.ancestors(die.offset) {
                if anc.tag == DieTag::Subprogram && !self.is_ctor_instance(anc) {
                    in_subprogram = true;
                    break;
                }
            }
            if in_subprogram {
                locals.insert(die.offset);
            }
        }

        self.spec_of = spec_of;
        self.origin_of = origin_of;
        self.methods = methods;
        self.locals = locals;
    }

    /// Constructor-template instances carry nested copies of their class
    /// declarations; those must not count as local types. Detected when the
    /// subprogram's object-pointer class has the subprogram's own bare name.
    fn is_ctor_instance(&self, subprogram: &Die) -> bool {
        let Some(short) = subprogram.name() else {
            return false;
        };
        let Some(obj_ptr) = subprogram.ref_attr("object_pointer") else {
            return false;
        };
        let class_name = self
            .get(obj_ptr)
            .and_then(|p| p.ref_attr("type"))
            .and_then(|t| self.get(t))
            .and_then(|ptr| ptr.ref_attr("type"))
            .and_then(|t| self.get(t))
            .and_then(Die::name);
        match class_name {
            Some(name) => bare_name(name) == bare_name(short),
            None => false,
        }
    }
}

/// Name with any template-argument suffix removed.
pub fn bare_name(name: &str) -> &str {
    match name.find('<') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(dies: Vec<(Offset, DieTag, usize, Option<Offset>)>) -> DieStore {
        let mut store = DieStore::default();
        for (off, tag, depth, parent) in dies {
            store.insert(Die::new(off, tag, depth, 0x0b));
            if let Some(p) = parent {
                store.note_parent(off, p);
            }
        }
        store.finalize();
        store
    }

    #[test]
    fn ancestors_walk_through_unknown_dies() {
        // 0x20's recorded parent 0x15 was never inserted (unknown tag);
        // the walk must continue to 0x10.
        let mut store = DieStore::default();
        store.insert(Die::new(0x10, DieTag::Namespace, 2, 0x0b));
        store.insert(Die::new(0x20, DieTag::ClassType, 6, 0x0b));
        store.note_parent(0x15, 0x10);
        store.note_parent(0x20, 0x15);
        store.finalize();

        let anc: Vec<Offset> = store.ancestors(0x20).map(|d| d.offset).collect();
        assert_eq!(anc, vec![0x10]);
        assert_eq!(store.namespace_scope(0x20).unwrap().offset, 0x10);
    }

    #[test]
    fn members_keep_document_order() {
        let store = store_with(vec![
            (0x10, DieTag::StructureType, 2, None),
            (0x18, DieTag::Member, 4, Some(0x10)),
            (0x20, DieTag::Member, 4, Some(0x10)),
            (0x28, DieTag::Subprogram, 4, Some(0x10)),
        ]);
        let members: Vec<Offset> = store.members(0x10).iter().map(|d| d.offset).collect();
        assert_eq!(members, vec![0x18, 0x20]);
        assert_eq!(store.class_methods(0x10), &[0x28]);
    }

    #[test]
    fn class_methods_index_under_specification_target() {
        let mut store = DieStore::default();
        store.insert(Die::new(0x10, DieTag::ClassType, 2, 0x0b));
        let mut def = Die::new(0x40, DieTag::ClassType, 2, 0x0b);
        def.set_attr("specification", AttrValue::Ref(0x10));
        store.insert(def);
        store.insert(Die::new(0x48, DieTag::Subprogram, 4, 0x0b));
        store.note_parent(0x48, 0x40);
        store.finalize();

        assert_eq!(store.class_methods(0x40), &[0x48]);
        assert_eq!(store.class_methods(0x10), &[0x48]);
    }

    #[test]
    fn dies_under_a_subprogram_are_local() {
        let store = store_with(vec![
            (0x10, DieTag::Subprogram, 2, None),
            (0x18, DieTag::StructureType, 4, Some(0x10)),
            (0x30, DieTag::StructureType, 2, None),
        ]);
        assert!(store.is_local(0x18));
        assert!(!store.is_local(0x30));
    }

    #[test]
    fn ctor_instance_children_are_not_local() {
        let mut store = DieStore::default();
        // subprogram "Box" whose object pointer is Box<int>* -> exemption
        let mut sp = Die::new(0x10, DieTag::Subprogram, 2, 0x0b);
        sp.set_attr("name", AttrValue::Str("Box".into()));
        sp.set_attr("object_pointer", AttrValue::Ref(0x18));
        store.insert(sp);
        let mut this_param = Die::new(0x18, DieTag::FormalParameter, 4, 0x0b);
        this_param.set_attr("type", AttrValue::Ref(0x40));
        store.insert(this_param);
        store.note_parent(0x18, 0x10);
        let mut ptr = Die::new(0x40, DieTag::PointerType, 2, 0x0b);
        ptr.set_attr("type", AttrValue::Ref(0x48));
        store.insert(ptr);
        let mut class = Die::new(0x48, DieTag::ClassType, 2, 0x0b);
        class.set_attr("name", AttrValue::Str("Box<int>".into()));
        store.insert(class);

        store.insert(Die::new(0x20, DieTag::StructureType, 4, 0x0b));
        store.note_parent(0x20, 0x10);
        store.finalize();

        assert!(!store.is_local(0x20));
    }

    #[test]
    fn bare_name_strips_template_args() {
        assert_eq!(bare_name("Box<int>"), "Box");
        assert_eq!(bare_name("plain"), "plain");
    }
}
