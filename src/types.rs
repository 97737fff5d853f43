use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, instrument, warn};

use crate::die::{bare_name, Die, DieStore, DieTag, Offset};
use crate::names::{split_template, NameMode, Names};
use crate::scan::{LineTables, UnitInfo};
use crate::vtables::VTableMap;

pub type TypeId = i64;

/// Reserved IDs, always present in the output.
pub const VOID_ID: TypeId = 1;
pub const ELLIPSIS_ID: TypeId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Intrinsic,
    Class,
    Struct,
    Union,
    Enum,
    Array,
    Const,
    Volatile,
    Pointer,
    Ref,
    Typedef,
    FuncPtr,
    MethodPtr,
    FieldPtr,
    Func,
}

/// Families inside which canonical names must be unique. Structs and
/// classes merge; enums, unions and typedefs each stand alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameFamily {
    Aggregate,
    Enum,
    Union,
    Typedef,
    Other,
}

impl TypeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeKind::Intrinsic => "Intrinsic",
            TypeKind::Class => "Class",
            TypeKind::Struct => "Struct",
            TypeKind::Union => "Union",
            TypeKind::Enum => "Enum",
            TypeKind::Array => "Array",
            TypeKind::Const => "Const",
            TypeKind::Volatile => "Volatile",
            TypeKind::Pointer => "Pointer",
            TypeKind::Ref => "Ref",
            TypeKind::Typedef => "Typedef",
            TypeKind::FuncPtr => "FuncPtr",
            TypeKind::MethodPtr => "MethodPtr",
            TypeKind::FieldPtr => "FieldPtr",
            TypeKind::Func => "Func",
        }
    }

    /// Lowercase keyword prepended to struct/enum/union names.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            TypeKind::Struct => Some("struct"),
            TypeKind::Enum => Some("enum"),
            TypeKind::Union => Some("union"),
            _ => None,
        }
    }

    pub fn family(self) -> NameFamily {
        match self {
            TypeKind::Class | TypeKind::Struct => NameFamily::Aggregate,
            TypeKind::Enum => NameFamily::Enum,
            TypeKind::Union => NameFamily::Union,
            TypeKind::Typedef => NameFamily::Typedef,
            _ => NameFamily::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemberRec {
    pub name: String,
    pub tid: TypeId,
    pub offset: u64,
    pub bits: Option<u64>,
    pub access: Option<String>,
    /// Enumerator constant.
    pub value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BaseRec {
    pub tid: TypeId,
    pub pos: u64,
    pub access: Option<String>,
    pub virt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSite {
    /// File name (not the full path), stable across build trees.
    pub file: String,
    pub line: u64,
    pub header: bool,
}

#[derive(Debug)]
pub struct TypeRecord {
    pub id: TypeId,
    pub kind: TypeKind,
    pub name: String,
    pub size: Option<i64>,
    pub decl: Option<SourceSite>,
    pub base: Option<TypeId>,
    pub members: Vec<MemberRec>,
    pub bases: Vec<BaseRec>,
    pub vtable: BTreeMap<u64, String>,
    pub namespace: Option<String>,
    pub tparams: Vec<String>,
    pub ret: Option<TypeId>,
    pub params: Vec<TypeId>,
    /// Class of a method/field pointer.
    pub class: Option<TypeId>,
    /// Cleared once an explicit constructor is seen.
    pub copied: bool,
    pub local: bool,
    pub anon: bool,
}

impl TypeRecord {
    fn new(id: TypeId, kind: TypeKind) -> Self {
        Self {
            id,
            kind,
            name: String::new(),
            size: None,
            decl: None,
            base: None,
            members: Vec::new(),
            bases: Vec::new(),
            vtable: BTreeMap::new(),
            namespace: None,
            tparams: Vec::new(),
            ret: None,
            params: Vec::new(),
            class: None,
            copied: false,
            local: false,
            anon: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.size.is_some() || !self.members.is_empty()
    }
}

/// The resolved type graph. IDs are assigned in resolution order; the
/// name registry maps each canonical name to its first ID so later
/// duplicates merge.
pub struct TypeTable {
    pub records: BTreeMap<TypeId, TypeRecord>,
    first_by_name: HashMap<(NameFamily, String), TypeId>,
    /// Anonymous bases absorbed into a typedef: folded ID → absorbing ID.
    pub folded: BTreeMap<TypeId, TypeId>,
    next_id: TypeId,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = Self {
            records: BTreeMap::new(),
            first_by_name: HashMap::new(),
            folded: BTreeMap::new(),
            next_id: 2,
        };
        for (id, name) in [(VOID_ID, "void"), (ELLIPSIS_ID, "...")] {
            let mut rec = TypeRecord::new(id, TypeKind::Intrinsic);
            rec.name = name.to_owned();
            table.records.insert(id, rec);
            table.register_name(id);
        }
        table
    }

    fn alloc(&mut self) -> TypeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeRecord> {
        self.records.get(&id)
    }

    pub fn name_of(&self, id: TypeId) -> &str {
        self.records.get(&id).map_or("", |r| r.name.as_str())
    }

    /// Canonical ID for a record's name: the first ID that claimed the
    /// (family, name) pair.
    pub fn get_first(&self, id: TypeId) -> TypeId {
        let Some(rec) = self.records.get(&id) else {
            return id;
        };
        if rec.name.is_empty() {
            return id;
        }
        self.first_by_name
            .get(&(rec.kind.family(), rec.name.clone()))
            .copied()
            .unwrap_or(id)
    }

    pub fn by_name(&self, family: NameFamily, name: &str) -> Option<TypeId> {
        self.first_by_name.get(&(family, name.to_owned())).copied()
    }

    fn register_name(&mut self, id: TypeId) {
        let Some(rec) = self.records.get(&id) else {
            return;
        };
        if rec.name.is_empty() {
            return;
        }
        let key = (rec.kind.family(), rec.name.clone());
        let complete = rec.is_complete();
        match self.first_by_name.get(&key) {
            None => {
                self.first_by_name.insert(key, id);
            }
            Some(&prior) => {
                // A complete definition supersedes a forward declaration
                // that happened to register first.
                let prior_complete = self.records.get(&prior).is_some_and(TypeRecord::is_complete);
                if !prior_complete && complete {
                    self.first_by_name.insert(key, id);
                }
            }
        }
    }
}

/// Shared registry of declaration files and namespaces seen on retained
/// entities, emitted as the `Headers`/`Sources`/`NameSpaces` maps.
#[derive(Default)]
pub struct SourceRegistry {
    pub headers: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub namespaces: BTreeSet<String>,
}

impl SourceRegistry {
    pub fn note_site(&mut self, site: &SourceSite) {
        if site.header {
            self.headers.insert(site.file.clone());
        } else {
            self.sources.insert(site.file.clone());
        }
    }
}

/// Resolves DIEs into type records, on demand and memoized. A placeholder
/// is inserted before recursing so cyclic graphs (`struct Node { Node*
/// next; }`) terminate; aggregate identities are filled before member
/// recursion so derived-type names never observe an empty placeholder.
pub struct TypeResolver<'a> {
    pub store: &'a DieStore,
    pub units: &'a BTreeMap<Offset, UnitInfo>,
    pub lines: &'a LineTables,
    pub names: &'a mut Names,
    pub types: &'a mut TypeTable,
    pub registry: &'a mut SourceRegistry,
    pub word_size: u64,
    memo: HashMap<Offset, Option<TypeId>>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(
        store: &'a DieStore,
        units: &'a BTreeMap<Offset, UnitInfo>,
        lines: &'a LineTables,
        names: &'a mut Names,
        types: &'a mut TypeTable,
        registry: &'a mut SourceRegistry,
        word_size: u64,
    ) -> Self {
        Self {
            store,
            units,
            lines,
            names,
            types,
            registry,
            word_size,
            memo: HashMap::new(),
        }
    }

    #[instrument(skip(self))]
    pub fn resolve_all(&mut self) {
        let offsets: Vec<Offset> = self
            .store
            .iter()
            .filter(|d| d.tag.is_type())
            .map(|d| d.offset)
            .collect();
        for off in offsets {
            self.resolve(off);
        }
        debug!(types = self.types.records.len(), "resolved type graph");
    }

    /// Resolve one DIE to a type ID. `None` means the type was dropped
    /// (its base names local code that cannot be part of the ABI).
    pub fn resolve(&mut self, off: Offset) -> Option<TypeId> {
        if let Some(&memo) = self.memo.get(&off) {
            return memo;
        }
        let store = self.store;
        let die = store.get(off)?;
        if !die.tag.is_type() {
            return None;
        }

        // A definition linked to its declaration adopts the declaration's
        // record: the specification DIE is authoritative for identity, the
        // definition only contributes its code location.
        if let Some(spec) = die.ref_attr("specification") {
            let id = self.resolve(spec);
            if let Some(id) = id {
                if let Some(site) = self.decl_site(die) {
                    let rec = self.types.records.get_mut(&id).expect("resolved id");
                    rec.decl.get_or_insert(site);
                }
            }
            self.memo.insert(off, id);
            return id;
        }

        let id = self.types.alloc();
        self.memo.insert(off, Some(id));
        self.types.records.insert(id, TypeRecord::new(id, TypeKind::Intrinsic));

        let built = self.build(die, id);
        match built {
            Some(()) => {
                let rec = self.types.records.get_mut(&id).expect("placeholder");
                rec.local = store.is_local(off);
                if rec.name.ends_with('>') {
                    if let Some((_, args)) = split_template(&rec.name) {
                        rec.tparams = args;
                    }
                }
                if let Some(site) = rec.decl.clone() {
                    self.registry.note_site(&site);
                }
                self.types.register_name(id);
                Some(id)
            }
            None => {
                self.types.records.remove(&id);
                self.memo.insert(off, None);
                None
            }
        }
    }

    fn build(&mut self, die: &'a Die, id: TypeId) -> Option<()> {
        match die.tag {
            DieTag::BaseType => self.build_intrinsic(die, id),
            DieTag::ClassType | DieTag::StructureType | DieTag::UnionType => {
                self.build_aggregate(die, id)
            }
            DieTag::EnumerationType => self.build_enum(die, id),
            DieTag::ConstType => self.build_qualifier(die, id, TypeKind::Const, "const"),
            DieTag::VolatileType => self.build_qualifier(die, id, TypeKind::Volatile, "volatile"),
            DieTag::PointerType => self.build_pointer(die, id),
            DieTag::ReferenceType => self.build_reference(die, id),
            DieTag::Typedef => self.build_typedef(die, id),
            DieTag::ArrayType => self.build_array(die, id),
            DieTag::PtrToMemberType => self.build_member_pointer(die, id),
            DieTag::SubroutineType => self.build_func(die, id),
            _ => None,
        }
    }

    fn build_intrinsic(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let name = self.names.canonical(die.name()?, NameMode::Type);
        let size = die.int_attr("byte_size");
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::Intrinsic;
        rec.name = name;
        rec.size = size;
        Some(())
    }

    fn build_aggregate(&mut self, die: &'a Die, id: TypeId) -> Option<()> {
        if die.tag == DieTag::StructureType {
            if let Some(()) = self.try_method_pointer(die, id) {
                return Some(());
            }
        }

        let kind = match die.tag {
            DieTag::ClassType => TypeKind::Class,
            DieTag::StructureType => TypeKind::Struct,
            _ => TypeKind::Union,
        };
        let site = self.decl_site(die);
        let (scope, ns) = self.scope_strings(die.offset);
        let (name, anon) = match die.name() {
            Some(short) => (self.qualify(&scope, short, kind), false),
            None => (anon_name(kind, site.as_ref()), true),
        };

        // An explicit constructor among the class methods already proves the
        // type is not trivially copyable; exported constructor symbols clear
        // the marker as well.
        let has_explicit_ctor = die.name().map(bare_name).is_some_and(|class_bare| {
            self.store.class_methods(die.offset).iter().any(|&m| {
                self.store
                    .get(m)
                    .and_then(Die::name)
                    .map(bare_name)
                    .is_some_and(|n| n == class_bare)
            })
        });

        // Identity goes in before member recursion: cycles through members
        // must observe the final name.
        {
            let rec = self.types.records.get_mut(&id).expect("placeholder");
            rec.kind = kind;
            rec.name = name;
            rec.anon = anon;
            rec.namespace = scope;
            rec.decl = site;
            rec.size = die.int_attr("byte_size");
            rec.copied =
                matches!(kind, TypeKind::Class | TypeKind::Struct) && !has_explicit_ctor;
        }
        if let Some(ns) = ns {
            self.registry.namespaces.insert(ns);
        }

        let members = self.collect_members(die, kind);
        let bases = self.collect_bases(die);
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.members = members;
        rec.bases = bases;
        Some(())
    }

    fn collect_members(&mut self, die: &Die, kind: TypeKind) -> Vec<MemberRec> {
        let store = self.store;
        let mut out = Vec::new();
        let mut unnamed = 0u32;
        let member_offs: Vec<Offset> = store
            .members(die.offset)
            .iter()
            .filter(|m| m.tag == DieTag::Member)
            .map(|m| m.offset)
            .collect();
        for moff in member_offs {
            let m = store.get(moff).expect("member offset");
            // static data members are symbols, not layout
            if m.flag("declaration") || m.flag("external") {
                continue;
            }
            let name = match m.name() {
                Some(n) if n.starts_with("_vptr.") => "_vptr".to_owned(),
                Some(n) => n.to_owned(),
                None => {
                    let n = format!("unnamed{unnamed}");
                    unnamed += 1;
                    n
                }
            };
            let Some(tid) = m.ref_attr("type").and_then(|t| self.resolve(t)) else {
                warn!(member = name, offset = moff, "member type did not resolve");
                continue;
            };
            let offset = if kind == TypeKind::Union {
                0
            } else {
                m.int_attr("data_member_location").unwrap_or(0) as u64
            };
            out.push(MemberRec {
                name,
                tid,
                offset,
                bits: m.int_attr("bit_size").map(|n| n as u64),
                access: m.keyword("accessibility").map(str::to_owned),
                value: None,
            });
        }
        out
    }

    fn collect_bases(&mut self, die: &Die) -> Vec<BaseRec> {
        let store = self.store;
        let inh_offs: Vec<Offset> = store
            .inheritances(die.offset)
            .iter()
            .map(|d| d.offset)
            .collect();
        let mut out = Vec::new();
        for (pos, ioff) in inh_offs.into_iter().enumerate() {
            let inh = store.get(ioff).expect("inheritance offset");
            let Some(tid) = inh.ref_attr("type").and_then(|t| self.resolve(t)) else {
                continue;
            };
            out.push(BaseRec {
                tid,
                pos: pos as u64,
                access: inh.keyword("accessibility").map(str::to_owned),
                virt: inh.keyword("virtuality") == Some("virtual"),
            });
        }
        out
    }

    fn build_enum(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let site = self.decl_site(die);
        let (scope, ns) = self.scope_strings(die.offset);
        let (name, anon) = match die.name() {
            Some(short) => (self.qualify(&scope, short, TypeKind::Enum), false),
            None => (anon_name(TypeKind::Enum, site.as_ref()), true),
        };
        let members: Vec<MemberRec> = self
            .store
            .members(die.offset)
            .iter()
            .filter(|m| m.tag == DieTag::Enumerator)
            .filter_map(|e| {
                Some(MemberRec {
                    name: e.name()?.to_owned(),
                    tid: VOID_ID,
                    offset: 0,
                    bits: None,
                    access: None,
                    value: Some(e.int_attr("const_value").unwrap_or(0)),
                })
            })
            .collect();

        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::Enum;
        rec.name = name;
        rec.anon = anon;
        rec.namespace = scope;
        rec.decl = site;
        rec.size = die.int_attr("byte_size");
        rec.members = members;
        if let Some(ns) = ns {
            self.registry.namespaces.insert(ns);
        }
        Some(())
    }

    fn build_qualifier(
        &mut self,
        die: &Die,
        id: TypeId,
        kind: TypeKind,
        keyword: &str,
    ) -> Option<()> {
        let base = match die.ref_attr("type") {
            Some(t) => self.resolve(t)?,
            // a baseless qualifier qualifies void
            None => VOID_ID,
        };
        let name = self
            .names
            .canonical(&format!("{} {keyword}", self.types.name_of(base)), NameMode::Type);
        let size = self.types.get(base).and_then(|r| r.size);
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = kind;
        rec.name = name;
        rec.base = Some(base);
        rec.size = size;
        Some(())
    }

    fn build_pointer(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let word = self.word_size as i64;
        let Some(target) = die.ref_attr("type") else {
            let rec = self.types.records.get_mut(&id).expect("placeholder");
            rec.kind = TypeKind::Pointer;
            rec.name = "void*".to_owned();
            rec.base = Some(VOID_ID);
            rec.size = Some(word);
            return Some(());
        };

        // a pointer to a subroutine type is a function pointer
        if self.store.get(target).is_some_and(|d| d.tag == DieTag::SubroutineType) {
            let (ret, params) = self.signature(target)?;
            let name = self.signature_name(ret, &params, "(*)");
            let rec = self.types.records.get_mut(&id).expect("placeholder");
            rec.kind = TypeKind::FuncPtr;
            rec.name = name;
            rec.ret = Some(ret);
            rec.params = params;
            rec.size = Some(word);
            return Some(());
        }

        let base = self.resolve(target)?;
        let name = self
            .names
            .canonical(&format!("{}*", self.types.name_of(base)), NameMode::Type);
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::Pointer;
        rec.name = name;
        rec.base = Some(base);
        rec.size = Some(word);
        Some(())
    }

    fn build_reference(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let base = match die.ref_attr("type") {
            Some(t) => self.resolve(t)?,
            None => VOID_ID,
        };
        let name = self
            .names
            .canonical(&format!("{}&", self.types.name_of(base)), NameMode::Type);
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::Ref;
        rec.name = name;
        rec.base = Some(base);
        rec.size = Some(self.word_size as i64);
        Some(())
    }

    fn build_typedef(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let short = die.name()?;
        let base = match die.ref_attr("type") {
            Some(t) => self.resolve(t)?,
            None => VOID_ID,
        };
        let site = self.decl_site(die);
        let (scope, ns) = self.scope_strings(die.offset);
        let qualified = self.qualify(&scope, short, TypeKind::Typedef);

        // `typedef struct { int x; } S;` folds the anonymous aggregate into
        // the typedef and retires it from the table.
        let folded = {
            let base_rec = self.types.get(base);
            base_rec.is_some_and(|b| {
                b.anon
                    && matches!(
                        b.kind,
                        TypeKind::Struct | TypeKind::Class | TypeKind::Union | TypeKind::Enum
                    )
            })
        };
        if folded {
            let (kw, members, size) = {
                let b = self.types.get(base).expect("folded base");
                (b.kind.keyword().unwrap_or("struct"), b.members.clone(), b.size)
            };
            self.types.folded.insert(base, id);
            let rec = self.types.records.get_mut(&id).expect("placeholder");
            rec.kind = TypeKind::Typedef;
            rec.name = format!("{kw} {qualified}");
            rec.members = members;
            rec.size = size;
            rec.namespace = scope;
            rec.decl = site;
        } else {
            let rec = self.types.records.get_mut(&id).expect("placeholder");
            rec.kind = TypeKind::Typedef;
            rec.name = qualified;
            rec.base = Some(base);
            rec.namespace = scope;
            rec.decl = site;
        }
        if let Some(ns) = ns {
            self.registry.namespaces.insert(ns);
        }
        Some(())
    }

    fn build_array(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let elem = self.resolve(die.ref_attr("type")?)?;
        let store = self.store;
        let mut dims: Vec<u64> = Vec::new();
        for sub in store.subranges(die.offset) {
            if let Some(ub) = sub.int_attr("upper_bound") {
                dims.push(ub as u64 + 1);
            } else if let Some(count) = sub.int_attr("count") {
                dims.push(count as u64);
            }
        }
        let elem_name = self.types.name_of(elem).to_owned();
        let elem_size = self.types.get(elem).and_then(|r| r.size);
        let (name, size) = if dims.is_empty() {
            (format!("{elem_name}[]"), None)
        } else {
            let mut name = elem_name;
            for d in &dims {
                name.push_str(&format!("[{d}]"));
            }
            let total: u64 = dims.iter().product();
            (name, elem_size.map(|s| s * total as i64))
        };
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::Array;
        rec.name = name;
        rec.base = Some(elem);
        rec.size = size;
        Some(())
    }

    fn build_member_pointer(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let class = self.resolve(die.ref_attr("containing_type")?)?;
        let class_name = strip_kind_prefix(self.types.name_of(class)).to_owned();
        let target = die.ref_attr("type")?;

        if self.store.get(target).is_some_and(|d| d.tag == DieTag::SubroutineType) {
            let (ret, params) = self.signature(target)?;
            let name = self.signature_name(ret, &params, &format!("({class_name}::*)"));
            let rec = self.types.records.get_mut(&id).expect("placeholder");
            rec.kind = TypeKind::MethodPtr;
            rec.name = name;
            rec.ret = Some(ret);
            rec.params = params;
            rec.class = Some(class);
            rec.size = Some(self.word_size as i64);
            return Some(());
        }

        let base = self.resolve(target)?;
        let name = self.names.canonical(
            &format!("{}({class_name}::*)", self.types.name_of(base)),
            NameMode::Type,
        );
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::FieldPtr;
        rec.name = name;
        rec.ret = Some(base);
        rec.class = Some(class);
        rec.size = Some(self.word_size as i64);
        Some(())
    }

    fn build_func(&mut self, die: &Die, id: TypeId) -> Option<()> {
        let (ret, params) = self.signature(die.offset)?;
        let name = self.signature_name(ret, &params, "()");
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::Func;
        rec.name = name;
        rec.ret = Some(ret);
        rec.params = params;
        Some(())
    }

    /// The `__pfn` struct shape GCC emits for pointer-to-member-functions:
    /// a struct whose sibling is the subroutine type and whose first member
    /// is the function-pointer half of the pair.
    fn try_method_pointer(&mut self, die: &'a Die, id: TypeId) -> Option<()> {
        let sibling = die.ref_attr("sibling")?;
        let sib_die = self.store.get(sibling)?;
        if sib_die.tag != DieTag::SubroutineType {
            return None;
        }
        let first = self.store.members(die.offset).first()?.offset;
        if !self.store.get(first)?.name()?.starts_with("__pfn") {
            return None;
        }

        let class_off = self.object_pointer_class(sibling)?;
        let class = self.resolve(class_off)?;
        let class_name = strip_kind_prefix(self.types.name_of(class)).to_owned();
        let (ret, params) = self.signature(sibling)?;
        let name = self.signature_name(ret, &params, &format!("({class_name}::*)"));
        let rec = self.types.records.get_mut(&id).expect("placeholder");
        rec.kind = TypeKind::MethodPtr;
        rec.name = name;
        rec.ret = Some(ret);
        rec.params = params;
        rec.class = Some(class);
        rec.size = die.int_attr("byte_size").or(Some(2 * self.word_size as i64));
        Some(())
    }

    /// Class DIE offset behind a subroutine's `this` parameter.
    fn object_pointer_class(&self, sub_off: Offset) -> Option<Offset> {
        let store = self.store;
        let sub = store.get(sub_off)?;
        let obj_param = sub.ref_attr("object_pointer").or_else(|| {
            store
                .params(sub_off)
                .iter()
                .find(|p| p.flag("artificial"))
                .map(|p| p.offset)
        })?;
        let ptr = store.get(obj_param)?.ref_attr("type")?;
        store.get(ptr)?.ref_attr("type")
    }

    /// Return type and parameter IDs of a function-like DIE. The implicit
    /// `this` is dropped; `unspecified_parameters` becomes the ellipsis ID.
    fn signature(&mut self, off: Offset) -> Option<(TypeId, Vec<TypeId>)> {
        let store = self.store;
        let die = store.get(off)?;
        let ret = match die.ref_attr("type") {
            Some(t) => self.resolve(t)?,
            None => VOID_ID,
        };
        let param_offs: Vec<(Offset, DieTag, bool)> = store
            .params(off)
            .iter()
            .map(|p| (p.offset, p.tag, p.flag("artificial")))
            .collect();
        let mut params = Vec::new();
        for (poff, tag, artificial) in param_offs {
            if tag == DieTag::UnspecifiedParameters {
                params.push(ELLIPSIS_ID);
                continue;
            }
            if artificial {
                continue;
            }
            let t = store.get(poff)?.ref_attr("type")?;
            params.push(self.resolve(t)?);
        }
        Some((ret, params))
    }

    fn signature_name(&mut self, ret: TypeId, params: &[TypeId], infix: &str) -> String {
        let args: Vec<&str> = params.iter().map(|&p| self.types.name_of(p)).collect();
        let raw = format!("{}{infix}({})", self.types.name_of(ret), args.join(","));
        self.names.canonical(&raw, NameMode::Type)
    }

    /// Scope strings of a DIE: the full enclosing scope (namespaces and
    /// classes), and the pure-namespace chain for the `NameSpaces` index.
    fn scope_strings(&self, off: Offset) -> (Option<String>, Option<String>) {
        let store = self.store;
        let mut parts: Vec<(&str, bool)> = Vec::new();
        for anc in store.ancestors(off) {
            match anc.tag {
                DieTag::Namespace => {
                    if let Some(n) = anc.name() {
                        parts.push((n, true));
                    }
                }
                DieTag::ClassType | DieTag::StructureType | DieTag::UnionType => {
                    if let Some(n) = anc.name() {
                        parts.push((n, false));
                    }
                }
                _ => {}
            }
        }
        parts.reverse();
        if parts.is_empty() {
            return (None, None);
        }
        let scope = parts
            .iter()
            .map(|(n, _)| *n)
            .collect::<Vec<_>>()
            .join("::");
        let ns: Vec<&str> = parts
            .iter()
            .take_while(|(_, is_ns)| *is_ns)
            .map(|(n, _)| *n)
            .collect();
        let ns = if ns.is_empty() { None } else { Some(ns.join("::")) };
        (Some(scope), ns)
    }

    fn qualify(&mut self, scope: &Option<String>, short: &str, kind: TypeKind) -> String {
        let qualified = match scope {
            Some(scope) => format!("{}::{short}", scope.strip_prefix("struct ").unwrap_or(scope)),
            None => short.to_owned(),
        };
        let canonical = self.names.canonical(&qualified, NameMode::Type);
        match kind.keyword() {
            Some(kw) => format!("{kw} {canonical}"),
            None => canonical,
        }
    }

    pub fn decl_site(&self, die: &Die) -> Option<SourceSite> {
        let file_num = die.int_attr("decl_file")? as u64;
        let unit = self.units.get(&die.unit)?;
        let entry = self.lines.file(unit.stmt_list?, file_num)?;
        let file = entry
            .path
            .rsplit('/')
            .next()
            .unwrap_or(entry.path.as_str())
            .to_owned();
        Some(SourceSite {
            file,
            line: die.int_attr("decl_line").unwrap_or(0) as u64,
            header: entry.header,
        })
    }
}

/// Attach dumped vtables to their classes by canonical name.
pub fn attach_vtables(types: &mut TypeTable, names: &mut Names, vtables: &VTableMap) {
    for (class, slots) in vtables {
        let canonical = names.canonical(class, NameMode::Type);
        let id = types
            .by_name(NameFamily::Aggregate, &canonical)
            .or_else(|| types.by_name(NameFamily::Aggregate, &format!("struct {canonical}")));
        match id {
            Some(id) => {
                if let Some(rec) = types.records.get_mut(&id) {
                    rec.vtable = slots.clone();
                }
            }
            None => warn!(class, "vtable for unknown class"),
        }
    }
}

/// Stable name for an unnamed aggregate, keyed by kind and declaration
/// site so it stays comparable across builds.
fn anon_name(kind: TypeKind, site: Option<&SourceSite>) -> String {
    let kw = match kind {
        TypeKind::Class => "class",
        TypeKind::Enum => "enum",
        TypeKind::Union => "union",
        _ => "struct",
    };
    match site {
        Some(site) => format!("anon-{kw}-{}-{}", site.file, site.line),
        None => format!("anon-{kw}-unknown-0"),
    }
}

fn strip_kind_prefix(name: &str) -> &str {
    for kw in ["struct ", "union ", "enum "] {
        if let Some(stripped) = name.strip_prefix(kw) {
            return stripped;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan_die_dump;

    fn resolve_dump(dump: &str) -> (TypeTable, Names) {
        let scan = scan_die_dump(dump.as_bytes()).unwrap();
        let lines = crate::scan::LineTables::default();
        let mut names = Names::default();
        let mut types = TypeTable::new();
        let mut registry = SourceRegistry::default();
        let mut resolver = TypeResolver::new(
            &scan.store,
            &scan.units,
            &lines,
            &mut names,
            &mut types,
            &mut registry,
            8,
        );
        resolver.resolve_all();
        (types, names)
    }

    fn find<'t>(types: &'t TypeTable, name: &str) -> &'t TypeRecord {
        types
            .records
            .values()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no type named {name:?}"))
    }

    #[test]
    fn reserved_ids_are_seeded() {
        let types = TypeTable::new();
        assert_eq!(types.get(VOID_ID).unwrap().name, "void");
        assert_eq!(types.get(ELLIPSIS_ID).unwrap().name, "...");
    }

    #[test]
    fn intrinsics_canonicalize() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    base_type            abbrev: 2
             name                 (string) \"long unsigned int\"
             byte_size            (data1) 8
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "unsigned long");
        assert_eq!(rec.kind, TypeKind::Intrinsic);
        assert_eq!(rec.size, Some(8));
    }

    #[test]
    fn struct_members_and_prefix() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    structure_type       abbrev: 2
             name                 (string) \"point\"
             byte_size            (data1) 8
 [    20]      member               abbrev: 3
               name                 (string) \"x\"
               type                 (ref4) [    60]
               data_member_location (data1) 0
 [    30]      member               abbrev: 3
               type                 (ref4) [    60]
               data_member_location (data1) 4
 [    60]    base_type            abbrev: 4
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "struct point");
        assert_eq!(rec.kind, TypeKind::Struct);
        assert_eq!(rec.members.len(), 2);
        assert_eq!(rec.members[0].name, "x");
        assert_eq!(rec.members[1].name, "unnamed0");
        assert_eq!(rec.members[1].offset, 4);
        assert!(rec.copied);
    }

    #[test]
    fn recursive_struct_terminates() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    structure_type       abbrev: 2
             name                 (string) \"node\"
             byte_size            (data1) 8
 [    20]      member               abbrev: 3
               name                 (string) \"next\"
               type                 (ref4) [    40]
               data_member_location (data1) 0
 [    40]    pointer_type         abbrev: 4
             byte_size            (data1) 8
             type                 (ref4) [    10]
";
        let (types, _) = resolve_dump(dump);
        let node = find(&types, "struct node");
        let ptr = find(&types, "struct node*");
        assert_eq!(node.members[0].tid, ptr.id);
        assert_eq!(ptr.base, Some(node.id));
    }

    #[test]
    fn baseless_qualifier_is_void() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    const_type           abbrev: 2
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "void const");
        assert_eq!(rec.base, Some(VOID_ID));
    }

    #[test]
    fn function_pointer_shape() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    pointer_type         abbrev: 2
             byte_size            (data1) 8
             type                 (ref4) [    20]
 [    20]    subroutine_type      abbrev: 3
             type                 (ref4) [    60]
 [    30]      formal_parameter     abbrev: 4
               type                 (ref4) [    70]
 [    38]      unspecified_parameters abbrev: 5
 [    60]    base_type            abbrev: 6
             name                 (string) \"int\"
             byte_size            (data1) 4
 [    70]    base_type            abbrev: 6
             name                 (string) \"double\"
             byte_size            (data1) 8
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "int(*)(double, ...)");
        assert_eq!(rec.kind, TypeKind::FuncPtr);
        assert_eq!(rec.params, vec![find(&types, "double").id, ELLIPSIS_ID]);
        assert_eq!(rec.ret, Some(find(&types, "int").id));
        assert_eq!(rec.size, Some(8));
    }

    #[test]
    fn method_pointer_from_pfn_struct() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    structure_type       abbrev: 2
             byte_size            (data1) 16
             sibling              (ref4) [    40]
 [    18]      member               abbrev: 3
               name                 (string) \"__pfn\"
               type                 (ref4) [    80]
               data_member_location (data1) 0
 [    28]      member               abbrev: 3
               name                 (string) \"__delta\"
               type                 (ref4) [    60]
               data_member_location (data1) 8
 [    40]    subroutine_type      abbrev: 4
             type                 (ref4) [    60]
 [    48]      formal_parameter     abbrev: 5
               type                 (ref4) [    90]
               artificial           (flag_present) yes
 [    50]      formal_parameter     abbrev: 6
               type                 (ref4) [    70]
 [    60]    base_type            abbrev: 7
             name                 (string) \"int\"
             byte_size            (data1) 4
 [    70]    base_type            abbrev: 7
             name                 (string) \"double\"
             byte_size            (data1) 8
 [    80]    pointer_type         abbrev: 8
             byte_size            (data1) 8
             type                 (ref4) [    40]
 [    90]    pointer_type         abbrev: 8
             byte_size            (data1) 8
             type                 (ref4) [    a0]
 [    a0]    structure_type       abbrev: 9
             name                 (string) \"C\"
             byte_size            (data1) 1
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "int(C::*)(double)");
        assert_eq!(rec.kind, TypeKind::MethodPtr);
        let class = find(&types, "struct C");
        assert_eq!(rec.class, Some(class.id));
        // the artificial `this` was dropped
        assert_eq!(rec.params, vec![find(&types, "double").id]);
        assert_eq!(rec.ret, Some(find(&types, "int").id));
        assert_eq!(rec.size, Some(16));
    }

    #[test]
    fn field_pointer_from_ptr_to_member() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    ptr_to_member_type   abbrev: 2
             containing_type      (ref4) [    40]
             type                 (ref4) [    60]
 [    40]    structure_type       abbrev: 3
             name                 (string) \"C\"
             byte_size            (data1) 1
 [    60]    base_type            abbrev: 4
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "int(C::*)");
        assert_eq!(rec.kind, TypeKind::FieldPtr);
        assert_eq!(rec.size, Some(8));
        assert_eq!(rec.class, Some(find(&types, "struct C").id));
    }

    #[test]
    fn arrays_with_and_without_bounds() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    array_type           abbrev: 2
             type                 (ref4) [    60]
 [    18]      subrange_type        abbrev: 3
               upper_bound          (data1) 5
 [    30]    array_type           abbrev: 2
             type                 (ref4) [    60]
 [    38]      subrange_type        abbrev: 4
 [    60]    base_type            abbrev: 5
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let (types, _) = resolve_dump(dump);
        let bounded = find(&types, "int[6]");
        assert_eq!(bounded.size, Some(24));
        let unbounded = find(&types, "int[]");
        assert_eq!(unbounded.size, None);
    }

    #[test]
    fn anonymous_struct_folds_into_typedef() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    structure_type       abbrev: 2
             byte_size            (data1) 4
 [    18]      member               abbrev: 3
               name                 (string) \"x\"
               type                 (ref4) [    60]
               data_member_location (data1) 0
 [    40]    typedef              abbrev: 4
             name                 (string) \"S\"
             type                 (ref4) [    10]
 [    60]    base_type            abbrev: 5
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "struct S");
        assert_eq!(rec.kind, TypeKind::Typedef);
        assert_eq!(rec.members.len(), 1);
        assert_eq!(rec.members[0].name, "x");
        assert_eq!(rec.size, Some(4));
        assert_eq!(rec.base, None);
        // the anonymous base is queued for removal
        let anon = types
            .records
            .values()
            .find(|r| r.name.starts_with("anon-struct"))
            .unwrap();
        assert!(types.folded.contains_key(&anon.id));
    }

    #[test]
    fn template_names_gain_tparams() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    class_type           abbrev: 2
             name                 (string) \"vector<int, std::allocator<int> >\"
             byte_size            (data1) 24
";
        // the namespace DIE wrapping is simulated via a namespace parent
        let dump = dump.replace(
            " [    10]    class_type",
            " [     f]    namespace            abbrev: 9\n             name                 (string) \"std\"\n [    10]      class_type",
        );
        let (types, _) = resolve_dump(&dump);
        let rec = find(&types, "std::vector<int>");
        assert_eq!(rec.kind, TypeKind::Class);
        assert_eq!(rec.tparams, vec!["int"]);
        assert_eq!(rec.namespace.as_deref(), Some("std"));
    }

    #[test]
    fn nested_class_scope_in_name() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    structure_type       abbrev: 2
             name                 (string) \"Outer\"
             byte_size            (data1) 1
 [    20]      structure_type       abbrev: 2
               name                 (string) \"Inner\"
               byte_size            (data1) 1
";
        let (types, _) = resolve_dump(dump);
        let rec = find(&types, "struct Outer::Inner");
        assert_eq!(rec.namespace.as_deref(), Some("Outer"));
    }

    #[test]
    fn forward_declaration_merges_to_definition() {
        let dump = "\
 [     b]  compile_unit         abbrev: 1
 [    10]    structure_type       abbrev: 2
             name                 (string) \"fwd\"
             declaration          (flag_present) yes
 [    20]    structure_type       abbrev: 3
             name                 (string) \"fwd\"
             byte_size            (data1) 4
 [    28]      member               abbrev: 4
               name                 (string) \"x\"
               type                 (ref4) [    60]
               data_member_location (data1) 0
 [    60]    base_type            abbrev: 5
             name                 (string) \"int\"
             byte_size            (data1) 4
";
        let (types, _) = resolve_dump(dump);
        // both records exist until pruning, but the canonical ID is the
        // complete definition
        let complete = types
            .records
            .values()
            .find(|r| r.name == "struct fwd" && r.is_complete())
            .unwrap();
        let decl = types
            .records
            .values()
            .find(|r| r.name == "struct fwd" && !r.is_complete())
            .unwrap();
        assert_eq!(types.get_first(decl.id), complete.id);
        assert_eq!(types.get_first(complete.id), complete.id);
    }
}
