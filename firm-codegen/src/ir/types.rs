//! The type and entity system.
//!
//! Types describe the shape of values and storage: primitives carry a mode,
//! pointers point at types, arrays repeat an element type, methods list
//! parameter and result types, and the compound kinds (struct, union, class)
//! collect member entities. Class inheritance forms a DAG separate from the
//! type DAG; subtype/supertype queries go through a lazily materialized
//! transitive-closure cache.
//!
//! Entities are named storage locations or functions: a member field, a
//! global variable, a method. An entity knows its owner type, its own type,
//! its linkage, an optional graph (for methods), an optional initializer
//! tree (for globals), and — for virtual dispatch — which entities it
//! overwrites and which overwrite it.

use crate::ir::entities::{Entity, GraphRef, Ident, Type};
use crate::ir::mode::{self, Mode};
use crate::ir::tarval::Tarval;
use crate::result::{FirmError, FirmResult};
use bitflags::bitflags;
use firm_entity::packed_option::PackedOption;
use firm_entity::{EntitySet, PrimaryMap, SecondaryMap};
use std::collections::HashMap;

/// The kind of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    /// A primitive value type described by a mode.
    Primitive {
        /// The mode of values of this type.
        mode: Mode,
    },
    /// A pointer type.
    Pointer {
        /// The pointed-to type.
        points_to: Type,
    },
    /// An array type.
    Array {
        /// The element type.
        element: Type,
        /// Number of elements, if statically known.
        length: Option<u32>,
    },
    /// A method (function) type.
    Method {
        /// Parameter types, in order.
        params: Vec<Type>,
        /// Result types, in order.
        results: Vec<Type>,
    },
    /// A struct: members at fixed offsets.
    Struct,
    /// A union: members all at offset 0.
    Union,
    /// A class: a struct that takes part in inheritance.
    Class,
}

/// Data stored per type.
#[derive(Clone, Debug)]
pub struct TypeData {
    /// What kind of type this is.
    pub kind: TypeKind,
    /// The type's name, if it has one.
    pub ident: Option<Ident>,
    /// Size in bytes; 0 while the type is still incomplete.
    pub size: u32,
    /// Alignment in bytes.
    pub align: u32,
    /// Member entities of compound types.
    pub members: Vec<Entity>,
    /// Direct supertypes (classes only).
    pub supertypes: Vec<Type>,
    /// Direct subtypes (classes only).
    pub subtypes: Vec<Type>,
    /// Visited generation for the type walker.
    pub visited: u64,
}

/// Visibility of an entity towards other compilation units.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Visible only inside this unit.
    #[default]
    Local,
    /// Defined here, visible outside.
    External,
    /// Declared here, defined elsewhere.
    ExternalDeclared,
}

bitflags! {
    /// Additional linkage properties of an entity.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct Linkage: u8 {
        /// The entity's contents never change after initialization.
        const CONSTANT = 1;
        /// Weak definition; may be overridden at link time.
        const WEAK = 2;
    }
}

/// A constant initializer tree for a global entity.
#[derive(Clone, Debug, PartialEq)]
pub enum Initializer {
    /// Zero-initialized.
    Null,
    /// A scalar constant.
    Tarval(Tarval),
    /// The address of another entity.
    Address(Entity),
    /// A compound of sub-initializers, one per member/element.
    Compound(Vec<Initializer>),
}

/// Data stored per entity.
#[derive(Clone, Debug)]
pub struct EntityData {
    /// The entity's name.
    pub ident: Ident,
    /// The compound type this entity is a member of, if any.
    pub owner: PackedOption<Type>,
    /// The entity's own type.
    pub ty: Type,
    /// Visibility towards other units.
    pub visibility: Visibility,
    /// Linkage flags.
    pub linkage: Linkage,
    /// The graph implementing this entity, for methods with a body.
    pub graph: Option<GraphRef>,
    /// Initializer tree for globals.
    pub initializer: Option<Initializer>,
    /// Byte offset within the owner compound.
    pub offset: i32,
    /// Entities this one overrides (virtual dispatch, upward).
    pub overwrites: Vec<Entity>,
    /// Entities overriding this one (virtual dispatch, downward).
    pub overwritten_by: Vec<Entity>,
}

/// The program-wide repository of types, entities and interned identifiers.
pub struct TypeRegistry {
    idents: Vec<String>,
    ident_index: HashMap<String, Ident>,
    types: PrimaryMap<Type, TypeData>,
    entities: PrimaryMap<Entity, EntityData>,
    /// Transitive closure over the inheritance DAG; rebuilt lazily.
    closure_valid: bool,
    up_sets: SecondaryMap<Type, EntitySet<Type>>,
    down_sets: SecondaryMap<Type, EntitySet<Type>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            idents: Vec::new(),
            ident_index: HashMap::new(),
            types: PrimaryMap::new(),
            entities: PrimaryMap::new(),
            closure_valid: false,
            up_sets: SecondaryMap::new(),
            down_sets: SecondaryMap::new(),
        }
    }

    /// Intern an identifier.
    pub fn ident(&mut self, s: &str) -> Ident {
        if let Some(&id) = self.ident_index.get(s) {
            return id;
        }
        let id = Ident::from_u32(self.idents.len() as u32);
        self.idents.push(s.to_string());
        self.ident_index.insert(s.to_string(), id);
        id
    }

    /// The string of an interned identifier.
    pub fn ident_str(&self, id: Ident) -> &str {
        &self.idents[id.as_u32() as usize]
    }

    fn new_type(&mut self, kind: TypeKind, ident: Option<Ident>, size: u32, align: u32) -> Type {
        self.types.push(TypeData {
            kind,
            ident,
            size,
            align,
            members: Vec::new(),
            supertypes: Vec::new(),
            subtypes: Vec::new(),
            visited: 0,
        })
    }

    /// Create a primitive type for `mode`.
    pub fn new_primitive(&mut self, m: Mode) -> Type {
        self.new_type(TypeKind::Primitive { mode: m }, None, m.bytes(), m.bytes())
    }

    /// Create a pointer type.
    pub fn new_pointer(&mut self, points_to: Type) -> Type {
        let bytes = mode::P.bytes();
        self.new_type(TypeKind::Pointer { points_to }, None, bytes, bytes)
    }

    /// Create an array type.
    pub fn new_array(&mut self, element: Type, length: Option<u32>) -> Type {
        let elem_size = self.types[element].size;
        let elem_align = self.types[element].align.max(1);
        let size = length.map_or(0, |n| n * elem_size);
        self.new_type(TypeKind::Array { element, length }, None, size, elem_align)
    }

    /// Create a method type.
    pub fn new_method(&mut self, params: Vec<Type>, results: Vec<Type>) -> Type {
        self.new_type(TypeKind::Method { params, results }, None, 0, 1)
    }

    /// Create a struct type.
    pub fn new_struct(&mut self, name: &str) -> Type {
        let id = self.ident(name);
        self.new_type(TypeKind::Struct, Some(id), 0, 1)
    }

    /// Create a union type.
    pub fn new_union(&mut self, name: &str) -> Type {
        let id = self.ident(name);
        self.new_type(TypeKind::Union, Some(id), 0, 1)
    }

    /// Create a class type.
    pub fn new_class(&mut self, name: &str) -> Type {
        let id = self.ident(name);
        self.new_type(TypeKind::Class, Some(id), 0, 1)
    }

    /// Access a type's data.
    pub fn ty(&self, t: Type) -> &TypeData {
        &self.types[t]
    }

    /// Access a type's data, mutable edition. Structural edits through this
    /// accessor do not invalidate the closure cache; use the dedicated
    /// mutators for inheritance edges.
    pub fn ty_mut(&mut self, t: Type) -> &mut TypeData {
        &mut self.types[t]
    }

    /// Iterate over all types.
    pub fn types(&self) -> impl Iterator<Item = Type> + '_ {
        self.types.keys()
    }

    /// Iterate over all entities.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.keys()
    }

    /// Access an entity's data.
    pub fn entity(&self, e: Entity) -> &EntityData {
        &self.entities[e]
    }

    /// Access an entity's data, mutable edition.
    pub fn entity_mut(&mut self, e: Entity) -> &mut EntityData {
        &mut self.entities[e]
    }

    /// The name of an entity.
    pub fn entity_name(&self, e: Entity) -> &str {
        self.ident_str(self.entities[e].ident)
    }

    /// Create an entity owned by a compound type.
    ///
    /// Fails with `DuplicateIdent` if the owner scope already has a member
    /// of this name.
    pub fn new_entity(&mut self, owner: Type, name: &str, ty: Type) -> FirmResult<Entity> {
        let id = self.ident(name);
        if self.types[owner]
            .members
            .iter()
            .any(|&m| self.entities[m].ident == id)
        {
            return Err(FirmError::DuplicateIdent(name.to_string()));
        }
        let ent = self.entities.push(EntityData {
            ident: id,
            owner: owner.into(),
            ty,
            visibility: Visibility::default(),
            linkage: Linkage::default(),
            graph: None,
            initializer: None,
            offset: -1,
            overwrites: Vec::new(),
            overwritten_by: Vec::new(),
        });
        self.types[owner].members.push(ent);
        Ok(ent)
    }

    /// Create a global entity with no owner (a free-standing global or
    /// function).
    pub fn new_global_entity(&mut self, name: &str, ty: Type) -> FirmResult<Entity> {
        let id = self.ident(name);
        if self
            .entities
            .values()
            .any(|e| e.owner.is_none() && e.ident == id)
        {
            return Err(FirmError::DuplicateIdent(name.to_string()));
        }
        Ok(self.entities.push(EntityData {
            ident: id,
            owner: None.into(),
            ty,
            visibility: Visibility::default(),
            linkage: Linkage::default(),
            graph: None,
            initializer: None,
            offset: -1,
            overwrites: Vec::new(),
            overwritten_by: Vec::new(),
        }))
    }

    /// Is this a method entity?
    pub fn is_method_entity(&self, e: Entity) -> bool {
        matches!(self.types[self.entities[e].ty].kind, TypeKind::Method { .. })
    }

    /// Register `sub` as a direct subclass of `class`.
    ///
    /// Invalidates the transitive-closure cache.
    pub fn add_subclass(&mut self, class: Type, sub: Type) {
        debug_assert!(matches!(self.types[class].kind, TypeKind::Class));
        debug_assert!(matches!(self.types[sub].kind, TypeKind::Class));
        self.types[class].subtypes.push(sub);
        self.types[sub].supertypes.push(class);
        self.closure_valid = false;
    }

    /// Register that `ent` overrides `overwritten` in a superclass.
    pub fn add_entity_overwrites(&mut self, ent: Entity, overwritten: Entity) {
        self.entities[ent].overwrites.push(overwritten);
        self.entities[overwritten].overwritten_by.push(ent);
    }

    /// Recompute the inheritance transitive closure.
    ///
    /// For each class two sets are materialized: the upward-reachable
    /// ancestors and the downward-reachable descendants. The walk visits all
    /// subtypes of a class before the class itself, so shared diamonds are
    /// processed once. Inheritance cycles are forbidden, but may transiently
    /// appear while a frontend is still wiring the hierarchy; the visited
    /// marking makes the walk terminate on them regardless.
    pub fn compute_inheritance_closure(&mut self) {
        let all: Vec<Type> = self.types.keys().collect();
        for &t in &all {
            self.up_sets[t].clear();
            self.down_sets[t].clear();
        }
        // Down-sets: post-order over the subtype DAG, children first.
        let mut done: EntitySet<Type> = EntitySet::new();
        for &root in &all {
            if !matches!(self.types[root].kind, TypeKind::Class) {
                continue;
            }
            // Iterative post-order: (type, next child index).
            let mut stack: Vec<(Type, usize)> = vec![(root, 0)];
            let mut on_stack: EntitySet<Type> = EntitySet::new();
            on_stack.insert(root);
            while let Some(&(t, child)) = stack.last() {
                let subs = self.types[t].subtypes.clone();
                if child < subs.len() {
                    let s = subs[child];
                    stack.last_mut().unwrap().1 += 1;
                    if !done.contains(s) && !on_stack.contains(s) {
                        on_stack.insert(s);
                        stack.push((s, 0));
                    }
                } else {
                    stack.pop();
                    on_stack.remove(t);
                    if done.insert(t) {
                        let mut set = std::mem::take(&mut self.down_sets[t]);
                        for &s in &subs {
                            set.insert(s);
                            for d in self.down_sets[s].keys().collect::<Vec<_>>() {
                                if self.down_sets[s].contains(d) {
                                    set.insert(d);
                                }
                            }
                        }
                        self.down_sets[t] = set;
                    }
                }
            }
        }
        // Up-sets are the inverse of down-sets.
        for &t in &all {
            let descendants: Vec<Type> = all
                .iter()
                .copied()
                .filter(|&d| self.down_sets[t].contains(d))
                .collect();
            for d in descendants {
                self.up_sets[d].insert(t);
            }
        }
        self.closure_valid = true;
    }

    /// Is the closure cache up to date?
    pub fn closure_valid(&self) -> bool {
        self.closure_valid
    }

    /// Is `low` a (possibly transitive) subclass of `high`?
    ///
    /// A class counts as a subclass of itself. Uses the closure cache when
    /// valid, a recursive ascent otherwise.
    pub fn is_subclass_of(&self, low: Type, high: Type) -> bool {
        if low == high {
            return true;
        }
        if self.closure_valid {
            return self.down_sets[high].contains(low);
        }
        // Worklist ascent through the supertypes.
        let mut work = vec![low];
        let mut seen: EntitySet<Type> = EntitySet::new();
        while let Some(t) = work.pop() {
            if !seen.insert(t) {
                continue;
            }
            for &sup in &self.types[t].supertypes {
                if sup == high {
                    return true;
                }
                work.push(sup);
            }
        }
        false
    }

    /// Resolve dynamic dispatch: find the most specific override of
    /// `static_ent` that applies to objects of `dynamic_class`.
    ///
    /// Descends the overwritten-by tree, accepting an override whenever its
    /// owner is a superclass of (or equal to) the dynamic class, i.e. lies
    /// on the path from the dynamic class up to the static entity's owner.
    pub fn resolve_entity_polymorphy(&self, dynamic_class: Type, static_ent: Entity) -> Entity {
        let mut best = static_ent;
        let mut work: Vec<Entity> = self.entities[static_ent].overwritten_by.clone();
        let mut seen: EntitySet<Entity> = EntitySet::new();
        while let Some(e) = work.pop() {
            if !seen.insert(e) {
                continue;
            }
            if let Some(owner) = self.entities[e].owner.expand() {
                if self.is_subclass_of(dynamic_class, owner) {
                    // A deeper owner is more specific.
                    let best_owner = self.entities[best].owner.expand();
                    let more_specific = match best_owner {
                        Some(bo) => self.is_subclass_of(owner, bo),
                        None => true,
                    };
                    if more_specific {
                        best = e;
                    }
                    work.extend(self.entities[e].overwritten_by.iter().copied());
                }
            }
        }
        best
    }

    /// All concrete implementations reachable from `ent` through the
    /// overwritten-by DAG, including `ent` itself when it has a graph.
    pub fn method_implementations(&self, ent: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut work = vec![ent];
        let mut seen: EntitySet<Entity> = EntitySet::new();
        while let Some(e) = work.pop() {
            if !seen.insert(e) {
                continue;
            }
            if self.entities[e].graph.is_some()
                || self.entities[e].visibility == Visibility::ExternalDeclared
            {
                out.push(e);
            }
            work.extend(self.entities[e].overwritten_by.iter().copied());
        }
        out.sort();
        out
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;

    fn small_hierarchy(reg: &mut TypeRegistry) -> (Type, Type, Type) {
        // A <- B <- C
        let a = reg.new_class("A");
        let b = reg.new_class("B");
        let c = reg.new_class("C");
        reg.add_subclass(a, b);
        reg.add_subclass(b, c);
        (a, b, c)
    }

    #[test]
    fn duplicate_members_rejected() {
        let mut reg = TypeRegistry::new();
        let int_ty = reg.new_primitive(mode::IS);
        let s = reg.new_struct("point");
        assert!(reg.new_entity(s, "x", int_ty).is_ok());
        assert_eq!(
            reg.new_entity(s, "x", int_ty),
            Err(FirmError::DuplicateIdent("x".to_string()))
        );
        assert!(reg.new_entity(s, "y", int_ty).is_ok());
    }

    #[test]
    fn subclass_queries_with_and_without_cache() {
        let mut reg = TypeRegistry::new();
        let (a, b, c) = small_hierarchy(&mut reg);

        // Cache not built yet: recursive ascent.
        assert!(reg.is_subclass_of(c, a));
        assert!(reg.is_subclass_of(b, a));
        assert!(!reg.is_subclass_of(a, c));

        reg.compute_inheritance_closure();
        assert!(reg.closure_valid());
        assert!(reg.is_subclass_of(c, a));
        assert!(!reg.is_subclass_of(a, b));

        // Structural change invalidates.
        let d = reg.new_class("D");
        reg.add_subclass(c, d);
        assert!(!reg.closure_valid());
        assert!(reg.is_subclass_of(d, a));
    }

    #[test]
    fn polymorphy_resolution() {
        let mut reg = TypeRegistry::new();
        let (a, b, c) = small_hierarchy(&mut reg);
        let m_ty = reg.new_method(vec![], vec![]);
        let fa = reg.new_entity(a, "f", m_ty).unwrap();
        let fb = reg.new_entity(b, "f", m_ty).unwrap();
        reg.add_entity_overwrites(fb, fa);

        // C has no override of its own; B's applies.
        assert_eq!(reg.resolve_entity_polymorphy(c, fa), fb);
        assert_eq!(reg.resolve_entity_polymorphy(b, fa), fb);
        assert_eq!(reg.resolve_entity_polymorphy(a, fa), fa);
    }
}
