//! The program: all graphs plus the shared type repository.
//!
//! Types and entities visible across graphs live here; each graph owns its
//! nodes and its frame type. The program object is created once at startup
//! and handed to whole-program passes (callee analysis) by mutable
//! reference.

use crate::ir::entities::{Entity, GraphRef, Type};
use crate::ir::graph::Graph;
use crate::ir::types::{TypeKind, TypeRegistry};
use crate::result::{FirmError, FirmResult};
use firm_entity::PrimaryMap;

/// A whole program under compilation.
pub struct Program {
    /// The shared type and entity repository.
    pub types: TypeRegistry,
    graphs: PrimaryMap<GraphRef, Graph>,
    /// The program entry point, if one was designated.
    pub main_graph: Option<GraphRef>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self {
            types: TypeRegistry::new(),
            graphs: PrimaryMap::new(),
            main_graph: None,
        }
    }

    /// Create a graph implementing `entity` and link the two.
    ///
    /// The graph receives a fresh frame type for the procedure's locals.
    pub fn new_graph(&mut self, entity: Entity) -> FirmResult<GraphRef> {
        if !self.types.is_method_entity(entity) {
            return Err(FirmError::Kind("graph entity must be a method"));
        }
        let name = format!("{}.frame", self.types.entity_name(entity));
        let frame = self.types.new_struct(&name);
        let mut graph = Graph::new(Some(entity));
        graph.frame_type = Some(frame);
        let r = self.graphs.push(graph);
        self.types.entity_mut(entity).graph = Some(r);
        Ok(r)
    }

    /// Access a graph.
    pub fn graph(&self, r: GraphRef) -> &Graph {
        &self.graphs[r]
    }

    /// Access a graph, mutable edition.
    pub fn graph_mut(&mut self, r: GraphRef) -> &mut Graph {
        &mut self.graphs[r]
    }

    /// Iterate over all graph references.
    pub fn graph_refs(&self) -> impl Iterator<Item = GraphRef> + '_ {
        self.graphs.keys()
    }

    /// Number of graphs.
    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    /// The frame type of a method entity.
    ///
    /// Fails with `Kind` when the entity is not a method or has no graph.
    pub fn frame_type(&self, entity: Entity) -> FirmResult<Type> {
        if !self.types.is_method_entity(entity) {
            return Err(FirmError::Kind("frame type of a non-method entity"));
        }
        let graph = self
            .types
            .entity(entity)
            .graph
            .ok_or(FirmError::Kind("method entity has no graph"))?;
        self.graphs[graph]
            .frame_type
            .ok_or(FirmError::Kind("graph has no frame type"))
    }

    /// Create a method type, a global entity of that type, and its graph in
    /// one go. Convenience for frontends.
    pub fn new_method_graph(
        &mut self,
        name: &str,
        params: Vec<Type>,
        results: Vec<Type>,
    ) -> FirmResult<(Entity, GraphRef)> {
        let ty = self.types.new_method(params, results);
        let ent = self.types.new_global_entity(name, ty)?;
        let graph = self.new_graph(ent)?;
        Ok((ent, graph))
    }

    /// The number of results of the method type behind a call-like type.
    pub fn method_result_count(&self, ty: Type) -> usize {
        match &self.types.ty(ty).kind {
            TypeKind::Method { results, .. } => results.len(),
            _ => 0,
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mode;

    #[test]
    fn graphs_link_entities() {
        let mut prog = Program::new();
        let int_ty = prog.types.new_primitive(mode::IS);
        let (ent, graph) = prog
            .new_method_graph("f", vec![int_ty], vec![int_ty])
            .unwrap();
        assert_eq!(prog.types.entity(ent).graph, Some(graph));
        assert_eq!(prog.graph(graph).entity, Some(ent));
        assert!(prog.frame_type(ent).is_ok());
    }

    #[test]
    fn frame_type_of_non_method_fails() {
        let mut prog = Program::new();
        let int_ty = prog.types.new_primitive(mode::IS);
        let v = prog.types.new_global_entity("v", int_ty).unwrap();
        assert_eq!(
            prog.frame_type(v),
            Err(FirmError::Kind("frame type of a non-method entity"))
        );
    }
}
