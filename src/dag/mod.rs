pub mod resource_graph;
pub mod validation;
pub mod walker;
