//! Implementation of the processing pipeline: the stitched service and its layers.

pub(crate) mod layers;
pub(crate) mod new_service;
pub mod supergraph;
mod supergraph_service;

pub use supergraph::Request as SupergraphRequest;
pub use supergraph::Response as SupergraphResponse;
pub use supergraph_service::StitchedServiceFactory;
