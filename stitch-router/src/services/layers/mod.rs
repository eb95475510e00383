//! Layers wrapped around the stitched service.

pub(crate) mod response_cache;
