// streamgen: stream code generator
//
// Library root. Lowers a checked dataflow program tree to per-domain
// header, initialization and processing code sections.

pub mod ast;
pub mod atom;
pub mod code;
pub mod depgraph;
pub mod diag;
pub mod generate;
pub mod id;
pub mod pipeline;
pub mod rate;
pub mod scope;
pub mod stitch;
pub mod templates;
