// squigmap: streaming read-until mapping of nanopore raw current signal.
//
// The host feeds raw chunks to a per-channel `Mapper`; events are detected
// and normalized on the fly, and every event extends a bounded population of
// partial alignments through an FM-index until the seed tracker confirms a
// reference location or a budget runs out. Index construction, file I/O, and
// cross-channel scheduling belong to the host.

pub mod event_detector; // Raw-sample segmentation into events
pub mod fmi; // FM-index contract consumed by the mapper
pub mod map_opt;
pub mod mapper;
pub mod normalizer; // Event normalization against the pore model
pub mod path; // Partial alignment path buffers
pub mod pore_model;
pub mod range;
pub mod read_buffer;
pub mod seed_tracker; // Incremental seed clustering and confidence gates

pub use fmi::{Fmi, RefLoc};
pub use map_opt::MapOpt;
pub use mapper::{Mapper, State};
pub use pore_model::PoreModel;
pub use read_buffer::{Chunk, ReadLoc};
