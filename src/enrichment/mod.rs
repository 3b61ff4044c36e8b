// =============================================================================
// Enrichment Module
// =============================================================================
//
// The hot path: one cycle reads the raw snapshot, merges per-ticker rolling
// state and derived indicators, byte-dedups against the previous cycle, and
// writes the sparse delta to the shared hash before handing the enriched set
// to the rule network.

pub mod change_detector;
pub mod pipeline;

pub use change_detector::ChangeDetector;
pub use pipeline::EnrichmentPipeline;
