pub mod amplicon;
pub mod batch;
pub mod cutsite;
pub mod design;
pub mod designer;
pub mod error;
pub mod genomes;
pub mod input;
pub mod precomputed;
