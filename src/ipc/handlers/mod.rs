pub mod classes;
pub mod compositions;
pub mod core;
pub mod eleves;
pub mod notes;
pub mod stats;
pub mod suivi;
