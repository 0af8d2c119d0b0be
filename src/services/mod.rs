pub mod distractor_generator;
pub mod fact_catalog;
pub mod mastery_service;

pub use distractor_generator::{
    DifficultyRange, DistractorGenerator, DistractorRequest, NumericDistractorGenerator,
};
pub use fact_catalog::{FactCatalog, InMemoryFactCatalog};
pub use mastery_service::{MasteryService, StaticMasteryService};
