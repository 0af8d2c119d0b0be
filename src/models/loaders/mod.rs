pub mod toml_loader;

pub use toml_loader::{
    load_all_catalog_files, load_fact_catalog, parse_fact_catalog, ConceptFacts, FactCatalogFile,
};
