pub mod content;
pub mod loaders;
pub mod process;
pub mod slot;

pub use content::{ConceptDescriptor, ContentUnit, Fact, Question, QuestionMeta, UnitMeta, QUESTIONS_PER_UNIT};
pub use loaders::{load_all_catalog_files, load_fact_catalog, FactCatalogFile};
pub use process::{BatchHandle, PreparationProcess, Priority, ProcessId, ProcessStatus, Stage, StageRecord};
pub use slot::{CacheState, SlotId, SlotState};
