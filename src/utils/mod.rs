pub mod logging;

pub use logging::{init_tracing, log_batch_progress, log_startup, print_final_stats, truncate_text};
