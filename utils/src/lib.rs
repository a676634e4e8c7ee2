mod logging;
mod string_utils;

pub use logging::{level_from_env, setup_logging};
pub use string_utils::truncate_chars;
