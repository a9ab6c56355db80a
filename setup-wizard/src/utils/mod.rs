pub mod logging;
pub mod os_detection;
pub mod path_resolver;
pub mod runtime;
pub mod validation;
