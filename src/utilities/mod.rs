pub mod bounding_box;
pub mod collections;
pub mod math_helper;
pub mod memory;
pub mod thread_dispatcher;
