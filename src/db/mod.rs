pub mod locks;
pub mod queue_items;
