pub mod node;
pub mod table;
