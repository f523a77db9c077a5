//! Textual LVM2 metadata: the tree parser (`value`) and the conventions the
//! volume-group builder relies on to read well-known sections out of it.

pub mod value;

pub use value::{find_section, find_value, parse, Node, Value};
