//! Route table mapping path prefixes to live kernel addresses.

mod table;

pub use table::RouteTable;
