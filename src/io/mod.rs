pub mod convert;
pub mod doc;

pub use convert::{board_from_json, routes_to_doc, routes_to_json, Converter};
pub use doc::{BoardDoc, RoutesDoc};
