mod names;

pub use names::Catalog;
