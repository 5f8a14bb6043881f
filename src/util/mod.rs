pub mod subscribe;

pub use subscribe::{NextFn, ObserverSet, Unsubscribe};
