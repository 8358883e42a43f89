pub mod catalog;
pub mod profile;
pub mod session;

pub use catalog::{Catalog, FeatureColumn, FeatureSchema, Item, RawItem, SchemaError};
pub use profile::{memo_key, ClientProfile, Mention, MentionKind, Polarity, Resolution};
pub use session::{Message, Sender, Session};
