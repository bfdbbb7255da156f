mod accounts;
mod categories;
mod counts;
mod feeds;
mod icon;
mod messages;
mod schema;
mod types;

pub use accounts::{NodeKind, OutlineNode, StoredNode, TreeNode};
pub use feeds::DEFAULT_UPDATE_INTERVAL;
pub use icon::{Icon, IconCodec, RawIconCodec};
pub use schema::Database;
pub use types::{
    decode_enclosures, encode_enclosures, Account, AutoUpdate, Category, DatabaseError, DecodeError,
    Enclosure, Feed, FeedFormat, Message, MessageCounts, MessageList, NewFeed, StoredMessage,
};
