pub mod auction;
pub mod ledger;
pub mod model;
pub mod room;
pub mod store;
pub mod turn_order;
pub mod wishlist;

pub use model::{
    Auction, AuctionStatus, Bid, Draft, DraftMode, DraftSettings, DraftStatus, ItemId, Participant,
    Pick, Team, WishlistItem,
};
pub use store::{ApplyOutcome, DraftStore, Snapshot, StoreError};
