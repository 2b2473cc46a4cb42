/// Book models exchanged with clients.
pub mod book;
/// Title normalization.
pub mod normalize;

pub use book::{Book, BookOrder, Page, Registration};
pub use normalize::{normalize_title, search_key};
