pub mod feed;
pub mod kline;
pub mod rest;
pub mod stream;

pub use feed::MarketFeed;
pub use kline::{Kline, KlineKey, KlineRing};
