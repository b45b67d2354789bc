//! Cartography: robots.txt, sitemaps, crawl fallback, and URL discovery.

pub mod crawler;
pub mod discovery;
pub mod robots;
pub mod sitemap;
pub mod urls;
