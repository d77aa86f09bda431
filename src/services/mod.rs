pub mod download;
pub mod lyric_cache;
pub mod search;
