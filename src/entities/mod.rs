pub mod lyric;
