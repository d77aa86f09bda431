pub mod lyric_engine;
