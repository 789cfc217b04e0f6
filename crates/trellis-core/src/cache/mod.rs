//! Bounded caches.

mod second_chance;

pub use second_chance::SecondChanceLru;
