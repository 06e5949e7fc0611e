//! Chat-completion provider implementations

mod groq;

pub use groq::GroqProvider;
