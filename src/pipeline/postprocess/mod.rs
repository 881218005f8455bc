//! Post-processing effects

mod bloom;
mod present;

pub use bloom::{BloomChain, BloomParams, BloomPrograms, BLOOM_FORMAT, BLOOM_LEVELS, BLUR_SLOT, BRIGHT_SLOT};
pub use present::PresentPass;
