//! Default values for discovery and model load parameters.

/// File extension of the native model format.
pub const MODEL_EXTENSION: &str = "gguf";

pub const GPU_LAYER_COUNT: i32 = 20;
pub const MAIN_GPU: i32 = 0;
pub const SEED: u32 = u32::MAX;
pub const BATCH_SIZE: u32 = 512;
pub const USE_MMAP: bool = true;
pub const USE_MLOCK: bool = false;

pub fn extensions() -> Vec<String> { vec![MODEL_EXTENSION.to_string()] }
pub fn gpu_layer_count() -> i32 { GPU_LAYER_COUNT }
pub fn main_gpu() -> i32 { MAIN_GPU }
pub fn seed() -> u32 { SEED }
pub fn batch_size() -> u32 { BATCH_SIZE }
pub fn use_mmap() -> bool { USE_MMAP }
pub fn use_mlock() -> bool { USE_MLOCK }
