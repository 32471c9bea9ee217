use std::path::Path;

use tracing::{info, warn};

/// A segment split on whitespace, kept alongside its text.
pub struct Sequence {
    pub text: String,
    pub word_vector: Vec<String>,
    pub n_words: usize,
}

impl Sequence {
    pub fn new(text: &str) -> Self {
        let word_vec = str_to_word_vec(text);
        let word_vec_len = word_vec.len();
        Sequence {
            text: text.to_string(),
            word_vector: word_vec,
            n_words: word_vec_len,
        }
    }

    /// Same as `new` but with every word lower-cased.
    pub fn lowercased(text: &str) -> Self {
        Self::new(&text.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.n_words == 0
    }
}

pub fn str_to_word_vec(string: &str) -> Vec<String> {
    string.split_whitespace().map(|s| s.to_string()).collect()
}

/// Where learned models run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
}

impl ComputeDevice {
    /// Pick CUDA when requested and present, otherwise fall back to the CPU.
    pub fn detect(use_gpu: bool) -> Self {
        let device = if use_gpu && cuda_available() {
            ComputeDevice::Cuda(0)
        } else {
            ComputeDevice::Cpu
        };
        match device {
            ComputeDevice::Cuda(idx) => info!(device = "cuda", index = idx, "using accelerator"),
            ComputeDevice::Cpu if use_gpu => {
                warn!("GPU not available, learned metrics will run on the CPU")
            }
            ComputeDevice::Cpu => info!(device = "cpu", "GPU disabled by configuration"),
        }
        device
    }
}

#[cfg(feature = "comet")]
fn cuda_available() -> bool {
    tch::Cuda::is_available()
}

#[cfg(not(feature = "comet"))]
fn cuda_available() -> bool {
    false
}

#[cfg(feature = "comet")]
impl From<ComputeDevice> for tch::Device {
    fn from(device: ComputeDevice) -> Self {
        match device {
            ComputeDevice::Cpu => tch::Device::Cpu,
            ComputeDevice::Cuda(idx) => tch::Device::Cuda(idx),
        }
    }
}

/// Delete cached model directories. Failures are logged, never fatal.
/// Returns how many directories were removed.
pub fn remove_model_cache<P: AsRef<Path>>(paths: &[P]) -> usize {
    let mut removed = 0;
    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            continue;
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted model cache");
                removed += 1;
            }
            Err(err) => warn!(path = %path.display(), %err, "could not delete model cache"),
        }
    }
    removed
}
