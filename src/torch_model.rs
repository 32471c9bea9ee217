use std::path::Path;

use tch::{CModule, Device, IValue, Kind, Tensor};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::comet::{CometInput, QualityModel};
use crate::error::ModelError;
use crate::models::{MODEL_FILE, TOKENIZER_FILE};
use crate::utils::ComputeDevice;

const MAX_TOKENS: usize = 512;

/// A COMET estimator traced to TorchScript.
///
/// The traced `forward` takes `(src_ids, src_mask, mt_ids, mt_mask)` for
/// quality estimation, followed by `(ref_ids, ref_mask)` for reference-based
/// models, and returns one score per batch row.
pub struct CometModel {
    id: String,
    model: CModule,
    tokenizer: Tokenizer,
    device: Device,
}

impl CometModel {
    pub fn load(id: &str, dir: &Path, device: ComputeDevice) -> Result<Self, ModelError> {
        let load_err = |detail: String| ModelError::Load {
            id: id.to_string(),
            detail,
        };
        let device: Device = device.into();

        let mut model = CModule::load_on_device(dir.join(MODEL_FILE), device)
            .map_err(|e| load_err(format!("{MODEL_FILE}: {e}")))?;
        model.set_eval();

        let mut tokenizer = Tokenizer::from_file(dir.join(TOKENIZER_FILE))
            .map_err(|e| load_err(format!("{TOKENIZER_FILE}: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| load_err(format!("truncation: {e}")))?;

        Ok(Self {
            id: id.to_string(),
            model,
            tokenizer,
            device,
        })
    }

    fn predict_err(&self, detail: String) -> ModelError {
        ModelError::Predict {
            id: self.id.clone(),
            detail,
        }
    }

    /// Token ids and attention mask, both shaped [batch_size, seq_len].
    fn encode(&self, texts: Vec<&str>) -> Result<(Tensor, Tensor), ModelError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| self.predict_err(format!("tokenization: {e}")))?;
        let batch_size = encodings.len() as i64;
        let seq_len = encodings.first().map(|e| e.len()).unwrap_or(0) as i64;

        let ids: Vec<i64> = encodings
            .iter()
            .flat_map(|e| e.get_ids().iter().map(|&id| id as i64))
            .collect();
        let mask: Vec<i64> = encodings
            .iter()
            .flat_map(|e| e.get_attention_mask().iter().map(|&m| m as i64))
            .collect();

        let ids = Tensor::from_slice(&ids)
            .reshape([batch_size, seq_len])
            .to_device(self.device);
        let mask = Tensor::from_slice(&mask)
            .reshape([batch_size, seq_len])
            .to_device(self.device);
        Ok((ids, mask))
    }
}

/// Flatten the estimator output into one score per row.
fn scores_from_output(output: IValue) -> Result<Vec<f64>, String> {
    let IValue::Tensor(scores) = output else {
        return Err("expected a tensor output".to_string());
    };
    let scores = scores
        .to_device(Device::Cpu)
        .to_kind(Kind::Double)
        .flatten(0, -1);
    Vec::<f64>::try_from(scores).map_err(|e| e.to_string())
}

impl QualityModel for CometModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn predict(&self, batch: &[CometInput<'_>]) -> Result<Vec<f64>, ModelError> {
        // Batch tensors live only inside this closure and are freed before the next batch.
        tch::no_grad(|| {
            let (src_ids, src_mask) = self.encode(batch.iter().map(|i| i.src).collect())?;
            let (mt_ids, mt_mask) = self.encode(batch.iter().map(|i| i.mt).collect())?;
            let mut inputs = vec![
                IValue::from(src_ids),
                IValue::from(src_mask),
                IValue::from(mt_ids),
                IValue::from(mt_mask),
            ];

            let references: Option<Vec<&str>> = batch.iter().map(|i| i.reference).collect();
            if let Some(references) = references {
                let (ref_ids, ref_mask) = self.encode(references)?;
                inputs.push(IValue::from(ref_ids));
                inputs.push(IValue::from(ref_mask));
            }

            let output = self
                .model
                .forward_is(&inputs)
                .map_err(|e| self.predict_err(format!("forward pass: {e}")))?;
            scores_from_output(output).map_err(|detail| self.predict_err(detail))
        })
    }
}
